//! Offline consistency check for bmpfs images.
//!
//! Loads the metadata region read-only and verifies the structural
//! invariants: every slot's run lies inside the data region, no two runs
//! intersect, the bitmap agrees with the table, directories own no data,
//! and no file is larger than the blocks it owns.

use std::{fs::File, path::PathBuf, process};

use anyhow::{Context, Result};
use clap::Parser;

use bmpfs::fs::BmpFs;
use bmpfs::storage::FileBackedStorage;

#[derive(Parser)]
struct Args {
    /// Backing BMP image
    image: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let image = File::options()
        .read(true)
        .open(&args.image)
        .with_context(|| format!("opening {}", args.image.display()))?;
    let fs = BmpFs::new(FileBackedStorage::new(image))
        .with_context(|| format!("reading {}", args.image.display()))?;

    let violations = fs.check_invariants();
    if !violations.is_empty() {
        for violation in &violations {
            eprintln!("{}: {violation}", args.image.display());
        }
        process::exit(1);
    }

    println!(
        "{}: clean: {}x{} image, {} files, {}/{} blocks in use",
        args.image.display(),
        fs.info().width,
        fs.info().height,
        fs.entries().count(),
        fs.bitmap().used_blocks(),
        fs.bitmap().total_blocks(),
    );
    Ok(())
}
