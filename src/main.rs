//! The mount binary.
//!
//! ```text
//! bmpfs [bridge-options] <mountpoint> -o image=<path-to-bmp>
//! ```

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use log::info;

use bmpfs::disk_format::bmp::{self, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use bmpfs::fs::BmpFs;
use bmpfs::fuse::BmpFuse;
use bmpfs::storage::FileBackedStorage;

#[derive(Parser)]
#[command(name = "bmpfs", version)]
struct Args {
    /// FUSE mountpoint
    mountpoint: PathBuf,

    /// Mount options, comma separated. `image=<path>` selects the backing
    /// BMP image and is required; everything else passes to the bridge.
    #[arg(short = 'o', value_delimiter = ',')]
    options: Vec<String>,
}

fn main() {
    env_logger::init();

    // Exit 1 on any option-parse failure, clap's own default of 2 included.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            process::exit(1);
        }
    };

    if let Err(error) = run(args) {
        eprintln!("bmpfs: {error:#}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut image_path: Option<PathBuf> = None;
    let mut mount_options = vec![MountOption::FSName("bmpfs".to_owned())];
    for option in &args.options {
        if let Some(path) = option.strip_prefix("image=") {
            image_path = Some(path.into());
        } else {
            mount_options.push(bridge_option(option));
        }
    }

    let Some(image_path) = image_path else {
        eprintln!("Usage: bmpfs [FUSE options] <mountpoint> -o image=<image_file.bmp>");
        process::exit(1);
    };

    let file = open_or_create(&image_path)?;
    let fs = BmpFs::new(FileBackedStorage::new(file))
        .with_context(|| format!("reading backing image {}", image_path.display()))?;

    fuser::mount2(BmpFuse::new(fs), &args.mountpoint, &mount_options)
        .with_context(|| format!("mounting at {}", args.mountpoint.display()))?;
    Ok(())
}

/// Opens the backing image read-write, creating a default-sized image first
/// if none exists.
fn open_or_create(path: &Path) -> Result<File> {
    let open = || File::options().read(true).write(true).open(path);

    match open() {
        Ok(file) => Ok(file),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            info!(
                "{} does not exist, creating a {DEFAULT_WIDTH}x{DEFAULT_HEIGHT} image",
                path.display()
            );
            bmp::create_image(path, DEFAULT_WIDTH, DEFAULT_HEIGHT)
                .with_context(|| format!("creating backing image {}", path.display()))?;
            open().with_context(|| format!("reopening created image {}", path.display()))
        }
        Err(error) => {
            Err(error).with_context(|| format!("opening backing image {}", path.display()))
        }
    }
}

/// Maps one `-o` token to a bridge mount option. Unrecognized tokens pass
/// through verbatim.
fn bridge_option(option: &str) -> MountOption {
    match option {
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "dirsync" => MountOption::DirSync,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "auto_unmount" => MountOption::AutoUnmount,
        "default_permissions" => MountOption::DefaultPermissions,
        other => MountOption::CUSTOM(other.to_owned()),
    }
}
