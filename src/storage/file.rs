use std::fs::File;
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt};

use super::image_storage::{ImageStorage, Ownership};

/// A backing image stored in a regular file.
pub struct FileBackedStorage(File);

impl FileBackedStorage {
    /// Wraps an open handle to the image file.
    #[must_use]
    pub fn new(file: File) -> Self {
        FileBackedStorage(file)
    }
}

impl ImageStorage for FileBackedStorage {
    fn read_exact_at(&self, buf: &mut [u8], position: u64) -> io::Result<()> {
        self.0.read_exact_at(buf, position)
    }

    fn write_all_at(&self, buf: &[u8], position: u64) -> io::Result<()> {
        self.0.write_all_at(buf, position)
    }

    fn flush(&self) -> io::Result<()> {
        // `File` performs no userspace buffering; writes have already reached
        // the kernel.
        Ok(())
    }

    fn sync_data(&self) -> io::Result<()> {
        self.0.sync_data()
    }

    fn sync_all(&self) -> io::Result<()> {
        self.0.sync_all()
    }

    fn ownership(&self) -> io::Result<Ownership> {
        let metadata = self.0.metadata()?;

        Ok(Ownership {
            uid: metadata.uid(),
            gid: metadata.gid(),
        })
    }
}
