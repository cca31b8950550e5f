use std::io;

/// Ownership of the backing image itself, reported for the synthetic root
/// directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ownership {
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
}

/// Positioned I/O on a backing image.
///
/// Positions are absolute file offsets; the filesystem never relies on a
/// cursor. Short transfers are errors, not partial results.
pub trait ImageStorage {
    /// Fills `buf` from the image, starting at `position`.
    fn read_exact_at(&self, buf: &mut [u8], position: u64) -> io::Result<()>;

    /// Writes all of `buf` to the image, starting at `position`.
    fn write_all_at(&self, buf: &[u8], position: u64) -> io::Result<()>;

    /// Pushes any buffered writes toward the image.
    fn flush(&self) -> io::Result<()>;

    /// Syncs file contents to durable storage.
    fn sync_data(&self) -> io::Result<()>;

    /// Syncs file contents and metadata to durable storage.
    fn sync_all(&self) -> io::Result<()>;

    /// Who owns the backing image.
    fn ownership(&self) -> io::Result<Ownership> {
        Ok(Ownership::default())
    }
}
