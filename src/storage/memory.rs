use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::image_storage::ImageStorage;

/// A backing image held in a growable byte vector.
///
/// Clones share the underlying buffer, which lets tests unmount a filesystem
/// and reopen the same image without touching disk.
#[derive(Clone, Default)]
pub struct MemoryStorage(Arc<Mutex<Vec<u8>>>);

impl MemoryStorage {
    /// An empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether the image holds no bytes yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl ImageStorage for MemoryStorage {
    fn read_exact_at(&self, buf: &mut [u8], position: u64) -> io::Result<()> {
        let bytes = self.0.lock();
        let start = usize::try_from(position)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;

        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], position: u64) -> io::Result<()> {
        let mut bytes = self.0.lock();
        let start = usize::try_from(position)
            .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn sync_data(&self) -> io::Result<()> {
        Ok(())
    }

    fn sync_all(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_grow_the_image() {
        let storage = MemoryStorage::new();
        storage.write_all_at(b"abc", 4).unwrap();
        assert_eq!(storage.len(), 7);

        let mut buf = [0; 7];
        storage.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"\0\0\0\0abc");
    }

    #[test]
    fn short_reads_are_errors() {
        let storage = MemoryStorage::new();
        storage.write_all_at(b"abc", 0).unwrap();

        let mut buf = [0; 4];
        assert!(storage.read_exact_at(&mut buf, 0).is_err());
        assert!(storage.read_exact_at(&mut buf[..1], 3).is_err());
    }

    #[test]
    fn clones_share_the_buffer() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        storage.write_all_at(b"shared", 0).unwrap();

        let mut buf = [0; 6];
        clone.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"shared");
    }
}
