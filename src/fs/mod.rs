//! The filesystem core.
//!
//! [`BmpFs`] owns the backing image and the in-memory mirror of its metadata
//! region (the free-block bitmap and the file-metadata table). Every
//! operation that changes that mirror ends by rewriting the whole region and
//! flushing, so the image is consistent with memory between any two
//! operations. There is no journal; a crash mid-write can leave the region
//! inconsistent.

/// The free-block bitmap.
pub mod bitmap;

use std::time::{SystemTime, UNIX_EPOCH};

use crate::disk_format::bmp::{self, BmpHeader, BmpInfoHeader};
use crate::disk_format::layout::{blocks_for, Layout, BLOCK_SIZE};
use crate::disk_format::record::{FileKind, FileName, FileRecord, MAX_FILES, RECORD_SIZE};
use crate::error::{FsError, Result};
use crate::storage::{ImageStorage, Ownership};

use bitmap::BlockBitmap;

/// Attributes of one entry, synthesized for the VFS bridge.
///
/// Timestamps are seconds since the epoch, matching the on-disk records.
#[derive(Clone, Copy, Debug)]
pub struct Attr {
    /// Regular file or directory.
    pub kind: FileKind,
    /// Permission bits, without the type bits.
    pub perm: u16,
    /// Link count: 2 for directories, 1 for files.
    pub nlink: u32,
    /// Logical size in bytes.
    pub size: u64,
    /// Number of 512-byte blocks the size spans.
    pub blocks: u64,
    /// Last-access time.
    pub atime: u64,
    /// Last-modification time.
    pub mtime: u64,
    /// Creation time.
    pub crtime: u64,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
}

/// A filesystem carried inside the pixel region of a BMP image.
pub struct BmpFs<S> {
    /// The backing image.
    storage: S,
    /// The decoded BMP file header.
    header: BmpHeader,
    /// The decoded BMP info header.
    info: BmpInfoHeader,
    /// Byte geometry derived from the headers.
    layout: Layout,
    /// In-memory mirror of the free-block bitmap.
    bitmap: BlockBitmap,
    /// In-memory mirror of the file-metadata table. `None` is a free slot.
    slots: Vec<Option<FileRecord>>,
    /// Ownership reported for the synthetic root directory.
    root_ownership: Ownership,
}

impl<S: ImageStorage> BmpFs<S> {
    /// Opens a filesystem over an already-formatted backing image.
    ///
    /// Reads and validates the headers, computes the layout, and loads the
    /// metadata region. Any failure aborts the mount.
    pub fn new(storage: S) -> Result<Self> {
        let (header, info) = bmp::read_headers(&storage)?;
        let layout = Layout::new(header.data_offset, info.image_size);
        let root_ownership = storage.ownership()?;

        let mut fs = Self {
            storage,
            header,
            info,
            layout,
            bitmap: BlockBitmap::from_bytes(Vec::new()),
            slots: vec![None; MAX_FILES],
            root_ownership,
        };
        fs.read_metadata()?;
        Ok(fs)
    }

    /// The decoded file header of the backing image.
    #[must_use]
    pub fn header(&self) -> &BmpHeader {
        &self.header
    }

    /// The decoded info header of the backing image.
    #[must_use]
    pub fn info(&self) -> &BmpInfoHeader {
        &self.info
    }

    /// The byte geometry of the backing image.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The free-block bitmap.
    #[must_use]
    pub fn bitmap(&self) -> &BlockBitmap {
        &self.bitmap
    }

    /// Loads the metadata region into the in-memory mirror.
    fn read_metadata(&mut self) -> Result<()> {
        let mut buf = vec![0; self.layout.metadata_bytes()];
        self.storage
            .read_exact_at(&mut buf, self.layout.metadata_position())?;

        let bitmap_bytes = self.layout.bitmap_bytes();
        self.bitmap = BlockBitmap::from_bytes(buf[..bitmap_bytes].to_vec());

        let table = buf[bitmap_bytes..].chunks_exact(RECORD_SIZE);
        for (slot, chunk) in self.slots.iter_mut().zip(table) {
            let mut record_bytes = [0; RECORD_SIZE];
            record_bytes.copy_from_slice(chunk);
            *slot = FileRecord::decode(&record_bytes)?;
        }
        Ok(())
    }

    /// Rewrites the whole metadata region as one contiguous run and flushes.
    ///
    /// A flush failure is fatal for the operation that triggered the write.
    pub fn persist_metadata(&self) -> Result<()> {
        let mut buf = vec![0; self.layout.metadata_bytes()];
        let bitmap_bytes = self.layout.bitmap_bytes();
        buf[..bitmap_bytes].copy_from_slice(self.bitmap.as_bytes());

        let table = buf[bitmap_bytes..].chunks_exact_mut(RECORD_SIZE);
        for (slot, chunk) in self.slots.iter().zip(table) {
            if let Some(record) = slot {
                chunk.copy_from_slice(&record.encode());
            }
        }

        self.storage
            .write_all_at(&buf, self.layout.metadata_position())?;
        self.storage.flush()?;
        Ok(())
    }

    /// Current time in whole seconds since the epoch. A clock before the
    /// epoch clamps to zero.
    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }

    /// Finds the slot holding `name`. Name validation happens before the
    /// scan, so an overlong or malformed name fails with its own error
    /// rather than with `NotFound`.
    pub fn lookup(&self, name: &[u8]) -> Result<usize> {
        let name = FileName::new(name)?;
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(record) if record.name == name))
            .ok_or(FsError::NotFound)
    }

    /// The record in `slot`, or `NotFound` for a free or out-of-range slot.
    pub fn record(&self, slot: usize) -> Result<&FileRecord> {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(FsError::NotFound)
    }

    /// Mutable access to the record in `slot`.
    fn record_mut(&mut self, slot: usize) -> Result<&mut FileRecord> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(FsError::NotFound)
    }

    /// Attributes of the synthetic root directory. The root is not stored in
    /// the metadata table; its timestamps read as the current time.
    #[must_use]
    pub fn root_attr(&self) -> Attr {
        let now = Self::now();
        Attr {
            kind: FileKind::Directory,
            perm: 0o755,
            nlink: 2,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            crtime: now,
            uid: self.root_ownership.uid,
            gid: self.root_ownership.gid,
        }
    }

    /// Attributes of the entry in `slot`.
    pub fn attr(&self, slot: usize) -> Result<Attr> {
        let record = self.record(slot)?;
        Ok(Attr {
            kind: record.kind,
            perm: (record.mode & 0o7777) as u16,
            nlink: if record.is_directory() { 2 } else { 1 },
            size: record.size,
            blocks: blocks_for(record.size),
            atime: record.accessed,
            mtime: record.modified,
            crtime: record.created,
            uid: record.uid,
            gid: record.gid,
        })
    }

    /// Creates a regular file. `mode` contributes only its permission bits.
    pub fn create(&mut self, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<usize> {
        self.create_slot(name, FileKind::Regular, mode, uid, gid)
    }

    /// Creates a directory. Directories exist as namespace entries only;
    /// the flat namespace means they can never hold children.
    pub fn mkdir(&mut self, name: &[u8], mode: u32, uid: u32, gid: u32) -> Result<usize> {
        self.create_slot(name, FileKind::Directory, mode, uid, gid)
    }

    /// Claims the lowest-index free slot for a new entry.
    fn create_slot(
        &mut self,
        name: &[u8],
        kind: FileKind,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<usize> {
        let name = FileName::new(name)?;
        if self
            .slots
            .iter()
            .flatten()
            .any(|record| record.name == name)
        {
            return Err(FsError::Exists);
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::NoSlots)?;

        let now = Self::now();
        self.slots[slot] = Some(match kind {
            FileKind::Regular => FileRecord::new_file(name, mode, uid, gid, now),
            FileKind::Directory => FileRecord::new_directory(name, mode, uid, gid, now),
        });

        self.persist_metadata()?;
        Ok(slot)
    }

    /// Removes a regular file, releasing its blocks.
    pub fn unlink(&mut self, name: &[u8]) -> Result<()> {
        let slot = self.lookup(name)?;
        let (first_block, num_blocks, is_dir) = {
            let record = self.record(slot)?;
            (record.first_block, record.num_blocks, record.is_directory())
        };
        if is_dir {
            return Err(FsError::IsDirectory);
        }

        if let Some(start) = first_block {
            self.bitmap.clear_run(start, num_blocks);
        }
        self.slots[slot] = None;
        self.persist_metadata()
    }

    /// Removes a directory. The flat namespace makes emptiness trivially
    /// true, so no emptiness check happens.
    pub fn rmdir(&mut self, name: &[u8]) -> Result<()> {
        let slot = self.lookup(name)?;
        if !self.record(slot)?.is_directory() {
            return Err(FsError::NotDirectory);
        }

        self.slots[slot] = None;
        self.persist_metadata()
    }

    /// Checks the requested access against the slot's mode and records the
    /// access time.
    pub fn open(&mut self, slot: usize, read: bool, write: bool) -> Result<()> {
        let record = self.record(slot)?;
        if record.is_directory() && write {
            return Err(FsError::AccessDenied);
        }
        if write && (record.mode & libc::S_IWUSR) == 0 {
            return Err(FsError::AccessDenied);
        }
        if read && (record.mode & libc::S_IRUSR) == 0 {
            return Err(FsError::AccessDenied);
        }

        self.record_mut(slot)?.accessed = Self::now();
        self.persist_metadata()
    }

    /// Reads up to `size` bytes at `offset`, clamped to the file size.
    pub fn read(&mut self, slot: usize, offset: u64, size: u32) -> Result<Vec<u8>> {
        let record = self.record(slot)?;
        if record.is_directory() {
            return Err(FsError::IsDirectory);
        }

        let mut size = u64::from(size);
        if offset >= record.size {
            size = 0;
        } else if offset + size > record.size {
            size = record.size - offset;
        }

        let data = if size == 0 {
            Vec::new()
        } else {
            let first = record.first_block.ok_or_else(|| {
                FsError::Format("file has bytes but owns no blocks".into())
            })?;
            let start = first + (offset / BLOCK_SIZE as u64) as u32;
            let in_block = (offset % BLOCK_SIZE as u64) as usize;
            let count = blocks_for(size + in_block as u64) as u32;

            let run = self.read_blocks(start, count)?;
            run[in_block..in_block + size as usize].to_vec()
        };

        self.record_mut(slot)?.accessed = Self::now();
        self.persist_metadata()?;
        Ok(data)
    }

    /// Writes `data` at `offset`, growing the file as needed.
    ///
    /// Growth allocates a fresh first-fit run, copies the existing content
    /// over, and releases the old run. Partial-block writes read the
    /// affected run first; block-aligned block-sized writes skip the
    /// pre-read.
    pub fn write(&mut self, slot: usize, offset: u64, data: &[u8]) -> Result<usize> {
        if self.record(slot)?.is_directory() {
            return Err(FsError::IsDirectory);
        }

        let new_size = offset
            .checked_add(data.len() as u64)
            .ok_or(FsError::TooBig)?;
        let new_blocks =
            u32::try_from(blocks_for(new_size)).map_err(|_| FsError::Overflow)?;

        if new_blocks > self.record(slot)?.num_blocks {
            self.grow(slot, new_blocks)?;
        }

        let in_block = (offset % BLOCK_SIZE as u64) as usize;
        let count = blocks_for(data.len() as u64 + in_block as u64) as u32;
        if count > 0 {
            let record = self.record(slot)?;
            let first = record.first_block.ok_or_else(|| {
                FsError::Format("file owns no blocks after allocation".into())
            })?;
            let start = first + (offset / BLOCK_SIZE as u64) as u32;

            let mut scratch = if in_block == 0 && data.len() % BLOCK_SIZE == 0 {
                vec![0; count as usize * BLOCK_SIZE]
            } else {
                self.read_blocks(start, count)?
            };
            scratch[in_block..in_block + data.len()].copy_from_slice(data);
            self.write_blocks(start, &scratch)?;
        }

        let record = self.record_mut(slot)?;
        if new_size > record.size {
            record.size = new_size;
        }
        record.modified = Self::now();

        self.persist_metadata()?;
        Ok(data.len())
    }

    /// Changes the logical size of a regular file.
    ///
    /// Shrinking releases only the trailing blocks and moves no data.
    /// Growing relocates like a growing write; the newly owned tail blocks
    /// keep whatever bytes previously lived at those positions.
    pub fn truncate(&mut self, slot: usize, new_size: u64) -> Result<()> {
        if self.record(slot)?.is_directory() {
            return Err(FsError::IsDirectory);
        }

        let new_blocks =
            u32::try_from(blocks_for(new_size)).map_err(|_| FsError::Overflow)?;
        let (first_block, num_blocks) = {
            let record = self.record(slot)?;
            (record.first_block, record.num_blocks)
        };

        if new_size == 0 {
            if let Some(start) = first_block {
                self.bitmap.clear_run(start, num_blocks);
            }
            let record = self.record_mut(slot)?;
            record.first_block = None;
            record.num_blocks = 0;
            record.size = 0;
        } else if new_blocks <= num_blocks {
            if let Some(start) = first_block {
                self.bitmap
                    .clear_run(start + new_blocks, num_blocks - new_blocks);
            }
            let record = self.record_mut(slot)?;
            record.num_blocks = new_blocks;
            record.size = new_size;
        } else {
            self.grow(slot, new_blocks)?;
            self.record_mut(slot)?.size = new_size;
        }

        self.record_mut(slot)?.modified = Self::now();
        self.persist_metadata()
    }

    /// Sets the access and modification times, or stamps both with the
    /// current time when none are supplied.
    pub fn set_times(&mut self, slot: usize, times: Option<(u64, u64)>) -> Result<()> {
        let now = Self::now();
        let (atime, mtime) = times.unwrap_or((now, now));

        let record = self.record_mut(slot)?;
        record.accessed = atime;
        record.modified = mtime;
        self.persist_metadata()
    }

    /// Syncs the backing image; `datasync` selects a data-only flush.
    pub fn sync(&self, datasync: bool) -> Result<()> {
        if datasync {
            self.storage.sync_data()?;
        } else {
            self.storage.sync_all()?;
        }
        Ok(())
    }

    /// Every occupied slot, in table order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &FileRecord)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.as_ref().map(|record| (slot, record)))
    }

    /// Allocates a fresh run of `new_blocks`, copies the existing content to
    /// it, and releases the old run.
    ///
    /// The old run stays marked during the scan, so the two runs never
    /// overlap. Repeated growth moves the whole file each time.
    fn grow(&mut self, slot: usize, new_blocks: u32) -> Result<()> {
        let (old_first, old_count) = {
            let record = self.record(slot)?;
            (record.first_block, record.num_blocks)
        };

        let new_start = self
            .bitmap
            .find_free_run(new_blocks)
            .ok_or(FsError::NoSpace)?;

        if let Some(old_start) = old_first {
            if old_count > 0 {
                let existing = self.read_blocks(old_start, old_count)?;
                self.write_blocks(new_start, &existing)?;
                self.bitmap.clear_run(old_start, old_count);
            }
        }

        self.bitmap.set_run(new_start, new_blocks);
        let record = self.record_mut(slot)?;
        record.first_block = Some(new_start);
        record.num_blocks = new_blocks;
        Ok(())
    }

    /// Reads `count` whole blocks starting at block `start` in one transfer.
    fn read_blocks(&self, start: u32, count: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0; count as usize * BLOCK_SIZE];
        self.storage
            .read_exact_at(&mut buf, self.layout.block_position(start))?;
        Ok(buf)
    }

    /// Writes whole blocks starting at block `start` in one transfer, then
    /// flushes.
    fn write_blocks(&self, start: u32, buf: &[u8]) -> Result<()> {
        self.storage
            .write_all_at(buf, self.layout.block_position(start))?;
        self.storage.flush()?;
        Ok(())
    }

    /// Verifies the structural invariants of the bitmap and the table,
    /// returning a description of every violation found.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let total = self.bitmap.total_blocks();
        let mut owner: Vec<Option<usize>> = vec![None; total as usize];

        for (slot, record) in self.entries() {
            match (record.first_block, record.num_blocks) {
                (None, 0) => {}
                (None, count) => violations.push(format!(
                    "slot {slot} ({}) owns {count} blocks but has no first block",
                    record.name
                )),
                (Some(first), count) => {
                    if u64::from(first) + u64::from(count) > u64::from(total) {
                        violations.push(format!(
                            "slot {slot} ({}) run {first}..{} exceeds {total} blocks",
                            record.name,
                            first as u64 + count as u64,
                        ));
                    } else {
                        for block in first..first + count {
                            if let Some(other) = owner[block as usize] {
                                violations.push(format!(
                                    "block {block} owned by slots {other} and {slot}"
                                ));
                            }
                            owner[block as usize] = Some(slot);
                            if !self.bitmap.is_used(block) {
                                violations.push(format!(
                                    "block {block} owned by slot {slot} but marked free"
                                ));
                            }
                        }
                    }
                }
            }

            if record.is_directory() && (record.size != 0 || record.num_blocks != 0) {
                violations.push(format!(
                    "directory slot {slot} ({}) owns data",
                    record.name
                ));
            }
            if !record.is_directory()
                && record.size > u64::from(record.num_blocks) * BLOCK_SIZE as u64
            {
                violations.push(format!(
                    "slot {slot} ({}) size {} exceeds its {} blocks",
                    record.name, record.size, record.num_blocks
                ));
            }

            let is_dir_mode = (record.mode & libc::S_IFMT) == libc::S_IFDIR;
            if record.is_directory() != is_dir_mode {
                violations.push(format!(
                    "slot {slot} ({}) type flag disagrees with its mode word",
                    record.name
                ));
            }
        }

        for block in 0..total {
            if self.bitmap.is_used(block) && owner[block as usize].is_none() {
                violations.push(format!("block {block} marked used but owned by no slot"));
            }
        }

        violations
    }

    /// Writes metadata one final time and syncs, for unmount.
    pub fn shutdown(&self) -> Result<()> {
        self.persist_metadata()?;
        self.sync(false)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use crate::storage::{FileBackedStorage, MemoryStorage};

    use super::*;

    #[test]
    fn small_file_round_trips() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"hello");

        assert_eq!(fs.write(slot, 0, b"hi").unwrap(), 2);
        assert_eq!(fs.read(slot, 0, 10).unwrap(), b"hi");

        let attr = fs.attr(slot).unwrap();
        assert_eq!(attr.size, 2);
        assert_eq!(attr.blocks, 1);
    }

    #[test]
    fn first_write_allocates_from_the_lowest_run() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"x");
        fs.write(slot, 0, &[0xAB; 600]).unwrap();

        let record = fs.record(slot).unwrap();
        assert_eq!(record.first_block, Some(0));
        assert_eq!(record.num_blocks, 2);
        assert_eq!(record.size, 600);

        // A fresh image is zero-filled, so the tail of the second block must
        // read back as zeros.
        let second_block = fs.read_blocks(1, 1).unwrap();
        assert_eq!(&second_block[600 - 512..], &[0; 424][..]);
    }

    #[test]
    fn partial_overwrite_preserves_surrounding_bytes() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"doc");
        fs.write(slot, 0, &[0x11; 600]).unwrap();
        fs.write(slot, 100, &[0x22; 100]).unwrap();

        let data = fs.read(slot, 0, 600).unwrap();
        assert_eq!(&data[..100], &[0x11; 100][..]);
        assert_eq!(&data[100..200], &[0x22; 100][..]);
        assert_eq!(&data[200..], &[0x11; 400][..]);
    }

    #[test]
    fn reads_clamp_to_the_file_size() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"short");
        fs.write(slot, 0, &[7; 600]).unwrap();

        assert_eq!(fs.read(slot, 600, 10).unwrap(), Vec::<u8>::new());
        assert_eq!(fs.read(slot, 1000, 10).unwrap(), Vec::<u8>::new());
        assert_eq!(fs.read(slot, 100, 1000).unwrap().len(), 500);
    }

    #[test]
    fn truncate_to_zero_releases_everything() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"gone");
        fs.write(slot, 0, &[1; 600]).unwrap();
        assert_eq!(fs.bitmap().used_blocks(), 2);

        fs.truncate(slot, 0).unwrap();

        let record = fs.record(slot).unwrap();
        assert_eq!(record.first_block, None);
        assert_eq!(record.num_blocks, 0);
        assert_eq!(record.size, 0);
        assert_eq!(fs.bitmap().used_blocks(), 0);
    }

    #[test]
    fn truncate_shrinks_in_place() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"shrink");
        fs.write(slot, 0, &[9; 2048]).unwrap();
        assert_eq!(fs.record(slot).unwrap().num_blocks, 4);

        fs.truncate(slot, 600).unwrap();

        let record = fs.record(slot).unwrap();
        assert_eq!(record.first_block, Some(0));
        assert_eq!(record.num_blocks, 2);
        assert_eq!(record.size, 600);
        assert_eq!(fs.bitmap().used_blocks(), 2);
        assert_eq!(fs.read(slot, 0, 600).unwrap(), vec![9; 600]);
    }

    #[test]
    fn growing_write_relocates_the_file() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"grow");
        fs.write(slot, 0, &[0x33; 600]).unwrap();
        assert_eq!(fs.record(slot).unwrap().first_block, Some(0));

        // Blocks 0..1 are still marked during the scan, so the new 4-block
        // run must start at block 2.
        fs.write(slot, 600, &[0x44; 1448]).unwrap();

        let record = fs.record(slot).unwrap();
        assert_eq!(record.first_block, Some(2));
        assert_eq!(record.num_blocks, 4);
        assert_eq!(record.size, 2048);

        assert!(!fs.bitmap().is_used(0));
        assert!(!fs.bitmap().is_used(1));
        for block in 2..6 {
            assert!(fs.bitmap().is_used(block));
        }

        let data = fs.read(slot, 0, 2048).unwrap();
        assert_eq!(&data[..600], &[0x33; 600][..]);
        assert_eq!(&data[600..], &[0x44; 1448][..]);
    }

    #[test]
    fn truncate_growth_relocates_like_a_write() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"stretch");
        fs.write(slot, 0, &[5; 600]).unwrap();

        fs.truncate(slot, 2048).unwrap();

        let record = fs.record(slot).unwrap();
        assert_eq!(record.first_block, Some(2));
        assert_eq!(record.num_blocks, 4);
        assert_eq!(record.size, 2048);
        assert_eq!(&fs.read(slot, 0, 600).unwrap(), &[5; 600]);
    }

    #[test]
    fn overlong_names_are_rejected() {
        let mut fs = fresh_fs();
        assert!(fs.create(&[b'a'; 254], 0o644, 0, 0).is_ok());

        let error = fs.create(&[b'b'; 255], 0o644, 0, 0).unwrap_err();
        assert_eq!(error.to_errno(), libc::ENAMETOOLONG);

        let error = fs.lookup(&[b'b'; 255]).unwrap_err();
        assert_eq!(error.to_errno(), libc::ENAMETOOLONG);
    }

    #[test]
    fn embedded_slashes_are_rejected() {
        let mut fs = fresh_fs();
        let error = fs.create(b"a/b", 0o644, 0, 0).unwrap_err();
        assert_eq!(error.to_errno(), libc::EINVAL);
    }

    #[test]
    fn duplicate_names_are_rejected_across_kinds() {
        let mut fs = fresh_fs();
        create_file(&mut fs, b"taken");

        assert!(matches!(
            fs.create(b"taken", 0o644, 0, 0),
            Err(FsError::Exists)
        ));
        assert!(matches!(
            fs.mkdir(b"taken", 0o755, 0, 0),
            Err(FsError::Exists)
        ));
    }

    #[test]
    fn slot_reuse_and_exhaustion() {
        let mut fs = fresh_fs();
        for index in 0..MAX_FILES {
            let name = format!("f{index}");
            fs.create(name.as_bytes(), 0o644, 0, 0).unwrap();
        }

        let error = fs.create(b"straw", 0o644, 0, 0).unwrap_err();
        assert_eq!(error.to_errno(), libc::ENOMEM);

        // Removing a file frees its slot for the next create.
        fs.unlink(b"f3").unwrap();
        assert_eq!(fs.create(b"straw", 0o644, 0, 0).unwrap(), 3);
    }

    #[test]
    fn writes_past_the_data_region_fail() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"vast");

        let too_big = (fs.layout().total_blocks() as usize + 1) * BLOCK_SIZE;
        let error = fs.write(slot, 0, &vec![0; too_big]).unwrap_err();
        assert_eq!(error.to_errno(), libc::ENOSPC);
    }

    #[test]
    fn write_offset_overflow_is_efbig() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"far");

        let error = fs.write(slot, u64::MAX, b"xy").unwrap_err();
        assert_eq!(error.to_errno(), libc::EFBIG);
    }

    #[test]
    fn kind_mismatches_are_rejected() {
        let mut fs = fresh_fs();
        create_file(&mut fs, b"file");
        let dir = fs.mkdir(b"dir", 0o755, 0, 0).unwrap();

        assert_eq!(fs.unlink(b"dir").unwrap_err().to_errno(), libc::EISDIR);
        assert_eq!(fs.rmdir(b"file").unwrap_err().to_errno(), libc::ENOTDIR);
        assert_eq!(fs.read(dir, 0, 10).unwrap_err().to_errno(), libc::EISDIR);
        assert_eq!(fs.write(dir, 0, b"x").unwrap_err().to_errno(), libc::EISDIR);
        assert_eq!(fs.truncate(dir, 0).unwrap_err().to_errno(), libc::EISDIR);
    }

    #[test]
    fn open_honors_owner_permission_bits() {
        let mut fs = fresh_fs();
        let write_only = fs.create(b"wo", 0o200, 0, 0).unwrap();
        let read_only = fs.create(b"ro", 0o400, 0, 0).unwrap();
        let dir = fs.mkdir(b"dir", 0o755, 0, 0).unwrap();

        assert_eq!(
            fs.open(write_only, true, false).unwrap_err().to_errno(),
            libc::EACCES
        );
        assert!(fs.open(write_only, false, true).is_ok());

        assert_eq!(
            fs.open(read_only, false, true).unwrap_err().to_errno(),
            libc::EACCES
        );
        assert!(fs.open(read_only, true, false).is_ok());

        assert_eq!(
            fs.open(dir, false, true).unwrap_err().to_errno(),
            libc::EACCES
        );
    }

    #[test]
    fn open_records_the_access_time() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"seen");
        fs.set_times(slot, Some((1, 1))).unwrap();

        fs.open(slot, true, false).unwrap();
        assert!(fs.record(slot).unwrap().accessed > 1);
    }

    #[test]
    fn set_times_is_idempotent() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"stamped");

        fs.set_times(slot, Some((123, 456))).unwrap();
        let first = fs.record(slot).unwrap().clone();

        fs.set_times(slot, Some((123, 456))).unwrap();
        assert_eq!(fs.record(slot).unwrap(), &first);
    }

    #[test]
    fn set_times_without_arguments_stamps_now() {
        let mut fs = fresh_fs();
        let slot = create_file(&mut fs, b"touched");
        fs.set_times(slot, Some((1, 2))).unwrap();

        fs.set_times(slot, None).unwrap();
        let record = fs.record(slot).unwrap();
        assert!(record.accessed > 1);
        assert_eq!(record.accessed, record.modified);
    }

    #[test]
    fn remount_reproduces_the_file_set() {
        let storage = MemoryStorage::new();
        bmp::format_image(&storage, TEST_WIDTH, TEST_HEIGHT).unwrap();

        let mut fs = BmpFs::new(storage.clone()).unwrap();
        let file = fs.create(b"kept", 0o640, 42, 43).unwrap();
        fs.write(file, 0, b"persistent bytes").unwrap();
        fs.set_times(file, Some((100, 200))).unwrap();
        fs.mkdir(b"also-kept", 0o700, 42, 43).unwrap();
        fs.shutdown().unwrap();
        drop(fs);

        let mut fs = BmpFs::new(storage).unwrap();
        let names: Vec<String> = fs
            .entries()
            .map(|(_, record)| record.name.to_string())
            .collect();
        assert_eq!(names, ["kept", "also-kept"]);

        let slot = fs.lookup(b"kept").unwrap();
        let record = fs.record(slot).unwrap();
        assert_eq!(record.size, 16);
        assert_eq!(record.uid, 42);
        assert_eq!(record.gid, 43);
        assert_eq!(record.accessed, 100);
        assert_eq!(record.modified, 200);
        assert_eq!(fs.read(slot, 0, 100).unwrap(), b"persistent bytes");

        let dir = fs.lookup(b"also-kept").unwrap();
        assert!(fs.record(dir).unwrap().is_directory());
    }

    #[test]
    fn file_backed_images_persist_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.bmp");
        bmp::create_image(&path, TEST_WIDTH, TEST_HEIGHT).unwrap();

        let open = || {
            File::options()
                .read(true)
                .write(true)
                .open(&path)
                .unwrap()
        };

        let mut fs = BmpFs::new(FileBackedStorage::new(open())).unwrap();
        let slot = fs.create(b"disk-file", 0o644, 0, 0).unwrap();
        fs.write(slot, 0, b"on real storage").unwrap();
        fs.shutdown().unwrap();
        drop(fs);

        let mut fs = BmpFs::new(FileBackedStorage::new(open())).unwrap();
        let slot = fs.lookup(b"disk-file").unwrap();
        assert_eq!(fs.read(slot, 0, 100).unwrap(), b"on real storage");
        assert_eq!(fs.check_invariants(), Vec::<String>::new());
    }

    #[test]
    fn fresh_images_hold_no_entries() {
        let fs = fresh_fs();
        assert_eq!(fs.entries().count(), 0);
        assert_eq!(fs.bitmap().used_blocks(), 0);
    }

    #[test]
    fn invariants_hold_after_churn() {
        let mut fs = fresh_fs();
        let a = create_file(&mut fs, b"a");
        let b = create_file(&mut fs, b"b");
        fs.mkdir(b"d", 0o755, 0, 0).unwrap();

        fs.write(a, 0, &[1; 700]).unwrap();
        fs.write(b, 0, &[2; 1500]).unwrap();
        fs.write(a, 700, &[3; 2000]).unwrap();
        fs.truncate(b, 512).unwrap();
        fs.unlink(b"b").unwrap();
        fs.write(a, 100, &[4; 50]).unwrap();

        assert_eq!(fs.check_invariants(), Vec::<String>::new());
        assert_eq!(fs.read(a, 100, 50).unwrap(), vec![4; 50]);
    }

    #[test]
    fn root_attributes_are_synthesized() {
        let fs = fresh_fs();
        let attr = fs.root_attr();

        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn missing_names_fail_lookup() {
        let fs = fresh_fs();
        assert_eq!(fs.lookup(b"ghost").unwrap_err().to_errno(), libc::ENOENT);
        assert_eq!(fs.attr(999).unwrap_err().to_errno(), libc::ENOENT);
    }

    /// 512 × 256 at 24bpp: 768 blocks, enough zero-filled pixel bytes past
    /// the metadata region for every test below.
    const TEST_WIDTH: u32 = 512;
    /// See [`TEST_WIDTH`].
    const TEST_HEIGHT: u32 = 256;

    /// A freshly formatted in-memory filesystem.
    fn fresh_fs() -> BmpFs<MemoryStorage> {
        let storage = MemoryStorage::new();
        bmp::format_image(&storage, TEST_WIDTH, TEST_HEIGHT).unwrap();
        BmpFs::new(storage).unwrap()
    }

    /// Creates an empty regular file with unremarkable ownership.
    fn create_file(fs: &mut BmpFs<MemoryStorage>, name: &[u8]) -> usize {
        fs.create(name, 0o644, 1000, 1000).unwrap()
    }
}
