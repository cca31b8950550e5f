//! The FUSE adapter.
//!
//! A thin translation layer: kernel requests arrive through the `fuser`
//! crate, get forwarded to [`BmpFs`], and failures cross back as errno
//! values via [`FsError::to_errno`]. The namespace is flat, so inode
//! numbers are trivial: the root is `FUSE_ROOT_ID` and slot `i` of the
//! metadata table is inode `i + 2`.
//!
//! `fuser` dispatches callbacks one at a time on the session thread and the
//! adapter is the only owner of the filesystem state, so the
//! single-operation-in-flight model holds without locking.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
    FUSE_ROOT_ID,
};
use log::{debug, warn};

use crate::disk_format::layout::BLOCK_SIZE;
use crate::disk_format::record::FileKind;
use crate::error::FsError;
use crate::fs::{Attr, BmpFs};
use crate::storage::ImageStorage;

/// How long the kernel may cache entries and attributes.
const TTL: Duration = Duration::from_secs(60);

/// Inode number of metadata-table slot `slot`.
fn slot_to_ino(slot: usize) -> u64 {
    slot as u64 + 2
}

/// Metadata-table slot of inode `ino`, if `ino` is not the root.
fn ino_to_slot(ino: u64) -> Option<usize> {
    ino.checked_sub(2).map(|slot| slot as usize)
}

/// Convert a [`FileKind`] to the fuser file type.
fn to_fuse_kind(kind: FileKind) -> FileType {
    match kind {
        FileKind::Regular => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
    }
}

/// Epoch seconds as a [`SystemTime`].
fn epoch_to_system(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// A [`SystemTime`] as epoch seconds. Times before the epoch clamp to zero.
fn system_to_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Read and write intent of an `open` flags word.
fn access_intents(flags: i32) -> (bool, bool) {
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => (false, true),
        libc::O_RDWR => (true, true),
        _ => (true, false),
    }
}

/// FUSE wrapper around [`BmpFs`].
pub struct BmpFuse<S> {
    /// The filesystem driven by this mount.
    fs: BmpFs<S>,
}

impl<S: ImageStorage> BmpFuse<S> {
    /// Wraps an opened filesystem for mounting.
    #[must_use]
    pub fn new(fs: BmpFs<S>) -> Self {
        Self { fs }
    }

    /// Builds the fuser attribute struct for `ino`.
    fn file_attr(ino: u64, attr: &Attr) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: epoch_to_system(attr.atime),
            mtime: epoch_to_system(attr.mtime),
            ctime: epoch_to_system(attr.crtime),
            crtime: epoch_to_system(attr.crtime),
            kind: to_fuse_kind(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// Logs a failed operation. Missing entries are routine (the kernel
    /// probes for names all the time), so `ENOENT` stays at debug level.
    fn log_failure(operation: &str, error: &FsError) {
        if error.to_errno() == libc::ENOENT {
            debug!("{operation}: {error}");
        } else {
            warn!("{operation} failed: {error}");
        }
    }

    /// Every entry lives directly under the root; any other parent would
    /// name a path with an embedded slash.
    fn require_root_parent(parent: u64) -> Result<(), FsError> {
        if parent == FUSE_ROOT_ID {
            Ok(())
        } else {
            Err(FsError::InvalidArgument("nested paths are not supported"))
        }
    }

    /// Attribute lookup shared by `getattr` and `setattr` replies.
    fn attr_for(&self, ino: u64) -> Result<FileAttr, FsError> {
        if ino == FUSE_ROOT_ID {
            return Ok(Self::file_attr(ino, &self.fs.root_attr()));
        }
        let slot = ino_to_slot(ino).ok_or(FsError::NotFound)?;
        Ok(Self::file_attr(ino, &self.fs.attr(slot)?))
    }

    /// Applies the size and timestamp parts of a `setattr` request.
    fn apply_setattr(
        &mut self,
        ino: u64,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr, FsError> {
        if ino == FUSE_ROOT_ID {
            if size.is_some() || atime.is_some() || mtime.is_some() {
                // The root is synthetic; there is no record behind it.
                return Err(FsError::NotFound);
            }
            return self.attr_for(ino);
        }

        let slot = ino_to_slot(ino).ok_or(FsError::NotFound)?;
        if let Some(new_size) = size {
            self.fs.truncate(slot, new_size)?;
        }

        if atime.is_some() || mtime.is_some() {
            let record = self.fs.record(slot)?;
            let resolve = |requested: Option<TimeOrNow>, current: u64| match requested {
                Some(TimeOrNow::SpecificTime(time)) => system_to_epoch(time),
                Some(TimeOrNow::Now) => system_to_epoch(SystemTime::now()),
                None => current,
            };
            let times = (
                resolve(atime, record.accessed),
                resolve(mtime, record.modified),
            );
            self.fs.set_times(slot, Some(times))?;
        }

        self.attr_for(ino)
    }
}

impl<S: ImageStorage> Filesystem for BmpFuse<S> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        debug!(
            "mounted {}x{} image, {} blocks",
            self.fs.info().width,
            self.fs.info().height,
            self.fs.layout().total_blocks()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(error) = self.fs.shutdown() {
            warn!("final metadata write failed: {error}");
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = Self::require_root_parent(parent)
            .and_then(|()| self.fs.lookup(name.as_bytes()))
            .and_then(|slot| self.attr_for(slot_to_ino(slot)));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(error) => {
                Self::log_failure("lookup", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.attr_for(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(error) => {
                Self::log_failure("getattr", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if mode.is_some() || uid.is_some() || gid.is_some() {
            // Mode and ownership are fixed at creation.
            reply.error(libc::ENOSYS);
            return;
        }

        match self.apply_setattr(ino, size, atime, mtime) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(error) => {
                Self::log_failure("setattr", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let result = Self::require_root_parent(parent)
            .and_then(|()| {
                self.fs
                    .create(name.as_bytes(), mode & !umask, req.uid(), req.gid())
            })
            .and_then(|slot| self.attr_for(slot_to_ino(slot)));
        match result {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(error) => {
                Self::log_failure("create", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let result = Self::require_root_parent(parent)
            .and_then(|()| {
                self.fs
                    .mkdir(name.as_bytes(), mode & !umask, req.uid(), req.gid())
            })
            .and_then(|slot| self.attr_for(slot_to_ino(slot)));
        match result {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(error) => {
                Self::log_failure("mkdir", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result =
            Self::require_root_parent(parent).and_then(|()| self.fs.unlink(name.as_bytes()));
        match result {
            Ok(()) => reply.ok(),
            Err(error) => {
                Self::log_failure("unlink", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result =
            Self::require_root_parent(parent).and_then(|()| self.fs.rmdir(name.as_bytes()));
        match result {
            Ok(()) => reply.ok(),
            Err(error) => {
                Self::log_failure("rmdir", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let (read, write) = access_intents(flags);
        let result = ino_to_slot(ino)
            .ok_or(FsError::NotFound)
            .and_then(|slot| self.fs.open(slot, read, write));
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(error) => {
                Self::log_failure("open", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let offset = u64::try_from(offset).unwrap_or(0);
        let result = ino_to_slot(ino)
            .ok_or(FsError::NotFound)
            .and_then(|slot| self.fs.read(slot, offset, size));
        match result {
            Ok(data) => reply.data(&data),
            Err(error) => {
                Self::log_failure("read", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let offset = u64::try_from(offset).unwrap_or(0);
        let result = ino_to_slot(ino)
            .ok_or(FsError::NotFound)
            .and_then(|slot| self.fs.write(slot, offset, data));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(error) => {
                Self::log_failure("write", &error);
                reply.error(error.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        // Only the root can be listed; stored directories are leaves.
        if ino != FUSE_ROOT_ID {
            reply.error(libc::ENOENT);
            return;
        }

        let mut entries: Vec<(u64, FileType, Vec<u8>)> = vec![
            (FUSE_ROOT_ID, FileType::Directory, b".".to_vec()),
            (FUSE_ROOT_ID, FileType::Directory, b"..".to_vec()),
        ];
        entries.extend(self.fs.entries().map(|(slot, record)| {
            (
                slot_to_ino(slot),
                to_fuse_kind(record.kind),
                record.name.as_bytes().to_vec(),
            )
        }));

        let offset = usize::try_from(offset).unwrap_or(0);
        for (index, (ino, kind, name)) in entries.iter().enumerate().skip(offset) {
            let full = reply.add(*ino, (index + 1) as i64, *kind, OsStr::from_bytes(name));
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.fs.sync(datasync) {
            Ok(()) => reply.ok(),
            Err(error) => {
                Self::log_failure("fsync", &error);
                reply.error(error.to_errno());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::disk_format::bmp;
    use crate::storage::MemoryStorage;

    use super::*;

    #[test]
    fn ino_mapping_round_trips() {
        assert_eq!(ino_to_slot(FUSE_ROOT_ID), None);
        assert_eq!(ino_to_slot(0), None);
        assert_eq!(ino_to_slot(2), Some(0));
        assert_eq!(slot_to_ino(0), 2);
        assert_eq!(ino_to_slot(slot_to_ino(999)), Some(999));
    }

    #[test]
    fn time_conversions_round_trip() {
        assert_eq!(system_to_epoch(epoch_to_system(1_700_000_000)), 1_700_000_000);
        assert_eq!(system_to_epoch(UNIX_EPOCH), 0);
    }

    #[test]
    fn access_intents_follow_the_accmode_bits() {
        assert_eq!(access_intents(libc::O_RDONLY), (true, false));
        assert_eq!(access_intents(libc::O_WRONLY), (false, true));
        assert_eq!(access_intents(libc::O_RDWR), (true, true));
        assert_eq!(access_intents(libc::O_WRONLY | libc::O_APPEND), (false, true));
    }

    #[test]
    fn attrs_convert_to_fuse_form() {
        let storage = MemoryStorage::new();
        bmp::format_image(&storage, 512, 256).unwrap();
        let mut fs = BmpFs::new(storage).unwrap();
        let slot = fs.create(b"probe", 0o640, 1000, 100).unwrap();
        fs.write(slot, 0, &[0; 600]).unwrap();

        let fuse = BmpFuse::new(fs);
        let attr = fuse.attr_for(slot_to_ino(slot)).unwrap();
        assert_eq!(attr.ino, slot_to_ino(slot));
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 600);
        assert_eq!(attr.blocks, 2);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 100);
        assert_eq!(attr.blksize, 512);

        let root = fuse.attr_for(FUSE_ROOT_ID).unwrap();
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.perm, 0o755);
        assert_eq!(root.nlink, 2);
    }

    #[test]
    fn non_root_parents_are_invalid() {
        let error = BmpFuse::<MemoryStorage>::require_root_parent(5).unwrap_err();
        assert_eq!(error.to_errno(), libc::EINVAL);
    }
}
