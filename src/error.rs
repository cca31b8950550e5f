//! The filesystem error type.
//!
//! Every operation returns [`Result`]; the FUSE adapter converts failures to
//! POSIX errno values through [`FsError::to_errno`]. Logging happens at the
//! adapter boundary, so tests assert on error variants rather than on stderr.

use thiserror::Error;

/// Unified error type for all filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// A backing-image transfer failed (short read/write, seek, or flush).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing image is not a BMP we can use, or its metadata region is
    /// corrupt.
    #[error("invalid image format: {0}")]
    Format(String),

    /// No slot with the requested name exists.
    #[error("no such file")]
    NotFound,

    /// A slot with the requested name already exists.
    #[error("file exists")]
    Exists,

    /// The name does not fit the 256-byte name field.
    #[error("name too long")]
    NameTooLong,

    /// The name contains a byte the flat namespace forbids.
    #[error("invalid name: {0}")]
    InvalidName(&'static str),

    /// The operation is invalid for the supplied arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Every metadata slot is occupied.
    #[error("no free metadata slots")]
    NoSlots,

    /// No free run of blocks is large enough.
    #[error("no space left on image")]
    NoSpace,

    /// A file operation was applied to a directory.
    #[error("is a directory")]
    IsDirectory,

    /// A directory operation was applied to a regular file.
    #[error("not a directory")]
    NotDirectory,

    /// The slot's mode forbids the requested access.
    #[error("permission denied")]
    AccessDenied,

    /// The write would move the end of the file past what offsets can express.
    #[error("file too large")]
    TooBig,

    /// Sizing arithmetic for the backing image overflowed.
    #[error("size computation overflow")]
    Overflow,
}

impl FsError {
    /// Convert this error into a POSIX errno suitable for FUSE replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(_) => libc::EIO,
            Self::Format(_) => libc::EINVAL,
            Self::NotFound => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::InvalidName(_) | Self::InvalidArgument(_) => libc::EINVAL,
            Self::NoSlots => libc::ENOMEM,
            Self::NoSpace => libc::ENOSPC,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::AccessDenied => libc::EACCES,
            Self::TooBig => libc::EFBIG,
            Self::Overflow => libc::EOVERFLOW,
        }
    }
}

/// Result alias using [`FsError`].
pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_posix_set() {
        let cases: [(FsError, libc::c_int); 12] = [
            (FsError::NotFound, libc::ENOENT),
            (FsError::Exists, libc::EEXIST),
            (FsError::NameTooLong, libc::ENAMETOOLONG),
            (FsError::InvalidName("slash"), libc::EINVAL),
            (FsError::NoSlots, libc::ENOMEM),
            (FsError::NoSpace, libc::ENOSPC),
            (FsError::IsDirectory, libc::EISDIR),
            (FsError::NotDirectory, libc::ENOTDIR),
            (FsError::AccessDenied, libc::EACCES),
            (FsError::TooBig, libc::EFBIG),
            (FsError::Overflow, libc::EOVERFLOW),
            (FsError::Format("bad signature".into()), libc::EINVAL),
        ];
        for (error, errno) in cases {
            assert_eq!(error.to_errno(), errno);
        }
    }

    #[test]
    fn io_errors_collapse_to_eio() {
        let error = FsError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(error.to_errno(), libc::EIO);
    }
}
