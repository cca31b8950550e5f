#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! An implementation of a flat filesystem stored inside the pixel region of a
//! 24-bit BMP image, and a FUSE wrapper around it.
//!
//! The backing image stays a structurally valid bitmap: the pixel bytes are
//! reinterpreted as a free-block map, a fixed-capacity file-metadata table,
//! and 512-byte data blocks.

/// Constants and structures that define the on-disk format.
pub mod disk_format;
/// The error type and its errno mapping.
pub mod error;
/// Implementations of the filesystem operations.
pub mod fs;
/// An implementation of a FUSE filesystem around the core.
pub mod fuse;
/// Storage backends that support positioned I/O on the backing image.
pub mod storage;
