//! The BMP container: header codecs plus creation of fresh backing images.
//!
//! Only the two headers are interpreted; the pixel region that follows them
//! is opaque to any image viewer and belongs to the filesystem.

use std::fs::File;
use std::path::Path;

use crate::disk_format::{get_i32, get_u16, get_u32, put_i32, put_u16, put_u32};
use crate::error::{FsError, Result};
use crate::storage::{FileBackedStorage, ImageStorage};

use super::layout::Layout;

/// The `"BM"` signature, little-endian.
pub const BMP_SIGNATURE: u16 = 0x4D42;

/// Size of the BMP file header in bytes.
pub const HEADER_LEN: usize = 14;

/// Size of the BMP info header in bytes.
pub const INFO_HEADER_LEN: usize = 40;

/// Combined size of both headers; equal to the data offset of images we
/// create.
pub const HEADERS_LEN: usize = HEADER_LEN + INFO_HEADER_LEN;

/// Horizontal and vertical resolution written into fresh images.
const PIXELS_PER_METRE: i32 = 2835;

/// Width of the image created when the backing file does not exist.
pub const DEFAULT_WIDTH: u32 = 2048;

/// Height of the image created when the backing file does not exist.
pub const DEFAULT_HEIGHT: u32 = 2048;

/// Bytes per pixel row, padded to a 4-byte boundary.
#[must_use]
pub fn row_stride(width: u32) -> u64 {
    (u64::from(width) * 3 + 3) & !3
}

/// The 14-byte BMP file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmpHeader {
    /// Magic signature; always [`BMP_SIGNATURE`].
    pub signature: u16,
    /// Size of the whole BMP file in bytes.
    pub file_size: u32,
    /// Reserved, zero.
    pub reserved1: u16,
    /// Reserved, zero.
    pub reserved2: u16,
    /// File offset of the first pixel byte.
    pub data_offset: u32,
}

impl BmpHeader {
    /// Constructs the header for a fresh image with `pixel_bytes` of pixel
    /// data following the two headers.
    #[must_use]
    pub fn new(file_size: u32) -> Self {
        Self {
            signature: BMP_SIGNATURE,
            file_size,
            reserved1: 0,
            reserved2: 0,
            data_offset: HEADERS_LEN as u32,
        }
    }

    /// Encodes the header at its normative byte positions.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0; HEADER_LEN];
        put_u16(&mut buf, 0, self.signature);
        put_u32(&mut buf, 2, self.file_size);
        put_u16(&mut buf, 6, self.reserved1);
        put_u16(&mut buf, 8, self.reserved2);
        put_u32(&mut buf, 10, self.data_offset);
        buf
    }

    /// Decodes a header, rejecting anything that does not carry the `"BM"`
    /// signature.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let signature = get_u16(buf, 0);
        if signature != BMP_SIGNATURE {
            return Err(FsError::Format(format!(
                "bad BMP signature {signature:#06x}"
            )));
        }

        Ok(Self {
            signature,
            file_size: get_u32(buf, 2),
            reserved1: get_u16(buf, 6),
            reserved2: get_u16(buf, 8),
            data_offset: get_u32(buf, 10),
        })
    }
}

/// The 40-byte BMP info header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmpInfoHeader {
    /// Size of this header; always [`INFO_HEADER_LEN`].
    pub header_size: u32,
    /// Image width in pixels.
    pub width: i32,
    /// Image height in pixels.
    pub height: i32,
    /// Number of color planes; always 1.
    pub planes: u16,
    /// Bits per pixel; always 24.
    pub bits_per_pixel: u16,
    /// Compression type; always 0 (uncompressed).
    pub compression: u32,
    /// Size of the pixel region in bytes.
    pub image_size: u32,
    /// Horizontal resolution in pixels per metre.
    pub x_pixels_per_metre: i32,
    /// Vertical resolution in pixels per metre.
    pub y_pixels_per_metre: i32,
    /// Number of palette colors used; 0 for 24bpp.
    pub colors_used: u32,
    /// Number of important colors; 0 for 24bpp.
    pub colors_important: u32,
}

impl BmpInfoHeader {
    /// Constructs the info header for a fresh `width` × `height` image whose
    /// pixel region spans `image_size` bytes.
    #[must_use]
    pub fn new(width: i32, height: i32, image_size: u32) -> Self {
        Self {
            header_size: INFO_HEADER_LEN as u32,
            width,
            height,
            planes: 1,
            bits_per_pixel: 24,
            compression: 0,
            image_size,
            x_pixels_per_metre: PIXELS_PER_METRE,
            y_pixels_per_metre: PIXELS_PER_METRE,
            colors_used: 0,
            colors_important: 0,
        }
    }

    /// Encodes the info header at its normative byte positions.
    #[must_use]
    pub fn encode(&self) -> [u8; INFO_HEADER_LEN] {
        let mut buf = [0; INFO_HEADER_LEN];
        put_u32(&mut buf, 0, self.header_size);
        put_i32(&mut buf, 4, self.width);
        put_i32(&mut buf, 8, self.height);
        put_u16(&mut buf, 12, self.planes);
        put_u16(&mut buf, 14, self.bits_per_pixel);
        put_u32(&mut buf, 16, self.compression);
        put_u32(&mut buf, 20, self.image_size);
        put_i32(&mut buf, 24, self.x_pixels_per_metre);
        put_i32(&mut buf, 28, self.y_pixels_per_metre);
        put_u32(&mut buf, 32, self.colors_used);
        put_u32(&mut buf, 36, self.colors_important);
        buf
    }

    /// Decodes an info header.
    #[must_use]
    pub fn decode(buf: &[u8; INFO_HEADER_LEN]) -> Self {
        Self {
            header_size: get_u32(buf, 0),
            width: get_i32(buf, 4),
            height: get_i32(buf, 8),
            planes: get_u16(buf, 12),
            bits_per_pixel: get_u16(buf, 14),
            compression: get_u32(buf, 16),
            image_size: get_u32(buf, 20),
            x_pixels_per_metre: get_i32(buf, 24),
            y_pixels_per_metre: get_i32(buf, 28),
            colors_used: get_u32(buf, 32),
            colors_important: get_u32(buf, 36),
        }
    }
}

/// Reads and validates both headers from the start of the backing image.
pub fn read_headers<S: ImageStorage>(storage: &S) -> Result<(BmpHeader, BmpInfoHeader)> {
    let mut buf = [0; HEADERS_LEN];
    storage.read_exact_at(&mut buf, 0)?;

    let mut header_bytes = [0; HEADER_LEN];
    header_bytes.copy_from_slice(&buf[..HEADER_LEN]);
    let mut info_bytes = [0; INFO_HEADER_LEN];
    info_bytes.copy_from_slice(&buf[HEADER_LEN..]);

    let header = BmpHeader::decode(&header_bytes)?;
    let info = BmpInfoHeader::decode(&info_bytes);
    Ok((header, info))
}

/// Writes both headers to the start of the backing image.
pub fn write_headers<S: ImageStorage>(
    storage: &S,
    header: &BmpHeader,
    info: &BmpInfoHeader,
) -> Result<()> {
    let mut buf = [0; HEADERS_LEN];
    buf[..HEADER_LEN].copy_from_slice(&header.encode());
    buf[HEADER_LEN..].copy_from_slice(&info.encode());
    storage.write_all_at(&buf, 0)?;
    Ok(())
}

/// Formats `storage` as a fresh `width` × `height` backing image: both
/// headers, a zero-filled pixel region, and a zeroed metadata region.
pub fn format_image<S: ImageStorage>(storage: &S, width: u32, height: u32) -> Result<()> {
    let pixel_bytes = row_stride(width)
        .checked_mul(u64::from(height))
        .ok_or(FsError::Overflow)?;
    let file_size = (HEADERS_LEN as u64)
        .checked_add(pixel_bytes)
        .ok_or(FsError::Overflow)?;
    let file_size = u32::try_from(file_size).map_err(|_| FsError::Overflow)?;
    let image_size = u32::try_from(pixel_bytes).map_err(|_| FsError::Overflow)?;
    let width = i32::try_from(width).map_err(|_| FsError::Overflow)?;
    let height = i32::try_from(height).map_err(|_| FsError::Overflow)?;

    let header = BmpHeader::new(file_size);
    let info = BmpInfoHeader::new(width, height, image_size);
    write_headers(storage, &header, &info)?;

    let pixels = vec![0; pixel_bytes as usize];
    storage.write_all_at(&pixels, u64::from(header.data_offset))?;

    // The metadata region occupies the leading pixel bytes; writing it zeroed
    // makes the empty bitmap and table explicit on disk.
    let layout = Layout::new(header.data_offset, info.image_size);
    let metadata = vec![0; layout.metadata_bytes()];
    storage.write_all_at(&metadata, layout.metadata_position())?;

    storage.flush()?;
    Ok(())
}

/// Creates a fresh backing image file at `path`.
pub fn create_image(path: &Path, width: u32, height: u32) -> Result<()> {
    let file = File::create(path)?;
    format_image(&FileBackedStorage::new(file), width, height)
}
