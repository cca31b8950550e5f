//! Carving the pixel region into a metadata region and data blocks.

use super::record::{MAX_FILES, RECORD_SIZE};

/// Size of a data block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Number of blocks needed to hold `bytes` bytes.
#[must_use]
pub fn blocks_for(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE as u64)
}

/// Byte geometry of a backing image, derived from its headers.
///
/// The pixel region starts at `data_offset` and spans `data_size` bytes. Its
/// leading bytes hold the free-block bitmap (one byte per block) followed by
/// the file-metadata table; data blocks are addressed from the first byte
/// after the metadata region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// File offset of the first pixel byte.
    data_offset: u64,
    /// Size of the pixel region in bytes.
    data_size: u64,
}

impl Layout {
    /// Computes the layout from the decoded header fields.
    #[must_use]
    pub fn new(data_offset: u32, image_size: u32) -> Self {
        Self {
            data_offset: u64::from(data_offset),
            data_size: u64::from(image_size),
        }
    }

    /// Size of the pixel region in bytes.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Number of blocks the bitmap covers.
    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.data_size / BLOCK_SIZE as u64
    }

    /// Size of the free-block bitmap: one byte per block.
    #[must_use]
    pub fn bitmap_bytes(&self) -> usize {
        self.total_blocks() as usize
    }

    /// Combined size of the bitmap and the file-metadata table.
    #[must_use]
    pub fn metadata_bytes(&self) -> usize {
        self.bitmap_bytes() + MAX_FILES * RECORD_SIZE
    }

    /// File position of the metadata region.
    #[must_use]
    pub fn metadata_position(&self) -> u64 {
        self.data_offset
    }

    /// File position of block `block`.
    #[must_use]
    pub fn block_position(&self, block: u32) -> u64 {
        self.data_offset
            + self.metadata_bytes() as u64
            + u64::from(block) * BLOCK_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_image_geometry() {
        // 2048 × 2048 at 24bpp: stride 6144, pixel region 12,582,912 bytes.
        let layout = Layout::new(54, 12_582_912);

        assert_eq!(layout.total_blocks(), 24_576);
        assert_eq!(layout.bitmap_bytes(), 24_576);
        assert_eq!(layout.metadata_bytes(), 24_576 + 1000 * 309);
        assert_eq!(layout.metadata_position(), 54);
        assert_eq!(layout.block_position(0), 54 + 333_576);
        assert_eq!(layout.block_position(1), 54 + 333_576 + 512);
    }

    #[test]
    fn blocks_for_rounds_up() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(512), 1);
        assert_eq!(blocks_for(513), 2);
        assert_eq!(blocks_for(600), 2);
        assert_eq!(blocks_for(2048), 4);
    }
}
