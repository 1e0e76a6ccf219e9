//! In-memory card contents and the raw dump file format.
//!
//! A dump is exactly `(last_block + 1) * 16` bytes, one record per block in
//! ascending order. Whether a 16-byte record is opaque data or a
//! `keyA || accessBits || keyB` trailer is decided by the block's sector
//! position, never stored in the file.

use std::fs;
use std::path::Path;

use crate::error::{MifareError, Result};
use crate::layout::{self, BLOCK_SIZE};

/// One block of the image, viewed through its sector position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContent {
    /// Opaque data block.
    Data([u8; BLOCK_SIZE]),
    /// Sector trailer split into its three fields.
    Trailer {
        key_a: [u8; 6],
        access_bits: [u8; 4],
        key_b: [u8; 6],
    },
}

/// All blocks of a card, either captured contents or a key map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardImage {
    blocks: Vec<[u8; BLOCK_SIZE]>,
}

impl CardImage {
    /// A zeroed image covering blocks `0..=last_block`.
    pub fn blank(last_block: u32) -> Self {
        CardImage {
            blocks: vec![[0u8; BLOCK_SIZE]; last_block as usize + 1],
        }
    }

    /// Load an image from a dump file, insisting on the exact size for the
    /// detected card.
    pub fn load(path: &Path, last_block: u32) -> Result<Self> {
        let expected = (last_block as usize + 1) * BLOCK_SIZE;
        let raw = fs::read(path)?;
        if raw.len() != expected {
            return Err(MifareError::SizeMismatch {
                path: path.display().to_string(),
                expected,
                found: raw.len(),
            });
        }

        let mut image = CardImage::blank(last_block);
        for (block, chunk) in raw.chunks_exact(BLOCK_SIZE).enumerate() {
            image.blocks[block].copy_from_slice(chunk);
        }
        Ok(image)
    }

    /// Write the image back out as one fixed-size blob.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut raw = Vec::with_capacity(self.blocks.len() * BLOCK_SIZE);
        for block in &self.blocks {
            raw.extend_from_slice(block);
        }
        fs::write(path, raw)?;
        Ok(())
    }

    /// Highest block index covered by this image.
    pub fn last_block(&self) -> u32 {
        self.blocks.len() as u32 - 1
    }

    pub fn block(&self, block: u32) -> &[u8; BLOCK_SIZE] {
        &self.blocks[block as usize]
    }

    pub fn set_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE]) {
        self.blocks[block as usize].copy_from_slice(data);
    }

    /// The block viewed as data or trailer, decided by its sector position.
    pub fn content(&self, block: u32) -> BlockContent {
        let raw = self.block(block);
        if layout::is_trailer_block(block) {
            let mut key_a = [0u8; 6];
            let mut access_bits = [0u8; 4];
            let mut key_b = [0u8; 6];
            key_a.copy_from_slice(&raw[..6]);
            access_bits.copy_from_slice(&raw[6..10]);
            key_b.copy_from_slice(&raw[10..]);
            BlockContent::Trailer {
                key_a,
                access_bits,
                key_b,
            }
        } else {
            BlockContent::Data(*raw)
        }
    }

    /// Store a trailer record from its three fields.
    pub fn set_trailer(&mut self, block: u32, key_a: &[u8; 6], access_bits: &[u8; 4], key_b: &[u8; 6]) {
        let raw = &mut self.blocks[block as usize];
        raw[..6].copy_from_slice(key_a);
        raw[6..10].copy_from_slice(access_bits);
        raw[10..].copy_from_slice(key_b);
    }

    /// The UID recorded in the manufacturer block.
    pub fn uid(&self) -> &[u8] {
        &self.blocks[0][..4]
    }
}

/// The BCC a manufacturer block with this UID should carry.
pub fn block0_bcc(data: &[u8; BLOCK_SIZE]) -> u8 {
    data[0] ^ data[1] ^ data[2] ^ data[3]
}

/// Whether the first five bytes (UID + BCC) of a manufacturer block are
/// consistent. Writing a block 0 that fails this check invalidates the tag.
pub fn block0_bcc_ok(data: &[u8; BLOCK_SIZE]) -> bool {
    data[0] ^ data[1] ^ data[2] ^ data[3] ^ data[4] == 0
}
