//! Block-index math for the non-uniform MIFARE Classic sector geometry.
//!
//! Blocks below 128 sit in 4-block sectors, the 4K high area uses 16-block
//! sectors. The last block of every sector is its trailer.

/// Bytes per block.
pub const BLOCK_SIZE: usize = 16;

/// Blocks covered by one sector operation.
pub const SECTOR_SIZE: u32 = 4;

/// True when `block` starts a sector.
pub fn is_first_block(block: u32) -> bool {
    // Test if we are in the small or the big sectors
    if block < 128 {
        block % 4 == 0
    } else {
        block % 16 == 0
    }
}

/// True when `block` is a sector trailer (keys and access bits).
pub fn is_trailer_block(block: u32) -> bool {
    if block < 128 {
        (block + 1) % 4 == 0
    } else {
        (block + 1) % 16 == 0
    }
}

/// Trailer block of the sector containing `block`.
pub fn trailer_of(block: u32) -> u32 {
    if block < 128 {
        block + (3 - block % 4)
    } else {
        block + (15 - block % 16)
    }
}
