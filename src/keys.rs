//! The key dictionary and per-sector key storage.
//!
//! A key file shares the dump layout: the trailer records of a card image
//! carry key A and key B for their sector. Keys discovered while guessing
//! are recorded into the same structure so the dump written out afterwards
//! contains them.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{MifareError, Result};
use crate::image::{BlockContent, CardImage};
use crate::layout;
use crate::transport::KeyType;

/// A MIFARE Classic sector key.
pub type Key = [u8; 6];

/// Well-known keys tried in order when no key file is in use.
pub const DEFAULT_KEYS: [Key; 9] = [
    [0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
    [0xd3, 0xf7, 0xd3, 0xf7, 0xd3, 0xf7],
    [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5],
    [0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5],
    [0x4d, 0x3a, 0x99, 0xc3, 0x51, 0xdd],
    [0x1a, 0x98, 0x2c, 0x7e, 0x45, 0x9a],
    [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xab, 0xcd, 0xef, 0x12, 0x34, 0x56],
];

/// Per-sector key pairs, loaded from a key file or filled in by guessing.
#[derive(Debug, Clone)]
pub struct KeyStore {
    image: CardImage,
}

impl KeyStore {
    /// An empty store for guessing mode.
    pub fn blank(last_block: u32) -> Self {
        KeyStore {
            image: CardImage::blank(last_block),
        }
    }

    /// Load a key file covering blocks `0..=last_block`.
    pub fn load(path: &Path, last_block: u32) -> Result<Self> {
        Ok(KeyStore {
            image: CardImage::load(path, last_block)?,
        })
    }

    /// The stored key for the sector containing `block`.
    pub fn key_for(&self, block: u32, key_type: KeyType) -> Key {
        let trailer = layout::trailer_of(block);
        match self.image.content(trailer) {
            BlockContent::Trailer { key_a, key_b, .. } => match key_type {
                KeyType::KeyA => key_a,
                KeyType::KeyB => key_b,
            },
            // trailer_of always lands on a trailer
            BlockContent::Data(_) => [0u8; 6],
        }
    }

    /// Record a key discovered by guessing at the trailer of the sector
    /// containing `block`.
    pub fn remember(&mut self, block: u32, key_type: KeyType, key: &Key) {
        let trailer = layout::trailer_of(block);
        if let BlockContent::Trailer {
            mut key_a,
            access_bits,
            mut key_b,
        } = self.image.content(trailer)
        {
            match key_type {
                KeyType::KeyA => key_a = *key,
                KeyType::KeyB => key_b = *key,
            }
            self.image.set_trailer(trailer, &key_a, &access_bits, &key_b);
        }
    }
}

/// Read only the expected tag UID from a key file, so the sanity check can
/// run before the card size is known.
pub fn probe_uid(path: &Path) -> Result<[u8; 4]> {
    let mut file = File::open(path)?;
    let mut uid = [0u8; 4];
    file.read_exact(&mut uid)?;
    Ok(uid)
}

/// Compare a key file's expected UID with the live tag.
///
/// A mismatch is fatal unless the key file was explicitly forced; either way
/// it is reported.
pub fn check_expected_uid(expected: &[u8; 4], live: &[u8], forced: bool) -> Result<()> {
    let live_head = &live[..live.len().min(4)];
    if live_head == expected {
        return Ok(());
    }
    warn!(
        "expected card with UID starting {}, got {}",
        hex::encode(expected),
        hex::encode(live_head)
    );
    if forced {
        Ok(())
    } else {
        Err(MifareError::UidMismatch {
            expected: hex::encode(expected),
            found: hex::encode(live_head),
        })
    }
}
