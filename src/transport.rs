//! Capability traits the sector engine drives a card through.
//!
//! [`Transceiver`] is the low-level exchange surface (framing control, raw
//! frames, anticollision); [`CardProtocol`] adds the three MIFARE Classic
//! commands the engine needs. The PC/SC backend implements both; tests
//! substitute a scripted mock.

use crate::error::Result;
use crate::keys::Key;
use crate::layout::BLOCK_SIZE;

/// Which of the two per-sector keys to authenticate with.
///
/// The discriminants are the key-structure codes used by the PC/SC general
/// authenticate command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyType {
    KeyA = 0x60,
    KeyB = 0x61,
}

/// Low-level framing options, toggled around the raw unlock handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FramingOption {
    /// Reader-side CRC generation and checking.
    HandleCrc,
    /// Standard framed exchanges; disabled for raw frames.
    EasyFraming,
}

/// The tag currently selected in the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    /// 4 to 10 byte UID as reported by the reader.
    pub uid: Vec<u8>,
}

impl TagInfo {
    /// The 4 UID bytes used to seed authentication (the last 4 for
    /// double/triple size UIDs).
    pub fn auth_uid(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        let start = self.uid.len().saturating_sub(4);
        let tail = &self.uid[start..];
        out[..tail.len()].copy_from_slice(tail);
        out
    }
}

/// Raw exchange surface of the reader.
pub trait Transceiver {
    /// Toggle a low-level framing option.
    fn configure(&mut self, option: FramingOption, enable: bool) -> Result<()>;

    /// Send a frame with an explicit bit length (7-bit short frames).
    fn transceive_bits(&mut self, frame: &[u8], bits: usize) -> Result<Vec<u8>>;

    /// Send a byte-aligned frame.
    fn transceive_bytes(&mut self, frame: &[u8]) -> Result<Vec<u8>>;

    /// Redo anticollision and selection. `None` means the tag is gone.
    fn select_target(&mut self) -> Result<Option<TagInfo>>;
}

/// The three MIFARE Classic commands the sector engine issues.
pub trait CardProtocol: Transceiver {
    /// Authenticate `block` with `key`. `Ok(false)` means the key was
    /// rejected; errors are transport-level trouble.
    fn auth(&mut self, block: u32, key: &Key, key_type: KeyType) -> Result<bool>;

    /// Read one 16-byte block.
    fn read_block(&mut self, block: u32) -> Result<[u8; BLOCK_SIZE]>;

    /// Write one 16-byte block. `Ok(false)` means the tag refused it.
    fn write_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE]) -> Result<bool>;
}
