//! Error types shared by the sector engine and the PC/SC backend.

use thiserror::Error;

/// The error type for all card and persistence operations.
#[derive(Debug, Error)]
pub enum MifareError {
    /// PC/SC transport failure (reader unplugged, service gone, ...).
    #[error("PC/SC error: {0}")]
    Device(#[from] pcsc::Error),

    /// A command was rejected by the reader or the tag.
    #[error("command failed with status {sw1:02X} {sw2:02X}")]
    Status { sw1: u8, sw2: u8 },

    /// A response was too short to carry the expected payload.
    #[error("response too short")]
    ShortResponse,

    /// The reader chip reported a transceive failure in raw mode.
    #[error("transceive failed (chip status {0:#04x})")]
    Transceive(u8),

    /// No usable PC/SC reader was found.
    #[error("no usable PC/SC reader found")]
    NoReader,

    /// No tag is present in the reader field.
    #[error("no tag was found")]
    NoTag,

    /// Re-selecting the tag after a failure did not find it again.
    #[error("tag was removed")]
    TagLost,

    /// Authentication failed and the sector operation cannot continue.
    #[error("authentication failed for block {block:02} (sector {sector:02})")]
    Auth { block: u32, sector: u32 },

    /// A block read or write was rejected and failures are not tolerated.
    #[error("unable to access block {block:#04x}")]
    BlockIo { block: u32 },

    /// Block 0 of the image would brick the tag if written.
    #[error("refusing block 0 write, BCC should be {expected:02X}")]
    Integrity { expected: u8 },

    /// The magic-card unlock handshake failed.
    #[error("unlock failed: {0}")]
    Unlock(&'static str),

    /// The key file was captured from a different tag.
    #[error("key file UID mismatch: expected {expected}, found {found}")]
    UidMismatch { expected: String, found: String },

    /// File I/O failure while loading or saving a dump or key file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dump or key file does not match the detected card size.
    #[error("{path}: expected {expected} bytes, found {found}")]
    SizeMismatch {
        path: String,
        expected: usize,
        found: usize,
    },

    /// A requested sector does not exist on the detected card.
    #[error("sector {0} is out of range for this card")]
    SectorRange(u8),

    /// One or more requested sector operations failed.
    #[error("{failed} sector operation(s) failed")]
    Incomplete { failed: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MifareError>;
