//! Backdoor unlock handshake for "magic" cards.
//!
//! Counterfeit gen1 tags accept a vendor sequence that bypasses
//! authentication and exposes the otherwise read-only manufacturer block 0.
//! The sequence is raw: CRC handling and standard framing are switched off,
//! a HALT is issued (with the CRC appended by hand), then a 7-bit `40`
//! frame and a one-byte `43` frame, and framing is restored.

use crate::error::{MifareError, Result};
use crate::transport::{FramingOption, Transceiver};

/// HALT command, CRC appended at send time.
pub const HALT: [u8; 2] = [0x50, 0x00];

// gen1 backdoor commands
const UNLOCK1: [u8; 1] = [0x40];
const UNLOCK2: [u8; 1] = [0x43];

/// ISO14443-A CRC of `data`, low byte first.
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut b = byte ^ (crc as u8);
        b ^= b << 4;
        let b = b as u16;
        crc = (crc >> 8) ^ (b << 8) ^ (b << 3) ^ (b >> 4);
    }
    [crc as u8, (crc >> 8) as u8]
}

/// Append the ISO14443-A CRC to a raw frame.
pub fn append_crc_a(frame: &mut Vec<u8>) {
    let crc = crc_a(frame);
    frame.extend_from_slice(&crc);
}

/// Run the unlock handshake.
///
/// gen2 ("magic2") tags unlock on their own and would be confused by the
/// sequence, so they are refused outright. On any failure the caller must
/// not touch protected blocks.
pub fn unlock<T: Transceiver>(card: &mut T, magic2: bool) -> Result<()> {
    if magic2 {
        warn!("unlock is not required for this card");
        return Err(MifareError::Unlock("gen2 card unlocks on its own"));
    }

    card.configure(FramingOption::HandleCrc, false)?;
    card.configure(FramingOption::EasyFraming, false)?;

    let mut halt = HALT.to_vec();
    append_crc_a(&mut halt);
    // The halted tag does not answer; the exchange outcome is irrelevant
    let _ = card.transceive_bytes(&halt);

    if card.transceive_bits(&UNLOCK1, 7).is_err() {
        return Err(MifareError::Unlock("no answer to the 7-bit frame"));
    }
    if card.transceive_bytes(&UNLOCK2).is_err() {
        return Err(MifareError::Unlock("no answer to the second frame"));
    }

    card.configure(FramingOption::HandleCrc, true)?;
    card.configure(FramingOption::EasyFraming, true)?;
    Ok(())
}
