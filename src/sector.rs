//! Block-by-block sector reads and writes.
//!
//! One authenticated group covers [`SECTOR_SIZE`] blocks. Reads walk a
//! sector from its trailer down (the trailer carries the keys that make the
//! rest interpretable), writes walk it from the first block up. A failed
//! block poisons the rest of its group and forces a fresh anticollision
//! before the next one; whether it also ends the whole operation is a
//! run-wide choice.

use std::io::{self, Write};

use crate::auth::Authenticator;
use crate::error::{MifareError, Result};
use crate::image::{block0_bcc, block0_bcc_ok, BlockContent, CardImage};
use crate::keys::KeyStore;
use crate::layout::{self, BLOCK_SIZE, SECTOR_SIZE};
use crate::transport::{CardProtocol, KeyType, TagInfo};
use crate::unlock;

/// Run-wide choices shared by every sector operation.
#[derive(Debug, Clone, Copy)]
pub struct AccessOptions {
    pub key_type: KeyType,
    pub use_key_file: bool,
    /// Keep going past a failed block instead of aborting the sector.
    pub tolerate_failures: bool,
}

/// Drives read and write operations for individual sectors.
pub struct SectorIo<'a, C: CardProtocol> {
    card: &'a mut C,
    keys: &'a mut KeyStore,
    image: &'a mut CardImage,
    tag: TagInfo,
    magic2: bool,
    opts: AccessOptions,
    auth: Authenticator,
}

impl<'a, C: CardProtocol> SectorIo<'a, C> {
    pub fn new(
        card: &'a mut C,
        keys: &'a mut KeyStore,
        image: &'a mut CardImage,
        tag: TagInfo,
        magic2: bool,
        opts: AccessOptions,
    ) -> Self {
        SectorIo {
            card,
            keys,
            image,
            tag,
            magic2,
            opts,
            auth: Authenticator {
                key_type: opts.key_type,
                use_key_file: opts.use_key_file,
            },
        }
    }

    /// Read one sector into the image, trailer first.
    ///
    /// Returns how many of the sector's blocks were read. In unlocked mode
    /// the backdoor handshake replaces authentication and trailer bytes are
    /// mirrored verbatim (the real keys are not recoverable that way).
    pub fn read_sector(&mut self, sector: u8, unlocked: bool) -> Result<u32> {
        let trailer = (sector as u32 + 1) * 4 - 1;
        let first = trailer + 1 - SECTOR_SIZE;

        if unlocked {
            unlock::unlock(self.card, self.magic2)?;
        }

        print!("Reading sector {sector:02}, blocks {trailer} down to {first} |");
        let mut failure = false;
        let mut blocks_read = 0u32;

        for block in (first..=trailer).rev() {
            if layout::is_trailer_block(block) {
                if failure {
                    // The tag state is undefined after a failure
                    self.reselect()?;
                    failure = false;
                }
                let _ = io::stdout().flush();

                if !unlocked
                    && !self.auth.authenticate(self.card, self.keys, &self.tag, block)?
                {
                    return Err(MifareError::Auth {
                        block,
                        sector: block / 4,
                    });
                }

                match self.card.read_block(block) {
                    Ok(data) => {
                        if unlocked {
                            // Raw mirror of the trailer bytes
                            self.image.set_block(block, &data);
                        } else {
                            // Keys come from the store, access bits from the tag
                            let key_a = self.keys.key_for(block, KeyType::KeyA);
                            let key_b = self.keys.key_for(block, KeyType::KeyB);
                            let mut access_bits = [0u8; 4];
                            access_bits.copy_from_slice(&data[6..10]);
                            self.image.set_trailer(block, &key_a, &access_bits, &key_b);
                        }
                    }
                    Err(e) => {
                        warn!("failed to read trailer block {block:#04x}: {e}");
                        failure = true;
                    }
                }
            } else if !failure {
                match self.card.read_block(block) {
                    Ok(data) => self.image.set_block(block, &data),
                    Err(e) => {
                        warn!("unable to read block {block:#04x}: {e}");
                        failure = true;
                    }
                }
            }

            progress(failure, &mut blocks_read);
            if !self.opts.tolerate_failures && failure {
                return Err(MifareError::BlockIo { block });
            }
        }
        println!("|");
        println!("Done, {blocks_read} of {SECTOR_SIZE} blocks read.");

        Ok(blocks_read)
    }

    /// Write one sector from the image, first block up to the trailer.
    ///
    /// Block 0 is skipped unless `write_block_zero` (backdoor unlock) or a
    /// gen2 magic tag is in use, and its UID/BCC consistency is checked
    /// before anything is sent; a bad manufacturer block would brick the
    /// tag.
    pub fn write_sector(&mut self, sector: u8, write_block_zero: bool) -> Result<u32> {
        let trailer = (sector as u32 + 1) * 4 - 1;
        let first = trailer + 1 - SECTOR_SIZE;

        if write_block_zero {
            unlock::unlock(self.card, self.magic2)?;
        }

        print!("Writing sector {sector:02}, blocks {first} up to {trailer} |");
        let mut failure = false;
        let mut blocks_written = 0u32;

        for block in first..=trailer {
            if layout::is_first_block(block) {
                if failure {
                    self.reselect()?;
                    failure = false;
                }
                let _ = io::stdout().flush();

                // Unlock mode bypasses authentication entirely
                if !write_block_zero
                    && !self.auth.authenticate(self.card, self.keys, &self.tag, block)?
                {
                    return Err(MifareError::Auth {
                        block,
                        sector: block / 4,
                    });
                }
            }

            if layout::is_trailer_block(block) {
                if !failure {
                    let data = match self.image.content(block) {
                        BlockContent::Trailer {
                            key_a,
                            access_bits,
                            key_b,
                        } => {
                            let mut data = [0u8; BLOCK_SIZE];
                            data[..6].copy_from_slice(&key_a);
                            data[6..10].copy_from_slice(&access_bits);
                            data[10..].copy_from_slice(&key_b);
                            data
                        }
                        // a trailer index never views as data
                        BlockContent::Data(raw) => raw,
                    };
                    match self.card.write_block(block, &data) {
                        Ok(true) => {}
                        _ => {
                            warn!("failed to write trailer block {block:#04x}");
                            failure = true;
                        }
                    }
                }
            } else {
                // The manufacturer block is read-only on genuine tags
                if block == 0 && !write_block_zero && !self.magic2 {
                    continue;
                }

                if !failure {
                    let data = *self.image.block(block);
                    if block == 0 && !self.magic2 && !block0_bcc_ok(&data) {
                        return Err(MifareError::Integrity {
                            expected: block0_bcc(&data),
                        });
                    }
                    match self.card.write_block(block, &data) {
                        Ok(true) => {}
                        _ => {
                            warn!("unable to write block {block:#04x}");
                            failure = true;
                        }
                    }
                }
            }

            progress(failure, &mut blocks_written);
            if !self.opts.tolerate_failures && failure {
                return Err(MifareError::BlockIo { block });
            }
        }
        println!("|");
        println!("Done, {blocks_written} of {SECTOR_SIZE} blocks written.");

        Ok(blocks_written)
    }

    fn reselect(&mut self) -> Result<()> {
        match self.card.select_target()? {
            Some(tag) => {
                self.tag = tag;
                Ok(())
            }
            None => Err(MifareError::TagLost),
        }
    }
}

// One symbol per block so partial failures stay visible
fn progress(failed: bool, counter: &mut u32) {
    print!("{}", if failed { 'x' } else { '.' });
    if !failed {
        *counter += 1;
    }
    let _ = io::stdout().flush();
}
