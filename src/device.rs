//! PC/SC implementation of the transport traits for ACR122U-class readers.
//!
//! Authentication, reads and writes go through the standard contactless
//! storage pseudo-APDUs. The raw surface needed by the unlock handshake is
//! reached through the reader's direct-transmit pseudo-APDU, which hands
//! PN532 commands straight to the reader chip.

use std::ffi::CString;
use std::thread;
use std::time::Duration;

use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};

use crate::error::{MifareError, Result};
use crate::keys::Key;
use crate::layout::BLOCK_SIZE;
use crate::transport::{CardProtocol, FramingOption, KeyType, TagInfo, Transceiver};

// PC/SC part 3 contactless storage RID preceding the card-name bytes
const PCSC_RID: [u8; 5] = [0xa0, 0x00, 0x00, 0x03, 0x06];

// ATS signature of the auto-unlocking gen2 emulation card
const MAGIC2_SIGNATURE: [u8; 4] = [0xda, 0xbc, 0x19, 0x10];

// PN532 commands reachable through the direct-transmit pseudo-APDU
const PN532_WRITE_REGISTER: u8 = 0x08;
const PN532_IN_DATA_EXCHANGE: u8 = 0x40;
const PN532_IN_COMMUNICATE_THRU: u8 = 0x42;

// CIU registers controlling CRC generation and bit-oriented framing
const REG_CIU_TX_MODE: u16 = 0x6302;
const REG_CIU_RX_MODE: u16 = 0x6303;
const REG_CIU_BIT_FRAMING: u16 = 0x633d;

/// Card flavor inferred from the ATR's PC/SC card-name bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Classic1k,
    Classic4k,
    /// MIFARE Plus in Classic 2K emulation.
    Plus2k,
    Mini,
    Unknown,
}

impl CardKind {
    pub fn from_atr(atr: &[u8]) -> CardKind {
        // The standard and card-name bytes follow the RID: SS NN NN
        let Some(pos) = atr.windows(PCSC_RID.len()).position(|w| w == PCSC_RID) else {
            return CardKind::Unknown;
        };
        let name = &atr[pos + PCSC_RID.len()..];
        if name.len() < 3 {
            return CardKind::Unknown;
        }
        match [name[1], name[2]] {
            [0x00, 0x01] => CardKind::Classic1k,
            [0x00, 0x02] => CardKind::Classic4k,
            [0x00, 0x26] => CardKind::Mini,
            [0x00, 0x36] | [0x00, 0x38] => CardKind::Plus2k,
            _ => CardKind::Unknown,
        }
    }

    /// Highest block index for the guessed size.
    pub fn last_block(&self) -> u32 {
        match self {
            CardKind::Classic1k | CardKind::Unknown => 0x3f,
            CardKind::Classic4k => 0xff,
            CardKind::Plus2k => 0x7f,
            CardKind::Mini => 0x13,
        }
    }
}

/// Whether the ATR carries the gen2 emulation signature.
pub fn is_magic2(atr: &[u8]) -> bool {
    atr.windows(MAGIC2_SIGNATURE.len())
        .any(|w| w == MAGIC2_SIGNATURE)
}

/// A PC/SC context bound to one chosen reader.
pub struct PcscReader {
    ctx: Context,
    reader: CString,
}

impl PcscReader {
    /// Establish a PC/SC context and pick a reader, preferring an ACR122U.
    pub fn open() -> Result<Self> {
        let ctx = Context::establish(Scope::User)?;

        let mut readers_buffer = [0; 2048];
        let mut chosen: Option<CString> = None;
        for reader in ctx.list_readers(&mut readers_buffer)? {
            let name = reader.to_string_lossy();
            info!("found reader: {name}");
            if name.contains("ACR122") {
                chosen = Some(reader.to_owned());
                break;
            }
            if chosen.is_none() {
                chosen = Some(reader.to_owned());
            }
        }

        let reader = chosen.ok_or(MifareError::NoReader)?;
        info!("using reader: {}", reader.to_string_lossy());
        Ok(PcscReader { ctx, reader })
    }

    /// Connect to the tag currently in the field.
    pub fn connect(&self) -> Result<PcscCard> {
        let card = match self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => card,
            Err(pcsc::Error::NoSmartcard) => return Err(MifareError::NoTag),
            Err(e) => return Err(e.into()),
        };
        // Give the card a moment to stabilize
        thread::sleep(Duration::from_millis(100));

        let atr = card.status2_owned()?.atr().to_vec();
        trace!("ATR: {}", hex::encode(&atr));
        let kind = CardKind::from_atr(&atr);
        let magic2 = is_magic2(&atr);

        let mut card = PcscCard {
            card,
            uid: Vec::new(),
            kind,
            magic2,
            easy_framing: true,
        };
        card.uid = card.read_uid()?;
        Ok(card)
    }
}

/// One connected tag session.
pub struct PcscCard {
    card: Card,
    uid: Vec<u8>,
    kind: CardKind,
    magic2: bool,
    easy_framing: bool,
}

impl PcscCard {
    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    pub fn magic2(&self) -> bool {
        self.magic2
    }

    pub fn tag_info(&self) -> TagInfo {
        TagInfo {
            uid: self.uid.clone(),
        }
    }

    // Raw APDU exchange returning payload and status word
    fn exchange(&self, apdu: &[u8]) -> Result<(Vec<u8>, u8, u8)> {
        let mut recv_buffer = [0u8; MAX_BUFFER_SIZE];
        let response = self.card.transmit(apdu, &mut recv_buffer)?;
        if response.len() < 2 {
            return Err(MifareError::ShortResponse);
        }
        let sw1 = response[response.len() - 2];
        let sw2 = response[response.len() - 1];
        Ok((response[..response.len() - 2].to_vec(), sw1, sw2))
    }

    // Exchange expecting success; a rejection is an error
    fn transmit(&self, apdu: &[u8]) -> Result<Vec<u8>> {
        let (data, sw1, sw2) = self.exchange(apdu)?;
        if sw1 == 0x90 && sw2 == 0x00 {
            Ok(data)
        } else {
            Err(MifareError::Status { sw1, sw2 })
        }
    }

    // Exchange where a rejection is an expected outcome
    fn transmit_ok(&self, apdu: &[u8]) -> Result<bool> {
        let (_, sw1, sw2) = self.exchange(apdu)?;
        Ok(sw1 == 0x90 && sw2 == 0x00)
    }

    fn read_uid(&self) -> Result<Vec<u8>> {
        self.transmit(&[0xff, 0xca, 0x00, 0x00, 0x00])
    }

    // Hand a PN532 command to the reader chip and unwrap its response frame
    fn pn532(&self, cmd: &[u8]) -> Result<Vec<u8>> {
        let mut apdu = Vec::with_capacity(6 + cmd.len());
        apdu.extend_from_slice(&[0xff, 0x00, 0x00, 0x00, (cmd.len() + 1) as u8, 0xd4]);
        apdu.extend_from_slice(cmd);
        let data = self.transmit(&apdu)?;
        // The chip answers with 0xd5 and the command code + 1
        if data.len() < 2 || data[0] != 0xd5 {
            return Err(MifareError::ShortResponse);
        }
        Ok(data[2..].to_vec())
    }

    fn write_register(&self, register: u16, value: u8) -> Result<()> {
        self.pn532(&[
            PN532_WRITE_REGISTER,
            (register >> 8) as u8,
            register as u8,
            value,
        ])?;
        Ok(())
    }

    // Run a transceive-style PN532 command and strip its status byte
    fn chip_exchange(&self, cmd: &[u8]) -> Result<Vec<u8>> {
        let response = self.pn532(cmd)?;
        match response.split_first() {
            Some((0x00, data)) => Ok(data.to_vec()),
            Some((&status, _)) => Err(MifareError::Transceive(status)),
            None => Err(MifareError::ShortResponse),
        }
    }

    // InCommunicateThru: ship the frame exactly as given
    fn raw_exchange(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut cmd = vec![PN532_IN_COMMUNICATE_THRU];
        cmd.extend_from_slice(frame);
        self.chip_exchange(&cmd)
    }

    fn load_key(&self, key: &Key) -> Result<bool> {
        // Volatile key slot 0
        let mut apdu = vec![0xff, 0x82, 0x00, 0x00, 0x06];
        apdu.extend_from_slice(key);
        self.transmit_ok(&apdu)
    }
}

impl Transceiver for PcscCard {
    fn configure(&mut self, option: FramingOption, enable: bool) -> Result<()> {
        match option {
            FramingOption::HandleCrc => {
                // 106 kbps type A with the CRC engines on or off
                let mode = if enable { 0x80 } else { 0x00 };
                self.write_register(REG_CIU_TX_MODE, mode)?;
                self.write_register(REG_CIU_RX_MODE, mode)
            }
            FramingOption::EasyFraming => {
                self.easy_framing = enable;
                Ok(())
            }
        }
    }

    fn transceive_bits(&mut self, frame: &[u8], bits: usize) -> Result<Vec<u8>> {
        self.write_register(REG_CIU_BIT_FRAMING, (bits % 8) as u8)?;
        let result = self.raw_exchange(frame);
        // Back to full-byte framing whatever happened
        self.write_register(REG_CIU_BIT_FRAMING, 0x00)?;
        result
    }

    fn transceive_bytes(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if self.easy_framing {
            let mut cmd = vec![PN532_IN_DATA_EXCHANGE, 0x01];
            cmd.extend_from_slice(frame);
            self.chip_exchange(&cmd)
        } else {
            self.raw_exchange(frame)
        }
    }

    fn select_target(&mut self) -> Result<Option<TagInfo>> {
        if self
            .card
            .reconnect(ShareMode::Shared, Protocols::ANY, Disposition::ResetCard)
            .is_err()
        {
            return Ok(None);
        }
        match self.read_uid() {
            Ok(uid) => {
                self.uid = uid.clone();
                Ok(Some(TagInfo { uid }))
            }
            Err(_) => Ok(None),
        }
    }
}

impl CardProtocol for PcscCard {
    fn auth(&mut self, block: u32, key: &Key, key_type: KeyType) -> Result<bool> {
        if !self.load_key(key)? {
            return Ok(false);
        }
        let apdu = [
            0xff,
            0x86,
            0x00,
            0x00,
            0x05,
            0x01,
            0x00,
            block as u8,
            key_type as u8,
            0x00,
        ];
        self.transmit_ok(&apdu)
    }

    fn read_block(&mut self, block: u32) -> Result<[u8; BLOCK_SIZE]> {
        let data = self.transmit(&[0xff, 0xb0, 0x00, block as u8, BLOCK_SIZE as u8])?;
        if data.len() < BLOCK_SIZE {
            return Err(MifareError::ShortResponse);
        }
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(&data[..BLOCK_SIZE]);
        Ok(out)
    }

    fn write_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE]) -> Result<bool> {
        let mut apdu = vec![0xff, 0xd6, 0x00, block as u8, BLOCK_SIZE as u8];
        apdu.extend_from_slice(data);
        self.transmit_ok(&apdu)
    }
}
