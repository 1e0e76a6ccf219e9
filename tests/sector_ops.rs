//! Engine behavior against a scripted mock card.

use std::collections::HashSet;

use mfclassic::auth::Authenticator;
use mfclassic::error::MifareError;
use mfclassic::image::{BlockContent, CardImage};
use mfclassic::keys::{KeyStore, DEFAULT_KEYS};
use mfclassic::layout::BLOCK_SIZE;
use mfclassic::sector::{AccessOptions, SectorIo};
use mfclassic::transport::{CardProtocol, FramingOption, KeyType, TagInfo, Transceiver};
use mfclassic::unlock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Configure(FramingOption, bool),
    Bits(Vec<u8>, usize),
    Bytes(Vec<u8>),
    Select,
    Auth(u32),
    Read(u32),
    Write(u32, [u8; BLOCK_SIZE]),
}

struct MockCard {
    /// Tag memory, one entry per block.
    blocks: Vec<[u8; BLOCK_SIZE]>,
    /// The key the tag accepts, for either key type.
    accept_key: [u8; 6],
    fail_reads: HashSet<u32>,
    fail_writes: HashSet<u32>,
    /// Whether re-selection finds the tag again.
    tag_present: bool,
    events: Vec<Event>,
}

impl MockCard {
    fn new(last_block: u32) -> Self {
        let mut blocks = vec![[0u8; BLOCK_SIZE]; last_block as usize + 1];
        for (i, block) in blocks.iter_mut().enumerate() {
            for (j, byte) in block.iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(16).wrapping_add(j as u8);
            }
        }
        MockCard {
            blocks,
            accept_key: DEFAULT_KEYS[0],
            fail_reads: HashSet::new(),
            fail_writes: HashSet::new(),
            tag_present: true,
            events: Vec::new(),
        }
    }

    fn auth_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Auth(_)))
            .count()
    }

    fn select_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Select))
            .count()
    }

    fn reads(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Read(block) => Some(*block),
                _ => None,
            })
            .collect()
    }

    fn writes(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Write(block, _) => Some(*block),
                _ => None,
            })
            .collect()
    }
}

impl Transceiver for MockCard {
    fn configure(&mut self, option: FramingOption, enable: bool) -> mfclassic::Result<()> {
        self.events.push(Event::Configure(option, enable));
        Ok(())
    }

    fn transceive_bits(&mut self, frame: &[u8], bits: usize) -> mfclassic::Result<Vec<u8>> {
        self.events.push(Event::Bits(frame.to_vec(), bits));
        Ok(vec![0x0a])
    }

    fn transceive_bytes(&mut self, frame: &[u8]) -> mfclassic::Result<Vec<u8>> {
        self.events.push(Event::Bytes(frame.to_vec()));
        Ok(vec![0x0a])
    }

    fn select_target(&mut self) -> mfclassic::Result<Option<TagInfo>> {
        self.events.push(Event::Select);
        Ok(self.tag_present.then(|| TagInfo {
            uid: vec![0x04, 0x12, 0x34, 0x56],
        }))
    }
}

impl CardProtocol for MockCard {
    fn auth(&mut self, block: u32, key: &[u8; 6], _key_type: KeyType) -> mfclassic::Result<bool> {
        self.events.push(Event::Auth(block));
        Ok(*key == self.accept_key)
    }

    fn read_block(&mut self, block: u32) -> mfclassic::Result<[u8; BLOCK_SIZE]> {
        self.events.push(Event::Read(block));
        if self.fail_reads.contains(&block) {
            return Err(MifareError::Status {
                sw1: 0x63,
                sw2: 0x00,
            });
        }
        Ok(self.blocks[block as usize])
    }

    fn write_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE]) -> mfclassic::Result<bool> {
        self.events.push(Event::Write(block, *data));
        if self.fail_writes.contains(&block) {
            return Ok(false);
        }
        self.blocks[block as usize] = *data;
        Ok(true)
    }
}

fn tag() -> TagInfo {
    TagInfo {
        uid: vec![0x04, 0x12, 0x34, 0x56],
    }
}

fn opts(tolerate_failures: bool, use_key_file: bool) -> AccessOptions {
    AccessOptions {
        key_type: KeyType::KeyA,
        use_key_file,
        tolerate_failures,
    }
}

#[test]
fn sector_zero_reads_trailer_first_with_one_auth() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, false));
    assert_eq!(io.read_sector(0, false).unwrap(), 4);

    assert_eq!(card.auth_count(), 1);
    assert_eq!(card.events[0], Event::Auth(3));
    assert_eq!(card.reads(), vec![3, 2, 1, 0]);

    // Data blocks mirror the tag
    assert_eq!(image.block(1), &card.blocks[1]);
    assert_eq!(image.block(2), &card.blocks[2]);

    // Trailer: discovered key A, access bits from the tag, key B unknown
    match image.content(3) {
        BlockContent::Trailer {
            key_a,
            access_bits,
            key_b,
        } => {
            assert_eq!(key_a, DEFAULT_KEYS[0]);
            assert_eq!(access_bits, [0x36, 0x37, 0x38, 0x39]);
            assert_eq!(key_b, [0u8; 6]);
        }
        other => panic!("expected trailer, got {other:?}"),
    }
}

#[test]
fn rereading_a_sector_is_idempotent() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);

    let mut first = CardImage::blank(0x3f);
    SectorIo::new(&mut card, &mut keys, &mut first, tag(), false, opts(true, false))
        .read_sector(1, false)
        .unwrap();

    let mut second = CardImage::blank(0x3f);
    SectorIo::new(&mut card, &mut keys, &mut second, tag(), false, opts(true, false))
        .read_sector(1, false)
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn third_key_needs_three_attempts_and_two_reselects() {
    let mut card = MockCard::new(0x3f);
    card.accept_key = DEFAULT_KEYS[2];
    let mut keys = KeyStore::blank(0x3f);

    let auth = Authenticator {
        key_type: KeyType::KeyA,
        use_key_file: false,
    };
    assert!(auth.authenticate(&mut card, &mut keys, &tag(), 3).unwrap());

    assert_eq!(card.auth_count(), 3);
    assert_eq!(card.select_count(), 2);
    assert_eq!(keys.key_for(3, KeyType::KeyA), DEFAULT_KEYS[2]);
}

#[test]
fn exhausted_dictionary_reports_failure() {
    let mut card = MockCard::new(0x3f);
    card.accept_key = [0x99; 6];
    let mut keys = KeyStore::blank(0x3f);

    let auth = Authenticator {
        key_type: KeyType::KeyA,
        use_key_file: false,
    };
    assert!(!auth.authenticate(&mut card, &mut keys, &tag(), 3).unwrap());
    assert_eq!(card.auth_count(), DEFAULT_KEYS.len());
}

#[test]
fn key_file_mode_tries_exactly_once() {
    let stored = [0x42, 0x42, 0x42, 0x42, 0x42, 0x42];
    let mut card = MockCard::new(0x3f);
    card.accept_key = stored;
    let mut keys = KeyStore::blank(0x3f);
    keys.remember(3, KeyType::KeyA, &stored);

    let auth = Authenticator {
        key_type: KeyType::KeyA,
        use_key_file: true,
    };
    assert!(auth.authenticate(&mut card, &mut keys, &tag(), 3).unwrap());
    assert_eq!(card.auth_count(), 1);
    assert_eq!(card.select_count(), 0);
}

#[test]
fn key_file_auth_failure_ends_the_sector_read() {
    let mut card = MockCard::new(0x3f);
    card.accept_key = [0x99; 6];
    let mut keys = KeyStore::blank(0x3f); // stored keys are all zero
    let mut image = CardImage::blank(0x3f);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, true));
    match io.read_sector(0, false) {
        Err(MifareError::Auth { block: 3, sector: 0 }) => {}
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert_eq!(card.auth_count(), 1);
    assert!(card.reads().is_empty());
}

#[test]
fn strict_mode_stops_at_the_failed_block() {
    let mut card = MockCard::new(0x3f);
    card.fail_reads.insert(2);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(false, false));
    match io.read_sector(0, false) {
        Err(MifareError::BlockIo { block: 2 }) => {}
        other => panic!("expected block I/O failure, got {other:?}"),
    }

    // Blocks 1 and 0 are never attempted
    assert_eq!(card.reads(), vec![3, 2]);
}

#[test]
fn tolerated_failure_skips_the_rest_of_the_group() {
    let mut card = MockCard::new(0x3f);
    card.fail_reads.insert(2);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, false));
    // Only the trailer makes it
    assert_eq!(io.read_sector(0, false).unwrap(), 1);
    assert_eq!(card.reads(), vec![3, 2]);
}

#[test]
fn write_sector_zero_skips_the_manufacturer_block() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);
    image.set_block(1, &[0x11; BLOCK_SIZE]);
    image.set_block(2, &[0x22; BLOCK_SIZE]);
    image.set_trailer(3, &[0xa0; 6], &[0xff, 0x07, 0x80, 0x69], &[0xb0; 6]);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, false));
    assert_eq!(io.write_sector(0, false).unwrap(), 3);

    assert_eq!(card.auth_count(), 1);
    assert_eq!(card.events[0], Event::Auth(0));
    assert_eq!(card.writes(), vec![1, 2, 3]);

    // Trailer assembled keyA || accessBits || keyB
    let mut trailer = [0u8; BLOCK_SIZE];
    trailer[..6].copy_from_slice(&[0xa0; 6]);
    trailer[6..10].copy_from_slice(&[0xff, 0x07, 0x80, 0x69]);
    trailer[10..].copy_from_slice(&[0xb0; 6]);
    assert!(card.events.contains(&Event::Write(3, trailer)));
}

#[test]
fn bad_bcc_aborts_before_any_write() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);
    let mut block0 = [0u8; BLOCK_SIZE];
    block0[..5].copy_from_slice(&[0x04, 0x12, 0x34, 0x56, 0x61]); // BCC should be 0x60
    image.set_block(0, &block0);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, false));
    match io.write_sector(0, true) {
        Err(MifareError::Integrity { expected: 0x60 }) => {}
        other => panic!("expected integrity violation, got {other:?}"),
    }
    assert!(card.writes().is_empty());
}

#[test]
fn good_bcc_writes_block_zero_in_unlock_mode() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);
    let mut block0 = [0u8; BLOCK_SIZE];
    block0[..5].copy_from_slice(&[0x04, 0x12, 0x34, 0x56, 0x60]);
    image.set_block(0, &block0);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, false));
    assert_eq!(io.write_sector(0, true).unwrap(), 4);

    // Unlock mode bypasses authentication
    assert_eq!(card.auth_count(), 0);
    assert_eq!(card.writes(), vec![0, 1, 2, 3]);
}

#[test]
fn magic2_card_writes_block_zero_without_unlock() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), true, opts(true, false));
    assert_eq!(io.write_sector(0, false).unwrap(), 4);

    assert_eq!(card.auth_count(), 1);
    assert_eq!(card.writes(), vec![0, 1, 2, 3]);
    // No raw-mode traffic for a gen2 card
    assert!(!card
        .events
        .iter()
        .any(|e| matches!(e, Event::Configure(..) | Event::Bits(..) | Event::Bytes(..))));
}

#[test]
fn unlocked_read_mirrors_trailer_bytes() {
    let mut card = MockCard::new(0x3f);
    let mut keys = KeyStore::blank(0x3f);
    let mut image = CardImage::blank(0x3f);

    let mut io = SectorIo::new(&mut card, &mut keys, &mut image, tag(), false, opts(true, false));
    assert_eq!(io.read_sector(0, true).unwrap(), 4);

    assert_eq!(card.auth_count(), 0);
    // The trailer is copied raw instead of split into key fields
    assert_eq!(image.block(3), &card.blocks[3]);
}

#[test]
fn unlock_sequence_order() {
    let mut card = MockCard::new(3);
    unlock::unlock(&mut card, false).unwrap();

    assert_eq!(
        card.events,
        vec![
            Event::Configure(FramingOption::HandleCrc, false),
            Event::Configure(FramingOption::EasyFraming, false),
            Event::Bytes(vec![0x50, 0x00, 0x57, 0xcd]),
            Event::Bits(vec![0x40], 7),
            Event::Bytes(vec![0x43]),
            Event::Configure(FramingOption::HandleCrc, true),
            Event::Configure(FramingOption::EasyFraming, true),
        ]
    );
}

#[test]
fn unlock_refused_for_magic2() {
    let mut card = MockCard::new(3);
    match unlock::unlock(&mut card, true) {
        Err(MifareError::Unlock(_)) => {}
        other => panic!("expected unlock refusal, got {other:?}"),
    }
    assert!(card.events.is_empty());
}
