//! Command-line driver: argument parsing, device setup, the per-sector loop
//! and dump/key file plumbing.

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};

use mfclassic::device::{CardKind, PcscReader};
use mfclassic::image::CardImage;
use mfclassic::keys::{self, KeyStore};
use mfclassic::layout::BLOCK_SIZE;
use mfclassic::sector::{AccessOptions, SectorIo};
use mfclassic::transport::KeyType;
use mfclassic::{MifareError, Result};

#[derive(Debug, Parser)]
#[clap(
    name = "mfclassic",
    about = "MIFARE Classic sector read/write tool for PC/SC readers"
)]
#[clap(group(ArgGroup::new("action").required(true).args(["read", "write"])))]
#[clap(group(ArgGroup::new("keysel").required(true).args(["key_a", "key_b"])))]
struct Cli {
    /// Read tag sectors into the dump file
    #[clap(short, long)]
    read: bool,

    /// Write dump file sectors to the tag
    #[clap(short, long)]
    write: bool,

    /// Authenticate with key A
    #[clap(short = 'a', long = "key-a")]
    key_a: bool,

    /// Authenticate with key B
    #[clap(short = 'b', long = "key-b")]
    key_b: bool,

    /// Sector to access (0-15); repeat for several sectors
    #[clap(short, long = "sector", required = true, value_parser = clap::value_parser!(u8).range(0..=15))]
    sector: Vec<u8>,

    /// Unlock mode for magic cards (exposes block 0)
    #[clap(short, long)]
    unlock: bool,

    /// Keep the existing dump and only overwrite the blocks read
    #[clap(short = 'p', long)]
    append: bool,

    /// Dump file, written by --read and read by --write
    dump: PathBuf,

    /// Key file used for authentication instead of guessing
    keyfile: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let key_type = if cli.key_a { KeyType::KeyA } else { KeyType::KeyB };
    let use_key_file = cli.keyfile.is_some();
    // Both top-level actions keep going past failed blocks
    let opts = AccessOptions {
        key_type,
        use_key_file,
        tolerate_failures: true,
    };

    // Check the key file's expected UID before any tag I/O
    let expected_uid = cli.keyfile.as_deref().map(keys::probe_uid).transpose()?;

    let reader = PcscReader::open()?;
    let mut card = reader.connect()?;
    info!("card UID: {}", hex::encode(card.uid()));

    if card.kind() == CardKind::Unknown {
        warn!("tag does not announce itself as a MIFARE Classic");
    }
    if let Some(expected) = expected_uid {
        // A key file named on the command line is always forced
        keys::check_expected_uid(&expected, card.uid(), true)?;
    }

    let last_block = card.kind().last_block();
    info!(
        "guessing size: seems to be a {}-byte card",
        (last_block as usize + 1) * BLOCK_SIZE
    );
    if card.magic2() {
        info!("gen2 magic card detected, block 0 is writable without unlock");
    }
    for &sector in &cli.sector {
        if (sector as u32 + 1) * 4 - 1 > last_block {
            return Err(MifareError::SectorRange(sector));
        }
    }

    let mut keystore = match &cli.keyfile {
        Some(path) => KeyStore::load(path, last_block)?,
        None => KeyStore::blank(last_block),
    };

    // Reads start from a blank image unless appending; writes and appends
    // take the dump on disk
    let mut image = if cli.read && !cli.append {
        CardImage::blank(last_block)
    } else {
        CardImage::load(&cli.dump, last_block)?
    };

    let tag = card.tag_info();
    let magic2 = card.magic2();
    let mut failed = 0usize;

    for &sector in &cli.sector {
        let outcome = {
            let mut io = SectorIo::new(
                &mut card,
                &mut keystore,
                &mut image,
                tag.clone(),
                magic2,
                opts,
            );
            if cli.read {
                io.read_sector(sector, cli.unlock)
            } else {
                io.write_sector(sector, cli.unlock)
            }
        };

        match outcome {
            Ok(_) => {
                if cli.read {
                    image.save(&cli.dump)?;
                    info!("dump written to {}", cli.dump.display());
                }
            }
            Err(e) => {
                error!("sector {sector}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(MifareError::Incomplete { failed });
    }
    Ok(())
}
