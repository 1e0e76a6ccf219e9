//! Sector-level read/write access to MIFARE Classic cards over PC/SC.
//!
//! The engine in [`sector`] drives authentication, block iteration and
//! failure recovery against two capability traits ([`transport::Transceiver`]
//! and [`transport::CardProtocol`]), so it can be exercised against a mock
//! card. [`device`] provides the real implementation of both traits for
//! ACR122U-class readers.

#[macro_use]
extern crate tracing;

pub mod auth;
pub mod device;
pub mod error;
pub mod image;
pub mod keys;
pub mod layout;
pub mod sector;
pub mod transport;
pub mod unlock;

pub use error::{MifareError, Result};
