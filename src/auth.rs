//! Per-sector authentication: key-file single shot or dictionary sweep.

use crate::error::Result;
use crate::keys::{Key, KeyStore, DEFAULT_KEYS};
use crate::transport::{CardProtocol, KeyType, TagInfo};

/// Everything one authentication attempt needs; built fresh per attempt and
/// discarded afterwards.
#[derive(Debug, Clone, Copy)]
struct AuthContext {
    uid: [u8; 4],
    key: Key,
    key_type: KeyType,
}

/// Orchestrates authentication for one sector operation.
#[derive(Debug, Clone, Copy)]
pub struct Authenticator {
    pub key_type: KeyType,
    /// With a key file in force there is exactly one attempt per sector;
    /// otherwise the dictionary is swept.
    pub use_key_file: bool,
}

impl Authenticator {
    /// Authenticate for the sector containing `block`.
    ///
    /// In guessing mode a failed attempt desynchronizes the tag session, so
    /// the passive target is re-selected before the next candidate. A key
    /// discovered this way is recorded in the store.
    pub fn authenticate<C: CardProtocol>(
        &self,
        card: &mut C,
        keys: &mut KeyStore,
        tag: &TagInfo,
        block: u32,
    ) -> Result<bool> {
        let uid = tag.auth_uid();

        if self.use_key_file {
            let ctx = AuthContext {
                uid,
                key: keys.key_for(block, self.key_type),
                key_type: self.key_type,
            };
            trace!(
                block,
                key = %hex::encode(ctx.key),
                "authenticating with stored key"
            );
            return card.auth(block, &ctx.key, ctx.key_type);
        }

        for candidate in DEFAULT_KEYS {
            let ctx = AuthContext {
                uid,
                key: candidate,
                key_type: self.key_type,
            };
            trace!(
                block,
                uid = %hex::encode(ctx.uid),
                key = %hex::encode(ctx.key),
                "trying dictionary key"
            );
            if card.auth(block, &ctx.key, ctx.key_type)? {
                keys.remember(block, self.key_type, &ctx.key);
                return Ok(true);
            }
            // The failed attempt left the session undefined
            card.select_target()?;
        }

        Ok(false)
    }
}
