//! Validated soul identifiers.
//!
//! A soul id is an opaque token of the form `SOUL-` followed by 32 to 42
//! uppercase hex characters. The payload width varies because the generator
//! grows its entropy on collision (see `crate::ident`). Untrusted input only
//! becomes a `SoulId` through [`SoulId::parse`]; everything downstream can
//! then treat the id as a trusted graph reference.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Prefix every soul id starts with.
pub const SOUL_ID_PREFIX: &str = "SOUL-";

/// Minimum hex payload width (16 random bytes).
pub const SOUL_ID_MIN_HEX: usize = 32;

/// Maximum hex payload width (21 random bytes, after entropy growth).
pub const SOUL_ID_MAX_HEX: usize = 42;

/// An opaque, validated soul identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SoulId(String);

impl SoulId {
    /// Validate and wrap an identifier. Fails on anything that does not
    /// match `SOUL-[0-9A-F]{32,42}`.
    pub fn parse(raw: impl Into<String>) -> Result<SoulId> {
        let raw = raw.into();
        if SoulId::is_valid(&raw) {
            Ok(SoulId(raw))
        } else {
            Err(Error::InvalidSoulId(raw))
        }
    }

    /// Shape check without constructing.
    pub fn is_valid(raw: &str) -> bool {
        let Some(payload) = raw.strip_prefix(SOUL_ID_PREFIX) else {
            return false;
        };
        (SOUL_ID_MIN_HEX..=SOUL_ID_MAX_HEX).contains(&payload.len())
            && payload.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
    }

    /// Construct from a payload the generator already knows is hex.
    pub(crate) fn from_generated(token: String) -> SoulId {
        debug_assert!(SoulId::is_valid(&token));
        SoulId(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SoulId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SoulId {
    type Error = Error;

    fn try_from(raw: String) -> Result<SoulId> {
        SoulId::parse(raw)
    }
}

impl From<SoulId> for String {
    fn from(id: SoulId) -> String {
        id.0
    }
}

impl AsRef<str> for SoulId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
