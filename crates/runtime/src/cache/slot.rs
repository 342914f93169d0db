//! Tagged cache slot and its string codec.
//!
//! A cache key holds exactly one of a published value, a published "absent"
//! marker, a reader's lock token, or the set of writers currently holding it.
//! The string layout is known only here:
//!
//! | slot | encoding |
//! |---|---|
//! | `Value(bytes)` | `v:<hex bytes>` |
//! | `Absent` | `absent` |
//! | `ReadLock(token)` | `r:<token>` |
//! | `WriteLock(holders)` | `w:<id>,<id>,...` |

use std::collections::BTreeSet;
use std::fmt;

use super::backend::CacheError;

const VALUE_PREFIX: &str = "v:";
const ABSENT: &str = "absent";
const READ_PREFIX: &str = "r:";
const WRITE_PREFIX: &str = "w:";

/// Token a reader writes into an empty slot to claim the right to publish.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(String);

/// Identity of one `lock_while_writing` call.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HolderId(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl HolderId {
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Decoded content of a cache key. A missing key is "not cached" and is
/// represented by `Option::None` around this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheSlot {
    Value(Vec<u8>),
    Absent,
    ReadLock(LockToken),
    WriteLock(BTreeSet<HolderId>),
}

impl CacheSlot {
    pub fn write_lock(holder: HolderId) -> Self {
        CacheSlot::WriteLock(BTreeSet::from([holder]))
    }

    pub fn is_read_lock(&self, token: &LockToken) -> bool {
        matches!(self, CacheSlot::ReadLock(held) if held == token)
    }

    pub fn encode(&self) -> String {
        match self {
            CacheSlot::Value(bytes) => format!("{VALUE_PREFIX}{}", hex::encode(bytes)),
            CacheSlot::Absent => ABSENT.to_string(),
            CacheSlot::ReadLock(token) => format!("{READ_PREFIX}{token}"),
            CacheSlot::WriteLock(holders) => {
                let ids: Vec<&str> = holders.iter().map(HolderId::as_str).collect();
                format!("{WRITE_PREFIX}{}", ids.join(","))
            }
        }
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        if raw == ABSENT {
            return Ok(CacheSlot::Absent);
        }
        if let Some(hex_bytes) = raw.strip_prefix(VALUE_PREFIX) {
            return hex::decode(hex_bytes)
                .map(CacheSlot::Value)
                .map_err(|e| CacheError::Codec(format!("value slot: {e}")));
        }
        if let Some(token) = raw.strip_prefix(READ_PREFIX) {
            if token.is_empty() {
                return Err(CacheError::Codec("empty read lock token".into()));
            }
            return Ok(CacheSlot::ReadLock(LockToken(token.to_string())));
        }
        if let Some(ids) = raw.strip_prefix(WRITE_PREFIX) {
            let holders: BTreeSet<HolderId> = ids
                .split(',')
                .filter(|id| !id.is_empty())
                .map(|id| HolderId(id.to_string()))
                .collect();
            if holders.is_empty() {
                return Err(CacheError::Codec("write lock without holders".into()));
            }
            return Ok(CacheSlot::WriteLock(holders));
        }
        Err(CacheError::Codec(format!("unknown slot tag in {raw:?}")))
    }

    /// Decodes an optional raw backend value.
    pub fn decode_opt(raw: Option<&str>) -> Result<Option<Self>, CacheError> {
        raw.map(Self::decode).transpose()
    }
}
