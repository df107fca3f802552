//! Opaque pagination cursors.
//!
//! Two shapes exist: a keyset cursor `{timestamp, id}` for stable
//! chronological listings and an offset cursor `{offset}` for listings ordered
//! by a volatile score. Tokens are URL-safe base64 over a small JSON object.
//!
//! Decoding never fails loudly. A token that is not valid base64, not valid
//! JSON, or of the other shape decodes to `None`, and callers serve the first
//! page instead.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::ticks::parse_timestamp;

/// Last-seen sort key of a stable listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetCursor {
    /// Canonical RFC 3339 timestamp of the last returned row.
    pub timestamp: String,
    /// Tie-breaker id of the last returned row.
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cursor {
    Keyset(KeysetCursor),
    Offset(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeysetWire {
    timestamp: String,
    id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OffsetWire {
    offset: u64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        match self {
            Self::Keyset(k) => encode_keyset(&k.timestamp, &k.id),
            Self::Offset(n) => encode_offset(*n),
        }
    }

    /// Decode a token of either shape.
    pub fn decode(token: &str) -> Option<Self> {
        decode_keyset(token)
            .map(Self::Keyset)
            .or_else(|| decode_offset(token).map(Self::Offset))
    }
}

fn encode_keyset(timestamp: &str, id: &str) -> String {
    encode_wire(&KeysetWire {
        timestamp: timestamp.to_string(),
        id: id.to_string(),
    })
}

fn encode_offset(offset: u64) -> String {
    encode_wire(&OffsetWire { offset })
}

/// Decode a keyset token. Offset tokens and malformed input yield `None`.
fn decode_keyset(token: &str) -> Option<KeysetCursor> {
    let wire: KeysetWire = decode_wire(token)?;
    if wire.id.is_empty() || parse_timestamp(&wire.timestamp).is_err() {
        return None;
    }
    Some(KeysetCursor {
        timestamp: wire.timestamp,
        id: wire.id,
    })
}

/// Decode an offset token. Keyset tokens and malformed input yield `None`.
fn decode_offset(token: &str) -> Option<u64> {
    decode_wire::<OffsetWire>(token).map(|wire| wire.offset)
}

fn encode_wire<T: Serialize>(wire: &T) -> String {
    // Serializing two plain structs of strings and integers cannot fail.
    let json = serde_json::to_vec(wire).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn decode_wire<T: for<'de> Deserialize<'de>>(token: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}
