//! Hash record types.
//!
//! A [`RawRecord`] is what producers submit: an opaque unique key, the
//! record kind, an argon2id descriptor string, the miner account and the
//! upstream sequence number. The codec turns it into an
//! [`AcceptedRecord`] whose [`EncodedRecord`] is the exact byte layout the
//! ledger contract expects.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de};

use super::NormalizedAccount;

/// Width of the fixed key field inside an [`EncodedRecord`].
pub const KEY_LEN: usize = 32;

/// Kind of submitted record.
///
/// On the wire the kind is the `type` field, historically `"0"` for plain
/// hashes and `"1"` for XUNI records. Numbers and the names `hash` / `xuni`
/// are accepted as well.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "KindRepr", into = "String")]
pub enum RecordKind {
    Hash,
    Xuni,
}

impl RecordKind {
    /// All kinds, in lane order.
    pub const ALL: [RecordKind; 2] = [RecordKind::Hash, RecordKind::Xuni];

    /// Wire tag used in JSON and log entries.
    pub fn tag(self) -> &'static str {
        match self {
            RecordKind::Hash => "0",
            RecordKind::Xuni => "1",
        }
    }

    /// Stable lowercase name used in logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Hash => "hash",
            RecordKind::Xuni => "xuni",
        }
    }

    pub(crate) fn lane(self) -> usize {
        match self {
            RecordKind::Hash => 0,
            RecordKind::Xuni => 1,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<KindRepr> for RecordKind {
    type Error = String;

    fn try_from(repr: KindRepr) -> Result<Self, Self::Error> {
        match repr {
            KindRepr::Number(0) => Ok(RecordKind::Hash),
            KindRepr::Number(1) => Ok(RecordKind::Xuni),
            KindRepr::Number(n) => Err(format!("unknown record type {n}")),
            KindRepr::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "0" | "hash" => Ok(RecordKind::Hash),
                "1" | "xuni" => Ok(RecordKind::Xuni),
                other => Err(format!("unknown record type {other:?}")),
            },
        }
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        kind.tag().to_string()
    }
}

/// Producer input, one per logical submission.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Opaque unique submission id; also the dedup membership key.
    pub key: String,

    /// Record kind, serialized as the `type` field.
    #[serde(rename = "type")]
    pub kind: RecordKind,

    /// `$`-delimited argon2id descriptor, e.g.
    /// `$argon2id$v=19$m=65536,t=3,p=1$<salt>$<digest>`.
    pub hash_to_verify: String,

    /// 40-hex-char account address, optionally `0x`-prefixed.
    pub account: String,

    /// Monotonic sequence number assigned upstream.
    #[serde(deserialize_with = "deserialize_block_id")]
    pub block_id: u64,
}

/// Accepts `block_id` either as a JSON number or as a decimal string.
fn deserialize_block_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s
            .trim()
            .parse()
            .map_err(|e| de::Error::custom(format!("invalid block_id {s:?}: {e}"))),
    }
}

/// Packed record tuple in the ledger contract's layout.
///
/// Field order and widths are part of the wire contract:
/// `uint8 parallelism | uint32 memoryCost | uint8 timeCost | uint8 version |
/// bytes32 key | bytes salt`, all integers big-endian, no padding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedRecord {
    pub parallelism: u8,
    pub memory_cost: u32,
    pub time_cost: u8,
    pub version: u8,
    pub key: [u8; KEY_LEN],
    pub salt: Vec<u8>,
}

impl EncodedRecord {
    /// Bytes preceding the variable-length salt.
    pub const FIXED_LEN: usize = 1 + 4 + 1 + 1 + KEY_LEN;

    /// Total length of the packed encoding.
    pub fn encoded_len(&self) -> usize {
        Self::FIXED_LEN + self.salt.len()
    }

    /// Packs the record into the contract's byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.parallelism);
        out.extend_from_slice(&self.memory_cost.to_be_bytes());
        out.push(self.time_cost);
        out.push(self.version);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.salt);
        out
    }
}

/// A record that passed the codec and is ready to be batched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AcceptedRecord {
    /// Original submission key, carried so the coordinator can commit it
    /// to the dedup cache once the batch lands.
    pub key: String,
    pub kind: RecordKind,
    pub account: NormalizedAccount,
    pub block_id: u64,
    pub encoded: EncodedRecord,
}
