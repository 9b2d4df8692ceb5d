use anchor_lang::{AnchorDeserialize, Discriminator};
use indexmap::IndexMap;
#[cfg(feature = "serde")]
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// Decoded fields of one event, in schema declaration order.
pub type FieldMap = IndexMap<String, FieldValue>;

/// Name given to events whose discriminator is not in the registry.
pub const UNKNOWN_EVENT_NAME: &str = "unknown";

/// A single decoded Borsh value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "lowercase"))]
pub enum FieldValue {
    Bool(bool),
    Uint(u128),
    Int(i128),
    Str(String),
    Bytes(Vec<u8>),
    Pubkey(#[cfg_attr(feature = "serde", serde(serialize_with = "serialize_pubkey"))] Pubkey),
    Array(Vec<FieldValue>),
    Struct(FieldMap),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Uint(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pubkey(&self) -> Option<&Pubkey> {
        match self {
            FieldValue::Pubkey(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Uint(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Str(s) => write!(f, "{s}"),
            FieldValue::Bytes(b) => write!(f, "{b:?}"),
            FieldValue::Pubkey(p) => write!(f, "{p}"),
            FieldValue::Array(items) => {
                let parts: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            FieldValue::Struct(fields) => {
                let parts: Vec<_> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            FieldValue::Null => write!(f, "null"),
        }
    }
}

#[cfg(feature = "serde")]
fn serialize_pubkey<S: serde::Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}

/// Metadata shared by every event parsed out of one log batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct EventContext {
    pub slot: u64,
    /// Base58 transaction signature.
    pub signature: String,
    /// Unix timestamp of the block, when the source knows it.
    pub block_time: Option<i64>,
    /// The transaction error reported alongside the logs, if any.
    pub err: Option<String>,
}

/// The result of decoding one candidate log payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "lowercase"))]
pub enum DecodedEvent {
    Known {
        name: String,
        fields: FieldMap,
        /// `false` when the event failed validation under the `warn` policy.
        valid: bool,
        /// The full payload, discriminator included.
        data: Vec<u8>,
    },
    /// A payload whose discriminator matched no schema.
    Unknown { data: Vec<u8> },
}

impl DecodedEvent {
    pub fn name(&self) -> &str {
        match self {
            DecodedEvent::Known { name, .. } => name,
            DecodedEvent::Unknown { .. } => UNKNOWN_EVENT_NAME,
        }
    }

    /// Decoded fields; empty for unknown events.
    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            DecodedEvent::Known { fields, .. } => Some(fields),
            DecodedEvent::Unknown { .. } => None,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            DecodedEvent::Known { data, .. } | DecodedEvent::Unknown { data } => data,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            DecodedEvent::Known { valid, .. } => *valid,
            DecodedEvent::Unknown { .. } => true,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, DecodedEvent::Unknown { .. })
    }
}

/// A decoded event stamped with the batch it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ParsedEvent {
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_pubkey"))]
    pub program_id: Pubkey,
    pub event: DecodedEvent,
    pub context: EventContext,
}

impl ParsedEvent {
    pub fn name(&self) -> &str {
        self.event.name()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.event.fields().and_then(|fields| fields.get(name))
    }

    /// Re-decodes the raw payload into a typed Anchor event.
    ///
    /// Returns `None` if the discriminator belongs to another type or the body
    /// does not deserialize as `E`.
    pub fn decode_as<E>(&self) -> Option<E>
    where
        E: AnchorDeserialize + Discriminator,
    {
        let body = self.event.data().strip_prefix(E::DISCRIMINATOR)?;
        E::try_from_slice(body).ok()
    }
}
