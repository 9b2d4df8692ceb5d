//! # Event Schemas
//!
//! The connector does not own an IDL type system. It only needs two things from
//! one: a way to find a schema by the discriminator at the front of a payload,
//! and a way to turn the rest of the payload into field values. Both live
//! behind the [`SchemaRegistry`] trait.
//!
//! [`EventRegistry`] is the in-memory default. It keys schemas by their Anchor
//! discriminator (`sha256("event:<Name>")[..8]`) and decodes bodies with the
//! Borsh codec in [`crate::codec`].

use crate::{codec, events::FieldMap};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, io, sync::Arc};

/// Length of an Anchor event discriminator.
pub const DISCRIMINATOR_LEN: usize = 8;

/// The byte prefix identifying an event type.
pub type Discriminator = Box<[u8]>;

/// Computes the Anchor discriminator for an event name.
pub fn event_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("event:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// The Borsh layout of a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    I128,
    String,
    Bytes,
    Pubkey,
    Option(Box<FieldType>),
    Vec(Box<FieldType>),
    Array(Box<FieldType>, usize),
    Struct(Vec<FieldDef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// Optional fields may decode to `Null` without failing validation.
    pub optional: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let optional = matches!(ty, FieldType::Option(_));
        Self {
            name: name.into(),
            ty,
            optional,
        }
    }
}

/// Field layout for one named event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    pub name: String,
    pub discriminator: Discriminator,
    pub fields: Vec<FieldDef>,
}

impl EventSchema {
    /// A schema with the standard Anchor discriminator for `name`.
    pub fn anchor(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let name = name.into();
        let discriminator = event_discriminator(&name).to_vec().into_boxed_slice();
        Self {
            name,
            discriminator,
            fields,
        }
    }

    /// A schema with an explicit discriminator (custom `#[event(discriminator = ..)]`).
    pub fn with_discriminator(
        name: impl Into<String>,
        discriminator: impl Into<Vec<u8>>,
        fields: Vec<FieldDef>,
    ) -> Self {
        Self {
            name: name.into(),
            discriminator: discriminator.into().into_boxed_slice(),
            fields,
        }
    }

    /// Checks that every required field is present and non-null and that no
    /// undeclared field slipped in. Returns a description of the first problem.
    pub fn validate(&self, fields: &FieldMap) -> Result<(), String> {
        for def in &self.fields {
            match fields.get(&def.name) {
                None if !def.optional => return Err(format!("missing required field '{}'", def.name)),
                Some(v) if v.is_null() && !def.optional => {
                    return Err(format!("required field '{}' is null", def.name))
                }
                _ => {}
            }
        }
        if let Some(extra) = fields
            .keys()
            .find(|k| !self.fields.iter().any(|def| &def.name == *k))
        {
            return Err(format!("undeclared field '{extra}'"));
        }
        Ok(())
    }
}

/// The lookup and decode surface the event decoder needs from a schema source.
pub trait SchemaRegistry: Send + Sync {
    /// Number of leading payload bytes that form the discriminator.
    fn discriminator_len(&self) -> usize {
        DISCRIMINATOR_LEN
    }

    /// Exact-length lookup of a discriminator.
    fn lookup_by_discriminator(&self, discriminator: &[u8]) -> Option<&EventSchema>;

    /// Decodes the payload body (discriminator stripped) into field values.
    fn decode_fields(&self, schema: &EventSchema, data: &[u8]) -> io::Result<FieldMap>;
}

/// In-memory registry over a fixed set of schemas.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    by_discriminator: HashMap<Discriminator, Arc<EventSchema>>,
    by_name: HashMap<String, Arc<EventSchema>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema, replacing any previous one with the same name or the
    /// same discriminator. A schema evicted by a discriminator collision is
    /// dropped under its name as well.
    ///
    /// # Panics
    ///
    /// Panics if the schema's discriminator is not [`DISCRIMINATOR_LEN`] bytes.
    pub fn register(&mut self, schema: EventSchema) -> &mut Self {
        assert_eq!(
            schema.discriminator.len(),
            DISCRIMINATOR_LEN,
            "discriminator for '{}' must be {} bytes",
            schema.name,
            DISCRIMINATOR_LEN
        );
        let schema = Arc::new(schema);
        if let Some(old) = self.by_name.insert(schema.name.clone(), schema.clone()) {
            self.by_discriminator.remove(&old.discriminator);
        }
        if let Some(shadowed) = self
            .by_discriminator
            .insert(schema.discriminator.clone(), schema.clone())
        {
            if shadowed.name != schema.name {
                tracing::warn!(
                    "Schema '{}' replaces '{}', which has the same discriminator",
                    schema.name,
                    shadowed.name
                );
                self.by_name.remove(&shadowed.name);
            }
        }
        self
    }

    pub fn with(mut self, schema: EventSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, name: &str) -> Option<&EventSchema> {
        self.by_name.get(name).map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Encodes a full payload (discriminator + body) for the named event.
    pub fn encode_event(&self, name: &str, fields: &FieldMap) -> io::Result<Vec<u8>> {
        let schema = self.get(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no schema named '{name}'"))
        })?;
        let mut out = schema.discriminator.to_vec();
        out.extend(codec::encode_fields(&schema.fields, fields)?);
        Ok(out)
    }
}

impl SchemaRegistry for EventRegistry {
    fn lookup_by_discriminator(&self, discriminator: &[u8]) -> Option<&EventSchema> {
        self.by_discriminator.get(discriminator).map(AsRef::as_ref)
    }

    fn decode_fields(&self, schema: &EventSchema, data: &[u8]) -> io::Result<FieldMap> {
        codec::decode_fields(&schema.fields, data)
    }
}
