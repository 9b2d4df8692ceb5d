//! A Rust library for turning a Solana program's execution logs into typed events.
//!
//! The connector subscribes to the logs that mention a program, replays each
//! transaction's call tree to find the lines the program itself emitted, and
//! decodes the Anchor-style `discriminator || borsh` payloads found there.
//! Subscriptions reconnect on their own and fan events out to any number of
//! listeners.
//!
//! # Key Components
//!
//! *   [`workers::EventManager`]: The main entry point. It owns one live subscription
//!     per program and hands out [`workers::ProgramEvents`] handles for registering
//!     listeners.
//! *   [`parser::EventParser`]: A pure, re-entrant scanner that extracts one program's
//!     events from a log batch. Usable on its own for logs obtained elsewhere.
//! *   [`schema::EventRegistry`]: The default in-memory schema registry, keyed by
//!     8-byte Anchor event discriminators.
//! *   [`transport`]: The [`transport::LogSource`] seam and the reconnection state machine.

/// Binary field decoding and encoding for registered event schemas.
pub mod codec;
/// Defines configuration structures for the connector.
pub mod config;
/// Base64 payload decoding against a schema registry.
pub mod decoder;
/// Per-subscription listener set and event delivery.
pub mod dispatcher;
/// Error types for parsing and for the caller-facing API.
pub mod error;
/// Decoded event and field value types.
pub mod events;
/// Listener callbacks, ids and filters.
pub mod listener;
/// Log scanning with execution-stack attribution.
pub mod parser;
/// Event schemas, discriminators and the schema registry trait.
pub mod schema;
/// Subscription counters.
pub mod stats;
/// The log subscription seam and reconnection logic.
pub mod transport;
/// The subscription manager and its background workers.
pub mod workers;

pub use error::{ConnectorError, ParseError};
pub use events::{DecodedEvent, EventContext, FieldMap, FieldValue, ParsedEvent};
pub use listener::{EventFilter, ListenerId};
pub use parser::EventParser;
pub use schema::{EventRegistry, EventSchema, FieldDef, FieldType, SchemaRegistry};
pub use workers::{EventManager, EventManagerHandle, ProgramEvents};
