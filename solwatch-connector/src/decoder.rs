use crate::{
    error::ParseError,
    events::DecodedEvent,
    schema::SchemaRegistry,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to do when a decoded event does not satisfy its schema's field constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ValidationPolicy {
    /// Skip validation entirely.
    Off,
    /// Log a warning and deliver the event with `valid = false`.
    #[default]
    Warn,
    /// Reject the event with [`ParseError::ValidationFailure`].
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    /// Promote `Program data:` payloads that are not events to
    /// [`ParseError::DecodeFailure`]. Free text on `Program log:` lines is
    /// never promoted.
    pub strict: bool,
    /// Emit an `"unknown"` event for payloads with an unregistered discriminator.
    pub allow_unknown_events: bool,
    pub validation: ValidationPolicy,
}

/// Turns a single `Program log:` / `Program data:` payload into an event.
#[derive(Clone)]
pub struct EventDecoder {
    registry: Arc<dyn SchemaRegistry>,
    options: DecodeOptions,
}

impl EventDecoder {
    pub fn new(registry: Arc<dyn SchemaRegistry>, options: DecodeOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decodes the base64 payload of a `Program data:` line.
    ///
    /// `Ok(None)` means the payload is not an event this decoder should report
    /// (bad base64, unregistered discriminators with unknown events off); in
    /// strict mode those become [`ParseError::DecodeFailure`]. A payload whose
    /// discriminator matches a schema but whose fields do not decode is always
    /// an error.
    pub fn decode(&self, payload: &str) -> Result<Option<DecodedEvent>, ParseError> {
        self.decode_with(payload, self.options.strict)
    }

    /// Decodes the text of a `Program log:` line.
    ///
    /// Programs write free text through the same prefix (Anchor's
    /// `Instruction: X` line), so a message that is not a registered event is
    /// `Ok(None)` even in strict mode. Field decode and validation failures are
    /// reported as in [`EventDecoder::decode`].
    pub fn decode_message(&self, message: &str) -> Result<Option<DecodedEvent>, ParseError> {
        self.decode_with(message, false)
    }

    fn decode_with(
        &self,
        payload: &str,
        strict: bool,
    ) -> Result<Option<DecodedEvent>, ParseError> {
        let bytes = match BASE64.decode(payload.trim()) {
            Ok(bytes) => bytes,
            Err(e) => return reject(strict, format!("invalid base64 payload: {e}")),
        };

        let disc_len = self.registry.discriminator_len();
        let schema = bytes
            .get(..disc_len)
            .and_then(|disc| self.registry.lookup_by_discriminator(disc));

        let Some(schema) = schema else {
            if self.options.allow_unknown_events {
                return Ok(Some(DecodedEvent::Unknown { data: bytes }));
            }
            return reject(
                strict,
                format!(
                    "no schema matches discriminator {:?}",
                    &bytes[..disc_len.min(bytes.len())]
                ),
            );
        };

        let fields = match self.registry.decode_fields(schema, &bytes[disc_len..]) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(event = %schema.name, "Failed to decode event fields: {}", e);
                return Err(ParseError::DecodeFailure(format!(
                    "event '{}': {}",
                    schema.name, e
                )));
            }
        };

        let mut valid = true;
        if self.options.validation != ValidationPolicy::Off {
            if let Err(reason) = schema.validate(&fields) {
                if self.options.validation == ValidationPolicy::Strict {
                    return Err(ParseError::ValidationFailure {
                        event: schema.name.clone(),
                        reason,
                    });
                }
                tracing::warn!(event = %schema.name, "Event failed validation: {}", reason);
                valid = false;
            }
        }

        Ok(Some(DecodedEvent::Known {
            name: schema.name.clone(),
            fields,
            valid,
            data: bytes,
        }))
    }
}

fn reject(strict: bool, reason: String) -> Result<Option<DecodedEvent>, ParseError> {
    if strict {
        Err(ParseError::DecodeFailure(reason))
    } else {
        tracing::trace!("Skipping payload: {}", reason);
        Ok(None)
    }
}
