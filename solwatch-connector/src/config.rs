#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    decoder::{DecodeOptions, ValidationPolicy},
    transport::ReconnectPolicy,
};
use solana_sdk::commitment_config::CommitmentLevel;
use std::time::Duration;

/// The top-level configuration for the `solwatch-connector` library.
///
/// Aggregates the Solana endpoint, parser behavior and reconnection policy.
/// It is typically deserialized from a configuration file with
/// [`load_config`] and handed to the `EventManager` on creation.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ConnectorConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub solana: Solana,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parser: ParserConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub reconnect: ReconnectConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channels: ChannelConfig,
}

/// Defines the connection settings for the Solana cluster.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct Solana {
    pub ws_url: String,
    #[cfg_attr(feature = "serde", serde(with = "serde_commitment"))]
    pub commitment: CommitmentLevel,
}

/// Controls how log batches are turned into events.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct ParserConfig {
    /// Abort a batch on the first undecodable event instead of skipping it.
    pub strict: bool,
    /// Deliver payloads with an unregistered discriminator as `"unknown"` events.
    pub allow_unknown_events: bool,
    pub validation: ValidationPolicy,
    /// Do not parse events out of transactions that failed.
    pub skip_failed_transactions: bool,
}

/// Backoff settings for the subscription worker.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts after which the subscription is closed.
    pub max_attempts: u32,
}

/// Defines capacities for the channels within the connector.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct ChannelConfig {
    /// The buffer capacity of each subscription's connection-state broadcast.
    pub state_buffer: usize,
    /// The buffer between the WebSocket reader task and the subscription worker.
    pub notification_buffer: usize,
}

impl ParserConfig {
    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            strict: self.strict,
            allow_unknown_events: self.allow_unknown_events,
            validation: self.validation,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl Default for Solana {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8900".to_string(),
            commitment: CommitmentLevel::Confirmed,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strict: false,
            allow_unknown_events: false,
            validation: ValidationPolicy::Warn,
            skip_failed_transactions: true,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            state_buffer: 64,
            notification_buffer: 1024,
        }
    }
}

/// Loads the connector configuration from a TOML file.
///
/// Values can be overridden from the environment with the `SOLWATCH` prefix
/// and `__` as the section separator, e.g. `SOLWATCH__SOLANA__COMMITMENT=finalized`.
#[cfg(feature = "serde")]
pub fn load_config(path: &str) -> anyhow::Result<ConnectorConfig> {
    use anyhow::Context;

    let builder = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(
            config::Environment::with_prefix("SOLWATCH")
                .prefix_separator("__")
                .separator("__"),
        );

    let settings: ConnectorConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}

#[cfg(feature = "serde")]
mod serde_commitment {

    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(c: &CommitmentLevel, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = match c {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        };
        serializer.serialize_str(s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<CommitmentLevel, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        let level = match s.to_lowercase().as_str() {
            "processed" => CommitmentLevel::Processed,
            "confirmed" => CommitmentLevel::Confirmed,
            "finalized" => CommitmentLevel::Finalized,
            other => {
                return Err(serde::de::Error::unknown_variant(
                    other,
                    &["processed", "confirmed", "finalized"],
                ))
            }
        };
        Ok(level)
    }
}
