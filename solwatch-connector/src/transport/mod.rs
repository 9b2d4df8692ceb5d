//! # Subscription Transport
//!
//! [`LogSource`] is the seam between the connector and a node: given a program
//! and a commitment level, it returns a stream of log notifications once the
//! node has acknowledged the subscription. The stream ending means the
//! connection dropped; dropping the stream unsubscribes.
//!
//! [`PubsubLogSource`] is the production implementation over `solana-client`'s
//! WebSocket `PubsubClient`. The reconnection logic itself lives in
//! [`ConnectionMachine`] and is driven by the subscription worker.

mod pubsub;
mod state;

pub use pubsub::PubsubLogSource;
pub use state::{ConnectionMachine, ConnectionState, ReconnectPolicy};

use crate::error::ConnectorError;
use async_trait::async_trait;
use futures::Stream;
use solana_client::rpc_response::{Response, RpcLogsResponse};
use solana_sdk::{commitment_config::CommitmentLevel, pubkey::Pubkey};
use std::pin::Pin;

/// One `logsNotification` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogNotification {
    pub signature: String,
    pub logs: Vec<String>,
    /// Transaction error, rendered as text, if the transaction failed.
    pub err: Option<String>,
    pub slot: u64,
}

impl From<Response<RpcLogsResponse>> for LogNotification {
    fn from(msg: Response<RpcLogsResponse>) -> Self {
        let Response { context, value } = msg;
        Self {
            signature: value.signature,
            logs: value.logs,
            err: value.err.map(|e| e.to_string()),
            slot: context.slot,
        }
    }
}

/// A live stream of notifications for one program.
pub type LogStream = Pin<Box<dyn Stream<Item = LogNotification> + Send>>;

/// Opens log subscriptions against one endpoint.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// The endpoint this source connects to; part of a subscription's identity.
    fn endpoint(&self) -> &str;

    /// Subscribes to the logs mentioning `program_id`. Resolves once the node
    /// has acknowledged the subscription.
    async fn subscribe(
        &self,
        program_id: &Pubkey,
        commitment: CommitmentLevel,
    ) -> Result<LogStream, ConnectorError>;
}
