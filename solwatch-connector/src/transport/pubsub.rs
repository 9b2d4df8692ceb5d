use super::{LogNotification, LogSource, LogStream};
use crate::error::ConnectorError;
use async_trait::async_trait;
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter},
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

/// A [`LogSource`] over a Solana WebSocket endpoint.
///
/// Every call to `subscribe` opens its own `PubsubClient` connection in a
/// background task that forwards notifications into a bounded channel. The
/// task unsubscribes and closes the socket when the returned stream is dropped.
#[derive(Debug, Clone)]
pub struct PubsubLogSource {
    ws_url: String,
    buffer: usize,
}

impl PubsubLogSource {
    pub fn new(ws_url: impl Into<String>, buffer: usize) -> Self {
        Self {
            ws_url: ws_url.into(),
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl LogSource for PubsubLogSource {
    fn endpoint(&self) -> &str {
        &self.ws_url
    }

    async fn subscribe(
        &self,
        program_id: &Pubkey,
        commitment: CommitmentLevel,
    ) -> Result<LogStream, ConnectorError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(self.buffer);

        tokio::spawn(forward_logs(
            self.ws_url.clone(),
            *program_id,
            commitment,
            ack_tx,
            tx,
        ));

        match ack_rx.await {
            Ok(Ok(())) => Ok(Box::pin(ReceiverStream::new(rx))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectorError::Transport(
                "subscription task exited before acknowledging".to_string(),
            )),
        }
    }
}

async fn forward_logs(
    ws_url: String,
    program_id: Pubkey,
    commitment: CommitmentLevel,
    ack: oneshot::Sender<Result<(), ConnectorError>>,
    tx: mpsc::Sender<LogNotification>,
) {
    let client = match PubsubClient::new(&ws_url).await {
        Ok(client) => client,
        Err(e) => {
            let _ = ack.send(Err(e.into()));
            return;
        }
    };

    let (mut stream, unsubscribe) = match client
        .logs_subscribe(
            RpcTransactionLogsFilter::Mentions(vec![program_id.to_string()]),
            RpcTransactionLogsConfig {
                commitment: Some(CommitmentConfig { commitment }),
            },
        )
        .await
    {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ack.send(Err(e.into()));
            return;
        }
    };

    if ack.send(Ok(())).is_ok() {
        tracing::info!(program = %program_id, "Subscribed to logs at {}", ws_url);
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(msg) => {
                        if tx.send(LogNotification::from(msg)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        tracing::warn!(program = %program_id, "Log stream closed by {}", ws_url);
                        break;
                    }
                },
                _ = tx.closed() => break,
            }
        }
    }

    unsubscribe().await;
    drop(stream);
    if let Err(e) = client.shutdown().await {
        tracing::debug!("Error while closing pubsub client: {}", e);
    }
}
