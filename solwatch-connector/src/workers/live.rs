use super::subscription::Subscription;
use crate::{
    config::ConnectorConfig,
    decoder::EventDecoder,
    events::EventContext,
    parser::EventParser,
    transport::{ConnectionMachine, ConnectionState, LogNotification, LogSource, LogStream},
};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Drives one subscription: connects, feeds notifications through the parser
/// into the dispatcher, and reconnects with backoff when the stream drops.
pub(super) struct SubscriptionWorker {
    subscription: Arc<Subscription>,
    source: Arc<dyn LogSource>,
    config: Arc<ConnectorConfig>,
    cancel: CancellationToken,
    generation: u64,
}

impl SubscriptionWorker {
    pub fn new(
        subscription: Arc<Subscription>,
        source: Arc<dyn LogSource>,
        config: Arc<ConnectorConfig>,
        cancel: CancellationToken,
        generation: u64,
    ) -> Self {
        Self {
            subscription,
            source,
            config,
            cancel,
            generation,
        }
    }

    pub async fn run(self) {
        let program_id = *self.subscription.program_id();
        let commitment = self.config.solana.commitment;
        let mut machine = ConnectionMachine::new(self.config.reconnect.policy());

        if self.cancel.is_cancelled() {
            return;
        }
        self.publish(machine.connect());

        loop {
            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = self.source.subscribe(&program_id, commitment) => res,
            };

            match subscribed {
                Ok(stream) => {
                    self.publish(machine.on_subscribed());
                    tracing::info!(program = %program_id, "Live worker connected to {}", self.source.endpoint());
                    if !self.consume(stream).await {
                        break;
                    }
                    tracing::warn!(program = %program_id, "Log stream dropped by {}", self.source.endpoint());
                }
                Err(e) => {
                    tracing::warn!(program = %program_id, "Subscribe attempt failed: {}", e);
                }
            }

            self.subscription.stats().record_reconnection();
            let before = machine.state();
            let delay = machine.on_failure();
            if machine.state() != before {
                self.publish(Some(machine.state()));
            }
            let Some(delay) = delay else {
                tracing::error!(
                    program = %program_id,
                    "Giving up after {} reconnection attempts",
                    machine.policy().max_attempts
                );
                return;
            };

            tracing::debug!(program = %program_id, "Reconnecting in {:?} (attempt {})", delay, machine.attempt());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.publish(machine.teardown());
        tracing::info!(program = %program_id, "Live worker: shutdown signal received, exiting.");
    }

    /// Returns `false` if the worker was cancelled, `true` if the stream ended.
    async fn consume(&self, mut stream: LogStream) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                msg = stream.next() => match msg {
                    Some(notification) => self.handle_notification(&notification),
                    None => return true,
                },
            }
        }
    }

    fn handle_notification(&self, notification: &LogNotification) {
        let stats = self.subscription.stats();
        let dispatcher = self.subscription.dispatcher();
        stats.record_notification();
        dispatcher.dispatch_raw(notification);

        if notification.err.is_some() && self.config.parser.skip_failed_transactions {
            tracing::debug!(signature = %notification.signature, "Skipping failed transaction");
            stats.record_filtered();
            return;
        }

        let decoder = EventDecoder::new(
            self.subscription.registry(),
            self.config.parser.decode_options(),
        );
        let parser = EventParser::new(*self.subscription.program_id(), decoder);
        let context = EventContext {
            slot: notification.slot,
            signature: notification.signature.clone(),
            block_time: None,
            err: notification.err.clone(),
        };

        let mut events = parser.parse(notification.logs.iter().map(String::as_str), context);
        for result in events.by_ref() {
            match result {
                Ok(event) => {
                    stats.record_parsed();
                    tracing::debug!(slot = notification.slot, "[LIVE] event={}", event.name());
                    dispatcher.dispatch(&event);
                }
                Err(e) => {
                    tracing::warn!(signature = %notification.signature, "Log batch aborted: {}", e);
                    stats.record_errors(1);
                }
            }
        }
        stats.record_errors(events.skipped() as u64);
    }

    fn publish(&self, next: Option<ConnectionState>) {
        if let Some(next) = next {
            self.subscription.publish(self.generation, next);
        }
    }
}
