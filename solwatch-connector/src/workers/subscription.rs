use super::{live::SubscriptionWorker, SubscriptionKey};
use crate::{
    config::ConnectorConfig,
    dispatcher::{Dispatcher, ListenerEntry},
    listener::ListenerId,
    schema::SchemaRegistry,
    stats::Stats,
    transport::{ConnectionState, LogSource},
};
use solana_sdk::pubkey::Pubkey;
use std::sync::{Arc, Mutex, RwLock};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct StateCell {
    /// Bumped on every restart and teardown; a worker only publishes while its
    /// generation is current.
    generation: u64,
    state: ConnectionState,
}

/// One logical connection per `(endpoint, program)`, shared by all of its listeners.
pub struct Subscription {
    key: SubscriptionKey,
    dispatcher: Dispatcher,
    schemas: RwLock<Arc<dyn SchemaRegistry>>,
    state: Mutex<StateCell>,
    state_tx: broadcast::Sender<ConnectionState>,
    worker: Mutex<Option<Running>>,
}

impl Subscription {
    pub(super) fn new(
        key: SubscriptionKey,
        schemas: Arc<dyn SchemaRegistry>,
        state_buffer: usize,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(state_buffer.max(1));
        Self {
            key,
            dispatcher: Dispatcher::new(Arc::new(Stats::new())),
            schemas: RwLock::new(schemas),
            state: Mutex::new(StateCell {
                generation: 0,
                state: ConnectionState::Disconnected,
            }),
            state_tx,
            worker: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.key.program_id
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> &Arc<Stats> {
        self.dispatcher.stats()
    }

    /// The registry new batches are decoded with.
    pub fn registry(&self) -> Arc<dyn SchemaRegistry> {
        self.schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_registry(&self, registry: Arc<dyn SchemaRegistry>) {
        *self.schemas.write().unwrap_or_else(|e| e.into_inner()) = registry;
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn state_updates(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Records a transition made by the worker of `generation`. Stale workers are ignored.
    pub(super) fn publish(&self, generation: u64, next: ConnectionState) {
        let mut cell = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if cell.generation != generation || cell.state == next {
            return;
        }
        cell.state = next;
        let _ = self.state_tx.send(next);
    }

    /// Registers a listener and makes sure a worker is running for it.
    ///
    /// Registration and the liveness decision happen under the worker lock, so
    /// a concurrent [`Subscription::remove_listener`] can never tear down the
    /// worker this listener was just attached to.
    pub(super) fn add_listener(
        self: &Arc<Self>,
        entry: ListenerEntry,
        runtime: &Handle,
        source: Arc<dyn LogSource>,
        config: Arc<ConnectorConfig>,
        parent: &CancellationToken,
    ) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        self.dispatcher.register(entry);
        self.ensure_connected(&mut worker, runtime, source, config, parent);
    }

    /// Unregisters a listener, tearing the subscription down if it was the last.
    /// Returns `false` if `id` was not registered here.
    pub(super) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dispatcher.unregister(id) {
            return false;
        }
        if self.dispatcher.is_empty() {
            tracing::info!(program = %self.key.program_id, "Last listener removed");
            self.stop(&mut worker);
        }
        true
    }

    /// Starts the worker unless one is already live.
    ///
    /// A worker counts as live while it has not finished and has not given up.
    /// A `Closed` or torn-down subscription is restarted from scratch.
    fn ensure_connected(
        self: &Arc<Self>,
        worker: &mut Option<Running>,
        runtime: &Handle,
        source: Arc<dyn LogSource>,
        config: Arc<ConnectorConfig>,
        parent: &CancellationToken,
    ) {
        if parent.is_cancelled() {
            tracing::warn!(program = %self.key.program_id, "Connector is shut down, not connecting");
            return;
        }
        if let Some(running) = worker.as_ref() {
            let live = !running.task.is_finished() && !running.cancel.is_cancelled();
            if live && self.state() != ConnectionState::Closed {
                return;
            }
            running.cancel.cancel();
        }

        let generation = {
            let mut cell = self.state.lock().unwrap_or_else(|e| e.into_inner());
            cell.generation += 1;
            cell.generation
        };

        let cancel = parent.child_token();
        let task = runtime.spawn(
            SubscriptionWorker::new(self.clone(), source, config, cancel.clone(), generation).run(),
        );
        tracing::info!(program = %self.key.program_id, "Started subscription worker on {}", self.key.endpoint);
        *worker = Some(Running { cancel, task });
    }

    /// Cancels the worker and any pending reconnect. Idempotent.
    ///
    /// Does not wait for the worker: a dispatch round already in progress runs
    /// to completion, then the worker exits.
    pub fn teardown(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        self.stop(&mut worker);
    }

    fn stop(&self, worker: &mut Option<Running>) {
        let Some(running) = worker.take() else {
            return;
        };
        running.cancel.cancel();

        let mut cell = self.state.lock().unwrap_or_else(|e| e.into_inner());
        cell.generation += 1;
        if cell.state != ConnectionState::Disconnected {
            cell.state = ConnectionState::Disconnected;
            let _ = self.state_tx.send(ConnectionState::Disconnected);
        }
        tracing::info!(program = %self.key.program_id, "Subscription torn down");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("listeners", &self.dispatcher.len())
            .finish_non_exhaustive()
    }
}
