//! # Event Manager & Subscription Workers
//!
//! This module defines the `EventManager`, which owns every live log
//! subscription of the connector.
//!
//! ## Core Components
//!
//! - [`EventManager`]: The shared state behind all handles: configuration, the
//!   [`LogSource`], the subscription table and the listener index.
//! - [`EventManagerHandle`]: A clonable, thread-safe handle that provides the public API
//!   (obtaining per-program handles, removing listeners, statistics, shutdown).
//! - [`ProgramEvents`]: The per-program handle on which listeners are registered.
//! - [`Subscription`]: One logical connection per `(endpoint, program)`. It owns the
//!   listener set and is driven by a single background task, the `SubscriptionWorker`.
//!
//! ## Lifecycle
//! A subscription connects when its first listener is added and is torn down
//! when its last listener is removed. Adding a listener to a torn-down or
//! `Closed` subscription starts it again.

mod live;
mod subscription;

pub use subscription::Subscription;

use crate::{
    config::ConnectorConfig,
    dispatcher::ListenerEntry,
    error::ConnectorError,
    events::ParsedEvent,
    listener::{EventFilter, ListenerId, Matcher},
    schema::SchemaRegistry,
    stats::StatsSnapshot,
    transport::{ConnectionState, LogNotification, LogSource, PubsubLogSource},
};
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{runtime::Handle, sync::broadcast};
use tokio_util::sync::CancellationToken;

/// The identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub endpoint: String,
    pub program_id: Pubkey,
}

/// The shared state behind every [`EventManagerHandle`] and [`ProgramEvents`].
pub struct EventManager {
    config: Arc<ConnectorConfig>,
    source: Arc<dyn LogSource>,
    runtime: Handle,
    shutdown: CancellationToken,
    subscriptions: DashMap<SubscriptionKey, Arc<Subscription>>,
    listeners: DashMap<ListenerId, SubscriptionKey>,
    next_id: AtomicU64,
}

impl EventManager {
    /// Creates a new `EventManager` over the given log source and returns its handle.
    ///
    /// No connection is opened until a listener is registered.
    ///
    /// # Arguments
    ///
    /// * `config` - The shared connector configuration.
    /// * `source` - The transport used to open log subscriptions.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime. Subscription workers are
    /// spawned onto that runtime.
    pub fn new(config: Arc<ConnectorConfig>, source: Arc<dyn LogSource>) -> EventManagerHandle {
        let manager = Self {
            config,
            source,
            runtime: Handle::current(),
            shutdown: CancellationToken::new(),
            subscriptions: DashMap::new(),
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        };
        EventManagerHandle {
            inner: Arc::new(manager),
        }
    }

    /// Creates an `EventManager` connected to `config.solana.ws_url` through
    /// [`PubsubLogSource`].
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn connect(config: Arc<ConnectorConfig>) -> EventManagerHandle {
        let source = PubsubLogSource::new(
            config.solana.ws_url.clone(),
            config.channels.notification_buffer,
        );
        Self::new(config, Arc::new(source))
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn add_listener(&self, subscription: &Arc<Subscription>, entry: ListenerEntry) -> ListenerId {
        let id = entry.id;
        self.listeners.insert(id, subscription.key().clone());
        subscription.add_listener(
            entry,
            &self.runtime,
            self.source.clone(),
            self.config.clone(),
            &self.shutdown,
        );
        id
    }

    fn remove_listener(&self, id: ListenerId) -> Result<(), ConnectorError> {
        let (_, key) = self
            .listeners
            .remove(&id)
            .ok_or(ConnectorError::UnknownSubscription(id))?;
        let subscription = self
            .subscriptions
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(ConnectorError::UnknownSubscription(id))?;

        if !subscription.remove_listener(id) {
            return Err(ConnectorError::UnknownSubscription(id));
        }
        Ok(())
    }
}

/// A clonable, thread-safe handle for interacting with the [`EventManager`].
///
/// This handle is the primary public entry point for applications using the connector.
#[derive(Clone)]
pub struct EventManagerHandle {
    inner: Arc<EventManager>,
}

impl EventManagerHandle {
    /// Returns the event handle for one program.
    ///
    /// All handles for the same program share one subscription. The registry
    /// given by the first call is used until replaced with
    /// [`ProgramEvents::update_registry`].
    ///
    /// # Arguments
    ///
    /// * `program_id` - The program whose logs should be decoded.
    /// * `registry` - The schemas of the events the program emits.
    pub fn program(&self, program_id: Pubkey, registry: Arc<dyn SchemaRegistry>) -> ProgramEvents {
        let key = SubscriptionKey {
            endpoint: self.inner.source.endpoint().to_string(),
            program_id,
        };
        let subscription = self
            .inner
            .subscriptions
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(program = %program_id, "Creating subscription");
                Arc::new(Subscription::new(
                    key,
                    registry,
                    self.inner.config.channels.state_buffer,
                ))
            })
            .value()
            .clone();

        ProgramEvents {
            manager: self.inner.clone(),
            subscription,
        }
    }

    /// Removes a listener registered through any [`ProgramEvents`] of this manager.
    pub fn remove_listener(&self, id: ListenerId) -> Result<(), ConnectorError> {
        self.inner.remove_listener(id)
    }

    /// Counters summed over every subscription.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner
            .subscriptions
            .iter()
            .map(|entry| entry.value().stats().snapshot())
            .fold(StatsSnapshot::default(), |acc, s| acc + s)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Tears down every subscription. Workers started afterwards exit immediately.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down all subscriptions");
        self.inner.shutdown.cancel();
        for entry in self.inner.subscriptions.iter() {
            entry.value().teardown();
        }
    }
}

impl std::fmt::Debug for EventManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManagerHandle")
            .field("endpoint", &self.inner.source.endpoint())
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

/// Registers listeners for one program's events.
///
/// Listener callbacks run on the subscription's worker task, one after another.
/// They may add or remove listeners, including themselves; such changes apply
/// from the next delivery on.
#[derive(Clone)]
pub struct ProgramEvents {
    manager: Arc<EventManager>,
    subscription: Arc<Subscription>,
}

impl ProgramEvents {
    pub fn program_id(&self) -> &Pubkey {
        self.subscription.program_id()
    }

    /// Calls `callback` for every event named `name`.
    pub fn add_event_listener<F>(&self, name: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(Matcher::Name(name.into()), callback)
    }

    /// Calls `callback` for every parsed event, unknown ones included.
    pub fn add_generic_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(Matcher::Wildcard, callback)
    }

    /// Calls `callback` for every event accepted by `filter`.
    /// Rejected events are counted as filtered.
    pub fn add_filtered_listener<F>(&self, filter: EventFilter, callback: F) -> ListenerId
    where
        F: Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(Matcher::Filter(filter), callback)
    }

    /// Calls `callback` with every log notification, before parsing and
    /// regardless of transaction success.
    pub fn subscribe_raw_logs<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&LogNotification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.manager.next_listener_id();
        self.manager
            .add_listener(&self.subscription, ListenerEntry::raw(id, Arc::new(callback)))
    }

    /// Removes a listener of this program. Removing the last one closes the subscription.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::UnknownSubscription`] if `id` is not a live listener of this program.
    pub fn remove_listener(&self, id: ListenerId) -> Result<(), ConnectorError> {
        let owned = self
            .manager
            .listeners
            .get(&id)
            .is_some_and(|key| key.value() == self.subscription.key());
        if !owned {
            return Err(ConnectorError::UnknownSubscription(id));
        }
        self.manager.remove_listener(id)
    }

    pub fn listener_count(&self) -> usize {
        self.subscription.dispatcher().len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.subscription.stats().snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.subscription.state()
    }

    /// Every state transition of this subscription from now on.
    pub fn state_updates(&self) -> broadcast::Receiver<ConnectionState> {
        self.subscription.state_updates()
    }

    /// Replaces the schema registry. Batches already being parsed finish with the old one.
    pub fn update_registry(&self, registry: Arc<dyn SchemaRegistry>) {
        tracing::info!(program = %self.program_id(), "Schema registry updated");
        self.subscription.set_registry(registry);
    }

    fn add<F>(&self, matcher: Matcher, callback: F) -> ListenerId
    where
        F: Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.manager.next_listener_id();
        self.manager.add_listener(
            &self.subscription,
            ListenerEntry::event(id, matcher, Arc::new(callback)),
        )
    }
}

impl std::fmt::Debug for ProgramEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramEvents")
            .field("subscription", &self.subscription)
            .finish()
    }
}
