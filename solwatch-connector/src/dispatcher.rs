//! # Event Dispatcher
//!
//! The `Dispatcher` owns the listener set of one program subscription and
//! delivers parsed events and raw notifications to it.
//!
//! ## Snapshots
//! The listener set is copy-on-write. Every delivery round clones the current
//! `Arc<[ListenerEntry]>` once and iterates that, so a listener added or removed
//! mid-round (including by a callback of the same round) neither receives a
//! duplicate nor causes another listener to be skipped. The change applies
//! from the next round on.
//!
//! ## Isolation
//! Callbacks run synchronously, one after another. A callback that returns an
//! error or panics is logged and counted; delivery continues with the next
//! listener.

use crate::{
    events::ParsedEvent,
    listener::{EventCallback, ListenerId, Matcher, RawCallback},
    stats::Stats,
    transport::LogNotification,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

#[derive(Clone)]
enum Callback {
    Event(EventCallback),
    Raw(RawCallback),
}

/// One registered interest.
#[derive(Clone)]
pub struct ListenerEntry {
    pub id: ListenerId,
    pub matcher: Matcher,
    callback: Callback,
}

impl ListenerEntry {
    pub fn event(id: ListenerId, matcher: Matcher, callback: EventCallback) -> Self {
        Self {
            id,
            matcher,
            callback: Callback::Event(callback),
        }
    }

    pub fn raw(id: ListenerId, callback: RawCallback) -> Self {
        Self {
            id,
            matcher: Matcher::Raw,
            callback: Callback::Raw(callback),
        }
    }
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("id", &self.id)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// Routes events of a single subscription to its listeners.
pub struct Dispatcher {
    listeners: RwLock<Arc<[ListenerEntry]>>,
    stats: Arc<Stats>,
}

impl Dispatcher {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            listeners: RwLock::new(Arc::from(Vec::new())),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn register(&self, entry: ListenerEntry) {
        tracing::debug!("Registering listener {} ({:?})", entry.id, entry.matcher);
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.to_vec();
        next.push(entry);
        *guard = Arc::from(next);
    }

    /// Removes a listener. Returns `false` if no such listener was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if !guard.iter().any(|entry| entry.id == id) {
            return false;
        }
        let next: Vec<_> = guard.iter().filter(|entry| entry.id != id).cloned().collect();
        *guard = Arc::from(next);
        tracing::debug!("Unregistered listener {}", id);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// The listener set as of now.
    pub fn snapshot(&self) -> Arc<[ListenerEntry]> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Delivers one parsed event to every interested listener.
    /// Returns the number of listeners that received it.
    pub fn dispatch(&self, event: &ParsedEvent) -> usize {
        let mut delivered = 0;
        for entry in self.snapshot().iter() {
            let Callback::Event(callback) = &entry.callback else {
                continue;
            };
            match entry.matcher.matches(event) {
                Some(true) => {}
                Some(false) => {
                    if matches!(entry.matcher, Matcher::Filter(_)) {
                        self.stats.record_filtered();
                    }
                    continue;
                }
                None => continue,
            }
            delivered += 1;
            self.invoke(entry.id, event.name(), || callback(event));
        }
        delivered
    }

    /// Delivers a raw notification to every raw-log listener.
    pub fn dispatch_raw(&self, notification: &LogNotification) -> usize {
        let mut delivered = 0;
        for entry in self.snapshot().iter() {
            if let Callback::Raw(callback) = &entry.callback {
                delivered += 1;
                self.invoke(entry.id, "raw", || callback(notification));
            }
        }
        delivered
    }

    fn invoke<F>(&self, id: ListenerId, what: &str, call: F)
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(listener = %id, "Listener failed on '{}': {:#}", what, e);
                self.stats.record_listener_error();
            }
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::warn!(listener = %id, "Listener panicked on '{}': {}", what, msg);
                self.stats.record_listener_error();
            }
        }
    }
}
