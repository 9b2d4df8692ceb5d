//! # Listeners
//!
//! A listener is a callback plus a description of what it wants to see. The
//! three kinds the connector hands out are:
//!
//! - **named**: one event type, by schema name (`add_event_listener`);
//! - **generic**: every parsed event, or every event accepted by an
//!   [`EventFilter`] (`add_generic_listener`, `add_filtered_listener`);
//! - **raw**: every log notification, before parsing (`subscribe_raw_logs`).

use crate::{events::ParsedEvent, transport::LogNotification};
use std::{collections::HashSet, fmt, sync::Arc};

/// Identifies one registered listener across all programs of an `EventManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback for parsed events. Returning an error (or panicking) is recorded
/// and does not affect other listeners.
pub type EventCallback = Arc<dyn Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync>;

/// Callback for raw log notifications.
pub type RawCallback = Arc<dyn Fn(&LogNotification) -> anyhow::Result<()> + Send + Sync>;

type Predicate = Arc<dyn Fn(&ParsedEvent) -> bool + Send + Sync>;

/// Narrows the events a generic listener receives.
///
/// An empty filter accepts every known event. Unknown events are excluded
/// unless [`EventFilter::include_unknown`] is set.
#[derive(Clone, Default)]
pub struct EventFilter {
    names: Option<HashSet<String>>,
    min_slot: Option<u64>,
    include_unknown: bool,
    predicate: Option<Predicate>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only events with one of these names.
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Accept only events from slots at or above `slot`.
    pub fn min_slot(mut self, slot: u64) -> Self {
        self.min_slot = Some(slot);
        self
    }

    pub fn include_unknown(mut self, include: bool) -> Self {
        self.include_unknown = include;
        self
    }

    /// Accept only events for which `predicate` returns `true`.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ParsedEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn accepts(&self, event: &ParsedEvent) -> bool {
        if event.event.is_unknown() && !self.include_unknown {
            return false;
        }
        if let Some(names) = &self.names {
            if !names.contains(event.name()) {
                return false;
            }
        }
        if let Some(min_slot) = self.min_slot {
            if event.context.slot < min_slot {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |p| p(event))
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("names", &self.names)
            .field("min_slot", &self.min_slot)
            .field("include_unknown", &self.include_unknown)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// What a listener entry is interested in.
#[derive(Clone)]
pub enum Matcher {
    /// Events whose name equals this string.
    Name(String),
    /// Every parsed event, unknown ones included.
    Wildcard,
    Filter(EventFilter),
    /// Raw notifications rather than parsed events.
    Raw,
}

impl Matcher {
    /// `None` when the matcher is not interested in parsed events at all,
    /// otherwise whether `event` passes.
    pub fn matches(&self, event: &ParsedEvent) -> Option<bool> {
        match self {
            Matcher::Name(name) => Some(event.name() == name),
            Matcher::Wildcard => Some(true),
            Matcher::Filter(filter) => Some(filter.accepts(event)),
            Matcher::Raw => None,
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Matcher::Wildcard => f.write_str("Wildcard"),
            Matcher::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
            Matcher::Raw => f.write_str("Raw"),
        }
    }
}
