use std::{fmt, time::Duration};

/// Lifecycle of one program subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnection gave up; nothing will be retried until the subscription is restarted.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Exponential backoff: `min(base * 2^attempt, cap)`, at most `max_attempts` retries in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// The reconnection state machine, free of any I/O.
///
/// ```text
/// Disconnected --connect--> Connecting --subscribed--> Connected
/// Connected --failure--> Reconnecting --subscribed--> Connected
/// Reconnecting --failure (attempts exhausted)--> Closed
/// any --teardown--> Disconnected
/// ```
///
/// Every transition method returns the new state if it changed.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed attempts since the last successful subscribe.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Starts a fresh connection from `Disconnected` or `Closed`.
    pub fn connect(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Closed => {
                self.attempt = 0;
                self.transition(ConnectionState::Connecting)
            }
            _ => None,
        }
    }

    /// The node acknowledged the subscription.
    pub fn on_subscribed(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.attempt = 0;
                self.transition(ConnectionState::Connected)
            }
            _ => None,
        }
    }

    /// The stream dropped or a subscribe attempt failed.
    ///
    /// Returns the delay before the next attempt, or `None` once the machine
    /// has given up (state `Closed`) or is not in a connecting state.
    pub fn on_failure(&mut self) -> Option<Duration> {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => {}
            ConnectionState::Disconnected | ConnectionState::Closed => return None,
        }
        if self.attempt >= self.policy.max_attempts {
            self.transition(ConnectionState::Closed);
            return None;
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        self.transition(ConnectionState::Reconnecting);
        Some(delay)
    }

    /// Explicit teardown. Safe to call from any state, any number of times.
    pub fn teardown(&mut self) -> Option<ConnectionState> {
        self.attempt = 0;
        self.transition(ConnectionState::Disconnected)
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        tracing::debug!("Connection state {} -> {}", self.state, next);
        self.state = next;
        Some(next)
    }
}
