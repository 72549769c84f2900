//! Connection lifecycle state machine.
//!
//! [`ConnectionState::handle`] is the whole transition table: it takes a
//! [`ConnectionEvent`], updates the phase and attempt counter, and returns
//! the side effects the driver in [`crate::manager`] must perform. It does
//! no I/O itself.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::reconnect::ReconnectConfig;

/// Lifecycle phase of a job's status connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The transport reported an error. Left only by a following close.
    Error,
    /// Reconnects are exhausted: the wait after the last allowed unclean
    /// close ran out. Terminal until the connection is restarted.
    Failed,
}

impl Phase {
    /// Short human-readable label for status displays.
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Error => "Connection Error",
            Self::Failed => "Connection Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Start,
    Opened,
    /// The channel closed. `clean` is true when a closing handshake was seen.
    Closed { clean: bool },
    TransportError,
    RetryElapsed,
    HeartbeatTick,
    Stop,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    StartHeartbeat,
    CancelHeartbeat,
    ScheduleReconnect(Duration),
    CancelReconnect,
    SendPing,
    Close,
}

/// Phase plus reconnect bookkeeping for one job connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    phase: Phase,
    reconnect_attempts: u32,
    retry_pending: bool,
}

impl ConnectionState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Reconnects scheduled since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Whether a reconnect timer is armed.
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Apply one event and return the side effects to perform, in order.
    pub fn handle(&mut self, event: ConnectionEvent, policy: &ReconnectConfig) -> Vec<Action> {
        use ConnectionEvent as E;
        use Phase as P;

        match (self.phase, event) {
            (_, E::Stop) => {
                self.phase = P::Disconnected;
                self.retry_pending = false;
                vec![Action::CancelHeartbeat, Action::CancelReconnect, Action::Close]
            }

            (P::Disconnected, E::Start) if !self.retry_pending => {
                self.phase = P::Connecting;
                vec![Action::Open]
            }

            (P::Disconnected, E::RetryElapsed) if self.retry_pending => {
                self.retry_pending = false;
                if policy.allows_retry(self.reconnect_attempts) {
                    self.phase = P::Connecting;
                    vec![Action::Open]
                } else {
                    // The last scheduled wait is over; no further connect.
                    self.phase = P::Failed;
                    Vec::new()
                }
            }

            (P::Connecting, E::Opened) => {
                self.phase = P::Connected;
                self.reconnect_attempts = 0;
                vec![Action::StartHeartbeat]
            }

            (P::Connected, E::HeartbeatTick) => vec![Action::SendPing],

            (P::Connecting | P::Connected, E::TransportError) => {
                let left_connected = self.phase == P::Connected;
                self.phase = P::Error;
                if left_connected {
                    vec![Action::CancelHeartbeat]
                } else {
                    Vec::new()
                }
            }

            (P::Connecting | P::Connected | P::Error, E::Closed { clean: true }) => {
                self.phase = P::Disconnected;
                vec![Action::CancelHeartbeat]
            }

            (P::Connecting | P::Connected | P::Error, E::Closed { clean: false }) => {
                if policy.allows_retry(self.reconnect_attempts) {
                    self.reconnect_attempts += 1;
                    self.phase = P::Disconnected;
                    self.retry_pending = true;
                    let delay = policy.delay_for_attempt(self.reconnect_attempts);
                    vec![Action::CancelHeartbeat, Action::ScheduleReconnect(delay)]
                } else {
                    self.phase = P::Failed;
                    vec![Action::CancelHeartbeat]
                }
            }

            _ => Vec::new(),
        }
    }
}
