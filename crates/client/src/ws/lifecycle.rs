//! Connection lifecycle state machine.
//!
//! Pure bookkeeping: the connection actor feeds it transport events and acts
//! on what it answers. Every transition is published on a `watch` channel.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::connection::ConnectionState;
use super::reconnect::{Backoff, ReconnectPolicy};

/// Identifies one transport attempt. Events carrying an older generation
/// than the current one belong to a superseded transport and are ignored.
pub type Generation = u64;

/// How a transport ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEnd {
    /// The server closed the session normally (close code 1000).
    Normal,
    /// Connect failure, error, unexpected close code or a dropped stream.
    Abnormal,
}

/// What the actor should do after a transport ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Wait `delay`, then call [`Lifecycle::backoff_elapsed`].
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted; offline until explicitly re-activated.
    GaveUp,
    /// Normal server close; nothing to retry.
    Stopped,
    /// Event from a superseded transport.
    Stale,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<ConnectionState>,
    backoff: Backoff,
    generation: Generation,
}

impl Lifecycle {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            backoff: Backoff::new(policy),
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Reconnects scheduled since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, generation = self.generation, "connection state");
        }
    }

    fn begin_attempt(&mut self) -> Generation {
        self.generation += 1;
        self.transition(ConnectionState::Connecting);
        self.generation
    }

    fn is_current(&self, generation: Generation) -> bool {
        generation == self.generation
    }

    /// Caller supplied credentials: start a fresh attempt from any state,
    /// superseding whatever transport was current.
    pub fn activate(&mut self) -> Generation {
        self.backoff.reset();
        self.begin_attempt()
    }

    /// Low-level transport is up; the auth frame goes out next.
    pub fn transport_opened(&mut self, generation: Generation) -> bool {
        if !self.is_current(generation) || self.state() != ConnectionState::Connecting {
            return false;
        }
        self.transition(ConnectionState::Authenticating);
        true
    }

    /// Any inbound frame. Returns `true` when this frame completed the
    /// handshake and the session just became `Connected`.
    pub fn frame_received(&mut self, generation: Generation) -> bool {
        if !self.is_current(generation) || self.state() != ConnectionState::Authenticating {
            return false;
        }
        self.backoff.reset();
        self.transition(ConnectionState::Connected);
        true
    }

    pub fn transport_failed(&mut self, generation: Generation, end: TransportEnd) -> FailureOutcome {
        let live = matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Authenticating | ConnectionState::Connected
        );
        if !self.is_current(generation) || !live {
            return FailureOutcome::Stale;
        }

        if end == TransportEnd::Normal {
            info!("server ended the session");
            self.transition(ConnectionState::Disconnected);
            return FailureOutcome::Stopped;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                self.transition(ConnectionState::Reconnecting);
                FailureOutcome::Retry {
                    attempt: self.backoff.attempts(),
                    delay,
                }
            }
            None => {
                warn!(
                    attempts = self.backoff.attempts(),
                    "reconnect budget exhausted, staying offline"
                );
                self.transition(ConnectionState::Disconnected);
                FailureOutcome::GaveUp
            }
        }
    }

    /// Backoff timer fired. Returns the generation of the new attempt.
    pub fn backoff_elapsed(&mut self) -> Option<Generation> {
        if self.state() != ConnectionState::Reconnecting {
            return None;
        }
        Some(self.begin_attempt())
    }

    /// Explicit teardown (logout). Invalidates every in-flight transport.
    pub fn deactivate(&mut self) {
        self.generation += 1;
        self.backoff.reset();
        self.transition(ConnectionState::Closed);
    }
}
