//! Exchange and SA timers
//!
//! Every timer is a one-shot keyed by its kind and the initiator cookie of
//! the SA that owns it. Setting a timer that already exists re-arms it.
//! Nothing runs on its own: the owner polls the wheel with the current
//! time and handles whatever expired.
//!
//! # Timer Kinds
//!
//! ```text
//! MessageResend   every resend_interval after a send, retransmits the last datagram
//! Phase1Timeout   phase1_timeout after state 1/2, aborts the exchange
//! SaLifetime      negotiated lifetime after COMPLETE, queues SA removal
//! ```

use super::ikev1::message::Cookie;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// What a timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Retransmit the last outbound message
    MessageResend,
    /// Abort an exchange that did not complete in time
    Phase1Timeout,
    /// Remove an established SA
    SaLifetime,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::MessageResend => f.write_str("message-resend"),
            TimerKind::Phase1Timeout => f.write_str("phase1-timeout"),
            TimerKind::SaLifetime => f.write_str("sa-lifetime"),
        }
    }
}

/// Timer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    /// Timer kind
    pub kind: TimerKind,
    /// Initiator cookie of the owning SA
    pub icookie: Cookie,
}

impl TimerKey {
    /// Create a timer key
    pub fn new(kind: TimerKind, icookie: Cookie) -> Self {
        TimerKey { kind, icookie }
    }
}

/// Register and cancel one-shot timers
pub trait TimerService {
    /// Arm (or re-arm) a timer to fire `after` from `now`
    fn set(&mut self, key: TimerKey, now: Instant, after: Duration);

    /// Disarm a timer; returns whether it was armed
    fn cancel(&mut self, key: TimerKey) -> bool;

    /// Disarm every timer of an SA
    fn cancel_all(&mut self, icookie: &Cookie);

    /// Whether a timer is armed
    fn is_set(&self, key: TimerKey) -> bool;
}

/// In-memory timer table driven by [`TimerWheel::poll`]
#[derive(Debug, Default)]
pub struct TimerWheel {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerWheel {
    /// Create an empty wheel
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every timer due at `now`
    ///
    /// Expired timers come back ordered by deadline, then by key.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(Instant, TimerKey)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        due.sort();

        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Deadline of one timer
    pub fn deadline(&self, key: TimerKey) -> Option<Instant> {
        self.deadlines.get(&key).copied()
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no timer is armed
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl TimerService for TimerWheel {
    fn set(&mut self, key: TimerKey, now: Instant, after: Duration) {
        tracing::trace!(
            timer = %key.kind,
            icookie = %hex::encode(key.icookie),
            after_ms = after.as_millis() as u64,
            "timer armed"
        );
        self.deadlines.insert(key, now + after);
    }

    fn cancel(&mut self, key: TimerKey) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    fn cancel_all(&mut self, icookie: &Cookie) {
        self.deadlines.retain(|key, _| key.icookie != *icookie);
    }

    fn is_set(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }
}
