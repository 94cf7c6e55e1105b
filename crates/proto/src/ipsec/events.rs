//! Deferred SA removal
//!
//! Failed exchanges and expired SAs are not destroyed where the failure is
//! noticed. They are queued here and removed in order by the engine, so
//! removal happens at one place even when several triggers race.

use super::ikev1::message::Cookie;
use std::collections::VecDeque;

/// Why an SA is being removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Exchange failed
    Aborted,
    /// Lifetime timer fired
    Expired,
    /// Removed on request
    Deleted,
}

/// A queued SA event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaEvent {
    /// Remove an SA from its policy
    RemoveSa {
        /// Owning policy
        policy: String,
        /// Initiator cookie of the SA
        icookie: Cookie,
        /// Trigger
        reason: RemovalReason,
    },
}

impl SaEvent {
    fn icookie(&self) -> &Cookie {
        match self {
            SaEvent::RemoveSa { icookie, .. } => icookie,
        }
    }
}

/// FIFO of pending SA events
///
/// A second removal request for an SA that is already queued is dropped.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<SaEvent>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event; returns `false` when it collapsed into a queued one
    pub fn push(&mut self, event: SaEvent) -> bool {
        if self.events.iter().any(|e| e.icookie() == event.icookie()) {
            return false;
        }
        self.events.push_back(event);
        true
    }

    /// Take the next event
    pub fn pop(&mut self) -> Option<SaEvent> {
        self.events.pop_front()
    }

    /// Whether a removal for this SA is queued
    pub fn is_pending(&self, icookie: &Cookie) -> bool {
        self.events.iter().any(|e| e.icookie() == icookie)
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
