//! Phase 1 SA database
//!
//! One database exists per policy. It holds every SA of that policy, from
//! registration during the exchange until removal on failure or expiry,
//! together with the Phase 2 exchanges waiting for each SA to be
//! established.

use super::ikev1::identity::Identifier;
use super::ikev1::keymat::Phase1Keys;
use super::ikev1::message::Cookie;
use super::ikev1::proposal::SaAttributes;
use super::ikev1::sa::{CookiePair, IkeSa};
use super::ikev1::state::Role;
use super::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::oneshot;

/// Lifecycle state of a Phase 1 SA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaState {
    /// Main Mode in progress
    Negotiating,
    /// Authenticated and keyed
    Established,
    /// Marked for removal
    Deleted,
}

/// Result delivered to a waiting Phase 2 exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase1Status {
    /// Phase 1 SA is ready
    Established,
    /// Phase 1 failed with this error
    Failed(Error),
}

/// A Phase 2 exchange blocked on a Phase 1 SA
#[derive(Debug)]
pub struct Phase2Waiter {
    message_id: u32,
    sender: oneshot::Sender<Phase1Status>,
}

impl Phase2Waiter {
    /// Create a waiter and the receiver it resumes
    pub fn new(message_id: u32) -> (Self, oneshot::Receiver<Phase1Status>) {
        let (sender, receiver) = oneshot::channel();
        (Phase2Waiter { message_id, sender }, receiver)
    }

    /// Quick Mode message id of the waiting exchange
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Resume the waiting exchange
    pub fn resume(self, status: Phase1Status) {
        if self.sender.send(status).is_err() {
            tracing::trace!(message_id = self.message_id, "phase 2 waiter already gone");
        }
    }
}

/// Snapshot of an established SA
#[derive(Debug, Clone)]
pub struct EstablishedSa {
    /// Cookie pair
    pub cookies: CookiePair,
    /// Our role in the exchange
    pub role: Role,
    /// Peer address
    pub remote: SocketAddr,
    /// Negotiated attributes
    pub attributes: SaAttributes,
    /// Derived keys (SKEYID_d/a/e and the last Phase 1 IV)
    pub keys: Arc<Phase1Keys>,
    /// Authenticated peer identity
    pub peer_id: Option<Identifier>,
    /// When the exchange completed
    pub established_at: Instant,
}

/// One SA entry
#[derive(Debug)]
pub struct SaRecord {
    cookies: CookiePair,
    role: Role,
    remote: SocketAddr,
    state: SaState,
    established: Option<EstablishedSa>,
    waiters: Vec<Phase2Waiter>,
}

impl SaRecord {
    /// Record for an SA that is still negotiating
    pub fn negotiating(sa: &IkeSa) -> Self {
        SaRecord {
            cookies: sa.cookies,
            role: sa.role,
            remote: sa.remote,
            state: SaState::Negotiating,
            established: None,
            waiters: Vec::new(),
        }
    }

    /// Cookie pair
    pub fn cookies(&self) -> CookiePair {
        self.cookies
    }

    /// Peer address
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Our role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state
    pub fn state(&self) -> SaState {
        self.state
    }
}

/// SA collection of one policy
#[derive(Debug, Default)]
pub struct SaDatabase {
    records: Mutex<HashMap<Cookie, SaRecord>>,
}

impl SaDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Cookie, SaRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Internal("SA database lock poisoned".into()))
    }

    /// Register an SA
    pub fn insert(&self, record: SaRecord) -> Result<()> {
        let mut records = self.lock()?;
        let icookie = record.cookies.icookie();
        if records.contains_key(&icookie) {
            return Err(Error::InvalidState(format!(
                "SA {} already registered",
                hex::encode(icookie)
            )));
        }
        records.insert(icookie, record);
        Ok(())
    }

    /// Remove an SA, returning it if it was present
    pub fn remove(&self, icookie: &Cookie) -> Result<Option<SaRecord>> {
        Ok(self.lock()?.remove(icookie))
    }

    /// Whether an SA is registered
    pub fn contains(&self, icookie: &Cookie) -> bool {
        self.lock().map(|r| r.contains_key(icookie)).unwrap_or(false)
    }

    /// State of an SA
    pub fn state(&self, icookie: &Cookie) -> Option<SaState> {
        self.lock().ok()?.get(icookie).map(|r| r.state)
    }

    /// Record the Responder cookie of a registered SA
    pub fn set_rcookie(&self, icookie: &Cookie, rcookie: Cookie) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(icookie)
            .ok_or_else(|| Error::NotFound(format!("SA {}", hex::encode(icookie))))?;
        record.cookies.set_rcookie(rcookie)
    }

    /// Park a Phase 2 exchange until the SA is established
    ///
    /// An already established SA resumes the waiter immediately; a deleted
    /// one fails it.
    pub fn add_waiter(&self, icookie: &Cookie, waiter: Phase2Waiter) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(icookie)
            .ok_or_else(|| Error::NotFound(format!("SA {}", hex::encode(icookie))))?;

        match record.state {
            SaState::Negotiating => record.waiters.push(waiter),
            SaState::Established => waiter.resume(Phase1Status::Established),
            SaState::Deleted => waiter.resume(Phase1Status::Failed(Error::InvalidState(
                "Phase 1 SA is being removed".into(),
            ))),
        }
        Ok(())
    }

    /// Publish the negotiated SA and take its waiters
    pub fn establish(&self, established: EstablishedSa) -> Result<Vec<Phase2Waiter>> {
        let mut records = self.lock()?;
        let icookie = established.cookies.icookie();
        let record = records
            .get_mut(&icookie)
            .ok_or_else(|| Error::NotFound(format!("SA {}", hex::encode(icookie))))?;
        if record.state != SaState::Negotiating {
            return Err(Error::InvalidState(format!(
                "SA {} is {:?}",
                hex::encode(icookie),
                record.state
            )));
        }

        record.cookies = established.cookies;
        record.state = SaState::Established;
        record.established = Some(established);
        Ok(std::mem::take(&mut record.waiters))
    }

    /// Mark an SA deleted and take its waiters
    pub fn mark_deleted(&self, icookie: &Cookie) -> Result<Vec<Phase2Waiter>> {
        let mut records = self.lock()?;
        match records.get_mut(icookie) {
            Some(record) => {
                record.state = SaState::Deleted;
                record.established = None;
                Ok(std::mem::take(&mut record.waiters))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of an established SA
    pub fn established(&self, icookie: &Cookie) -> Option<EstablishedSa> {
        self.lock().ok()?.get(icookie)?.established.clone()
    }

    /// Find an established SA by peer address
    pub fn find_by_remote(&self, remote: SocketAddr) -> Option<EstablishedSa> {
        self.lock()
            .ok()?
            .values()
            .filter(|r| r.remote == remote)
            .find_map(|r| r.established.clone())
    }

    /// Number of registered SAs
    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether no SA is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
