//! Phase 1 engine
//!
//! Owns every exchange in progress, the per-policy SA databases, the timer
//! wheel and the removal queue. Inbound datagrams are routed to their
//! exchange by Initiator cookie; a datagram with an unknown cookie and a
//! zero Responder cookie starts a new Responder exchange.
//!
//! The engine never blocks: outbound datagrams go to the [`Transport`], time
//! comes from the [`Clock`], and the caller drives [`Phase1Engine::poll_timers`]
//! and [`Phase1Engine::process_events`].
//!
//! # Example
//!
//! ```rust
//! use oakley_platform::{QueuedTransport, SystemClock};
//! use oakley_proto::ipsec::config::{EngineConfig, Policy, PolicyTransform};
//! use oakley_proto::ipsec::crypto::DhGroup;
//! use oakley_proto::ipsec::engine::Phase1Engine;
//! use oakley_proto::ipsec::ikev1::constants::{AuthMethod, EncryptionAlgorithm, HashAlgorithm};
//! use oakley_proto::ipsec::ikev1::identity::Identifier;
//!
//! # fn main() -> oakley_proto::ipsec::Result<()> {
//! let policy = Policy::builder("branch")
//!     .with_transform(PolicyTransform::new(
//!         EncryptionAlgorithm::AesCbc,
//!         HashAlgorithm::Sha1,
//!         AuthMethod::PreSharedKey,
//!         DhGroup::Modp1024,
//!     ))
//!     .with_preshared_key(Identifier::Ipv4("192.0.2.2".parse().unwrap()), b"secret".to_vec())
//!     .build()?;
//!
//! let mut engine = Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), SystemClock)?;
//! engine.add_policy(policy)?;
//!
//! let (icookie, first) = engine.start_initiator("branch", "192.0.2.2:500".parse().unwrap(), None)?;
//! assert_eq!(&first[..8], &icookie);
//! assert_eq!(engine.transport_mut().drain().len(), 1);
//! # Ok(())
//! # }
//! ```

use super::config::{EngineConfig, Policy};
use super::events::{EventQueue, RemovalReason, SaEvent};
use super::ikev1::handle::Phase1Handle;
use super::ikev1::main_mode::{self, Outcome, StateContext};
use super::ikev1::message::{Cookie, IsakmpHeader};
use super::ikev1::sa::{generate_cookie, CookiePair, IkeSa};
use super::ikev1::state::Role;
use super::logging;
use super::sadb::{EstablishedSa, Phase1Status, Phase2Waiter, SaDatabase, SaRecord, SaState};
use super::timer::{TimerKind, TimerService, TimerWheel};
use super::{Error, Result};
use oakley_platform::{Clock, OakleyResult, SecurityModule, Transport};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// A datagram received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    /// Raw ISAKMP datagram
    pub data: Vec<u8>,
    /// Source address
    pub remote: SocketAddr,
    /// Local address it arrived on
    pub local: SocketAddr,
}

struct PolicyEntry {
    policy: Policy,
    sadb: Arc<SaDatabase>,
}

/// IKEv1 Phase 1 engine
pub struct Phase1Engine<T: Transport, C: Clock> {
    config: EngineConfig,
    policies: Vec<PolicyEntry>,
    handles: HashMap<Cookie, Phase1Handle>,
    timers: TimerWheel,
    events: EventQueue,
    transport: T,
    clock: C,
}

impl<T: Transport, C: Clock> Phase1Engine<T, C> {
    /// Create an engine
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the configuration is invalid
    pub fn new(config: EngineConfig, transport: T, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Phase1Engine {
            config,
            policies: Vec::new(),
            handles: HashMap::new(),
            timers: TimerWheel::new(),
            events: EventQueue::new(),
            transport,
            clock,
        })
    }

    /// Add a policy with its own SA database
    ///
    /// Responder exchanges use the first policy, in insertion order, whose
    /// remote selector contains the peer address.
    pub fn add_policy(&mut self, policy: Policy) -> Result<Arc<SaDatabase>> {
        policy.validate()?;
        if self.policies.iter().any(|e| e.policy.name == policy.name) {
            return Err(Error::InvalidParameter(format!(
                "policy {} already exists",
                policy.name
            )));
        }

        let sadb = Arc::new(SaDatabase::new());
        self.policies.push(PolicyEntry {
            policy,
            sadb: Arc::clone(&sadb),
        });
        Ok(sadb)
    }

    /// SA database of a policy
    pub fn sadb(&self, policy: &str) -> Option<Arc<SaDatabase>> {
        self.policy_entry(policy).map(|e| Arc::clone(&e.sadb))
    }

    /// The transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Exchanges currently held, including completed ones not yet removed
    pub fn exchange_count(&self) -> usize {
        self.handles.len()
    }

    /// Earliest pending timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Start a Main Mode exchange as Initiator
    ///
    /// The SA is registered in the policy's database before the first
    /// message goes out. `waiter` is resumed when the SA is established or
    /// the exchange fails.
    ///
    /// Returns the Initiator cookie and the first message.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the policy does not exist
    /// - `ResourceExhausted` if too many exchanges are in progress
    /// - Any error raised while building the proposal
    pub fn start_initiator(
        &mut self,
        policy_name: &str,
        remote: SocketAddr,
        waiter: Option<Phase2Waiter>,
    ) -> Result<(Cookie, Vec<u8>)> {
        self.check_capacity()?;
        let entry = self
            .policy_entry(policy_name)
            .ok_or_else(|| Error::NotFound(format!("policy {}", policy_name)))?;

        let icookie = self.unused_cookie();
        let now = self.clock.current_time();
        let mut handle = Phase1Handle::new(
            IkeSa::new(CookiePair::new(icookie), Role::Initiator, policy_name, remote),
            now,
        );

        entry.sadb.insert(SaRecord::negotiating(&handle.sa))?;
        handle.registered = true;
        if let Some(waiter) = waiter {
            entry.sadb.add_waiter(&icookie, waiter)?;
        }

        logging::log_exchange_start(&icookie, Role::Initiator, remote, policy_name);
        self.handles.insert(icookie, handle);

        match self.drive(&icookie, None, None)? {
            Outcome::Continue(datagram) => Ok((icookie, datagram)),
            Outcome::Failed(err) => Err(err),
            other => Err(Error::Internal(format!(
                "unexpected outcome {:?} for first message",
                other
            ))),
        }
    }

    /// Feed one inbound datagram to its exchange
    ///
    /// # Errors
    ///
    /// Returns `Err` for datagrams that cannot be bound to an exchange
    /// (truncated header, unknown cookies, no matching policy) and for
    /// header-level rejects that leave the exchange untouched. Failures
    /// inside an exchange abort it and are reported as [`Outcome::Failed`].
    pub fn process_inbound(&mut self, packet: InboundPacket) -> Result<Outcome> {
        let header = IsakmpHeader::from_bytes(&packet.data)?;
        let icookie = header.initiator_cookie;

        let created = if self.handles.contains_key(&icookie) {
            false
        } else {
            self.accept_responder(&header, packet.remote)?;
            true
        };

        let result = self.drive(&icookie, Some(&packet.data), Some(packet.local));
        if created && result.is_err() {
            self.handles.remove(&icookie);
        }
        result
    }

    /// Wait for the Phase 1 SA identified by `icookie`
    ///
    /// Resolves at once if the SA is already established or deleted.
    ///
    /// # Errors
    ///
    /// `NotFound` if no policy database knows the SA
    pub fn attach_phase2(
        &self,
        icookie: &Cookie,
        message_id: u32,
    ) -> Result<oneshot::Receiver<Phase1Status>> {
        let entry = self
            .policies
            .iter()
            .find(|e| e.sadb.contains(icookie))
            .ok_or_else(|| Error::NotFound(format!("SA {}", hex::encode(icookie))))?;

        let (waiter, receiver) = Phase2Waiter::new(message_id);
        entry.sadb.add_waiter(icookie, waiter)?;
        Ok(receiver)
    }

    /// Delete an SA
    ///
    /// An exchange still negotiating is aborted at once: its timers are
    /// cancelled, later datagrams are ignored and Phase 2 waiters receive
    /// `InvalidState`. An established SA is marked deleted. The handle and
    /// database record go on the next [`Phase1Engine::process_events`].
    ///
    /// Returns false if the SA is unknown or removal is already queued.
    pub fn delete_sa(&mut self, icookie: &Cookie) -> bool {
        self.cancel(icookie, &Error::InvalidState("SA deleted".into()))
    }

    /// Fire every expired timer
    ///
    /// Returns the number of timers fired.
    pub fn poll_timers(&mut self) -> usize {
        let Self {
            config,
            policies,
            handles,
            timers,
            events,
            transport,
            clock,
        } = self;
        let now = clock.current_time();
        let fired = timers.poll(now);

        for key in &fired {
            let Some(handle) = handles.get_mut(&key.icookie) else {
                trace!(icookie = %hex::encode(key.icookie), timer = %key.kind, "timer for removed exchange");
                continue;
            };

            match key.kind {
                TimerKind::MessageResend => {
                    if handle.resends >= config.resend_count {
                        debug!(
                            icookie = %hex::encode(key.icookie),
                            resends = handle.resends,
                            "resend limit reached"
                        );
                        continue;
                    }
                    handle.resends += 1;
                    if let Err(e) = main_mode::resend_last(handle, &mut *transport, "timer") {
                        warn!(icookie = %hex::encode(key.icookie), error = %e, "resend failed");
                    }
                    timers.set(*key, now, config.resend_interval);
                }
                TimerKind::Phase1Timeout => {
                    if handle.deleted || handle.state.is_complete() {
                        continue;
                    }
                    let Some(entry) = policies.iter().find(|e| e.policy.name == handle.sa.policy)
                    else {
                        continue;
                    };
                    main_mode::abort(handle, &entry.sadb, &mut *timers, events, &Error::Timeout);
                    if !handle.registered {
                        handles.remove(&key.icookie);
                    }
                }
                TimerKind::SaLifetime => {
                    if let Some(entry) = policies.iter().find(|e| e.policy.name == handle.sa.policy)
                    {
                        if let Err(e) = entry.sadb.mark_deleted(&key.icookie) {
                            warn!(icookie = %hex::encode(key.icookie), error = %e, "unable to expire SA");
                        }
                    }
                    events.push(SaEvent::RemoveSa {
                        policy: handle.sa.policy.clone(),
                        icookie: key.icookie,
                        reason: RemovalReason::Expired,
                    });
                }
            }
        }
        fired.len()
    }

    /// Run queued SA removals
    ///
    /// Every timer of the SA is cancelled before its handle and database
    /// record are dropped. Returns the number of SAs removed.
    pub fn process_events(&mut self) -> usize {
        let mut removed = 0;
        while let Some(SaEvent::RemoveSa {
            policy,
            icookie,
            reason,
        }) = self.events.pop()
        {
            self.timers.cancel_all(&icookie);
            self.handles.remove(&icookie);

            if let Some(entry) = self.policy_entry(&policy) {
                if let Ok(Some(record)) = entry.sadb.remove(&icookie) {
                    if record.state() == SaState::Negotiating {
                        // waiters of a deleted record were resumed already
                        debug!(icookie = %hex::encode(icookie), "removed SA still negotiating");
                    }
                }
            }
            logging::log_sa_removed(&icookie, &policy, reason);
            removed += 1;
        }
        removed
    }

    /// State of an SA in any policy database
    pub fn sa_state(&self, icookie: &Cookie) -> Option<SaState> {
        self.policies.iter().find_map(|e| e.sadb.state(icookie))
    }

    /// Snapshot of an established SA
    pub fn established_sa(&self, icookie: &Cookie) -> Option<EstablishedSa> {
        self.policies.iter().find_map(|e| e.sadb.established(icookie))
    }

    fn cancel(&mut self, icookie: &Cookie, err: &Error) -> bool {
        let Self {
            policies,
            handles,
            timers,
            events,
            ..
        } = self;
        let Some(handle) = handles.get_mut(icookie) else {
            return false;
        };
        let Some(entry) = policies.iter().find(|e| e.policy.name == handle.sa.policy) else {
            return false;
        };

        if !handle.deleted && !handle.state.is_complete() {
            main_mode::abort(handle, &entry.sadb, &mut *timers, events, err);
            if !handle.registered {
                handles.remove(icookie);
            }
            return true;
        }

        match entry.sadb.mark_deleted(icookie) {
            Ok(waiters) => {
                for waiter in waiters {
                    waiter.resume(Phase1Status::Failed(err.clone()));
                }
            }
            Err(e) => warn!(icookie = %hex::encode(icookie), error = %e, "unable to mark SA deleted"),
        }
        handle.deleted = true;
        events.push(SaEvent::RemoveSa {
            policy: handle.sa.policy.clone(),
            icookie: *icookie,
            reason: RemovalReason::Deleted,
        })
    }

    fn policy_entry(&self, name: &str) -> Option<&PolicyEntry> {
        self.policies.iter().find(|e| e.policy.name == name)
    }

    fn check_capacity(&self) -> Result<()> {
        if self.handles.len() >= self.config.max_exchanges {
            return Err(Error::ResourceExhausted(format!(
                "{} exchanges in progress",
                self.handles.len()
            )));
        }
        Ok(())
    }

    fn unused_cookie(&self) -> Cookie {
        loop {
            let cookie = generate_cookie();
            if !self.handles.contains_key(&cookie) {
                return cookie;
            }
        }
    }

    /// Create the Responder handle for a new exchange
    fn accept_responder(&mut self, header: &IsakmpHeader, remote: SocketAddr) -> Result<()> {
        let icookie = header.initiator_cookie;
        if header.has_responder_cookie() {
            return Err(Error::NotFound(format!(
                "no exchange for cookie {}",
                hex::encode(icookie)
            )));
        }
        self.check_capacity()?;

        let policy = self
            .policies
            .iter()
            .find(|e| e.policy.applies_to(remote.ip()))
            .map(|e| e.policy.name.clone())
            .ok_or_else(|| Error::NotFound(format!("policy for {}", remote.ip())))?;

        let now = self.clock.current_time();
        let handle = Phase1Handle::new(
            IkeSa::new(CookiePair::new(icookie), Role::Responder, policy.as_str(), remote),
            now,
        );
        logging::log_exchange_start(&icookie, Role::Responder, remote, &policy);
        self.handles.insert(icookie, handle);
        Ok(())
    }

    /// Run one step of an exchange
    fn drive(
        &mut self,
        icookie: &Cookie,
        datagram: Option<&[u8]>,
        local: Option<SocketAddr>,
    ) -> Result<Outcome> {
        let Self {
            config,
            policies,
            handles,
            timers,
            events,
            transport,
            clock,
        } = self;

        let handle = handles
            .get_mut(icookie)
            .ok_or_else(|| Error::NotFound(format!("exchange {}", hex::encode(icookie))))?;
        let entry = policies
            .iter()
            .find(|e| e.policy.name == handle.sa.policy)
            .ok_or_else(|| Error::NotFound(format!("policy {}", handle.sa.policy)))?;

        let mut ctx = StateContext {
            policy: &entry.policy,
            sadb: &entry.sadb,
            config,
            transport,
            timers,
            events,
            now: clock.current_time(),
            local,
        };
        let outcome = main_mode::process_main_mode(handle, &mut ctx, datagram);

        if handle.deleted && !handle.registered {
            handles.remove(icookie);
        }
        outcome
    }
}

impl<T: Transport + Sync, C: Clock + Sync> SecurityModule for Phase1Engine<T, C> {
    fn id(&self) -> &'static str {
        "ikev1-main-mode"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &'static str {
        "IKEv1 Phase 1 Main Mode exchange engine"
    }

    fn init(&mut self) -> OakleyResult<()> {
        self.config.validate()?;
        for entry in &self.policies {
            entry.policy.validate()?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> OakleyResult<()> {
        let cookies: Vec<Cookie> = self.handles.keys().copied().collect();
        let err = Error::InvalidState("engine shut down".into());
        for icookie in &cookies {
            self.cancel(icookie, &err);
        }
        self.process_events();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::config::PolicyTransform;
    use crate::ipsec::crypto::DhGroup;
    use crate::ipsec::ikev1::constants::{AuthMethod, EncryptionAlgorithm, HashAlgorithm};
    use crate::ipsec::ikev1::identity::Identifier;
    use oakley_platform::QueuedTransport;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Clock advanced by hand
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            ManualClock(Arc::new(Mutex::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn current_time(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    const PEER: &str = "192.0.2.2:500";

    fn policy() -> Policy {
        Policy::builder("p")
            .with_transform(PolicyTransform::new(
                EncryptionAlgorithm::AesCbc,
                HashAlgorithm::Sha1,
                AuthMethod::PreSharedKey,
                DhGroup::Modp1024,
            ))
            .with_preshared_key(Identifier::Any, b"k".to_vec())
            .build()
            .unwrap()
    }

    fn engine(clock: ManualClock) -> Phase1Engine<QueuedTransport, ManualClock> {
        let mut engine =
            Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), clock).unwrap();
        engine.add_policy(policy()).unwrap();
        engine
    }

    #[test]
    fn test_duplicate_policy_rejected() {
        let mut e = engine(ManualClock::new());
        assert!(matches!(e.add_policy(policy()), Err(Error::InvalidParameter(_))));
        assert!(e.sadb("p").is_some());
        assert!(e.sadb("q").is_none());
    }

    #[test]
    fn test_start_registers_sa() {
        let mut e = engine(ManualClock::new());
        let (waiter, _rx) = Phase2Waiter::new(3);
        let (icookie, first) = e.start_initiator("p", PEER.parse().unwrap(), Some(waiter)).unwrap();

        assert_eq!(e.sa_state(&icookie), Some(SaState::Negotiating));
        assert_eq!(e.transport_mut().drain()[0].data, first);
        assert!(e.next_deadline().is_some());

        assert!(matches!(
            e.start_initiator("missing", PEER.parse().unwrap(), None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_resend_then_timeout() {
        let clock = ManualClock::new();
        let mut e = engine(clock.clone());
        let (icookie, first) = e.start_initiator("p", PEER.parse().unwrap(), None).unwrap();
        let mut rx = e.attach_phase2(&icookie, 7).unwrap();
        e.transport_mut().drain();

        let resend_count = e.config().resend_count as usize;
        for _ in 0..resend_count + 2 {
            clock.advance(e.config().resend_interval);
            e.poll_timers();
        }
        let resent = e.transport_mut().drain();
        assert_eq!(resent.len(), resend_count);
        assert!(resent.iter().all(|d| d.data == first));

        clock.advance(e.config().phase1_timeout);
        e.poll_timers();
        assert_eq!(rx.try_recv().unwrap(), Phase1Status::Failed(Error::Timeout));
        assert_eq!(e.sa_state(&icookie), Some(SaState::Deleted));

        assert_eq!(e.process_events(), 1);
        assert_eq!(e.sa_state(&icookie), None);
        assert_eq!(e.exchange_count(), 0);
        assert!(e.next_deadline().is_none());
    }

    #[test]
    fn test_unknown_cookie_rejected() {
        let mut e = engine(ManualClock::new());
        let mut other = engine(ManualClock::new());
        let (_, first) = other.start_initiator("p", PEER.parse().unwrap(), None).unwrap();

        let mut stray = first.clone();
        stray[8..16].copy_from_slice(&[9; 8]);
        let packet = InboundPacket {
            data: stray,
            remote: PEER.parse().unwrap(),
            local: "192.0.2.1:500".parse().unwrap(),
        };
        assert!(matches!(e.process_inbound(packet), Err(Error::NotFound(_))));
        assert_eq!(e.exchange_count(), 0);
    }

    #[test]
    fn test_header_reject_drops_new_exchange() {
        let mut e = engine(ManualClock::new());
        let mut other = engine(ManualClock::new());
        let (_, mut first) = other.start_initiator("p", PEER.parse().unwrap(), None).unwrap();
        first[23] = 5;

        let packet = InboundPacket {
            data: first,
            remote: PEER.parse().unwrap(),
            local: "192.0.2.1:500".parse().unwrap(),
        };
        assert_eq!(e.process_inbound(packet), Err(Error::InvalidMessageId(5)));
        assert_eq!(e.exchange_count(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let config = EngineConfig {
            max_exchanges: 1,
            ..EngineConfig::default()
        };
        let mut e = Phase1Engine::new(config, QueuedTransport::new(), ManualClock::new()).unwrap();
        e.add_policy(policy()).unwrap();

        e.start_initiator("p", PEER.parse().unwrap(), None).unwrap();
        assert!(matches!(
            e.start_initiator("p", PEER.parse().unwrap(), None),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_delete_negotiating_sa() {
        let mut e = engine(ManualClock::new());
        let mut r = engine(ManualClock::new());
        let (waiter, mut rx) = Phase2Waiter::new(1);
        let (icookie, first) = e.start_initiator("p", PEER.parse().unwrap(), Some(waiter)).unwrap();

        let reply = match r
            .process_inbound(InboundPacket {
                data: first,
                remote: "192.0.2.1:500".parse().unwrap(),
                local: PEER.parse().unwrap(),
            })
            .unwrap()
        {
            Outcome::Continue(reply) => reply,
            other => panic!("unexpected outcome {:?}", other),
        };

        assert!(e.delete_sa(&icookie));
        assert!(!e.delete_sa(&icookie));
        assert_eq!(e.sa_state(&icookie), Some(SaState::Deleted));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Phase1Status::Failed(Error::InvalidState(_))
        ));
        assert!(e.next_deadline().is_none());

        let late = InboundPacket {
            data: reply,
            remote: PEER.parse().unwrap(),
            local: "192.0.2.1:500".parse().unwrap(),
        };
        assert!(matches!(e.process_inbound(late), Err(Error::InvalidState(_))));

        assert_eq!(e.process_events(), 1);
        assert_eq!(e.sa_state(&icookie), None);
        assert!(!e.delete_sa(&icookie));
    }

    #[test]
    fn test_shutdown_resumes_waiters() {
        let mut e = engine(ManualClock::new());
        let (waiter, mut rx) = Phase2Waiter::new(1);
        e.start_initiator("p", PEER.parse().unwrap(), Some(waiter)).unwrap();

        assert!(e.shutdown().is_ok());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Phase1Status::Failed(Error::InvalidState(_))
        ));
        assert_eq!(e.exchange_count(), 0);
    }

    #[test]
    fn test_security_module() {
        let mut e = engine(ManualClock::new());
        assert_eq!(e.id(), "ikev1-main-mode");
        assert!(e.init().is_ok());

        let (icookie, _) = e.start_initiator("p", PEER.parse().unwrap(), None).unwrap();
        assert!(e.shutdown().is_ok());
        assert_eq!(e.sa_state(&icookie), None);
        assert_eq!(e.exchange_count(), 0);
    }
}
