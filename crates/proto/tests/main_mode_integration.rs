//! Main Mode Integration Tests
//!
//! End-to-end tests driving two engines against each other through
//! in-memory transports. Covers PSK and RSA signature authentication,
//! negotiation and authentication failures, and retransmission.

#![cfg(feature = "ipsec")]

use oakley_platform::{Clock, QueuedTransport};
use oakley_proto::ipsec::{
    cert::CertificateBuilder,
    config::SignatureCredentials,
    crypto::DhGroup,
    ikev1::{
        constants::{AttributeType, HashAlgorithm as Hash, PayloadType},
        message::{Message, OutboundMessage},
        payload::{DataAttribute, SaPayload},
        AuthMethod, EncryptionAlgorithm, Identifier,
    },
    EngineConfig, Error, InboundPacket, Outcome, Phase1Engine, Phase1Status, Phase2Waiter,
    Policy, PolicyFlags, PolicyTransform, SaState,
};
use once_cell::sync::Lazy;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const INITIATOR: &str = "192.0.2.1:500";
const RESPONDER: &str = "192.0.2.2:500";

/// Clock shared by both peers and advanced by hand
#[derive(Clone)]
struct TestClock(Arc<Mutex<Instant>>);

impl TestClock {
    fn new() -> Self {
        TestClock(Arc::new(Mutex::new(Instant::now())))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for TestClock {
    fn current_time(&self) -> Instant {
        *self.0.lock().unwrap()
    }
}

struct Peer {
    engine: Phase1Engine<QueuedTransport, TestClock>,
    addr: SocketAddr,
}

impl Peer {
    fn new(addr: &str, policy: Policy, clock: &TestClock) -> Self {
        let mut engine =
            Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), clock.clone())
                .unwrap();
        engine.add_policy(policy).unwrap();
        Peer {
            engine,
            addr: addr.parse().unwrap(),
        }
    }

    fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.engine
            .transport_mut()
            .drain()
            .into_iter()
            .map(|d| d.data)
            .collect()
    }

    fn receive(&mut self, from: SocketAddr, data: Vec<u8>) -> Result<Outcome, Error> {
        self.engine.process_inbound(InboundPacket {
            data,
            remote: from,
            local: self.addr,
        })
    }
}

/// Deliver queued datagrams back and forth until both sides go quiet
fn run_exchange(initiator: &mut Peer, responder: &mut Peer) -> Vec<Result<Outcome, Error>> {
    let mut outcomes = Vec::new();
    for _ in 0..8 {
        let to_responder = initiator.take_sent();
        let to_initiator = responder.take_sent();
        if to_responder.is_empty() && to_initiator.is_empty() {
            break;
        }
        for data in to_responder {
            outcomes.push(responder.receive(initiator.addr, data));
        }
        for data in to_initiator {
            outcomes.push(initiator.receive(responder.addr, data));
        }
    }
    outcomes
}

fn transform(auth: AuthMethod, group: DhGroup) -> PolicyTransform {
    PolicyTransform::new(EncryptionAlgorithm::AesCbc, Hash::Sha1, auth, group)
}

fn psk_policy(peer: &str, key: &[u8], group: DhGroup) -> Policy {
    let peer: SocketAddr = peer.parse().unwrap();
    Policy::builder("psk")
        .with_transform(transform(AuthMethod::PreSharedKey, group))
        .with_preshared_key(Identifier::from(peer.ip()), key.to_vec())
        .build()
        .unwrap()
}

fn ip(addr: &str) -> IpAddr {
    addr.parse::<SocketAddr>().unwrap().ip()
}

//
// Test Cases - Pre-shared key
//

#[test]
fn test_psk_main_mode_round_trip() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, psk_policy(RESPONDER, b"shared", DhGroup::Modp1024), &clock);
    let mut responder = Peer::new(RESPONDER, psk_policy(INITIATOR, b"shared", DhGroup::Modp1024), &clock);

    let (waiter, mut rx) = Phase2Waiter::new(1);
    let (icookie, _) = initiator
        .engine
        .start_initiator("psk", responder.addr, Some(waiter))
        .unwrap();

    let outcomes = run_exchange(&mut initiator, &mut responder);
    assert_eq!(outcomes.len(), 6);
    assert_eq!(
        outcomes.iter().filter(|o| matches!(o, Ok(Outcome::Complete))).count(),
        2
    );

    assert_eq!(initiator.engine.sa_state(&icookie), Some(SaState::Established));
    assert_eq!(responder.engine.sa_state(&icookie), Some(SaState::Established));
    assert_eq!(rx.try_recv().unwrap(), Phase1Status::Established);

    let i_sa = initiator.engine.established_sa(&icookie).unwrap();
    let r_sa = responder.engine.established_sa(&icookie).unwrap();
    assert_eq!(i_sa.cookies, r_sa.cookies);
    assert_eq!(i_sa.keys.skeyid_d(), r_sa.keys.skeyid_d());
    assert_eq!(i_sa.keys.skeyid_a(), r_sa.keys.skeyid_a());
    assert_eq!(i_sa.peer_id, Some(Identifier::from(ip(RESPONDER))));
    assert_eq!(r_sa.peer_id, Some(Identifier::from(ip(INITIATOR))));
    assert_eq!(r_sa.attributes.group, DhGroup::Modp1024);

    // a Phase 2 exchange attaching later is resumed at once
    let mut late = responder.engine.attach_phase2(&icookie, 2).unwrap();
    assert_eq!(late.try_recv().unwrap(), Phase1Status::Established);
}

#[test]
fn test_sa_lifetime_expiry() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, psk_policy(RESPONDER, b"shared", DhGroup::Modp1024), &clock);
    let mut responder = Peer::new(RESPONDER, psk_policy(INITIATOR, b"shared", DhGroup::Modp1024), &clock);

    let (icookie, _) = initiator.engine.start_initiator("psk", responder.addr, None).unwrap();
    run_exchange(&mut initiator, &mut responder);
    let lifetime = initiator.engine.established_sa(&icookie).unwrap().attributes.lifetime_secs();

    clock.advance(Duration::from_secs(u64::from(lifetime) + 1));
    initiator.engine.poll_timers();
    assert_eq!(initiator.engine.sa_state(&icookie), Some(SaState::Deleted));
    assert!(initiator.take_sent().is_empty());

    assert_eq!(initiator.engine.process_events(), 1);
    assert_eq!(initiator.engine.sa_state(&icookie), None);
    assert!(initiator.engine.attach_phase2(&icookie, 1).is_err());
}

//
// Test Cases - RSA signatures
//

static CA_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap());

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("oakley-it-{}-{}", std::process::id(), name));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Issue a CA-signed certificate for `addr` and write the credentials
fn rsa_credentials(dir: &str, addr: &str) -> SignatureCredentials {
    let dir = temp_dir(dir);
    let ca = CertificateBuilder::new("Oakley Test CA").self_signed(&CA_KEY).unwrap();
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let cert = CertificateBuilder::new(addr)
        .serial(7)
        .alt_name(Identifier::from(ip(addr)))
        .signed_by(&key.to_public_key(), &ca, &CA_KEY)
        .unwrap();

    let write = |name: &str, contents: &[u8]| {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        Some(path)
    };
    SignatureCredentials {
        certificate: write("local.pem", cert.to_pem().as_bytes()),
        private_key: write(
            "local.key",
            key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
        ),
        ca_certificate: write("ca.pem", ca.to_pem().as_bytes()),
        peer_certificate: None,
        crl: None,
    }
}

fn rsa_policy(credentials: SignatureCredentials) -> Policy {
    Policy::builder("rsa")
        .with_transform(transform(AuthMethod::RsaSignatures, DhGroup::Modp1024))
        .with_flags(
            PolicyFlags::default()
                .with(PolicyFlags::VERIFY_CERT)
                .with(PolicyFlags::VERIFY_ID)
                .with(PolicyFlags::INBAND_CERT_EXCHANGE),
        )
        .with_credentials(credentials)
        .build()
        .unwrap()
}

#[test]
fn test_rsa_main_mode_with_inband_certificates() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, rsa_policy(rsa_credentials("rsa-i", INITIATOR)), &clock);
    let mut responder = Peer::new(RESPONDER, rsa_policy(rsa_credentials("rsa-r", RESPONDER)), &clock);

    let (icookie, _) = initiator.engine.start_initiator("rsa", responder.addr, None).unwrap();

    // message 4 carries a CERT-REQUEST, message 5 answers it with a CERT
    let outcomes = run_exchange(&mut initiator, &mut responder);
    assert!(outcomes.iter().all(|o| o.is_ok()), "{:?}", outcomes);

    let i_sa = initiator.engine.established_sa(&icookie).unwrap();
    let r_sa = responder.engine.established_sa(&icookie).unwrap();
    assert_eq!(i_sa.attributes.auth_method, AuthMethod::RsaSignatures);
    assert_eq!(i_sa.keys.skeyid_d(), r_sa.keys.skeyid_d());
    assert_eq!(r_sa.peer_id, Some(Identifier::from(ip(INITIATOR))));
}

#[test]
fn test_rsa_untrusted_certificate_rejected() {
    let clock = TestClock::new();
    let mut rogue = rsa_credentials("rogue-i", INITIATOR);
    // self-signed by a key the Responder's CA never saw
    let other_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let self_signed = CertificateBuilder::new(INITIATOR)
        .alt_name(Identifier::from(ip(INITIATOR)))
        .self_signed(&other_key)
        .unwrap();
    let dir = temp_dir("rogue-i");
    std::fs::write(dir.join("local.pem"), self_signed.to_pem()).unwrap();
    std::fs::write(
        dir.join("local.key"),
        other_key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
    )
    .unwrap();
    rogue.certificate = Some(dir.join("local.pem"));
    rogue.private_key = Some(dir.join("local.key"));

    let mut initiator = Peer::new(INITIATOR, rsa_policy(rogue), &clock);
    let mut responder = Peer::new(RESPONDER, rsa_policy(rsa_credentials("rogue-r", RESPONDER)), &clock);

    let (icookie, _) = initiator.engine.start_initiator("rsa", responder.addr, None).unwrap();
    let outcomes = run_exchange(&mut initiator, &mut responder);

    assert!(outcomes.contains(&Ok(Outcome::Failed(Error::AuthenticationFailed))));
    assert_eq!(responder.engine.sa_state(&icookie), Some(SaState::Deleted));
    assert_eq!(initiator.engine.sa_state(&icookie), Some(SaState::Negotiating));
}

//
// Test Cases - Failures
//

#[test]
fn test_no_acceptable_proposal() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, psk_policy(RESPONDER, b"k", DhGroup::Modp1024), &clock);
    let mut responder = Peer::new(RESPONDER, psk_policy(INITIATOR, b"k", DhGroup::Modp2048), &clock);

    let (icookie, _) = initiator.engine.start_initiator("psk", responder.addr, None).unwrap();
    let outcomes = run_exchange(&mut initiator, &mut responder);

    assert_eq!(outcomes, vec![Ok(Outcome::Failed(Error::NegotiationFailed))]);
    // the Responder never registered the SA
    assert_eq!(responder.engine.sa_state(&icookie), None);
    assert_eq!(responder.engine.exchange_count(), 0);
    assert_eq!(initiator.engine.sa_state(&icookie), Some(SaState::Negotiating));
}

#[test]
fn test_tampered_selection_detected() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, psk_policy(RESPONDER, b"k", DhGroup::Modp1024), &clock);
    let mut responder = Peer::new(RESPONDER, psk_policy(INITIATOR, b"k", DhGroup::Modp1024), &clock);

    let (icookie, _) = initiator.engine.start_initiator("psk", responder.addr, None).unwrap();
    let m1 = initiator.take_sent().remove(0);
    assert!(matches!(responder.receive(initiator.addr, m1), Ok(Outcome::Continue(_))));
    let m2 = responder.take_sent().remove(0);

    // rewrite the selected group to one the Initiator never offered
    let message = Message::from_bytes(&m2).unwrap();
    let mut sa = SaPayload::from_payload_data(message.payload_body(PayloadType::SA).unwrap()).unwrap();
    let transform = &mut sa.proposals[0].transforms[0];
    for attribute in transform.attributes.iter_mut() {
        if attribute.attr_type == AttributeType::GroupDescription.to_u16() {
            *attribute = DataAttribute::basic(AttributeType::GroupDescription, DhGroup::Modp2048.to_u16());
        }
    }
    let mut forged = OutboundMessage::new(message.header.clone());
    forged.push(PayloadType::SA, sa.to_payload_data());

    let outcome = initiator.receive(responder.addr, forged.to_bytes().unwrap()).unwrap();
    assert_eq!(outcome, Outcome::Failed(Error::ProposalTampered));
    assert_eq!(initiator.engine.sa_state(&icookie), Some(SaState::Deleted));
    assert!(initiator.take_sent().is_empty());
}

#[test]
fn test_auth_failure_resumes_phase2_waiters() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, psk_policy(RESPONDER, b"one", DhGroup::Modp1024), &clock);
    let mut responder = Peer::new(RESPONDER, psk_policy(INITIATOR, b"two", DhGroup::Modp1024), &clock);

    let (waiter, mut initiator_rx) = Phase2Waiter::new(1);
    let (icookie, _) = initiator
        .engine
        .start_initiator("psk", responder.addr, Some(waiter))
        .unwrap();

    // deliver messages 1..4 by hand so a Phase 2 waiter can attach to the Responder
    let m1 = initiator.take_sent().remove(0);
    responder.receive(initiator.addr, m1).unwrap();
    let mut responder_rx = responder.engine.attach_phase2(&icookie, 9).unwrap();

    let outcomes = run_exchange(&mut initiator, &mut responder);
    let failure = outcomes
        .iter()
        .find_map(|o| match o {
            Ok(Outcome::Failed(err)) => Some(err.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure, Error::AuthenticationFailed);
    assert_eq!(
        responder_rx.try_recv().unwrap(),
        Phase1Status::Failed(Error::AuthenticationFailed)
    );
    assert_eq!(responder.engine.process_events(), 1);
    assert_eq!(responder.engine.sa_state(&icookie), None);

    // the Initiator never hears back and gives up on its own timer
    assert!(initiator_rx.try_recv().is_err());
    clock.advance(initiator.engine.config().phase1_timeout);
    initiator.engine.poll_timers();
    assert_eq!(initiator_rx.try_recv().unwrap(), Phase1Status::Failed(Error::Timeout));
}

//
// Test Cases - Retransmission
//

#[test]
fn test_lost_reply_recovered_by_resend() {
    let clock = TestClock::new();
    let mut initiator = Peer::new(INITIATOR, psk_policy(RESPONDER, b"k", DhGroup::Modp1024), &clock);
    let mut responder = Peer::new(RESPONDER, psk_policy(INITIATOR, b"k", DhGroup::Modp1024), &clock);

    let (icookie, m1) = initiator.engine.start_initiator("psk", responder.addr, None).unwrap();
    initiator.take_sent();
    responder.receive(initiator.addr, m1).unwrap();
    let m2 = responder.take_sent().remove(0);
    // m2 is lost

    clock.advance(initiator.engine.config().resend_interval);
    assert_eq!(initiator.engine.poll_timers(), 1);
    let resent = initiator.take_sent();
    assert_eq!(resent.len(), 1);

    // the Responder recognizes the duplicate and answers with the same bytes
    let outcome = responder.receive(initiator.addr, resent[0].clone()).unwrap();
    assert_eq!(outcome, Outcome::Retransmitted(m2.clone()));
    assert_eq!(responder.take_sent(), vec![m2]);

    // queue it again so the exchange can finish
    let m2_again = match outcome {
        Outcome::Retransmitted(data) => data,
        _ => unreachable!(),
    };
    assert!(matches!(initiator.receive(responder.addr, m2_again), Ok(Outcome::Continue(_))));
    run_exchange(&mut initiator, &mut responder);

    assert_eq!(initiator.engine.sa_state(&icookie), Some(SaState::Established));
    assert_eq!(responder.engine.sa_state(&icookie), Some(SaState::Established));
}
