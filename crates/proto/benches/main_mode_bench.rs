//! Main Mode Performance Benchmarks
//!
//! Benchmarks for proposal selection, key derivation, message decoding and
//! a complete Main Mode exchange.
//!
//! Run with: `cargo bench --bench main_mode_bench`

#![cfg(feature = "ipsec")]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use oakley_platform::{QueuedTransport, SystemClock};
use oakley_proto::ipsec::{
    crypto::DhGroup,
    ikev1::{
        constants::HashAlgorithm,
        keymat::{KeyExchangeInputs, Phase1Keys, SkeyidSecret},
        message::Message,
        proposal::{construct_proposal, select_proposal, SaAttributes},
        AuthMethod, EncryptionAlgorithm, Identifier,
    },
    EngineConfig, InboundPacket, Outcome, Phase1Engine, Policy, PolicyTransform,
};
use std::net::SocketAddr;
use std::time::Duration;

const INITIATOR: &str = "192.0.2.1:500";
const RESPONDER: &str = "192.0.2.2:500";

/// Create a PSK policy offering several transforms
fn create_test_policy(peer: &str) -> Policy {
    let peer: SocketAddr = peer.parse().unwrap();
    let mut builder = Policy::builder("bench");
    for (hash, group) in [
        (HashAlgorithm::Sha256, DhGroup::Modp2048),
        (HashAlgorithm::Sha1, DhGroup::Modp1536),
        (HashAlgorithm::Sha1, DhGroup::Modp1024),
    ] {
        builder = builder.with_transform(PolicyTransform::new(
            EncryptionAlgorithm::AesCbc,
            hash,
            AuthMethod::PreSharedKey,
            group,
        ));
    }
    builder
        .with_preshared_key(Identifier::from(peer.ip()), b"bench-psk-secret".to_vec())
        .build()
        .unwrap()
}

/// Benchmark proposal construction and selection
fn bench_proposal(c: &mut Criterion) {
    let mut group = c.benchmark_group("proposal");
    let policy = create_test_policy(RESPONDER);
    let offer = construct_proposal(&policy).unwrap();

    group.bench_function("construct", |b| {
        b.iter(|| black_box(construct_proposal(&policy).unwrap()));
    });

    group.bench_function("select", |b| {
        b.iter(|| black_box(select_proposal(&offer, &policy).unwrap()));
    });

    group.finish();
}

/// Benchmark SKEYID derivation
fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");

    for hash in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
        let attributes = SaAttributes {
            encryption: EncryptionAlgorithm::AesCbc,
            hash,
            auth_method: AuthMethod::PreSharedKey,
            group: DhGroup::Modp2048,
            key_len: Some(256),
            lifetime: None,
        };
        let inputs = KeyExchangeInputs {
            secret: SkeyidSecret::PresharedKey(b"bench-psk-secret"),
            nonce_i: &[0x11; 32],
            nonce_r: &[0x22; 32],
            shared: &[0xDD; 256],
            icookie: &[0x01; 8],
            rcookie: &[0x02; 8],
            public_i: &[0xAA; 256],
            public_r: &[0xBB; 256],
        };

        group.bench_function(format!("derive_{:?}", hash), |b| {
            b.iter(|| black_box(Phase1Keys::derive(&attributes, &inputs).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark ISAKMP message decoding
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let mut engine =
        Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), SystemClock).unwrap();
    engine.add_policy(create_test_policy(RESPONDER)).unwrap();
    let (_, first) = engine
        .start_initiator("bench", RESPONDER.parse().unwrap(), None)
        .unwrap();

    group.throughput(Throughput::Bytes(first.len() as u64));
    group.bench_function("sa_message", |b| {
        b.iter(|| black_box(Message::from_bytes(&first).unwrap()));
    });

    group.finish();
}

/// Benchmark a complete PSK exchange between two engines
fn bench_full_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_exchange");
    group.sample_size(20); // DH dominates
    group.measurement_time(Duration::from_secs(15));

    let initiator_addr: SocketAddr = INITIATOR.parse().unwrap();
    let responder_addr: SocketAddr = RESPONDER.parse().unwrap();

    group.bench_function("main_mode_psk", |b| {
        b.iter(|| {
            let mut initiator =
                Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), SystemClock)
                    .unwrap();
            initiator.add_policy(create_test_policy(RESPONDER)).unwrap();
            let mut responder =
                Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), SystemClock)
                    .unwrap();
            responder.add_policy(create_test_policy(INITIATOR)).unwrap();

            initiator
                .start_initiator("bench", responder_addr, None)
                .unwrap();

            let mut completed = 0;
            while completed < 2 {
                for datagram in initiator.transport_mut().drain() {
                    let packet = InboundPacket {
                        data: datagram.data,
                        remote: initiator_addr,
                        local: responder_addr,
                    };
                    if responder.process_inbound(packet).unwrap() == Outcome::Complete {
                        completed += 1;
                    }
                }
                for datagram in responder.transport_mut().drain() {
                    let packet = InboundPacket {
                        data: datagram.data,
                        remote: responder_addr,
                        local: initiator_addr,
                    };
                    if initiator.process_inbound(packet).unwrap() == Outcome::Complete {
                        completed += 1;
                    }
                }
            }
            black_box(completed)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_proposal,
    bench_key_derivation,
    bench_decode,
    bench_full_exchange,
);

criterion_main!(benches);
