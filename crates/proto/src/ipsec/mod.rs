//! IKEv1 Phase 1 (ISAKMP Main Mode)
//!
//! This module implements the Phase 1 exchange that establishes an ISAKMP
//! Security Association between two peers:
//!
//! - **ISAKMP** message codec - RFC 2408
//! - **IKEv1 Main Mode** (Identity Protection) - RFC 2409
//! - **IPsec DOI** situation and identification types - RFC 2407
//!
//! # Architecture
//!
//! ```text
//! UDP 500 (udp::Phase1Endpoint)
//!   └── Phase1Engine
//!        ├── Main Mode dispatcher (one handler per state)
//!        │     ├── Proposal selection
//!        │     ├── Diffie-Hellman + SKEYID derivation
//!        │     └── PSK / RSA signature authentication
//!        ├── Timers (resend, phase 1 timeout, SA lifetime)
//!        ├── SA removal queue
//!        └── SA database per policy (+ Phase 2 waiters)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use oakley_platform::{QueuedTransport, SystemClock};
//! use oakley_proto::ipsec::{EngineConfig, Phase1Endpoint, Phase1Engine, Policy, PolicyTransform};
//! use oakley_proto::ipsec::crypto::DhGroup;
//! use oakley_proto::ipsec::ikev1::{AuthMethod, EncryptionAlgorithm, HashAlgorithm, Identifier};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = Policy::builder("site-b")
//!         .with_transform(PolicyTransform::new(
//!             EncryptionAlgorithm::AesCbc,
//!             HashAlgorithm::Sha256,
//!             AuthMethod::PreSharedKey,
//!             DhGroup::Modp2048,
//!         ))
//!         .with_preshared_key(Identifier::Ipv4("198.51.100.2".parse()?), b"my-secret-key".to_vec())
//!         .build()?;
//!
//!     let mut engine = Phase1Engine::new(EngineConfig::default(), QueuedTransport::new(), SystemClock)?;
//!     engine.add_policy(policy)?;
//!
//!     let mut endpoint = Phase1Endpoint::bind(engine, "198.51.100.1:500".parse()?).await?;
//!     let icookie = endpoint.connect("site-b", "198.51.100.2:500".parse()?, None).await?;
//!
//!     while endpoint.engine().established_sa(&icookie).is_none() {
//!         endpoint.step().await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # References
//!
//! - [RFC 2407](https://datatracker.ietf.org/doc/html/rfc2407) - IPsec DOI for ISAKMP
//! - [RFC 2408](https://datatracker.ietf.org/doc/html/rfc2408) - ISAKMP
//! - [RFC 2409](https://datatracker.ietf.org/doc/html/rfc2409) - The Internet Key Exchange
//!
//! # Security
//!
//! - No unsafe code
//! - Constant-time comparison of authentication hashes
//! - Secret material zeroized on drop and never logged

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cert;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod ikev1;
pub mod logging;
pub mod sadb;
pub mod timer;
pub mod udp;

// Re-export commonly used types
pub use config::{EngineConfig, Policy, PolicyBuilder, PolicyFlags, PolicyTransform};
pub use engine::{InboundPacket, Phase1Engine};
pub use error::{Error, Result};
pub use ikev1::Outcome;
pub use sadb::{EstablishedSa, Phase1Status, Phase2Waiter, SaDatabase, SaState};
pub use udp::Phase1Endpoint;
