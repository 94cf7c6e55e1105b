//! ISAKMP / IKEv1 Phase 1 protocol engine for the Oakley ecosystem.
//!
//! This crate provides a Rust implementation of the IKEv1 Main Mode
//! (Identity Protection) exchange that establishes the Phase 1 ISAKMP SA:
//!
//! - **ISAKMP** message and payload codec - RFC 2408
//! - **Main Mode** state machine with pre-shared key and RSA signature
//!   authentication - RFC 2409
//! - **SA database** with Phase 2 waiters, resend and lifetime timers
//!
//! # Features
//!
//! - `ipsec` (default) - the Phase 1 engine
//! - `serde` - serialization of configuration types
//!
//! # Example
//!
//! ```rust
//! use oakley_proto::ipsec::ikev1::message::IsakmpHeader;
//! use oakley_proto::ipsec::ikev1::constants::HeaderFlags;
//!
//! // Build and parse a Main Mode header
//! let header = IsakmpHeader::main_mode([1; 8], [0; 8], HeaderFlags::new(0));
//! let wire = header.to_bytes();
//!
//! let parsed = IsakmpHeader::from_bytes(&wire).unwrap();
//! assert_eq!(parsed.initiator_cookie, [1; 8]);
//! ```
//!
//! # Security
//!
//! - All cryptographic primitives come from RustCrypto crates
//! - Constant-time comparison of authentication data
//! - Secure memory handling with `zeroize`
//! - Fuzz testing of the ISAKMP decoder
//!
//! # References
//!
//! - [RFC 2407](https://datatracker.ietf.org/doc/html/rfc2407) - IPsec Domain of Interpretation
//! - [RFC 2408](https://datatracker.ietf.org/doc/html/rfc2408) - ISAKMP
//! - [RFC 2409](https://datatracker.ietf.org/doc/html/rfc2409) - The Internet Key Exchange

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ipsec")]
pub mod ipsec;
