//! IKEv1 (Internet Key Exchange v1) Phase 1 Main Mode
//!
//! This module implements the Identity Protection exchange of RFC 2409
//! over the ISAKMP framework of RFC 2408, with pre-shared key and RSA
//! signature authentication.
//!
//! # Protocol Overview
//!
//! Main Mode runs in three round trips:
//!
//! 1. **SA**: the Initiator proposes transforms, the Responder selects one
//! 2. **KE / Nonce**: Diffie-Hellman public values and nonces are exchanged,
//!    after which both sides derive SKEYID and its descendants
//! 3. **ID / HASH or SIG**: identities and proofs travel encrypted
//!
//! # Message Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Initiator Cookie                       |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Responder Cookie                       |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Message ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

pub mod auth;
pub mod cert_exchange;
pub mod constants;
pub mod handle;
pub mod identity;
pub mod keymat;
pub mod main_mode;
pub mod message;
pub mod payload;
pub mod proposal;
pub mod sa;
pub mod state;

pub use constants::{AuthMethod, EncryptionAlgorithm, ExchangeType, HashAlgorithm, PayloadType};
pub use handle::Phase1Handle;
pub use identity::Identifier;
pub use main_mode::{process_main_mode, Outcome, StateContext};
pub use message::{Cookie, IsakmpHeader, Message};
pub use sa::{CookiePair, IkeSa};
pub use state::{MainModeState, Role};
