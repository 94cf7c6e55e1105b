//! Per-exchange working state
//!
//! A [`Phase1Handle`] lives from the first message of an exchange until the
//! SA is removed. The bulky, secret material needed only while negotiating
//! sits in an [`ExchangeScratch`] that is dropped as a whole when the
//! exchange completes or fails.

use super::auth::AuthParams;
use super::sa::IkeSa;
use super::state::{MainModeState, Role};
use crate::ipsec::cert::Certificate;
use crate::ipsec::crypto::DhKeyPair;
use crate::ipsec::{Error, Result};
use sha2::{Digest, Sha256};
use std::time::Instant;

/// Digest identifying a received datagram
pub type MessageDigest = [u8; 32];

/// SHA-256 of a raw datagram
pub fn message_digest(data: &[u8]) -> MessageDigest {
    Sha256::digest(data).into()
}

/// Material needed only while the exchange runs
#[derive(Debug, Default)]
pub struct ExchangeScratch {
    /// Our Diffie-Hellman key pair
    pub dh: Option<DhKeyPair>,
    /// Peer's public value
    pub peer_public: Option<Vec<u8>>,
    /// Our nonce
    pub nonce: Option<Vec<u8>>,
    /// Peer's nonce
    pub peer_nonce: Option<Vec<u8>>,
    /// Initiator's SA payload body (`SAi_b`)
    pub sa_body: Option<Vec<u8>>,
    /// Peer's ID payload body
    pub peer_id_body: Option<Vec<u8>>,
    /// Secrets for the negotiated method
    pub auth: Option<AuthParams>,
    /// Peer asked for our certificate
    pub certreq_received: bool,
    /// Certificate the peer authenticated with
    pub peer_certificate: Option<Certificate>,
}

impl ExchangeScratch {
    /// Our key pair
    pub fn dh(&self) -> Result<&DhKeyPair> {
        self.dh.as_ref().ok_or_else(|| missing("DH key pair"))
    }

    /// Peer's public value
    pub fn peer_public(&self) -> Result<&[u8]> {
        self.peer_public.as_deref().ok_or_else(|| missing("peer public value"))
    }

    /// Our nonce
    pub fn nonce(&self) -> Result<&[u8]> {
        self.nonce.as_deref().ok_or_else(|| missing("nonce"))
    }

    /// Peer's nonce
    pub fn peer_nonce(&self) -> Result<&[u8]> {
        self.peer_nonce.as_deref().ok_or_else(|| missing("peer nonce"))
    }

    /// `SAi_b`
    pub fn sa_body(&self) -> Result<&[u8]> {
        self.sa_body.as_deref().ok_or_else(|| missing("SA payload body"))
    }

    /// Authentication secrets
    pub fn auth(&self) -> Result<&AuthParams> {
        self.auth.as_ref().ok_or_else(|| missing("authentication parameters"))
    }
}

fn missing(what: &str) -> Error {
    Error::Internal(format!("{} not available in this state", what))
}

/// Working state of one Main Mode exchange
#[derive(Debug)]
pub struct Phase1Handle {
    /// The SA being negotiated
    pub sa: IkeSa,
    /// Handler for the next message
    pub state: MainModeState,
    /// Whether the SA is in its policy's database
    pub registered: bool,
    /// Aborted, waiting for queued removal
    pub deleted: bool,
    /// Timer resends of the last outbound message
    pub resends: u8,
    /// When the exchange started
    pub started_at: Instant,
    scratch: Option<Box<ExchangeScratch>>,
    last_digest: Option<MessageDigest>,
    last_outbound: Option<Vec<u8>>,
}

impl Phase1Handle {
    /// Handle for a new exchange, in the first state of its role
    pub fn new(sa: IkeSa, started_at: Instant) -> Self {
        let state = MainModeState::initial(sa.role);
        Phase1Handle {
            sa,
            state,
            registered: false,
            deleted: false,
            resends: 0,
            started_at,
            scratch: Some(Box::default()),
            last_digest: None,
            last_outbound: None,
        }
    }

    /// Our role
    pub fn role(&self) -> Role {
        self.sa.role
    }

    /// Exchange scratch
    ///
    /// # Errors
    ///
    /// `InvalidState` once the scratch has been released.
    pub fn scratch(&self) -> Result<&ExchangeScratch> {
        self.scratch
            .as_deref()
            .ok_or_else(|| Error::InvalidState("exchange scratch released".into()))
    }

    /// Exchange scratch, mutably
    pub fn scratch_mut(&mut self) -> Result<&mut ExchangeScratch> {
        self.scratch
            .as_deref_mut()
            .ok_or_else(|| Error::InvalidState("exchange scratch released".into()))
    }

    /// SA and scratch borrowed together
    pub fn split_mut(&mut self) -> Result<(&mut IkeSa, &mut ExchangeScratch)> {
        let scratch = self
            .scratch
            .as_deref_mut()
            .ok_or_else(|| Error::InvalidState("exchange scratch released".into()))?;
        Ok((&mut self.sa, scratch))
    }

    /// Drop the exchange scratch
    ///
    /// The last outbound datagram and inbound digest are kept so a
    /// retransmitted final message can still be answered.
    pub fn release_scratch(&mut self) {
        self.scratch = None;
    }

    /// Whether the scratch is still held
    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Whether `digest` is the message answered last
    pub fn is_retransmission(&self, digest: &MessageDigest) -> bool {
        self.last_digest.as_ref() == Some(digest)
    }

    /// Remember the message that was answered and the answer
    pub fn record_exchange(&mut self, inbound: Option<MessageDigest>, outbound: Vec<u8>) {
        if inbound.is_some() {
            self.last_digest = inbound;
        }
        self.last_outbound = Some(outbound);
        self.resends = 0;
    }

    /// The last datagram sent
    pub fn last_outbound(&self) -> Option<&[u8]> {
        self.last_outbound.as_deref()
    }
}
