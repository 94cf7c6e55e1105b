//! IKE Security Association

use super::identity::Identifier;
use super::keymat::Phase1Keys;
use super::message::{Cookie, ZERO_COOKIE};
use super::proposal::SaAttributes;
use super::state::Role;
use crate::ipsec::{Error, Result};
use rand::RngCore;
use std::net::SocketAddr;

/// Generate a random non-zero cookie
pub fn generate_cookie() -> Cookie {
    let mut cookie = ZERO_COOKIE;
    while cookie == ZERO_COOKIE {
        rand::thread_rng().fill_bytes(&mut cookie);
    }
    cookie
}

/// Initiator and Responder cookies
///
/// The Initiator cookie is fixed at creation. The Responder cookie is
/// written once and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CookiePair {
    icookie: Cookie,
    rcookie: Option<Cookie>,
}

impl CookiePair {
    /// Cookie pair with only the Initiator cookie known
    pub fn new(icookie: Cookie) -> Self {
        CookiePair {
            icookie,
            rcookie: None,
        }
    }

    /// Initiator cookie
    pub fn icookie(&self) -> Cookie {
        self.icookie
    }

    /// Responder cookie, zero until written
    pub fn rcookie(&self) -> Cookie {
        self.rcookie.unwrap_or(ZERO_COOKIE)
    }

    /// Whether the Responder cookie has been written
    pub fn has_rcookie(&self) -> bool {
        self.rcookie.is_some()
    }

    /// Write the Responder cookie
    ///
    /// Writing the same value again is accepted; a zero cookie or a
    /// different value is `InvalidCookie`.
    pub fn set_rcookie(&mut self, rcookie: Cookie) -> Result<()> {
        if rcookie == ZERO_COOKIE {
            return Err(Error::InvalidCookie);
        }
        match self.rcookie {
            Some(existing) if existing != rcookie => Err(Error::InvalidCookie),
            _ => {
                self.rcookie = Some(rcookie);
                Ok(())
            }
        }
    }
}

/// The SA under negotiation
#[derive(Debug)]
pub struct IkeSa {
    /// Cookie pair
    pub cookies: CookiePair,

    /// Our role
    pub role: Role,

    /// Policy this SA belongs to
    pub policy: String,

    /// Peer address
    pub remote: SocketAddr,

    /// Local address the exchange arrived on, when known
    pub local: Option<SocketAddr>,

    /// Negotiated attributes (after state 2 / 3)
    pub attributes: Option<SaAttributes>,

    /// Derived keys (after state 4 / 5)
    pub keys: Option<Phase1Keys>,

    /// Authenticated peer identity (after state 6 / 7)
    pub peer_id: Option<Identifier>,
}

impl IkeSa {
    /// Create a new SA
    pub fn new(cookies: CookiePair, role: Role, policy: impl Into<String>, remote: SocketAddr) -> Self {
        IkeSa {
            cookies,
            role,
            policy: policy.into(),
            remote,
            local: None,
            attributes: None,
            keys: None,
            peer_id: None,
        }
    }

    /// Negotiated attributes
    pub fn attributes(&self) -> Result<&SaAttributes> {
        self.attributes
            .as_ref()
            .ok_or_else(|| Error::Internal("SA attributes not negotiated".into()))
    }

    /// Derived keys
    pub fn keys(&self) -> Result<&Phase1Keys> {
        self.keys
            .as_ref()
            .ok_or_else(|| Error::Internal("Phase 1 keys not derived".into()))
    }

    /// Derived keys, mutably
    pub fn keys_mut(&mut self) -> Result<&mut Phase1Keys> {
        self.keys
            .as_mut()
            .ok_or_else(|| Error::Internal("Phase 1 keys not derived".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_cookie() {
        let a = generate_cookie();
        let b = generate_cookie();
        assert_ne!(a, ZERO_COOKIE);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rcookie_written_once() {
        let mut pair = CookiePair::new([1; 8]);
        assert!(!pair.has_rcookie());
        assert_eq!(pair.rcookie(), ZERO_COOKIE);

        pair.set_rcookie([2; 8]).unwrap();
        assert_eq!(pair.rcookie(), [2; 8]);

        // same value again is fine
        pair.set_rcookie([2; 8]).unwrap();

        assert_eq!(pair.set_rcookie([3; 8]), Err(Error::InvalidCookie));
        assert_eq!(pair.rcookie(), [2; 8]);
    }

    #[test]
    fn test_zero_rcookie_rejected() {
        let mut pair = CookiePair::new([1; 8]);
        assert_eq!(pair.set_rcookie(ZERO_COOKIE), Err(Error::InvalidCookie));
        assert!(!pair.has_rcookie());
    }

    #[test]
    fn test_missing_material() {
        let sa = IkeSa::new(
            CookiePair::new([1; 8]),
            Role::Initiator,
            "p",
            "192.0.2.1:500".parse().unwrap(),
        );
        assert!(sa.attributes().is_err());
        assert!(sa.keys().is_err());
    }
}
