//! Phase 1 policy and engine configuration
//!
//! Provides per-peer policies (built with a builder) and the engine-wide
//! timing configuration.

use super::crypto::{CipherAlgorithm, DhGroup, PrfAlgorithm};
use super::ikev1::constants::*;
use super::ikev1::identity::Identifier;
use super::{Error, Result};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

/// One acceptable attribute combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTransform {
    /// Encryption algorithm
    pub encryption: EncryptionAlgorithm,

    /// Hash algorithm (also selects the PRF)
    pub hash: HashAlgorithm,

    /// Authentication method
    pub auth_method: AuthMethod,

    /// Diffie-Hellman group
    pub group: DhGroup,

    /// Key length in bits; `None` accepts any and proposes none
    pub key_len: Option<u16>,

    /// Lifetime in seconds; `None` accepts any and proposes none
    pub lifetime: Option<u32>,
}

impl PolicyTransform {
    /// Create a transform without key length or lifetime constraints
    pub fn new(
        encryption: EncryptionAlgorithm,
        hash: HashAlgorithm,
        auth_method: AuthMethod,
        group: DhGroup,
    ) -> Self {
        PolicyTransform {
            encryption,
            hash,
            auth_method,
            group,
            key_len: None,
            lifetime: None,
        }
    }

    /// Require a key length (bits)
    pub fn with_key_len(mut self, bits: u16) -> Self {
        self.key_len = Some(bits);
        self
    }

    /// Limit the lifetime (seconds)
    pub fn with_lifetime(mut self, seconds: u32) -> Self {
        self.lifetime = Some(seconds);
        self
    }

    fn validate(&self) -> Result<()> {
        CipherAlgorithm::from_negotiated(self.encryption, self.key_len)?;
        PrfAlgorithm::from_hash(self.hash)?;
        match self.auth_method {
            AuthMethod::PreSharedKey | AuthMethod::RsaSignatures => Ok(()),
            other => Err(Error::UnsupportedAuthMethod(other.to_u16())),
        }
    }
}

/// Per-policy behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolicyFlags(u8);

impl PolicyFlags {
    /// Reject peers whose identity does not match the policy
    pub const VERIFY_ID: u8 = 0x01;
    /// Verify the peer certificate chain
    pub const VERIFY_CERT: u8 = 0x02;
    /// Check the peer certificate against the CRL
    pub const VERIFY_AGAINST_CRL: u8 = 0x04;
    /// Name the CA in certificate requests
    pub const CA_IN_CERTREQ: u8 = 0x08;
    /// Exchange certificates in CERT / CR payloads
    pub const INBAND_CERT_EXCHANGE: u8 = 0x10;
    /// Send the local certificate without waiting for a request
    pub const SEND_CERT_PROACTIVELY: u8 = 0x20;

    /// Create new flags
    pub fn new(value: u8) -> Self {
        PolicyFlags(value)
    }

    /// Whether all bits of `flag` are set
    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// Set bits
    pub fn with(self, flag: u8) -> Self {
        PolicyFlags(self.0 | flag)
    }

    /// Get raw value
    pub fn value(self) -> u8 {
        self.0
    }
}

/// File locations for signature authentication
///
/// Files may be PEM or DER encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignatureCredentials {
    /// Local certificate
    pub certificate: Option<PathBuf>,

    /// Local RSA private key
    pub private_key: Option<PathBuf>,

    /// Trusted CA certificate
    pub ca_certificate: Option<PathBuf>,

    /// Peer certificate, used when certificates are not exchanged in-band
    pub peer_certificate: Option<PathBuf>,

    /// Certificate revocation list issued by the CA
    pub crl: Option<PathBuf>,
}

/// Ordered list of identifier to pre-shared key bindings
#[derive(Clone, Default)]
pub struct PresharedKeyStore {
    entries: Vec<(Identifier, Zeroizing<Vec<u8>>)>,
}

impl fmt::Debug for PresharedKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, _)| id))
            .finish()
    }
}

impl PresharedKeyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a key to an identifier selector
    pub fn insert(&mut self, id: Identifier, key: impl Into<Vec<u8>>) {
        self.entries.push((id, Zeroizing::new(key.into())));
    }

    /// First key whose selector matches `id`
    pub fn lookup(&self, id: &Identifier) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(selector, _)| selector.matches(id))
            .map(|(_, key)| key.as_slice())
    }

    /// Number of configured keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Static configuration for one peer or group of peers
#[derive(Debug, Clone)]
pub struct Policy {
    /// Policy name
    pub name: String,

    /// Acceptable attribute combinations, in preference order
    pub transforms: Vec<PolicyTransform>,

    /// Local identity; `Any` sends the local address
    pub local_id: Identifier,

    /// Expected peer identity
    pub peer_id: Identifier,

    /// Peer addresses this policy applies to
    pub remote: Identifier,

    /// Behaviour switches
    pub flags: PolicyFlags,

    /// Certificate and key files
    pub credentials: SignatureCredentials,

    /// Pre-shared keys
    pub preshared_keys: PresharedKeyStore,
}

impl Policy {
    /// Create builder for a policy
    pub fn builder(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder::new(name)
    }

    /// Whether any transform uses `method`
    pub fn uses_auth_method(&self, method: AuthMethod) -> bool {
        self.transforms.iter().any(|t| t.auth_method == method)
    }

    /// Whether the policy applies to a peer address
    pub fn applies_to(&self, addr: IpAddr) -> bool {
        self.remote.contains_addr(addr)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidParameter("policy name cannot be empty".into()));
        }
        if self.transforms.is_empty() {
            return Err(Error::InvalidParameter(
                "At least one transform required".into(),
            ));
        }
        if self.transforms.len() > MAX_TRANSFORMS {
            return Err(Error::InvalidParameter(format!(
                "At most {} transforms allowed",
                MAX_TRANSFORMS
            )));
        }
        for transform in &self.transforms {
            transform.validate()?;
        }

        if self.uses_auth_method(AuthMethod::PreSharedKey) && self.preshared_keys.is_empty() {
            return Err(Error::InvalidParameter(
                "pre-shared key authentication needs at least one key".into(),
            ));
        }
        if self.uses_auth_method(AuthMethod::RsaSignatures)
            && (self.credentials.certificate.is_none() || self.credentials.private_key.is_none())
        {
            return Err(Error::InvalidParameter(
                "signature authentication needs a certificate and a private key".into(),
            ));
        }
        if self.flags.contains(PolicyFlags::VERIFY_CERT) && self.credentials.ca_certificate.is_none()
        {
            return Err(Error::InvalidParameter(
                "certificate verification needs a CA certificate".into(),
            ));
        }
        if self.flags.contains(PolicyFlags::VERIFY_AGAINST_CRL) && self.credentials.crl.is_none() {
            return Err(Error::InvalidParameter(
                "CRL checking needs a CRL file".into(),
            ));
        }
        if let Identifier::Fqdn(name) | Identifier::UserFqdn(name) = &self.local_id {
            if name.is_empty() || name.len() > MAX_ID_DATA_LEN {
                return Err(Error::InvalidDomain);
            }
        }
        Ok(())
    }
}

/// Builder for Policy
#[derive(Default)]
pub struct PolicyBuilder {
    name: String,
    transforms: Vec<PolicyTransform>,
    local_id: Option<Identifier>,
    peer_id: Option<Identifier>,
    remote: Option<Identifier>,
    flags: PolicyFlags,
    credentials: SignatureCredentials,
    preshared_keys: PresharedKeyStore,
}

impl PolicyBuilder {
    /// Create new policy builder
    pub fn new(name: impl Into<String>) -> Self {
        PolicyBuilder {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append an acceptable transform
    pub fn with_transform(mut self, transform: PolicyTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set local identity
    pub fn with_local_id(mut self, id: Identifier) -> Self {
        self.local_id = Some(id);
        self
    }

    /// Set expected peer identity
    pub fn with_peer_id(mut self, id: Identifier) -> Self {
        self.peer_id = Some(id);
        self
    }

    /// Restrict the policy to peer addresses
    pub fn with_remote(mut self, remote: Identifier) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set behaviour flags
    pub fn with_flags(mut self, flags: PolicyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set certificate and key files
    pub fn with_credentials(mut self, credentials: SignatureCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Add a pre-shared key
    pub fn with_preshared_key(mut self, id: Identifier, key: impl Into<Vec<u8>>) -> Self {
        self.preshared_keys.insert(id, key);
        self
    }

    /// Build Policy with validation
    pub fn build(self) -> Result<Policy> {
        let policy = Policy {
            name: self.name,
            transforms: self.transforms,
            local_id: self.local_id.unwrap_or(Identifier::Any),
            peer_id: self.peer_id.unwrap_or(Identifier::Any),
            remote: self.remote.unwrap_or(Identifier::Any),
            flags: self.flags,
            credentials: self.credentials,
            preshared_keys: self.preshared_keys,
        };

        policy.validate()?;
        Ok(policy)
    }
}

/// Engine-wide timing and sizing
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Interval between retransmissions of the last message
    pub resend_interval: Duration,

    /// Maximum retransmissions of one message
    pub resend_count: u8,

    /// Time allowed for an exchange to complete
    pub phase1_timeout: Duration,

    /// Length of generated nonces
    pub nonce_len: usize,

    /// Maximum number of exchanges in progress
    pub max_exchanges: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            resend_interval: RESEND_INTERVAL,
            resend_count: RESEND_COUNT,
            phase1_timeout: PHASE1_TIMEOUT,
            nonce_len: NONCE_LEN,
            max_exchanges: 1024,
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nonce_len < MIN_NONCE_LEN || self.nonce_len > MAX_NONCE_LEN {
            return Err(Error::InvalidParameter(format!(
                "nonce length must be within {}..={}",
                MIN_NONCE_LEN, MAX_NONCE_LEN
            )));
        }
        if self.resend_interval.is_zero() || self.phase1_timeout.is_zero() {
            return Err(Error::InvalidParameter("timer intervals cannot be zero".into()));
        }
        if self.max_exchanges == 0 {
            return Err(Error::InvalidParameter("max_exchanges cannot be zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn psk_transform() -> PolicyTransform {
        PolicyTransform::new(
            EncryptionAlgorithm::AesCbc,
            HashAlgorithm::Sha1,
            AuthMethod::PreSharedKey,
            DhGroup::Modp1024,
        )
    }

    #[test]
    fn test_policy_builder() {
        let policy = Policy::builder("branch-office")
            .with_transform(psk_transform().with_key_len(128).with_lifetime(3600))
            .with_preshared_key(Identifier::Any, b"secret".to_vec())
            .build()
            .expect("Failed to build policy");

        assert_eq!(policy.name, "branch-office");
        assert_eq!(policy.transforms.len(), 1);
        assert_eq!(policy.local_id, Identifier::Any);
        assert!(policy.uses_auth_method(AuthMethod::PreSharedKey));
        assert!(policy.applies_to(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9))));
    }

    #[test]
    fn test_policy_validation() {
        // No transforms
        let result = Policy::builder("p").build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        // PSK without a key
        let result = Policy::builder("p").with_transform(psk_transform()).build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        // DES is not available
        let mut des = psk_transform();
        des.encryption = EncryptionAlgorithm::DesCbc;
        let result = Policy::builder("p")
            .with_transform(des)
            .with_preshared_key(Identifier::Any, b"k".to_vec())
            .build();
        assert!(matches!(result, Err(Error::UnsupportedAlgorithm(_))));

        // RSA without credentials
        let mut rsa = psk_transform();
        rsa.auth_method = AuthMethod::RsaSignatures;
        let result = Policy::builder("p").with_transform(rsa).build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_local_domain_too_long() {
        let result = Policy::builder("p")
            .with_transform(psk_transform())
            .with_preshared_key(Identifier::Any, b"k".to_vec())
            .with_local_id(Identifier::Fqdn("a".repeat(57)))
            .build();
        assert_eq!(result.err(), Some(Error::InvalidDomain));
    }

    #[test]
    fn test_preshared_key_lookup_order() {
        let mut store = PresharedKeyStore::new();
        store.insert(Identifier::Ipv4(Ipv4Addr::new(10, 0, 0, 1)), b"host".to_vec());
        store.insert(Identifier::Any, b"fallback".to_vec());

        assert_eq!(
            store.lookup(&Identifier::Ipv4(Ipv4Addr::new(10, 0, 0, 1))),
            Some(&b"host"[..])
        );
        assert_eq!(
            store.lookup(&Identifier::Fqdn("other".into())),
            Some(&b"fallback"[..])
        );
        // Keys never show up in debug output
        assert!(!format!("{:?}", store).contains("fallback"));
    }

    #[test]
    fn test_policy_flags() {
        let flags = PolicyFlags::default()
            .with(PolicyFlags::VERIFY_ID)
            .with(PolicyFlags::INBAND_CERT_EXCHANGE);
        assert!(flags.contains(PolicyFlags::VERIFY_ID));
        assert!(!flags.contains(PolicyFlags::VERIFY_CERT));
        assert_eq!(flags.value(), 0x11);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.resend_interval, Duration::from_secs(2));
        assert_eq!(config.resend_count, 5);
        assert_eq!(config.phase1_timeout, Duration::from_secs(60));
        assert_eq!(config.nonce_len, 20);
        assert!(config.validate().is_ok());

        let bad = EngineConfig {
            nonce_len: 4,
            ..EngineConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
