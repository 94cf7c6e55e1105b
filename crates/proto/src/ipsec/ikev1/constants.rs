//! ISAKMP / IKEv1 protocol constants from RFC 2407, RFC 2408 and RFC 2409

use std::time::Duration;

/// ISAKMP version 1.0 (major version = 1, minor version = 0)
pub const ISAKMP_VERSION: u8 = 0x10;

/// Maximum ISAKMP message size (64KB - 1)
pub const MAX_MESSAGE_SIZE: u32 = 65535;

/// ISAKMP header size (28 bytes)
pub const HEADER_SIZE: usize = 28;

/// Generic payload header size (4 bytes)
pub const PAYLOAD_HEADER_SIZE: usize = 4;

/// Cookie length
pub const COOKIE_LEN: usize = 8;

/// IKE UDP port
pub const IKE_PORT: u16 = 500;

/// UDP protocol number, allowed in Phase 1 ID payloads
pub const IP_PROTO_UDP: u8 = 17;

/// IPsec Domain of Interpretation (RFC 2407)
pub const DOI_IPSEC: u32 = 1;

/// Situation: identity only
pub const SIT_IDENTITY_ONLY: u32 = 1;

/// Protocol id: ISAKMP
pub const PROTO_ISAKMP: u8 = 1;

/// Transform id: KEY_IKE
pub const KEY_IKE: u8 = 1;

/// Life type: seconds
pub const LIFE_TYPE_SECONDS: u16 = 1;

/// Life type: kilobytes
pub const LIFE_TYPE_KILOBYTES: u16 = 2;

/// Group type: MODP
pub const GROUP_TYPE_MODP: u16 = 1;

/// Maximum transforms accepted in one proposal
pub const MAX_TRANSFORMS: usize = 5;

/// Length of locally generated nonces
pub const NONCE_LEN: usize = 20;

/// Minimum inbound nonce length
pub const MIN_NONCE_LEN: usize = 8;

/// Maximum inbound nonce length
pub const MAX_NONCE_LEN: usize = 256;

/// Maximum length of a domain-name identity
pub const MAX_ID_DATA_LEN: usize = 56;

/// Default Phase 1 SA lifetime when none was negotiated
pub const DEFAULT_SA_LIFETIME_SECS: u32 = 28800;

/// Interval between retransmissions of the last message
pub const RESEND_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum number of retransmissions of one message
pub const RESEND_COUNT: u8 = 5;

/// Time allowed for a Phase 1 exchange to complete
pub const PHASE1_TIMEOUT: Duration = Duration::from_secs(60);

/// Exchange Types (RFC 2408 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExchangeType {
    /// Base exchange (1)
    Base = 1,
    /// Identity Protection exchange, i.e. Main Mode (2)
    IdentityProtection = 2,
    /// Authentication Only exchange (3)
    AuthenticationOnly = 3,
    /// Aggressive exchange (4)
    Aggressive = 4,
    /// Informational exchange (5)
    Informational = 5,
}

impl ExchangeType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ExchangeType::Base),
            2 => Some(ExchangeType::IdentityProtection),
            3 => Some(ExchangeType::AuthenticationOnly),
            4 => Some(ExchangeType::Aggressive),
            5 => Some(ExchangeType::Informational),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// ISAKMP header flags (RFC 2408 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    /// Encryption bit
    pub const ENCRYPTION: u8 = 0x01;
    /// Commit bit
    pub const COMMIT: u8 = 0x02;
    /// Authentication Only bit
    pub const AUTH_ONLY: u8 = 0x04;

    /// Create new flags
    pub fn new(value: u8) -> Self {
        HeaderFlags(value)
    }

    /// Flags for an encrypted message
    pub fn encrypted() -> Self {
        HeaderFlags(Self::ENCRYPTION)
    }

    /// Check the encryption bit
    pub fn is_encrypted(self) -> bool {
        (self.0 & Self::ENCRYPTION) != 0
    }

    /// Check the commit bit
    pub fn is_commit(self) -> bool {
        (self.0 & Self::COMMIT) != 0
    }

    /// Check the authentication-only bit
    pub fn is_auth_only(self) -> bool {
        (self.0 & Self::AUTH_ONLY) != 0
    }

    /// Get raw value
    pub fn value(self) -> u8 {
        self.0
    }
}

/// Payload Types (RFC 2408 Section 3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    /// No next payload (0)
    None = 0,
    /// Security Association (1)
    SA = 1,
    /// Proposal (2)
    Proposal = 2,
    /// Transform (3)
    Transform = 3,
    /// Key Exchange (4)
    KE = 4,
    /// Identification (5)
    ID = 5,
    /// Certificate (6)
    CERT = 6,
    /// Certificate Request (7)
    CR = 7,
    /// Hash (8)
    HASH = 8,
    /// Signature (9)
    SIG = 9,
    /// Nonce (10)
    Nonce = 10,
    /// Notification (11)
    N = 11,
    /// Delete (12)
    D = 12,
    /// Vendor ID (13)
    VID = 13,
}

impl PayloadType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PayloadType::None),
            1 => Some(PayloadType::SA),
            2 => Some(PayloadType::Proposal),
            3 => Some(PayloadType::Transform),
            4 => Some(PayloadType::KE),
            5 => Some(PayloadType::ID),
            6 => Some(PayloadType::CERT),
            7 => Some(PayloadType::CR),
            8 => Some(PayloadType::HASH),
            9 => Some(PayloadType::SIG),
            10 => Some(PayloadType::Nonce),
            11 => Some(PayloadType::N),
            12 => Some(PayloadType::D),
            13 => Some(PayloadType::VID),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Phase 1 attribute types (RFC 2409 Appendix A)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AttributeType {
    /// Encryption algorithm (1)
    Encryption = 1,
    /// Hash algorithm (2)
    Hash = 2,
    /// Authentication method (3)
    AuthMethod = 3,
    /// Group description (4)
    GroupDescription = 4,
    /// Group type (5)
    GroupType = 5,
    /// Life type (11)
    LifeType = 11,
    /// Life duration (12)
    LifeDuration = 12,
    /// Key length in bits (14)
    KeyLength = 14,
}

impl AttributeType {
    /// Convert from u16 (AF bit already stripped)
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(AttributeType::Encryption),
            2 => Some(AttributeType::Hash),
            3 => Some(AttributeType::AuthMethod),
            4 => Some(AttributeType::GroupDescription),
            5 => Some(AttributeType::GroupType),
            11 => Some(AttributeType::LifeType),
            12 => Some(AttributeType::LifeDuration),
            14 => Some(AttributeType::KeyLength),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Encryption algorithms (RFC 2409 Appendix A, RFC 3602)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum EncryptionAlgorithm {
    /// DES-CBC (1)
    DesCbc = 1,
    /// IDEA-CBC (2)
    IdeaCbc = 2,
    /// Blowfish-CBC (3)
    BlowfishCbc = 3,
    /// RC5-R16-B64-CBC (4)
    Rc5Cbc = 4,
    /// 3DES-CBC (5)
    TripleDesCbc = 5,
    /// CAST-CBC (6)
    CastCbc = 6,
    /// AES-CBC (7)
    AesCbc = 7,
}

impl EncryptionAlgorithm {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(EncryptionAlgorithm::DesCbc),
            2 => Some(EncryptionAlgorithm::IdeaCbc),
            3 => Some(EncryptionAlgorithm::BlowfishCbc),
            4 => Some(EncryptionAlgorithm::Rc5Cbc),
            5 => Some(EncryptionAlgorithm::TripleDesCbc),
            6 => Some(EncryptionAlgorithm::CastCbc),
            7 => Some(EncryptionAlgorithm::AesCbc),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Hash algorithms (RFC 2409 Appendix A, RFC 4868)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum HashAlgorithm {
    /// MD5 (1)
    Md5 = 1,
    /// SHA-1 (2)
    Sha1 = 2,
    /// Tiger (3)
    Tiger = 3,
    /// SHA2-256 (4)
    Sha256 = 4,
    /// SHA2-384 (5)
    Sha384 = 5,
    /// SHA2-512 (6)
    Sha512 = 6,
}

impl HashAlgorithm {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(HashAlgorithm::Md5),
            2 => Some(HashAlgorithm::Sha1),
            3 => Some(HashAlgorithm::Tiger),
            4 => Some(HashAlgorithm::Sha256),
            5 => Some(HashAlgorithm::Sha384),
            6 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Authentication methods (RFC 2409 Appendix A)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum AuthMethod {
    /// Pre-shared key (1)
    PreSharedKey = 1,
    /// DSS signatures (2)
    DssSignatures = 2,
    /// RSA signatures (3)
    RsaSignatures = 3,
    /// Encryption with RSA (4)
    RsaEncryption = 4,
    /// Revised encryption with RSA (5)
    RevisedRsaEncryption = 5,
}

impl AuthMethod {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(AuthMethod::PreSharedKey),
            2 => Some(AuthMethod::DssSignatures),
            3 => Some(AuthMethod::RsaSignatures),
            4 => Some(AuthMethod::RsaEncryption),
            5 => Some(AuthMethod::RevisedRsaEncryption),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Whether the method authenticates with signatures
    pub fn is_signature(self) -> bool {
        matches!(self, AuthMethod::DssSignatures | AuthMethod::RsaSignatures)
    }
}

/// Identification types (RFC 2407 Section 4.6.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdType {
    /// Single IPv4 address (1)
    Ipv4Addr = 1,
    /// Fully qualified domain name (2)
    Fqdn = 2,
    /// User fully qualified domain name (3)
    UserFqdn = 3,
    /// IPv4 subnet (4)
    Ipv4Subnet = 4,
    /// Single IPv6 address (5)
    Ipv6Addr = 5,
    /// IPv6 subnet (6)
    Ipv6Subnet = 6,
    /// IPv4 address range (7)
    Ipv4Range = 7,
    /// IPv6 address range (8)
    Ipv6Range = 8,
    /// DER encoded ASN.1 X.500 distinguished name (9)
    DerAsn1Dn = 9,
    /// DER encoded ASN.1 X.500 general name (10)
    DerAsn1Gn = 10,
    /// Key id (11)
    KeyId = 11,
}

impl IdType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(IdType::Ipv4Addr),
            2 => Some(IdType::Fqdn),
            3 => Some(IdType::UserFqdn),
            4 => Some(IdType::Ipv4Subnet),
            5 => Some(IdType::Ipv6Addr),
            6 => Some(IdType::Ipv6Subnet),
            7 => Some(IdType::Ipv4Range),
            8 => Some(IdType::Ipv6Range),
            9 => Some(IdType::DerAsn1Dn),
            10 => Some(IdType::DerAsn1Gn),
            11 => Some(IdType::KeyId),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Certificate encodings (RFC 2408 Section 3.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CertEncoding {
    /// PKCS #7 wrapped X.509 certificate (1)
    Pkcs7 = 1,
    /// PGP certificate (2)
    Pgp = 2,
    /// DNS signed key (3)
    DnsSigned = 3,
    /// X.509 certificate - signature (4)
    X509Signature = 4,
    /// X.509 certificate - key exchange (5)
    X509KeyExchange = 5,
    /// Kerberos tokens (6)
    Kerberos = 6,
    /// Certificate revocation list (7)
    Crl = 7,
    /// Authority revocation list (8)
    Arl = 8,
    /// SPKI certificate (9)
    Spki = 9,
    /// X.509 certificate - attribute (10)
    X509Attribute = 10,
}

impl CertEncoding {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CertEncoding::Pkcs7),
            2 => Some(CertEncoding::Pgp),
            3 => Some(CertEncoding::DnsSigned),
            4 => Some(CertEncoding::X509Signature),
            5 => Some(CertEncoding::X509KeyExchange),
            6 => Some(CertEncoding::Kerberos),
            7 => Some(CertEncoding::Crl),
            8 => Some(CertEncoding::Arl),
            9 => Some(CertEncoding::Spki),
            10 => Some(CertEncoding::X509Attribute),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Notify message types (RFC 2408 Section 3.14.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NotifyType {
    /// INVALID-PAYLOAD-TYPE
    InvalidPayloadType = 1,
    /// INVALID-COOKIE
    InvalidCookie = 4,
    /// INVALID-MAJOR-VERSION
    InvalidMajorVersion = 5,
    /// INVALID-EXCHANGE-TYPE
    InvalidExchangeType = 7,
    /// INVALID-FLAGS
    InvalidFlags = 8,
    /// INVALID-MESSAGE-ID
    InvalidMessageId = 9,
    /// INVALID-PROTOCOL-ID
    InvalidProtocolId = 10,
    /// INVALID-TRANSFORM-ID
    InvalidTransformId = 12,
    /// ATTRIBUTES-NOT-SUPPORTED
    AttributesNotSupported = 13,
    /// NO-PROPOSAL-CHOSEN
    NoProposalChosen = 14,
    /// BAD-PROPOSAL-SYNTAX
    BadProposalSyntax = 15,
    /// PAYLOAD-MALFORMED
    PayloadMalformed = 16,
    /// INVALID-ID-INFORMATION
    InvalidIdInformation = 18,
    /// INVALID-CERTIFICATE
    InvalidCertificate = 20,
    /// AUTHENTICATION-FAILED
    AuthenticationFailed = 24,
    /// UNEQUAL-PAYLOAD-LENGTHS
    UnequalPayloadLengths = 30,
}

impl NotifyType {
    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}
