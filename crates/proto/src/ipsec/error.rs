//! Error types for IKE Phase 1 operations
//!
//! This module defines a unified error type for the ISAKMP codec, proposal
//! negotiation, key derivation, authentication and the Main Mode state
//! machine.

use super::ikev1::constants::NotifyType;
use std::fmt;

/// Result type for IKE operations
pub type Result<T> = std::result::Result<T, Error>;

/// IKE Phase 1 errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed message or payload (bad ordering, bad lengths, bad fields)
    Malformed(String),

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Length field does not match the data
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Message too large
    MessageTooLarge(u32),

    /// Unsupported ISAKMP major version
    UnsupportedVersion(u8),

    /// Exchange type not handled by this engine
    UnsupportedExchangeType(u8),

    /// Header flags not valid for the current state
    InvalidFlags(u8),

    /// Cookie missing, unexpected or changed
    InvalidCookie,

    /// Phase 1 message with a non-zero message id
    InvalidMessageId(u32),

    /// A required payload is absent
    MissingPayload(&'static str),

    /// A payload appeared where it is not allowed
    UnexpectedPayload(u8),

    /// Phase 1 SA payload with a proposal count other than one
    TooManyProposals(usize),

    /// Too many transforms offered, or more than one selected
    TooManyTransforms(usize),

    /// Proposal protocol is not ISAKMP
    InvalidProtocol(u8),

    /// Transform numbering or transform id is wrong
    InvalidTransform(String),

    /// Attribute type unknown or duplicated
    UnsupportedAttribute(u16),

    /// A mandatory attribute is absent
    MissingAttribute(&'static str),

    /// No acceptable proposal found
    NegotiationFailed,

    /// Responder selection does not match anything that was offered
    ProposalTampered,

    /// Algorithm, group or key length not supported
    UnsupportedAlgorithm(String),

    /// Authentication method not supported
    UnsupportedAuthMethod(u16),

    /// Identification type not supported
    UnsupportedIdType(u8),

    /// Local domain-name identity is empty or too long
    InvalidDomain,

    /// No pre-shared key configured for the peer
    PresharedKeyNotFound,

    /// Lookup failed (SA, policy, certificate, ...)
    NotFound(String),

    /// Peer authentication failed
    ///
    /// Deliberately opaque: identity mismatch, digest mismatch, signature
    /// and certificate failures all collapse into this variant.
    AuthenticationFailed,

    /// Cryptographic operation failed
    CryptoError(String),

    /// Certificate could not be read or parsed
    Certificate(String),

    /// Allocation or table limit reached
    ResourceExhausted(String),

    /// Message arrived when the exchange does not expect one
    UnexpectedMessage(String),

    /// Invalid state
    InvalidState(String),

    /// Invalid parameter
    InvalidParameter(String),

    /// Exchange did not complete in time
    Timeout,

    /// Transport refused a datagram
    Transport(String),

    /// I/O error
    Io(String),

    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the error means the peers could not agree on parameters
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            Error::NegotiationFailed
                | Error::ProposalTampered
                | Error::UnsupportedAlgorithm(_)
                | Error::UnsupportedAuthMethod(_)
                | Error::UnsupportedAttribute(_)
        )
    }

    /// ISAKMP notify message type that best describes this error
    pub fn notify_type(&self) -> Option<NotifyType> {
        let notify = match self {
            Error::Malformed(_)
            | Error::BufferTooShort { .. }
            | Error::MissingPayload(_) => NotifyType::PayloadMalformed,
            Error::InvalidLength { .. } => NotifyType::UnequalPayloadLengths,
            Error::UnsupportedVersion(_) => NotifyType::InvalidMajorVersion,
            Error::UnsupportedExchangeType(_) => NotifyType::InvalidExchangeType,
            Error::InvalidFlags(_) => NotifyType::InvalidFlags,
            Error::InvalidCookie => NotifyType::InvalidCookie,
            Error::InvalidMessageId(_) => NotifyType::InvalidMessageId,
            Error::UnexpectedPayload(_) => NotifyType::InvalidPayloadType,
            Error::TooManyProposals(_) | Error::TooManyTransforms(_) => {
                NotifyType::BadProposalSyntax
            }
            Error::InvalidProtocol(_) => NotifyType::InvalidProtocolId,
            Error::InvalidTransform(_) => NotifyType::InvalidTransformId,
            Error::UnsupportedAttribute(_) | Error::MissingAttribute(_) => {
                NotifyType::AttributesNotSupported
            }
            Error::NegotiationFailed
            | Error::ProposalTampered
            | Error::UnsupportedAlgorithm(_)
            | Error::UnsupportedAuthMethod(_) => NotifyType::NoProposalChosen,
            Error::UnsupportedIdType(_) | Error::InvalidDomain => {
                NotifyType::InvalidIdInformation
            }
            Error::AuthenticationFailed | Error::PresharedKeyNotFound => {
                NotifyType::AuthenticationFailed
            }
            Error::Certificate(_) => NotifyType::InvalidCertificate,
            _ => return None,
        };
        Some(notify)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            Error::BufferTooShort {
                required,
                available,
            } => write!(
                f,
                "Buffer too short: required {} bytes, available {}",
                required, available
            ),
            Error::InvalidLength { expected, actual } => write!(
                f,
                "Invalid length: expected {}, got {}",
                expected, actual
            ),
            Error::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Error::UnsupportedVersion(v) => write!(f, "Unsupported ISAKMP version: 0x{:02x}", v),
            Error::UnsupportedExchangeType(t) => write!(f, "Unsupported exchange type: {}", t),
            Error::InvalidFlags(flags) => write!(f, "Invalid header flags: 0x{:02x}", flags),
            Error::InvalidCookie => write!(f, "Invalid cookie"),
            Error::InvalidMessageId(id) => write!(f, "Invalid message id: {}", id),
            Error::MissingPayload(name) => write!(f, "Missing required payload: {}", name),
            Error::UnexpectedPayload(t) => write!(f, "Unexpected payload type: {}", t),
            Error::TooManyProposals(n) => write!(f, "Expected one proposal, found {}", n),
            Error::TooManyTransforms(n) => write!(f, "Too many transforms: {}", n),
            Error::InvalidProtocol(p) => write!(f, "Invalid protocol id: {}", p),
            Error::InvalidTransform(msg) => write!(f, "Invalid transform: {}", msg),
            Error::UnsupportedAttribute(t) => write!(f, "Unsupported attribute type: {}", t),
            Error::MissingAttribute(name) => write!(f, "Missing attribute: {}", name),
            Error::NegotiationFailed => write!(f, "No proposal chosen"),
            Error::ProposalTampered => write!(f, "Selected proposal was never offered"),
            Error::UnsupportedAlgorithm(msg) => write!(f, "Unsupported algorithm: {}", msg),
            Error::UnsupportedAuthMethod(m) => {
                write!(f, "Unsupported authentication method: {}", m)
            }
            Error::UnsupportedIdType(t) => write!(f, "Unsupported identification type: {}", t),
            Error::InvalidDomain => write!(f, "Invalid domain name identity"),
            Error::PresharedKeyNotFound => write!(f, "Pre-shared key not found"),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::AuthenticationFailed => write!(f, "Authentication failed"),
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::Certificate(msg) => write!(f, "Certificate error: {}", msg),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::Timeout => write!(f, "Exchange timed out"),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<oakley_platform::OakleyError> for Error {
    fn from(err: oakley_platform::OakleyError) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<Error> for oakley_platform::OakleyError {
    fn from(err: Error) -> Self {
        use oakley_platform::OakleyError;
        match err {
            Error::Io(msg) => OakleyError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg)),
            Error::InvalidParameter(msg) => OakleyError::Config(msg),
            Error::Transport(msg) => OakleyError::Transport(msg),
            Error::AuthenticationFailed | Error::Certificate(_) | Error::PresharedKeyNotFound => {
                OakleyError::Security(err.to_string())
            }
            other => OakleyError::Protocol(other.to_string()),
        }
    }
}
