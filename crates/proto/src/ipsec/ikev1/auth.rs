//! Identification and authentication
//!
//! Builds the local ID payload, computes HASH_I / HASH_R (signing them for
//! RSA authentication) and verifies what the peer sent.
//!
//! ```text
//! HASH = prf(SKEYID, g^x(self) | g^x(peer) | CKY-I | CKY-R | SAi_b | IDx_b)
//! ```
//!
//! The public values are ordered sender-first; the cookies are always
//! Initiator-first. `SAi_b` and `IDx_b` are payload bodies exactly as they
//! crossed the wire.

use super::cert_exchange;
use super::constants::{AuthMethod, IKE_PORT, IP_PROTO_UDP, MAX_ID_DATA_LEN, PayloadType};
use super::identity::Identifier;
use super::keymat::Phase1Keys;
use super::payload::IdPayload;
use super::sa::CookiePair;
use crate::ipsec::cert::{self, Certificate};
use crate::ipsec::config::{Policy, PolicyFlags, SignatureCredentials};
use crate::ipsec::crypto::sign;
use crate::ipsec::logging;
use crate::ipsec::{Error, Result};
use std::fmt;
use std::net::IpAddr;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

/// Secret material for the negotiated authentication method
#[derive(Clone)]
pub enum AuthParams {
    /// Pre-shared key for this peer
    PresharedKey(Zeroizing<Vec<u8>>),
    /// Certificate and key files
    Signature(SignatureCredentials),
}

impl fmt::Debug for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthParams::PresharedKey(_) => f.write_str("PresharedKey(<redacted>)"),
            AuthParams::Signature(creds) => f.debug_tuple("Signature").field(creds).finish(),
        }
    }
}

impl AuthParams {
    /// Authentication method these parameters serve
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthParams::PresharedKey(_) => AuthMethod::PreSharedKey,
            AuthParams::Signature(_) => AuthMethod::RsaSignatures,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            AuthParams::PresharedKey(_) => "PSK",
            AuthParams::Signature(_) => "RSA",
        }
    }
}

/// Find the pre-shared key for a peer
///
/// The peer is identified by its ID payload when one is available,
/// otherwise by its address.
///
/// # Errors
///
/// - `PresharedKeyNotFound` when no configured selector matches
/// - `UnsupportedIdType` / `InvalidLength` / `Malformed` for an unusable ID
pub fn lookup_preshared_key(
    policy: &Policy,
    id: Option<&IdPayload>,
    remote: IpAddr,
) -> Result<Zeroizing<Vec<u8>>> {
    let identifier = match id {
        Some(id) => Identifier::from_id_payload(id)?,
        None => Identifier::from(remote),
    };

    policy
        .preshared_keys
        .lookup(&identifier)
        .map(|key| Zeroizing::new(key.to_vec()))
        .ok_or(Error::PresharedKeyNotFound)
}

/// Resolve the secrets for the negotiated method
pub fn auth_parameters(
    policy: &Policy,
    method: AuthMethod,
    id: Option<&IdPayload>,
    remote: IpAddr,
) -> Result<AuthParams> {
    match method {
        AuthMethod::PreSharedKey => Ok(AuthParams::PresharedKey(lookup_preshared_key(
            policy, id, remote,
        )?)),
        AuthMethod::RsaSignatures => Ok(AuthParams::Signature(policy.credentials.clone())),
        other => Err(Error::UnsupportedAuthMethod(other.to_u16())),
    }
}

/// Build the local ID payload
///
/// Pre-shared key authentication in Main Mode identifies by address, so a
/// non-address local identity is replaced with `local`. A DN identity is
/// taken from the subject of the local certificate.
pub fn generate_id_data(
    policy: &Policy,
    auth: &AuthParams,
    local: IpAddr,
) -> Result<IdPayload> {
    let identifier = match (&policy.local_id, auth) {
        (id, AuthParams::PresharedKey(_)) if id.single_ip().is_none() => Identifier::from(local),
        (Identifier::Any, AuthParams::Signature(_)) => Identifier::from(local),
        (Identifier::DerDn(_), AuthParams::Signature(creds)) => {
            let certificate = cert_exchange::load_local_certificate(creds)?;
            Identifier::DerDn(certificate.subject().to_vec())
        }
        (id, _) => id.clone(),
    };

    if let Identifier::Fqdn(name) | Identifier::UserFqdn(name) = &identifier {
        if name.is_empty() || name.len() > MAX_ID_DATA_LEN {
            return Err(Error::InvalidDomain);
        }
    }

    let (id_type, data) = identifier.to_id_data()?;
    Ok(IdPayload {
        id_type: id_type.to_u8(),
        protocol_id: 0,
        port: 0,
        data,
    })
}

/// Inputs of one HASH computation
#[derive(Debug, Clone, Copy)]
pub struct HashInputs<'a> {
    /// Public value of the side the hash belongs to
    pub sender_public: &'a [u8],
    /// Public value of the other side
    pub receiver_public: &'a [u8],
    /// Cookie pair
    pub cookies: &'a CookiePair,
    /// Initiator's SA payload body
    pub sa_body: &'a [u8],
    /// Sender's ID payload body
    pub id_body: &'a [u8],
}

/// `prf(SKEYID, g^x(sender) | g^x(receiver) | CKY-I | CKY-R | SAi_b | IDx_b)`
pub fn compute_hash(keys: &Phase1Keys, inputs: &HashInputs<'_>) -> Vec<u8> {
    let icookie = inputs.cookies.icookie();
    let rcookie = inputs.cookies.rcookie();
    keys.prf_skeyid(&[
        inputs.sender_public,
        inputs.receiver_public,
        &icookie,
        &rcookie,
        inputs.sa_body,
        inputs.id_body,
    ])
}

/// Produce our HASH or SIG payload
///
/// Returns the payload type (HASH for pre-shared keys, SIG for RSA) and
/// its body.
pub fn generate_hash_data(
    keys: &Phase1Keys,
    auth: &AuthParams,
    inputs: &HashInputs<'_>,
) -> Result<(PayloadType, Vec<u8>)> {
    let hash = compute_hash(keys, inputs);
    match auth {
        AuthParams::PresharedKey(_) => Ok((PayloadType::HASH, hash)),
        AuthParams::Signature(creds) => {
            let key = cert_exchange::load_private_key(creds)?;
            Ok((PayloadType::SIG, sign::sign_hash(&key, &hash)?))
        }
    }
}

/// Everything needed to check the peer's proof of identity
pub struct PeerProof<'a> {
    /// Negotiated secrets
    pub auth: &'a AuthParams,
    /// Peer ID payload body
    pub id_body: &'a [u8],
    /// HASH or SIG payload body
    pub proof: &'a [u8],
    /// Certificate resolved for the peer (RSA only)
    pub certificate: Option<&'a Certificate>,
    /// Peer address the message came from
    pub peer_addr: IpAddr,
}

/// Verify the peer's identity and HASH / SIG
///
/// `inputs` describe the peer's hash: its public value first.
///
/// # Errors
///
/// An ID payload that cannot be converted is reported as such; every
/// later failure is `AuthenticationFailed`.
pub fn verify_auth_data(
    policy: &Policy,
    keys: &Phase1Keys,
    inputs: &HashInputs<'_>,
    peer: &PeerProof<'_>,
) -> Result<Identifier> {
    let icookie = inputs.cookies.icookie();
    let fail = |reason: &str| {
        logging::log_authentication_failed(&icookie, reason);
        Error::AuthenticationFailed
    };

    let id_payload = IdPayload::from_payload_data(peer.id_body)?;
    let identifier = Identifier::from_id_payload(&id_payload)?;

    match (id_payload.protocol_id, id_payload.port) {
        (0, 0) => {}
        (IP_PROTO_UDP, IKE_PORT) => {}
        (proto, port) => {
            return Err(fail(&format!("ID protocol/port {}/{} not allowed", proto, port)))
        }
    }

    if !policy.peer_id.matches(&identifier) {
        if policy.flags.contains(PolicyFlags::VERIFY_ID) {
            return Err(fail(&format!("peer identity {} not accepted by policy", identifier)));
        }
        debug!(
            icookie = %hex::encode(icookie),
            peer_id = %identifier,
            "peer identity does not match policy, not enforced"
        );
    }

    if let Some(addr) = identifier.single_ip() {
        if addr != peer.peer_addr {
            return Err(fail("ID address differs from packet source"));
        }
    }

    let expected = compute_hash(keys, inputs);

    match peer.auth {
        AuthParams::PresharedKey(_) => {
            if identifier.single_ip().is_none() {
                return Err(fail("pre-shared key needs an address identity"));
            }
            if !bool::from(expected.as_slice().ct_eq(peer.proof)) {
                return Err(fail("hash mismatch"));
            }
        }
        AuthParams::Signature(creds) => {
            let certificate = peer
                .certificate
                .ok_or_else(|| Error::NotFound("peer certificate".into()))?;

            if policy.flags.contains(PolicyFlags::VERIFY_CERT) {
                if !certificate.matches_identifier(&identifier) {
                    return Err(fail("certificate does not match identity"));
                }
                let ca = cert_exchange::load_ca_certificate(creds)?;
                let crl = if policy.flags.contains(PolicyFlags::VERIFY_AGAINST_CRL) {
                    Some(cert_exchange::load_crl(creds)?)
                } else {
                    None
                };
                cert::verify_chain(certificate, &ca, crl.as_ref())
                    .map_err(|e| fail(&format!("certificate chain: {}", e)))?;
            }

            let public = certificate
                .public_key()
                .map_err(|e| fail(&format!("certificate key: {}", e)))?;
            sign::verify_hash(&public, &expected, peer.proof)
                .map_err(|_| fail("signature mismatch"))?;
        }
    }

    logging::log_authentication_success(&icookie, &identifier, peer.auth.label());
    Ok(identifier)
}
