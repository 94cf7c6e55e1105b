//! In-band certificate exchange
//!
//! CERT and CERT-REQUEST handling for RSA signature authentication.
//! Credential files are read when needed, never cached across exchanges.

use super::constants::CertEncoding;
use super::payload::{CertPayload, CertReqPayload};
use crate::ipsec::cert::{Certificate, RevocationList};
use crate::ipsec::config::{Policy, PolicyFlags, SignatureCredentials};
use crate::ipsec::crypto::sign;
use crate::ipsec::{Error, Result};
use rsa::RsaPrivateKey;
use std::path::Path;

/// Whether certificates travel in CERT / CR payloads for this exchange
pub fn inband_enabled(policy: &Policy) -> bool {
    policy.flags.contains(PolicyFlags::INBAND_CERT_EXCHANGE)
}

/// Build a CERT-REQUEST for X.509 signature certificates
///
/// Names the trusted CA when the policy asks for it.
pub fn generate_certreq(policy: &Policy) -> Result<CertReqPayload> {
    let authority = if policy.flags.contains(PolicyFlags::CA_IN_CERTREQ) {
        load_ca_certificate(&policy.credentials)?.subject().to_vec()
    } else {
        Vec::new()
    };

    Ok(CertReqPayload {
        cert_type: CertEncoding::X509Signature.to_u8(),
        authority,
    })
}

/// Whether a received CERT-REQUEST asks for something we can send
pub fn certreq_supported(request: &CertReqPayload) -> bool {
    request.cert_type == CertEncoding::X509Signature.to_u8()
}

/// Build a CERT payload carrying the local certificate
pub fn generate_cert(credentials: &SignatureCredentials) -> Result<CertPayload> {
    let certificate = load_local_certificate(credentials)?;
    Ok(CertPayload {
        encoding: CertEncoding::X509Signature.to_u8(),
        data: certificate.der().to_vec(),
    })
}

/// Resolve the certificate that authenticates the peer
///
/// An in-band CERT wins when in-band exchange is enabled; otherwise the
/// configured peer certificate file is used.
///
/// # Errors
///
/// - `Certificate` for an in-band CERT with an unsupported encoding or bad DER
/// - `NotFound` when neither source is available
pub fn peer_certificate(policy: &Policy, inbound: Option<&CertPayload>) -> Result<Certificate> {
    if let (true, Some(cert)) = (inband_enabled(policy), inbound) {
        if cert.encoding != CertEncoding::X509Signature.to_u8() {
            return Err(Error::Certificate(format!(
                "unsupported certificate encoding {}",
                cert.encoding
            )));
        }
        return Certificate::from_der(&cert.data);
    }

    match &policy.credentials.peer_certificate {
        Some(path) => Certificate::from_file(path),
        None => Err(Error::NotFound("peer certificate".into())),
    }
}

/// Load the local certificate
pub fn load_local_certificate(credentials: &SignatureCredentials) -> Result<Certificate> {
    Certificate::from_file(required(&credentials.certificate, "local certificate")?)
}

/// Load the trusted CA certificate
pub fn load_ca_certificate(credentials: &SignatureCredentials) -> Result<Certificate> {
    Certificate::from_file(required(&credentials.ca_certificate, "CA certificate")?)
}

/// Load the CA's revocation list
pub fn load_crl(credentials: &SignatureCredentials) -> Result<RevocationList> {
    RevocationList::from_file(required(&credentials.crl, "CRL")?)
}

/// Load the local RSA private key
pub fn load_private_key(credentials: &SignatureCredentials) -> Result<RsaPrivateKey> {
    let path = required(&credentials.private_key, "private key")?;
    let data = std::fs::read(path)
        .map_err(|e| Error::Certificate(format!("{}: {}", path.display(), e)))?;
    sign::load_private_key(&data)
}

fn required<'a>(path: &'a Option<std::path::PathBuf>, what: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| Error::NotFound(format!("{} not configured", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::cert::CertificateBuilder;
    use crate::ipsec::config::PolicyTransform;
    use crate::ipsec::crypto::DhGroup;
    use crate::ipsec::ikev1::constants::{AuthMethod, EncryptionAlgorithm, HashAlgorithm};
    use once_cell::sync::Lazy;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static KEY: Lazy<RsaPrivateKey> =
        Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap());

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn write_tmp(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn policy(flags: PolicyFlags, credentials: SignatureCredentials) -> Policy {
        Policy {
            name: "rsa".into(),
            transforms: vec![PolicyTransform::new(
                EncryptionAlgorithm::AesCbc,
                HashAlgorithm::Sha256,
                AuthMethod::RsaSignatures,
                DhGroup::Modp1024,
            )],
            local_id: crate::ipsec::ikev1::identity::Identifier::Any,
            peer_id: crate::ipsec::ikev1::identity::Identifier::Any,
            remote: crate::ipsec::ikev1::identity::Identifier::Any,
            flags,
            credentials,
            preshared_keys: Default::default(),
        }
    }

    fn credentials() -> SignatureCredentials {
        let cert = CertificateBuilder::new("ca.example").self_signed(&KEY).unwrap();
        let key_pem = KEY.to_pkcs8_pem(LineEnding::LF).unwrap();
        let dir = std::env::temp_dir().join(format!(
            "oakley-cert-exchange-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        SignatureCredentials {
            certificate: Some(write_tmp(&dir, "local.pem", cert.to_pem().as_bytes())),
            private_key: Some(write_tmp(&dir, "local.key", key_pem.as_bytes())),
            ca_certificate: Some(write_tmp(&dir, "ca.der", cert.der())),
            peer_certificate: None,
            crl: None,
        }
    }

    #[test]
    fn test_certreq_names_ca() {
        let creds = credentials();
        let plain = generate_certreq(&policy(PolicyFlags::default(), creds.clone())).unwrap();
        assert_eq!(plain.cert_type, 4);
        assert!(plain.authority.is_empty());
        assert!(certreq_supported(&plain));

        let named = generate_certreq(&policy(
            PolicyFlags::default().with(PolicyFlags::CA_IN_CERTREQ),
            creds.clone(),
        ))
        .unwrap();
        let ca = load_ca_certificate(&creds).unwrap();
        assert_eq!(named.authority, ca.subject());

        assert!(!certreq_supported(&CertReqPayload {
            cert_type: CertEncoding::Pgp.to_u8(),
            authority: Vec::new(),
        }));
    }

    #[test]
    fn test_peer_certificate_sources() {
        let creds = credentials();
        let cert = generate_cert(&creds).unwrap();
        assert_eq!(cert.encoding, 4);

        // in-band CERT used only when in-band exchange is on
        let inband = policy(
            PolicyFlags::default().with(PolicyFlags::INBAND_CERT_EXCHANGE),
            creds.clone(),
        );
        let resolved = peer_certificate(&inband, Some(&cert)).unwrap();
        assert_eq!(resolved.der(), cert.data.as_slice());

        let offline = policy(PolicyFlags::default(), creds.clone());
        assert!(matches!(
            peer_certificate(&offline, Some(&cert)),
            Err(Error::NotFound(_))
        ));

        let mut with_file = creds;
        with_file.peer_certificate = with_file.certificate.clone();
        let offline = policy(PolicyFlags::default(), with_file);
        assert!(peer_certificate(&offline, None).is_ok());
    }

    #[test]
    fn test_bad_inband_encoding() {
        let inband = policy(
            PolicyFlags::default().with(PolicyFlags::INBAND_CERT_EXCHANGE),
            credentials(),
        );
        let pgp = CertPayload {
            encoding: CertEncoding::Pgp.to_u8(),
            data: vec![1, 2, 3],
        };
        assert!(matches!(
            peer_certificate(&inband, Some(&pgp)),
            Err(Error::Certificate(_))
        ));
    }

    #[test]
    fn test_load_private_key() {
        let creds = credentials();
        let key = load_private_key(&creds).unwrap();
        assert_eq!(key, *KEY);

        assert!(matches!(
            load_private_key(&SignatureCredentials::default()),
            Err(Error::NotFound(_))
        ));
    }
}
