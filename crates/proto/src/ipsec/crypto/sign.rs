//! RSA signatures
//!
//! Main Mode signature authentication signs HASH_I / HASH_R directly with
//! PKCS#1 v1.5 padding and no DigestInfo prefix (RFC 2409 Section 5.1).
//! Certificate and CRL signatures use the regular DigestInfo form.

use super::decode_pem_or_der;
use crate::ipsec::{Error, Result};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest used by a certificate or CRL signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureDigest {
    /// sha1WithRSAEncryption
    Sha1,
    /// sha256WithRSAEncryption
    Sha256,
    /// sha384WithRSAEncryption
    Sha384,
    /// sha512WithRSAEncryption
    Sha512,
}

impl SignatureDigest {
    fn scheme_and_digest(self, message: &[u8]) -> (Pkcs1v15Sign, Vec<u8>) {
        match self {
            SignatureDigest::Sha1 => (Pkcs1v15Sign::new::<Sha1>(), Sha1::digest(message).to_vec()),
            SignatureDigest::Sha256 => (
                Pkcs1v15Sign::new::<Sha256>(),
                Sha256::digest(message).to_vec(),
            ),
            SignatureDigest::Sha384 => (
                Pkcs1v15Sign::new::<Sha384>(),
                Sha384::digest(message).to_vec(),
            ),
            SignatureDigest::Sha512 => (
                Pkcs1v15Sign::new::<Sha512>(),
                Sha512::digest(message).to_vec(),
            ),
        }
    }
}

/// Load an RSA private key from PKCS#8 or PKCS#1, PEM or DER
pub fn load_private_key(data: &[u8]) -> Result<RsaPrivateKey> {
    let (tag, der) = decode_pem_or_der(data)?;

    let parsed = match tag.as_deref() {
        Some("RSA PRIVATE KEY") => RsaPrivateKey::from_pkcs1_der(&der).ok(),
        Some("PRIVATE KEY") => RsaPrivateKey::from_pkcs8_der(&der).ok(),
        Some(other) => {
            return Err(Error::Certificate(format!(
                "unexpected PEM block '{}' in key file",
                other
            )))
        }
        None => RsaPrivateKey::from_pkcs8_der(&der)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_der(&der).ok()),
    };

    parsed.ok_or_else(|| Error::Certificate("unable to parse RSA private key".into()))
}

/// Read an RSA public key from a DER SubjectPublicKeyInfo
pub fn public_key_from_spki(spki: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(spki)
        .map_err(|e| Error::Certificate(format!("unsupported public key: {}", e)))
}

/// Sign an authentication hash (no DigestInfo)
pub fn sign_hash(key: &RsaPrivateKey, hash: &[u8]) -> Result<Vec<u8>> {
    key.sign(Pkcs1v15Sign::new_unprefixed(), hash)
        .map_err(|e| Error::CryptoError(format!("RSA signing failed: {}", e)))
}

/// Verify a signature over an authentication hash (no DigestInfo)
pub fn verify_hash(key: &RsaPublicKey, hash: &[u8], signature: &[u8]) -> Result<()> {
    key.verify(Pkcs1v15Sign::new_unprefixed(), hash, signature)
        .map_err(|_| Error::AuthenticationFailed)
}

/// Verify a DigestInfo signature over `message`
pub fn verify_digest(
    key: &RsaPublicKey,
    digest: SignatureDigest,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let (scheme, hashed) = digest.scheme_and_digest(message);
    key.verify(scheme, &hashed, signature)
        .map_err(|_| Error::Certificate("signature verification failed".into()))
}

/// Produce a DigestInfo signature over `message`
pub fn sign_digest(key: &RsaPrivateKey, digest: SignatureDigest, message: &[u8]) -> Result<Vec<u8>> {
    let (scheme, hashed) = digest.scheme_and_digest(message);
    key.sign(scheme, &hashed)
        .map_err(|e| Error::CryptoError(format!("RSA signing failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    #[test]
    fn test_hash_signature_round_trip() {
        let key = test_key();
        let hash = [0x5a; 20];

        let sig = sign_hash(&key, &hash).unwrap();
        assert_eq!(sig.len(), 128);
        assert!(verify_hash(&key.to_public_key(), &hash, &sig).is_ok());

        let other = [0x5b; 20];
        assert_eq!(
            verify_hash(&key.to_public_key(), &other, &sig),
            Err(Error::AuthenticationFailed)
        );
    }

    #[test]
    fn test_digest_signature() {
        let key = test_key();
        let sig = sign_digest(&key, SignatureDigest::Sha256, b"tbs").unwrap();
        assert!(verify_digest(&key.to_public_key(), SignatureDigest::Sha256, b"tbs", &sig).is_ok());
        assert!(verify_digest(&key.to_public_key(), SignatureDigest::Sha1, b"tbs", &sig).is_err());
    }

    #[test]
    fn test_load_private_key_formats() {
        let key = test_key();

        let pkcs8_pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        assert_eq!(load_private_key(pkcs8_pem.as_bytes()).unwrap(), key);

        let pkcs1_pem = key.to_pkcs1_pem(LineEnding::LF).unwrap();
        assert_eq!(load_private_key(pkcs1_pem.as_bytes()).unwrap(), key);

        let pkcs8_der = key.to_pkcs8_der().unwrap();
        assert_eq!(load_private_key(pkcs8_der.as_bytes()).unwrap(), key);

        let pkcs1_der = key.to_pkcs1_der().unwrap();
        assert_eq!(load_private_key(pkcs1_der.as_bytes()).unwrap(), key);
    }

    #[test]
    fn test_public_key_from_spki() {
        let key = test_key();
        let spki = key.to_public_key().to_public_key_der().unwrap();
        assert_eq!(
            public_key_from_spki(spki.as_bytes()).unwrap(),
            key.to_public_key()
        );
        assert!(public_key_from_spki(&[0x30, 0x00]).is_err());
    }

    #[test]
    fn test_garbage_key_rejected() {
        assert!(matches!(
            load_private_key(b"not a key"),
            Err(Error::Certificate(_))
        ));
    }
}
