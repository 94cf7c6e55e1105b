//! Pseudo-Random Function (PRF) implementations
//!
//! IKEv1 uses the negotiated hash algorithm in its HMAC form as the PRF
//! (RFC 2409 Section 5). The same hash, unkeyed, derives the initial
//! Phase 1 IV.

use crate::ipsec::ikev1::constants::HashAlgorithm;
use crate::ipsec::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// PRF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlgorithm {
    /// HMAC-SHA1
    HmacSha1,
    /// HMAC-SHA2-256
    HmacSha256,
    /// HMAC-SHA2-384
    HmacSha384,
    /// HMAC-SHA2-512
    HmacSha512,
}

impl PrfAlgorithm {
    /// PRF for a negotiated hash algorithm
    pub fn from_hash(hash: HashAlgorithm) -> Result<Self> {
        match hash {
            HashAlgorithm::Sha1 => Ok(PrfAlgorithm::HmacSha1),
            HashAlgorithm::Sha256 => Ok(PrfAlgorithm::HmacSha256),
            HashAlgorithm::Sha384 => Ok(PrfAlgorithm::HmacSha384),
            HashAlgorithm::Sha512 => Ok(PrfAlgorithm::HmacSha512),
            other => Err(Error::UnsupportedAlgorithm(format!("hash {:?}", other))),
        }
    }

    /// Get PRF output length in bytes
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacSha1 => 20,
            PrfAlgorithm::HmacSha256 => 32,
            PrfAlgorithm::HmacSha384 => 48,
            PrfAlgorithm::HmacSha512 => 64,
        }
    }

    /// Start an incremental PRF computation
    pub fn init(self, key: &[u8]) -> PrfContext {
        let state = match self {
            PrfAlgorithm::HmacSha1 => PrfState::Sha1(
                Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size"),
            ),
            PrfAlgorithm::HmacSha256 => PrfState::Sha256(
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size"),
            ),
            PrfAlgorithm::HmacSha384 => PrfState::Sha384(
                Hmac::<Sha384>::new_from_slice(key).expect("HMAC can take key of any size"),
            ),
            PrfAlgorithm::HmacSha512 => PrfState::Sha512(
                Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size"),
            ),
        };
        PrfContext { state }
    }

    /// Compute PRF over the concatenation of `parts`
    pub fn compute(self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        let mut ctx = self.init(key);
        for part in parts {
            ctx.update(part);
        }
        ctx.finalize()
    }

    /// Plain hash of the concatenation of `parts`
    pub fn hash(self, parts: &[&[u8]]) -> Vec<u8> {
        fn digest<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }

        match self {
            PrfAlgorithm::HmacSha1 => digest::<Sha1>(parts),
            PrfAlgorithm::HmacSha256 => digest::<Sha256>(parts),
            PrfAlgorithm::HmacSha384 => digest::<Sha384>(parts),
            PrfAlgorithm::HmacSha512 => digest::<Sha512>(parts),
        }
    }

    /// Expand key material (RFC 2409 Appendix B)
    ///
    /// ```text
    /// K1 = prf(K, 0)
    /// Kn = prf(K, Kn-1)
    /// ```
    pub fn expand(self, key: &[u8], output_len: usize) -> Vec<u8> {
        let mut output = Vec::with_capacity(output_len + self.output_len());
        let mut block = self.compute(key, &[&[0u8]]);
        output.extend_from_slice(&block);

        while output.len() < output_len {
            block = self.compute(key, &[&block]);
            output.extend_from_slice(&block);
        }

        output.truncate(output_len);
        output
    }
}

enum PrfState {
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

/// Incremental keyed PRF
pub struct PrfContext {
    state: PrfState,
}

impl PrfContext {
    /// Feed more input
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            PrfState::Sha1(mac) => mac.update(data),
            PrfState::Sha256(mac) => mac.update(data),
            PrfState::Sha384(mac) => mac.update(data),
            PrfState::Sha512(mac) => mac.update(data),
        }
    }

    /// Produce the PRF output
    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            PrfState::Sha1(mac) => mac.finalize().into_bytes().to_vec(),
            PrfState::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            PrfState::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            PrfState::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prf_output_lengths() {
        for prf in [
            PrfAlgorithm::HmacSha1,
            PrfAlgorithm::HmacSha256,
            PrfAlgorithm::HmacSha384,
            PrfAlgorithm::HmacSha512,
        ] {
            let out = prf.compute(b"key", &[b"data"]);
            assert_eq!(out.len(), prf.output_len());
        }
    }

    #[test]
    fn test_hmac_sha1_rfc2202_case_2() {
        let out = PrfAlgorithm::HmacSha1.compute(b"Jefe", &[b"what do ya want for nothing?"]);
        assert_eq!(
            hex::encode(out),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn test_compute_concatenates_parts() {
        let prf = PrfAlgorithm::HmacSha256;
        assert_eq!(
            prf.compute(b"k", &[b"ab", b"cd"]),
            prf.compute(b"k", &[b"abcd"])
        );
    }

    #[test]
    fn test_expand() {
        let prf = PrfAlgorithm::HmacSha1;
        let out = prf.expand(b"skeyid_e", 32);
        assert_eq!(out.len(), 32);

        let k1 = prf.compute(b"skeyid_e", &[&[0u8]]);
        let k2 = prf.compute(b"skeyid_e", &[&k1]);
        assert_eq!(&out[..20], &k1[..]);
        assert_eq!(&out[20..], &k2[..12]);
    }

    #[test]
    fn test_unsupported_hash() {
        assert!(matches!(
            PrfAlgorithm::from_hash(HashAlgorithm::Md5),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert_eq!(
            PrfAlgorithm::from_hash(HashAlgorithm::Sha256).unwrap(),
            PrfAlgorithm::HmacSha256
        );
    }

    #[test]
    fn test_plain_hash() {
        let digest = PrfAlgorithm::HmacSha1.hash(&[b"abc"]);
        assert_eq!(
            hex::encode(digest),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
