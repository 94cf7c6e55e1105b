//! Phase 1 keying material
//!
//! Implements RFC 2409 Section 5 key derivation:
//!
//! ```text
//! SKEYID   = prf(pre-shared-key, Ni_b | Nr_b)        (pre-shared key)
//! SKEYID   = prf(Ni_b | Nr_b, g^xy)                  (signatures)
//! SKEYID_d = prf(SKEYID, g^xy | CKY-I | CKY-R | 0)
//! SKEYID_a = prf(SKEYID, SKEYID_d | g^xy | CKY-I | CKY-R | 1)
//! SKEYID_e = prf(SKEYID, SKEYID_a | g^xy | CKY-I | CKY-R | 2)
//! ```
//!
//! and the Phase 1 CBC IV chain (RFC 2409 Appendix B).

use super::message::Cookie;
use super::proposal::SaAttributes;
use crate::ipsec::crypto::{CipherAlgorithm, PrfAlgorithm};
use crate::ipsec::{Error, Result};
use rand::RngCore;
use zeroize::Zeroizing;

/// Generate a fresh random nonce
pub fn generate_nonce(len: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Secret that keys SKEYID
#[derive(Clone, Copy)]
pub enum SkeyidSecret<'a> {
    /// Pre-shared key authentication
    PresharedKey(&'a [u8]),
    /// Signature authentication
    Signature,
}

/// Everything both peers contribute to the key schedule
pub struct KeyExchangeInputs<'a> {
    /// SKEYID secret
    pub secret: SkeyidSecret<'a>,
    /// Initiator nonce body
    pub nonce_i: &'a [u8],
    /// Responder nonce body
    pub nonce_r: &'a [u8],
    /// Diffie-Hellman shared secret g^xy
    pub shared: &'a [u8],
    /// Initiator cookie
    pub icookie: &'a Cookie,
    /// Responder cookie
    pub rcookie: &'a Cookie,
    /// Initiator public value g^xi
    pub public_i: &'a [u8],
    /// Responder public value g^xr
    pub public_r: &'a [u8],
}

/// Derived Phase 1 keys and the current CBC IV
pub struct Phase1Keys {
    prf: PrfAlgorithm,
    cipher: CipherAlgorithm,
    skeyid: Zeroizing<Vec<u8>>,
    skeyid_d: Zeroizing<Vec<u8>>,
    skeyid_a: Zeroizing<Vec<u8>>,
    skeyid_e: Zeroizing<Vec<u8>>,
    encryption_key: Zeroizing<Vec<u8>>,
    iv: Vec<u8>,
}

impl std::fmt::Debug for Phase1Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase1Keys")
            .field("prf", &self.prf)
            .field("cipher", &self.cipher)
            .field("skeyid", &"<redacted>")
            .finish()
    }
}

impl Phase1Keys {
    /// Run the key schedule for the negotiated attributes
    pub fn derive(attrs: &SaAttributes, inputs: &KeyExchangeInputs<'_>) -> Result<Self> {
        let prf = attrs.prf()?;
        let cipher = attrs.cipher()?;

        let skeyid = Zeroizing::new(match inputs.secret {
            SkeyidSecret::PresharedKey(psk) => {
                prf.compute(psk, &[inputs.nonce_i, inputs.nonce_r])
            }
            SkeyidSecret::Signature => {
                let nonces = [inputs.nonce_i, inputs.nonce_r].concat();
                prf.compute(&nonces, &[inputs.shared])
            }
        });

        let cookies: [&[u8]; 2] = [inputs.icookie, inputs.rcookie];
        let skeyid_d = Zeroizing::new(prf.compute(
            &skeyid,
            &[inputs.shared, cookies[0], cookies[1], &[0]],
        ));
        let skeyid_a = Zeroizing::new(prf.compute(
            &skeyid,
            &[&skeyid_d, inputs.shared, cookies[0], cookies[1], &[1]],
        ));
        let skeyid_e = Zeroizing::new(prf.compute(
            &skeyid,
            &[&skeyid_a, inputs.shared, cookies[0], cookies[1], &[2]],
        ));

        let key_len = cipher.key_len();
        let encryption_key = Zeroizing::new(if skeyid_e.len() >= key_len {
            skeyid_e[..key_len].to_vec()
        } else {
            prf.expand(&skeyid_e, key_len)
        });

        let mut iv = prf.hash(&[inputs.public_i, inputs.public_r]);
        iv.truncate(cipher.block_size());

        Ok(Phase1Keys {
            prf,
            cipher,
            skeyid,
            skeyid_d,
            skeyid_a,
            skeyid_e,
            encryption_key,
            iv,
        })
    }

    /// Negotiated PRF
    pub fn prf(&self) -> PrfAlgorithm {
        self.prf
    }

    /// Negotiated cipher
    pub fn cipher(&self) -> CipherAlgorithm {
        self.cipher
    }

    /// SKEYID
    pub fn skeyid(&self) -> &[u8] {
        &self.skeyid
    }

    /// SKEYID_d, keys Phase 2 material
    pub fn skeyid_d(&self) -> &[u8] {
        &self.skeyid_d
    }

    /// SKEYID_a, keys Phase 2 HASH payloads
    pub fn skeyid_a(&self) -> &[u8] {
        &self.skeyid_a
    }

    /// SKEYID_e
    pub fn skeyid_e(&self) -> &[u8] {
        &self.skeyid_e
    }

    /// Phase 1 encryption key
    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    /// IV for the next encrypted message
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// `prf(SKEYID, parts...)`
    pub fn prf_skeyid(&self, parts: &[&[u8]]) -> Vec<u8> {
        self.prf.compute(&self.skeyid, parts)
    }

    /// Encrypt a payload chain with the current IV
    ///
    /// The chain is not advanced; call [`Phase1Keys::advance_iv`] once the
    /// message has been handed off.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.encrypt(&self.encryption_key, &self.iv, plaintext)
    }

    /// Decrypt a message body with the current IV
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt(&self.encryption_key, &self.iv, ciphertext)
    }

    /// Continue the CBC chain from a processed message
    pub fn advance_iv(&mut self, ciphertext: &[u8]) -> Result<()> {
        let block = self.cipher.block_size();
        if ciphertext.len() < block || ciphertext.len() % block != 0 {
            return Err(Error::InvalidLength {
                expected: block,
                actual: ciphertext.len(),
            });
        }
        self.iv = ciphertext[ciphertext.len() - block..].to_vec();
        Ok(())
    }
}
