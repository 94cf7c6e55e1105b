//! Cipher implementations for Phase 1 payload encryption
//!
//! IKEv1 encrypts everything after the ISAKMP header with the negotiated
//! block cipher in CBC mode (RFC 2409 Appendix B). Plaintext is padded with
//! zero bytes up to the block size; the receiver ignores trailing padding.

use crate::ipsec::ikev1::constants::EncryptionAlgorithm;
use crate::ipsec::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// Cipher algorithm for Phase 1 encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-CBC with 128-bit key
    AesCbc128,
    /// AES-CBC with 192-bit key
    AesCbc192,
    /// AES-CBC with 256-bit key
    AesCbc256,
}

impl CipherAlgorithm {
    /// Cipher for a negotiated encryption algorithm and key length
    ///
    /// `key_bits` of `None` selects the algorithm default.
    pub fn from_negotiated(algorithm: EncryptionAlgorithm, key_bits: Option<u16>) -> Result<Self> {
        match algorithm {
            EncryptionAlgorithm::AesCbc => match key_bits.unwrap_or(128) {
                128 => Ok(CipherAlgorithm::AesCbc128),
                192 => Ok(CipherAlgorithm::AesCbc192),
                256 => Ok(CipherAlgorithm::AesCbc256),
                other => Err(Error::UnsupportedAlgorithm(format!(
                    "AES-CBC key length {}",
                    other
                ))),
            },
            other => Err(Error::UnsupportedAlgorithm(format!("encryption {:?}", other))),
        }
    }

    /// Whether an algorithm / key length combination can be used
    pub fn is_supported(algorithm: EncryptionAlgorithm, key_bits: Option<u16>) -> bool {
        Self::from_negotiated(algorithm, key_bits).is_ok()
    }

    /// Get key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::AesCbc128 => 16,
            CipherAlgorithm::AesCbc192 => 24,
            CipherAlgorithm::AesCbc256 => 32,
        }
    }

    /// Get block size in bytes
    pub fn block_size(self) -> usize {
        AES_BLOCK_SIZE
    }

    fn check_lengths(self, key: &[u8], iv: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(Error::InvalidLength {
                expected: self.key_len(),
                actual: key.len(),
            });
        }
        if iv.len() != self.block_size() {
            return Err(Error::InvalidLength {
                expected: self.block_size(),
                actual: iv.len(),
            });
        }
        Ok(())
    }

    /// Encrypt data in CBC mode
    ///
    /// Plaintext is zero-padded to a multiple of the block size.
    pub fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;

        let block = self.block_size();
        let padded_len = ((plaintext.len() + block - 1) / block).max(1) * block;
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);

        let failed = |_| Error::CryptoError("CBC encryption failed".into());
        match self {
            CipherAlgorithm::AesCbc128 => Encryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?
                .encrypt_padded_mut::<NoPadding>(&mut buf, padded_len)
                .map(|_| ())
                .map_err(failed)?,
            CipherAlgorithm::AesCbc192 => Encryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?
                .encrypt_padded_mut::<NoPadding>(&mut buf, padded_len)
                .map(|_| ())
                .map_err(failed)?,
            CipherAlgorithm::AesCbc256 => Encryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?
                .encrypt_padded_mut::<NoPadding>(&mut buf, padded_len)
                .map(|_| ())
                .map_err(failed)?,
        }

        Ok(buf)
    }

    /// Decrypt data in CBC mode
    ///
    /// The ciphertext must be a non-empty multiple of the block size.
    pub fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_lengths(key, iv)?;

        if ciphertext.is_empty() || ciphertext.len() % self.block_size() != 0 {
            return Err(Error::Malformed(format!(
                "ciphertext length {} is not a multiple of the block size",
                ciphertext.len()
            )));
        }

        let mut buf = ciphertext.to_vec();
        let failed = |_| Error::CryptoError("CBC decryption failed".into());
        match self {
            CipherAlgorithm::AesCbc128 => Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map(|_| ())
                .map_err(failed)?,
            CipherAlgorithm::AesCbc192 => Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map(|_| ())
                .map_err(failed)?,
            CipherAlgorithm::AesCbc256 => Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(|_| Error::CryptoError("Failed to create AES-CBC cipher".into()))?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map(|_| ())
                .map_err(failed)?,
        }

        Ok(buf)
    }
}
