//! IPSec cryptographic operations
//!
//! This module provides the primitives used by Main Mode:
//! - PRF (HMAC over the negotiated hash) and key expansion
//! - Diffie-Hellman over the Oakley MODP groups
//! - AES-CBC payload encryption
//! - RSA signatures and key loading

pub mod cipher;
pub mod dh;
pub mod prf;
pub mod sign;

pub use cipher::CipherAlgorithm;
pub use dh::{DhGroup, DhKeyPair};
pub use prf::{PrfAlgorithm, PrfContext};

use crate::ipsec::{Error, Result};

/// Decode PEM or raw DER input
///
/// Returns the PEM label (if the input was PEM) and the DER contents.
pub fn decode_pem_or_der(data: &[u8]) -> Result<(Option<String>, Vec<u8>)> {
    let trimmed = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &data[start..])
        .unwrap_or(data);

    if trimmed.starts_with(b"-----BEGIN") {
        let parsed = pem::parse(trimmed)
            .map_err(|e| Error::Certificate(format!("invalid PEM: {}", e)))?;
        return Ok((Some(parsed.tag().to_string()), parsed.contents().to_vec()));
    }

    Ok((None, data.to_vec()))
}
