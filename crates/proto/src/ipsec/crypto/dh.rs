//! Diffie-Hellman key exchange over the Oakley MODP groups
//!
//! Groups 1 and 2 come from RFC 2409 Section 6, groups 5 and 14 from
//! RFC 3526. Public values and shared secrets are big-endian and
//! left-padded to the length of the prime.

use crate::ipsec::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use zeroize::Zeroizing;

const MODP_768: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A63A3620FFFFFFFFFFFFFFFF";

const MODP_1024: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

const MODP_1536: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF";

const MODP_2048: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

fn parse_prime(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).unwrap_or_default()
}

static PRIME_768: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_768));
static PRIME_1024: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_1024));
static PRIME_1536: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_1536));
static PRIME_2048: Lazy<BigUint> = Lazy::new(|| parse_prime(MODP_2048));

/// Oakley MODP group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum DhGroup {
    /// 768-bit MODP group (1)
    Modp768 = 1,
    /// 1024-bit MODP group (2)
    Modp1024 = 2,
    /// 1536-bit MODP group (5)
    Modp1536 = 5,
    /// 2048-bit MODP group (14)
    Modp2048 = 14,
}

impl DhGroup {
    /// Convert from the group description attribute value
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(DhGroup::Modp768),
            2 => Some(DhGroup::Modp1024),
            5 => Some(DhGroup::Modp1536),
            14 => Some(DhGroup::Modp2048),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Group prime
    pub fn prime(self) -> &'static BigUint {
        match self {
            DhGroup::Modp768 => &PRIME_768,
            DhGroup::Modp1024 => &PRIME_1024,
            DhGroup::Modp1536 => &PRIME_1536,
            DhGroup::Modp2048 => &PRIME_2048,
        }
    }

    /// Length of the prime (and every public value) in bytes
    pub fn prime_len(self) -> usize {
        match self {
            DhGroup::Modp768 => 96,
            DhGroup::Modp1024 => 128,
            DhGroup::Modp1536 => 192,
            DhGroup::Modp2048 => 256,
        }
    }

    /// Generator (2 for every Oakley MODP group)
    pub fn generator(self) -> BigUint {
        BigUint::from(2u32)
    }
}

/// Ephemeral Diffie-Hellman key pair
pub struct DhKeyPair {
    group: DhGroup,
    private: Zeroizing<Vec<u8>>,
    public: Vec<u8>,
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("group", &self.group)
            .field("public_len", &self.public.len())
            .finish()
    }
}

impl DhKeyPair {
    /// Generate a fresh key pair
    pub fn generate(group: DhGroup) -> Self {
        let p = group.prime();
        let two = BigUint::from(2u32);
        let upper = p - &two;

        let x = rand::thread_rng().gen_biguint_range(&two, &upper);
        let y = group.generator().modpow(&x, p);

        DhKeyPair {
            group,
            private: Zeroizing::new(x.to_bytes_be()),
            public: pad(&y, group.prime_len()),
        }
    }

    /// Group of this key pair
    pub fn group(&self) -> DhGroup {
        self.group
    }

    /// Public value g^x, padded to the prime length
    pub fn public(&self) -> &[u8] {
        &self.public
    }

    /// Compute the shared secret g^xy from the peer's public value
    ///
    /// # Errors
    ///
    /// Returns `CryptoError` if the peer value has the wrong length or lies
    /// outside `2..=p-2`.
    pub fn compute_shared(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let len = self.group.prime_len();
        if peer_public.len() != len {
            return Err(Error::CryptoError(format!(
                "DH public value is {} bytes, group needs {}",
                peer_public.len(),
                len
            )));
        }

        let p = self.group.prime();
        let y = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        if y <= one || y >= p - &one {
            return Err(Error::CryptoError("DH public value out of range".into()));
        }

        let x = BigUint::from_bytes_be(&self.private);
        let shared = y.modpow(&x, p);
        Ok(Zeroizing::new(pad(&shared, len)))
    }
}

fn pad(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prime_sizes() {
        for group in [
            DhGroup::Modp768,
            DhGroup::Modp1024,
            DhGroup::Modp1536,
            DhGroup::Modp2048,
        ] {
            assert_eq!(group.prime().bits() as usize, group.prime_len() * 8);
        }
    }

    #[test]
    fn test_key_agreement() {
        let a = DhKeyPair::generate(DhGroup::Modp1024);
        let b = DhKeyPair::generate(DhGroup::Modp1024);
        assert_eq!(a.public().len(), 128);

        let s1 = a.compute_shared(b.public()).unwrap();
        let s2 = b.compute_shared(a.public()).unwrap();
        assert_eq!(*s1, *s2);
        assert_eq!(s1.len(), 128);
    }

    #[test]
    fn test_rejects_degenerate_public_values() {
        let a = DhKeyPair::generate(DhGroup::Modp768);

        let mut one = vec![0u8; 96];
        one[95] = 1;
        assert!(a.compute_shared(&one).is_err());

        let p_minus_one = pad(&(DhGroup::Modp768.prime() - BigUint::from(1u32)), 96);
        assert!(a.compute_shared(&p_minus_one).is_err());

        assert!(a.compute_shared(&[0u8; 95]).is_err());
    }

    #[test]
    fn test_group_ids() {
        assert_eq!(DhGroup::from_u16(14), Some(DhGroup::Modp2048));
        assert_eq!(DhGroup::from_u16(3), None);
        assert_eq!(DhGroup::Modp1536.to_u16(), 5);
    }

    #[test]
    fn test_fresh_pair_each_time() {
        let a = DhKeyPair::generate(DhGroup::Modp768);
        let b = DhKeyPair::generate(DhGroup::Modp768);
        assert_ne!(a.public(), b.public());
    }
}
