//! Peer identifiers
//!
//! Converts between Identification payloads (RFC 2407 Section 4.6.2) and an
//! internal selector type used both for the local identity and for matching
//! remote identities against policy.

use super::constants::*;
use super::payload::IdPayload;
use crate::ipsec::{Error, Result};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Identity or identity selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Wildcard: matches every identity
    Any,
    /// Single IPv4 address
    Ipv4(Ipv4Addr),
    /// Single IPv6 address
    Ipv6(Ipv6Addr),
    /// IPv4 subnet
    Ipv4Subnet {
        /// Network address
        addr: Ipv4Addr,
        /// Network mask
        mask: Ipv4Addr,
    },
    /// IPv6 subnet
    Ipv6Subnet {
        /// Network address
        addr: Ipv6Addr,
        /// Network mask
        mask: Ipv6Addr,
    },
    /// Inclusive IPv4 range
    Ipv4Range {
        /// First address
        start: Ipv4Addr,
        /// Last address
        end: Ipv4Addr,
    },
    /// Inclusive IPv6 range
    Ipv6Range {
        /// First address
        start: Ipv6Addr,
        /// Last address
        end: Ipv6Addr,
    },
    /// Fully qualified domain name
    Fqdn(String),
    /// User FQDN (`user@domain`)
    UserFqdn(String),
    /// DER encoded X.500 distinguished name
    DerDn(Vec<u8>),
}

impl From<IpAddr> for Identifier {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Identifier::Ipv4(v4),
            IpAddr::V6(v6) => Identifier::Ipv6(v6),
        }
    }
}

impl Identifier {
    /// ID payload type of this identifier (`None` for the wildcard)
    pub fn id_type(&self) -> Option<IdType> {
        match self {
            Identifier::Any => None,
            Identifier::Ipv4(_) => Some(IdType::Ipv4Addr),
            Identifier::Ipv6(_) => Some(IdType::Ipv6Addr),
            Identifier::Ipv4Subnet { .. } => Some(IdType::Ipv4Subnet),
            Identifier::Ipv6Subnet { .. } => Some(IdType::Ipv6Subnet),
            Identifier::Ipv4Range { .. } => Some(IdType::Ipv4Range),
            Identifier::Ipv6Range { .. } => Some(IdType::Ipv6Range),
            Identifier::Fqdn(_) => Some(IdType::Fqdn),
            Identifier::UserFqdn(_) => Some(IdType::UserFqdn),
            Identifier::DerDn(_) => Some(IdType::DerAsn1Dn),
        }
    }

    /// The address of a single-IP identifier
    pub fn single_ip(&self) -> Option<IpAddr> {
        match self {
            Identifier::Ipv4(v4) => Some(IpAddr::V4(*v4)),
            Identifier::Ipv6(v6) => Some(IpAddr::V6(*v6)),
            _ => None,
        }
    }

    /// Whether an address falls inside this selector
    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        match (self, addr) {
            (Identifier::Any, _) => true,
            (Identifier::Ipv4(a), IpAddr::V4(b)) => *a == b,
            (Identifier::Ipv6(a), IpAddr::V6(b)) => *a == b,
            (Identifier::Ipv4Subnet { addr, mask }, IpAddr::V4(b)) => {
                u32::from(*addr) & u32::from(*mask) == u32::from(b) & u32::from(*mask)
            }
            (Identifier::Ipv6Subnet { addr, mask }, IpAddr::V6(b)) => {
                u128::from(*addr) & u128::from(*mask) == u128::from(b) & u128::from(*mask)
            }
            (Identifier::Ipv4Range { start, end }, IpAddr::V4(b)) => *start <= b && b <= *end,
            (Identifier::Ipv6Range { start, end }, IpAddr::V6(b)) => *start <= b && b <= *end,
            _ => false,
        }
    }

    /// Selector match: does `self` accept the concrete identity `other`?
    pub fn matches(&self, other: &Identifier) -> bool {
        match (self, other) {
            (Identifier::Any, _) => true,
            (Identifier::Fqdn(a), Identifier::Fqdn(b))
            | (Identifier::UserFqdn(a), Identifier::UserFqdn(b)) => a.eq_ignore_ascii_case(b),
            (Identifier::DerDn(a), Identifier::DerDn(b)) => a == b,
            (_, id) => match id.single_ip() {
                Some(addr) => self.contains_addr(addr),
                None => self == id,
            },
        }
    }

    /// Convert an Identification payload to an identifier
    ///
    /// # Errors
    ///
    /// - `UnsupportedIdType` for unknown or unhandled id types
    /// - `InvalidLength` when address data has the wrong size
    /// - `Malformed` for names that are not UTF-8 and empty DNs
    pub fn from_id_payload(id: &IdPayload) -> Result<Self> {
        let id_type = IdType::from_u8(id.id_type).ok_or(Error::UnsupportedIdType(id.id_type))?;
        let data = id.data.as_slice();

        let wrong_len = |expected: usize| Error::InvalidLength {
            expected,
            actual: data.len(),
        };

        let identifier = match id_type {
            IdType::Ipv4Addr => Identifier::Ipv4(ipv4(data).ok_or_else(|| wrong_len(4))?),
            IdType::Ipv6Addr => Identifier::Ipv6(ipv6(data).ok_or_else(|| wrong_len(16))?),
            IdType::Ipv4Subnet | IdType::Ipv4Range => {
                if data.len() != 8 {
                    return Err(wrong_len(8));
                }
                let (a, b) = (ipv4(&data[..4]), ipv4(&data[4..]));
                match (a, b, id_type) {
                    (Some(addr), Some(mask), IdType::Ipv4Subnet) => {
                        Identifier::Ipv4Subnet { addr, mask }
                    }
                    (Some(start), Some(end), _) => Identifier::Ipv4Range { start, end },
                    _ => return Err(wrong_len(8)),
                }
            }
            IdType::Ipv6Subnet | IdType::Ipv6Range => {
                if data.len() != 32 {
                    return Err(wrong_len(32));
                }
                let (a, b) = (ipv6(&data[..16]), ipv6(&data[16..]));
                match (a, b, id_type) {
                    (Some(addr), Some(mask), IdType::Ipv6Subnet) => {
                        Identifier::Ipv6Subnet { addr, mask }
                    }
                    (Some(start), Some(end), _) => Identifier::Ipv6Range { start, end },
                    _ => return Err(wrong_len(32)),
                }
            }
            IdType::Fqdn | IdType::UserFqdn => {
                let name = std::str::from_utf8(data)
                    .map_err(|_| Error::Malformed("identity is not valid UTF-8".into()))?
                    .to_string();
                if id_type == IdType::Fqdn {
                    Identifier::Fqdn(name)
                } else {
                    Identifier::UserFqdn(name)
                }
            }
            IdType::DerAsn1Dn => {
                if data.is_empty() {
                    return Err(Error::Malformed("empty distinguished name".into()));
                }
                Identifier::DerDn(data.to_vec())
            }
            other => return Err(Error::UnsupportedIdType(other.to_u8())),
        };

        Ok(identifier)
    }

    /// Identification data for an ID payload
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedIdType` for the wildcard, which has no wire form.
    pub fn to_id_data(&self) -> Result<(IdType, Vec<u8>)> {
        let data = match self {
            Identifier::Any => return Err(Error::UnsupportedIdType(0)),
            Identifier::Ipv4(a) => a.octets().to_vec(),
            Identifier::Ipv6(a) => a.octets().to_vec(),
            Identifier::Ipv4Subnet { addr, mask } => [addr.octets(), mask.octets()].concat(),
            Identifier::Ipv6Subnet { addr, mask } => [addr.octets(), mask.octets()].concat(),
            Identifier::Ipv4Range { start, end } => [start.octets(), end.octets()].concat(),
            Identifier::Ipv6Range { start, end } => [start.octets(), end.octets()].concat(),
            Identifier::Fqdn(name) | Identifier::UserFqdn(name) => name.as_bytes().to_vec(),
            Identifier::DerDn(dn) => dn.clone(),
        };
        let id_type = self.id_type().ok_or(Error::UnsupportedIdType(0))?;
        Ok((id_type, data))
    }
}

fn ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn ipv6(data: &[u8]) -> Option<Ipv6Addr> {
    let octets: [u8; 16] = data.try_into().ok()?;
    Some(Ipv6Addr::from(octets))
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Any => write!(f, "%any"),
            Identifier::Ipv4(a) => write!(f, "{}", a),
            Identifier::Ipv6(a) => write!(f, "{}", a),
            Identifier::Ipv4Subnet { addr, mask } => write!(f, "{}/{}", addr, mask),
            Identifier::Ipv6Subnet { addr, mask } => write!(f, "{}/{}", addr, mask),
            Identifier::Ipv4Range { start, end } => write!(f, "{}-{}", start, end),
            Identifier::Ipv6Range { start, end } => write!(f, "{}-{}", start, end),
            Identifier::Fqdn(name) => write!(f, "{}", name),
            Identifier::UserFqdn(name) => write!(f, "{}", name),
            Identifier::DerDn(dn) => write!(f, "dn:{}", hex::encode(dn)),
        }
    }
}
