//! Phase 1 proposal negotiation
//!
//! Implements SA negotiation for Main Mode (RFC 2409 Section 5, RFC 2408
//! Section 4.2).
//!
//! # Structure
//!
//! ```text
//! SA Payload
//!   └── Proposal (exactly one, protocol ISAKMP)
//!         └── Transform(s) (KEY_IKE, one per policy group)
//!               └── Data attributes
//! ```
//!
//! The Initiator offers one transform per policy group; the Responder picks
//! the first acceptable one and echoes it back unchanged.

use super::constants::*;
use super::payload::{DataAttribute, Proposal, SaPayload, Transform};
use crate::ipsec::config::{Policy, PolicyTransform};
use crate::ipsec::crypto::{CipherAlgorithm, DhGroup, PrfAlgorithm};
use crate::ipsec::{Error, Result};

/// Attributes negotiated for a Phase 1 SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaAttributes {
    /// Encryption algorithm
    pub encryption: EncryptionAlgorithm,

    /// Hash algorithm
    pub hash: HashAlgorithm,

    /// Authentication method
    pub auth_method: AuthMethod,

    /// Diffie-Hellman group
    pub group: DhGroup,

    /// Key length in bits, if carried in the transform
    pub key_len: Option<u16>,

    /// Lifetime in seconds, if carried in the transform
    pub lifetime: Option<u32>,
}

impl SaAttributes {
    /// Negotiated cipher
    pub fn cipher(&self) -> Result<CipherAlgorithm> {
        CipherAlgorithm::from_negotiated(self.encryption, self.key_len)
    }

    /// Negotiated PRF
    pub fn prf(&self) -> Result<PrfAlgorithm> {
        PrfAlgorithm::from_hash(self.hash)
    }

    /// Lifetime, falling back to the protocol default
    pub fn lifetime_secs(&self) -> u32 {
        self.lifetime.unwrap_or(DEFAULT_SA_LIFETIME_SECS)
    }
}

/// Raw attribute values of one transform, duplicates rejected
#[derive(Debug, Default)]
struct TransformOffer {
    encryption: Option<u16>,
    hash: Option<u16>,
    auth_method: Option<u16>,
    group: Option<u16>,
    group_type: Option<u16>,
    life_type: Option<u16>,
    life_duration: Option<u32>,
    key_len: Option<u16>,
}

impl TransformOffer {
    fn parse(transform: &Transform) -> Result<Self> {
        let mut offer = TransformOffer::default();

        for attribute in &transform.attributes {
            let attr_type = AttributeType::from_u16(attribute.attr_type)
                .ok_or(Error::UnsupportedAttribute(attribute.attr_type))?;

            let duplicate = match attr_type {
                AttributeType::Encryption => set_u16(&mut offer.encryption, attribute)?,
                AttributeType::Hash => set_u16(&mut offer.hash, attribute)?,
                AttributeType::AuthMethod => set_u16(&mut offer.auth_method, attribute)?,
                AttributeType::GroupDescription => set_u16(&mut offer.group, attribute)?,
                AttributeType::GroupType => set_u16(&mut offer.group_type, attribute)?,
                AttributeType::LifeType => set_u16(&mut offer.life_type, attribute)?,
                AttributeType::KeyLength => set_u16(&mut offer.key_len, attribute)?,
                AttributeType::LifeDuration => {
                    let value = attribute.as_u32().ok_or_else(|| {
                        Error::Malformed("life duration does not fit in 32 bits".into())
                    })?;
                    offer.life_duration.replace(value).is_some()
                }
            };

            if duplicate {
                return Err(Error::UnsupportedAttribute(attribute.attr_type));
            }
        }

        Ok(offer)
    }

    /// Lifetime in seconds, `None` when absent or not measured in seconds
    fn lifetime_secs(&self) -> Option<u32> {
        match (self.life_type, self.life_duration) {
            (Some(LIFE_TYPE_SECONDS), Some(duration)) => Some(duration),
            _ => None,
        }
    }

    /// Whether the transform satisfies one policy group
    fn is_acceptable(&self, wanted: &PolicyTransform) -> bool {
        if self.encryption != Some(wanted.encryption.to_u16())
            || self.hash != Some(wanted.hash.to_u16())
            || self.auth_method != Some(wanted.auth_method.to_u16())
            || self.group != Some(wanted.group.to_u16())
        {
            return false;
        }

        if self.group_type.map_or(false, |t| t != GROUP_TYPE_MODP) {
            return false;
        }

        if self.life_type.map_or(false, |t| t != LIFE_TYPE_SECONDS) {
            return false;
        }

        // Proposed key length must be at least what the policy asks for
        if let Some(min_bits) = wanted.key_len {
            if self.key_len.unwrap_or(128) < min_bits {
                return false;
            }
        }

        // Proposed lifetime must not exceed what the policy allows
        if let Some(max_secs) = wanted.lifetime {
            if self.lifetime_secs().unwrap_or(DEFAULT_SA_LIFETIME_SECS) > max_secs {
                return false;
            }
        }

        true
    }
}

fn set_u16(slot: &mut Option<u16>, attribute: &DataAttribute) -> Result<bool> {
    let value = attribute
        .as_u32()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| {
            Error::Malformed(format!(
                "attribute {} value does not fit in 16 bits",
                attribute.attr_type
            ))
        })?;
    Ok(slot.replace(value).is_some())
}

/// Build the Initiator's SA payload from policy
///
/// One transform per policy group, numbered from 1.
pub fn construct_proposal(policy: &Policy) -> Result<SaPayload> {
    if policy.transforms.is_empty() {
        return Err(Error::InvalidParameter("policy has no transforms".into()));
    }

    let mut proposal = Proposal::new(1);
    for (i, wanted) in policy.transforms.iter().enumerate() {
        let mut transform = Transform::new((i + 1) as u8)
            .with_attribute(DataAttribute::basic(
                AttributeType::Encryption,
                wanted.encryption.to_u16(),
            ))
            .with_attribute(DataAttribute::basic(AttributeType::Hash, wanted.hash.to_u16()))
            .with_attribute(DataAttribute::basic(
                AttributeType::AuthMethod,
                wanted.auth_method.to_u16(),
            ))
            .with_attribute(DataAttribute::basic(
                AttributeType::GroupDescription,
                wanted.group.to_u16(),
            ));

        if let Some(bits) = wanted.key_len {
            transform = transform.with_attribute(DataAttribute::basic(AttributeType::KeyLength, bits));
        }

        if let Some(seconds) = wanted.lifetime {
            transform = transform
                .with_attribute(DataAttribute::basic(
                    AttributeType::LifeType,
                    LIFE_TYPE_SECONDS,
                ))
                .with_attribute(DataAttribute::variable(AttributeType::LifeDuration, seconds));
        }

        proposal = proposal.add_transform(transform);
    }

    Ok(SaPayload::new(vec![proposal]))
}

/// Check proposal structure shared by both roles
fn single_proposal(sa: &SaPayload) -> Result<&Proposal> {
    if sa.doi != DOI_IPSEC {
        return Err(Error::Malformed(format!("unsupported DOI {}", sa.doi)));
    }
    if sa.proposals.len() != 1 {
        return Err(Error::TooManyProposals(sa.proposals.len()));
    }

    let proposal = &sa.proposals[0];
    if proposal.protocol_id != PROTO_ISAKMP {
        return Err(Error::InvalidProtocol(proposal.protocol_id));
    }
    Ok(proposal)
}

/// Select a transform from an inbound proposal (Responder)
///
/// Returns the SA payload to send back: situation and SPI copied, the
/// accepted transform echoed as the only transform.
///
/// # Errors
///
/// - `TooManyProposals`, `InvalidProtocol`, `TooManyTransforms`,
///   `InvalidTransform` for structural violations
/// - `UnsupportedAttribute` for unknown or duplicated attributes
/// - `NegotiationFailed` when no transform matches any policy group
pub fn select_proposal(sa: &SaPayload, policy: &Policy) -> Result<SaPayload> {
    let proposal = single_proposal(sa)?;

    if proposal.transforms.len() > MAX_TRANSFORMS {
        return Err(Error::TooManyTransforms(proposal.transforms.len()));
    }

    let mut offers = Vec::with_capacity(proposal.transforms.len());
    for (i, transform) in proposal.transforms.iter().enumerate() {
        if i > 0 && transform.number != proposal.transforms[i - 1].number.wrapping_add(1) {
            return Err(Error::InvalidTransform(format!(
                "transform number {} out of sequence",
                transform.number
            )));
        }
        if transform.transform_id != KEY_IKE {
            return Err(Error::InvalidTransform(format!(
                "transform id {}",
                transform.transform_id
            )));
        }
        offers.push((transform, TransformOffer::parse(transform)?));
    }

    for (transform, offer) in offers {
        if policy.transforms.iter().any(|wanted| offer.is_acceptable(wanted)) {
            let mut selected = Proposal::new(proposal.number).add_transform(transform.clone());
            selected.protocol_id = proposal.protocol_id;
            selected.spi = proposal.spi.clone();

            return Ok(SaPayload {
                doi: sa.doi,
                situation: sa.situation,
                proposals: vec![selected],
            });
        }
    }

    Err(Error::NegotiationFailed)
}

/// Convert a transform's attributes to negotiated SA attributes
///
/// # Errors
///
/// - `MissingAttribute` when encryption, hash, auth method or group is absent
/// - `UnsupportedAlgorithm` for algorithms, groups or key lengths this
///   implementation cannot use
/// - `UnsupportedAuthMethod` for methods other than PSK and RSA signatures
pub fn convert_attributes(transform: &Transform) -> Result<SaAttributes> {
    let offer = TransformOffer::parse(transform)?;

    let encryption = offer
        .encryption
        .ok_or(Error::MissingAttribute("encryption algorithm"))?;
    let hash = offer.hash.ok_or(Error::MissingAttribute("hash algorithm"))?;
    let auth_method = offer
        .auth_method
        .ok_or(Error::MissingAttribute("authentication method"))?;
    let group = offer.group.ok_or(Error::MissingAttribute("group description"))?;

    let encryption = EncryptionAlgorithm::from_u16(encryption)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("encryption {}", encryption)))?;
    CipherAlgorithm::from_negotiated(encryption, offer.key_len)?;

    let hash = HashAlgorithm::from_u16(hash)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("hash {}", hash)))?;
    PrfAlgorithm::from_hash(hash)?;

    let auth_method = match AuthMethod::from_u16(auth_method) {
        Some(method @ (AuthMethod::PreSharedKey | AuthMethod::RsaSignatures)) => method,
        _ => return Err(Error::UnsupportedAuthMethod(auth_method)),
    };

    if offer.group_type.map_or(false, |t| t != GROUP_TYPE_MODP) {
        return Err(Error::UnsupportedAlgorithm("non-MODP group".into()));
    }
    let group = DhGroup::from_u16(group)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("DH group {}", group)))?;

    Ok(SaAttributes {
        encryption,
        hash,
        auth_method,
        group,
        key_len: offer.key_len,
        lifetime: offer.lifetime_secs(),
    })
}

/// Check the Responder's selection structure (Initiator)
///
/// Returns the single selected transform.
pub fn verify_selection_sa(sa: &SaPayload) -> Result<&Transform> {
    let proposal = single_proposal(sa)?;

    if proposal.transforms.len() != 1 {
        return Err(Error::TooManyTransforms(proposal.transforms.len()));
    }

    let transform = &proposal.transforms[0];
    if transform.transform_id != KEY_IKE {
        return Err(Error::InvalidTransform(format!(
            "transform id {}",
            transform.transform_id
        )));
    }
    Ok(transform)
}

/// Check that the selection equals one of the offered groups (Initiator)
pub fn verify_attributes(attrs: &SaAttributes, policy: &Policy) -> Result<()> {
    let offered = policy.transforms.iter().any(|wanted| {
        wanted.encryption == attrs.encryption
            && wanted.hash == attrs.hash
            && wanted.auth_method == attrs.auth_method
            && wanted.group == attrs.group
            && wanted.key_len.map_or(true, |bits| attrs.key_len == Some(bits))
            && wanted
                .lifetime
                .map_or(true, |max| attrs.lifetime.map_or(false, |secs| secs <= max))
    });

    if offered {
        Ok(())
    } else {
        Err(Error::ProposalTampered)
    }
}
