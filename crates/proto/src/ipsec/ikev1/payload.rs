//! ISAKMP payload bodies
//!
//! Implements the payload formats of RFC 2408 Section 3.4 - 3.14 as used by
//! the IPsec DOI (RFC 2407). Every type here works on the payload *body*,
//! i.e. the bytes following the 4-byte generic payload header.

use super::constants::*;
use crate::ipsec::{Error, Result};

/// Attribute Format bit: set for TV (basic) attributes
const ATTRIBUTE_FORMAT_TV: u16 = 0x8000;

/// Security Association data attribute (RFC 2408 Section 3.3)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |A|       Attribute Type        |    AF=0  Attribute Length     |
/// |F|                             |    AF=1  Attribute Value      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// .                   AF=0  Attribute Value                       .
/// .                   AF=1  Not Transmitted                       .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAttribute {
    /// Attribute type (AF bit stripped)
    pub attr_type: u16,

    /// Big-endian attribute value
    pub value: Vec<u8>,

    /// Encoded as TV (basic) rather than TLV
    pub basic: bool,
}

impl DataAttribute {
    /// Basic (TV) attribute with a 16-bit value
    pub fn basic(attr_type: AttributeType, value: u16) -> Self {
        DataAttribute {
            attr_type: attr_type.to_u16(),
            value: value.to_be_bytes().to_vec(),
            basic: true,
        }
    }

    /// Variable attribute; encoded TV when the value fits in 16 bits
    pub fn variable(attr_type: AttributeType, value: u32) -> Self {
        if value <= u16::MAX as u32 {
            Self::basic(attr_type, value as u16)
        } else {
            DataAttribute {
                attr_type: attr_type.to_u16(),
                value: value.to_be_bytes().to_vec(),
                basic: false,
            }
        }
    }

    /// Value as an integer, if it fits in 32 bits
    pub fn as_u32(&self) -> Option<u32> {
        if self.value.len() > 4 {
            return None;
        }
        Some(self.value.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }

    /// Parse one attribute, returning it and the bytes consumed
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let raw_type = u16::from_be_bytes([data[0], data[1]]);
        let attr_type = raw_type & !ATTRIBUTE_FORMAT_TV;

        if raw_type & ATTRIBUTE_FORMAT_TV != 0 {
            return Ok((
                DataAttribute {
                    attr_type,
                    value: data[2..4].to_vec(),
                    basic: true,
                },
                4,
            ));
        }

        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() < 4 + length {
            return Err(Error::InvalidLength {
                expected: 4 + length,
                actual: data.len(),
            });
        }

        Ok((
            DataAttribute {
                attr_type,
                value: data[4..4 + length].to_vec(),
                basic: false,
            },
            4 + length,
        ))
    }

    /// Serialize the attribute
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.value.len());
        if self.basic {
            bytes.extend_from_slice(&(self.attr_type | ATTRIBUTE_FORMAT_TV).to_be_bytes());
            let mut value = [0u8; 2];
            let start = 2usize.saturating_sub(self.value.len());
            value[start..].copy_from_slice(&self.value[self.value.len().saturating_sub(2)..]);
            bytes.extend_from_slice(&value);
        } else {
            bytes.extend_from_slice(&self.attr_type.to_be_bytes());
            bytes.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
            bytes.extend_from_slice(&self.value);
        }
        bytes
    }
}

/// Transform payload (RFC 2408 Section 3.6)
///
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |   RESERVED    |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Transform #  |  Transform-Id |           RESERVED2           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                        SA Attributes                          ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    /// Transform number
    pub number: u8,

    /// Transform id (KEY_IKE for Phase 1)
    pub transform_id: u8,

    /// SA attributes in wire order
    pub attributes: Vec<DataAttribute>,
}

impl Transform {
    /// Create a KEY_IKE transform
    pub fn new(number: u8) -> Self {
        Transform {
            number,
            transform_id: KEY_IKE,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, attribute: DataAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// First attribute of a given type
    pub fn attribute(&self, attr_type: AttributeType) -> Option<&DataAttribute> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == attr_type.to_u16())
    }

    /// Serialize including the generic header
    pub fn to_bytes(&self, is_last: bool) -> Vec<u8> {
        let attributes: Vec<u8> = self.attributes.iter().flat_map(|a| a.to_bytes()).collect();
        let length = PAYLOAD_HEADER_SIZE + 4 + attributes.len();

        let mut bytes = Vec::with_capacity(length);
        bytes.push(if is_last {
            PayloadType::None.to_u8()
        } else {
            PayloadType::Transform.to_u8()
        });
        bytes.push(0);
        bytes.extend_from_slice(&(length as u16).to_be_bytes());
        bytes.push(self.number);
        bytes.push(self.transform_id);
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.extend_from_slice(&attributes);
        bytes
    }

    /// Parse a transform including the generic header
    ///
    /// Returns the transform, the next payload type and the bytes consumed.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, u8, usize)> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let next = data[0];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < 8 || length > data.len() {
            return Err(Error::InvalidLength {
                expected: length,
                actual: data.len(),
            });
        }

        let number = data[4];
        let transform_id = data[5];

        let mut attributes = Vec::new();
        let mut offset = 8;
        while offset < length {
            let (attribute, consumed) = DataAttribute::from_bytes(&data[offset..length])?;
            attributes.push(attribute);
            offset += consumed;
        }

        Ok((
            Transform {
                number,
                transform_id,
                attributes,
            },
            next,
            length,
        ))
    }
}

/// Proposal payload (RFC 2408 Section 3.5)
///
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |   RESERVED    |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Proposal #   |  Protocol-Id  |    SPI Size   |# of Transforms|
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                        SPI (variable)                         ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal number
    pub number: u8,

    /// Protocol id (ISAKMP for Phase 1)
    pub protocol_id: u8,

    /// SPI (empty for Phase 1)
    pub spi: Vec<u8>,

    /// Number of transforms announced in the proposal header
    pub declared_transforms: u8,

    /// Transforms in wire order
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Create an ISAKMP proposal
    pub fn new(number: u8) -> Self {
        Proposal {
            number,
            protocol_id: PROTO_ISAKMP,
            spi: Vec::new(),
            declared_transforms: 0,
            transforms: Vec::new(),
        }
    }

    /// Add a transform
    pub fn add_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self.declared_transforms = self.transforms.len() as u8;
        self
    }

    /// Serialize including the generic header
    pub fn to_bytes(&self, is_last: bool) -> Vec<u8> {
        let transforms: Vec<u8> = self
            .transforms
            .iter()
            .enumerate()
            .flat_map(|(i, t)| t.to_bytes(i + 1 == self.transforms.len()))
            .collect();
        let length = PAYLOAD_HEADER_SIZE + 4 + self.spi.len() + transforms.len();

        let mut bytes = Vec::with_capacity(length);
        bytes.push(if is_last {
            PayloadType::None.to_u8()
        } else {
            PayloadType::Proposal.to_u8()
        });
        bytes.push(0);
        bytes.extend_from_slice(&(length as u16).to_be_bytes());
        bytes.push(self.number);
        bytes.push(self.protocol_id);
        bytes.push(self.spi.len() as u8);
        bytes.push(self.transforms.len() as u8);
        bytes.extend_from_slice(&self.spi);
        bytes.extend_from_slice(&transforms);
        bytes
    }

    /// Parse a proposal including the generic header
    ///
    /// Returns the proposal, the next payload type and the bytes consumed.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, u8, usize)> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let next = data[0];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < 8 || length > data.len() {
            return Err(Error::InvalidLength {
                expected: length,
                actual: data.len(),
            });
        }

        let number = data[4];
        let protocol_id = data[5];
        let spi_size = data[6] as usize;
        let declared_transforms = data[7];

        if 8 + spi_size > length {
            return Err(Error::Malformed(format!("SPI size {} overruns proposal", spi_size)));
        }
        let spi = data[8..8 + spi_size].to_vec();

        let mut transforms = Vec::new();
        let mut offset = 8 + spi_size;
        let mut more = offset < length;
        while more {
            let (transform, next_transform, consumed) = Transform::from_bytes(&data[offset..length])?;
            transforms.push(transform);
            offset += consumed;

            more = match PayloadType::from_u8(next_transform) {
                Some(PayloadType::Transform) => true,
                Some(PayloadType::None) => false,
                _ => return Err(Error::UnexpectedPayload(next_transform)),
            };
        }

        if offset != length {
            return Err(Error::Malformed("trailing bytes in proposal".into()));
        }

        if transforms.len() != declared_transforms as usize {
            return Err(Error::Malformed(format!(
                "proposal announces {} transforms, carries {}",
                declared_transforms,
                transforms.len()
            )));
        }

        Ok((
            Proposal {
                number,
                protocol_id,
                spi,
                declared_transforms,
                transforms,
            },
            next,
            length,
        ))
    }
}

/// Security Association payload (RFC 2408 Section 3.4, RFC 2407 Section 4.6.1)
///
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |              Domain of Interpretation  (DOI)                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Situation                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                    Proposal payloads ...                      ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// Domain of interpretation
    pub doi: u32,

    /// Situation bitmap
    pub situation: u32,

    /// Proposals in wire order
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// Create an IPsec DOI, identity-only SA payload
    pub fn new(proposals: Vec<Proposal>) -> Self {
        SaPayload {
            doi: DOI_IPSEC,
            situation: SIT_IDENTITY_ONLY,
            proposals,
        }
    }

    /// Parse SA payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let doi = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let situation = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

        let mut proposals = Vec::new();
        let mut offset = 8;
        let mut more = offset < data.len();
        while more {
            let (proposal, next, consumed) = Proposal::from_bytes(&data[offset..])?;
            proposals.push(proposal);
            offset += consumed;

            more = match PayloadType::from_u8(next) {
                Some(PayloadType::Proposal) => true,
                Some(PayloadType::None) => false,
                _ => return Err(Error::UnexpectedPayload(next)),
            };
        }

        if offset != data.len() {
            return Err(Error::Malformed("trailing bytes in SA payload".into()));
        }

        Ok(SaPayload {
            doi,
            situation,
            proposals,
        })
    }

    /// Serialize SA payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.doi.to_be_bytes());
        data.extend_from_slice(&self.situation.to_be_bytes());
        for (i, proposal) in self.proposals.iter().enumerate() {
            data.extend_from_slice(&proposal.to_bytes(i + 1 == self.proposals.len()));
        }
        data
    }
}

/// Key Exchange payload (RFC 2408 Section 3.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KePayload {
    /// Diffie-Hellman public value
    pub key_data: Vec<u8>,
}

impl KePayload {
    /// Parse KE payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Malformed("empty key exchange data".into()));
        }
        Ok(KePayload {
            key_data: data.to_vec(),
        })
    }

    /// Serialize KE payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        self.key_data.clone()
    }
}

/// Nonce payload (RFC 2408 Section 3.13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncePayload {
    /// Nonce data
    pub nonce: Vec<u8>,
}

impl NoncePayload {
    /// Parse nonce payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_NONCE_LEN || data.len() > MAX_NONCE_LEN {
            return Err(Error::Malformed(format!(
                "nonce length {} outside {}..={}",
                data.len(),
                MIN_NONCE_LEN,
                MAX_NONCE_LEN
            )));
        }
        Ok(NoncePayload {
            nonce: data.to_vec(),
        })
    }

    /// Serialize nonce payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        self.nonce.clone()
    }
}

/// Identification payload (RFC 2407 Section 4.6.2)
///
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ID Type     |  Protocol ID  |             Port              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                     Identification Data                       ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPayload {
    /// Identification type
    pub id_type: u8,

    /// IP protocol (0 = any)
    pub protocol_id: u8,

    /// Port (0 = any)
    pub port: u16,

    /// Identification data
    pub data: Vec<u8>,
}

impl IdPayload {
    /// Parse ID payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        Ok(IdPayload {
            id_type: data[0],
            protocol_id: data[1],
            port: u16::from_be_bytes([data[2], data[3]]),
            data: data[4..].to_vec(),
        })
    }

    /// Serialize ID payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.push(self.id_type);
        bytes.push(self.protocol_id);
        bytes.extend_from_slice(&self.port.to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Certificate payload (RFC 2408 Section 3.9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPayload {
    /// Certificate encoding
    pub encoding: u8,

    /// Certificate data
    pub data: Vec<u8>,
}

impl CertPayload {
    /// Parse CERT payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::Malformed("certificate payload without data".into()));
        }
        Ok(CertPayload {
            encoding: data[0],
            data: data[1..].to_vec(),
        })
    }

    /// Serialize CERT payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.data.len());
        bytes.push(self.encoding);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Certificate Request payload (RFC 2408 Section 3.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertReqPayload {
    /// Requested certificate type
    pub cert_type: u8,

    /// Acceptable certificate authority (DER distinguished name, may be empty)
    pub authority: Vec<u8>,
}

impl CertReqPayload {
    /// Parse CR payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Malformed("empty certificate request".into()));
        }
        Ok(CertReqPayload {
            cert_type: data[0],
            authority: data[1..].to_vec(),
        })
    }

    /// Serialize CR payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.authority.len());
        bytes.push(self.cert_type);
        bytes.extend_from_slice(&self.authority);
        bytes
    }
}

/// Notification payload (RFC 2408 Section 3.14)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Domain of interpretation
    pub doi: u32,

    /// Protocol id
    pub protocol_id: u8,

    /// Notify message type
    pub notify_type: u16,

    /// SPI
    pub spi: Vec<u8>,

    /// Notification data
    pub data: Vec<u8>,
}

impl NotifyPayload {
    /// Parse N payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let spi_size = data[5] as usize;
        if data.len() < 8 + spi_size {
            return Err(Error::BufferTooShort {
                required: 8 + spi_size,
                available: data.len(),
            });
        }

        Ok(NotifyPayload {
            doi: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            protocol_id: data[4],
            notify_type: u16::from_be_bytes([data[6], data[7]]),
            spi: data[8..8 + spi_size].to_vec(),
            data: data[8 + spi_size..].to_vec(),
        })
    }

    /// Serialize N payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.spi.len() + self.data.len());
        bytes.extend_from_slice(&self.doi.to_be_bytes());
        bytes.push(self.protocol_id);
        bytes.push(self.spi.len() as u8);
        bytes.extend_from_slice(&self.notify_type.to_be_bytes());
        bytes.extend_from_slice(&self.spi);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}
