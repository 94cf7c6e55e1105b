//! ISAKMP message structures and parsing
//!
//! Implements the ISAKMP header and generic payload chain defined in
//! RFC 2408 Section 3.1 and 3.2. Payload bodies are kept verbatim so that
//! the authentication hash can be computed over the exact bytes that
//! crossed the wire.

use super::constants::*;
use crate::ipsec::{Error, Result};

/// An 8-byte ISAKMP cookie
pub type Cookie = [u8; COOKIE_LEN];

/// The all-zero cookie sent by an Initiator before the Responder picked one
pub const ZERO_COOKIE: Cookie = [0u8; COOKIE_LEN];

/// ISAKMP message header (28 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Initiator                            |
/// |                            Cookie                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Responder                            |
/// |                            Cookie                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Message ID                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Length                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsakmpHeader {
    /// Initiator cookie
    pub initiator_cookie: Cookie,

    /// Responder cookie (zero in the Initiator's first message)
    pub responder_cookie: Cookie,

    /// Type of the first payload
    pub next_payload: u8,

    /// Protocol version (0x10 for ISAKMP 1.0)
    pub version: u8,

    /// Exchange type
    pub exchange_type: ExchangeType,

    /// Header flags
    pub flags: HeaderFlags,

    /// Message ID (zero for every Phase 1 message)
    pub message_id: u32,

    /// Total message length in bytes (including header)
    pub length: u32,
}

impl IsakmpHeader {
    /// Create a Phase 1 Main Mode header
    ///
    /// `next_payload` and `length` are filled in when the message is
    /// assembled.
    pub fn main_mode(initiator_cookie: Cookie, responder_cookie: Cookie, flags: HeaderFlags) -> Self {
        IsakmpHeader {
            initiator_cookie,
            responder_cookie,
            next_payload: PayloadType::None.to_u8(),
            version: ISAKMP_VERSION,
            exchange_type: ExchangeType::IdentityProtection,
            flags,
            message_id: 0,
            length: HEADER_SIZE as u32,
        }
    }

    /// Parse ISAKMP header from bytes
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too short (< 28 bytes)
    /// - Major version is not 1
    /// - Exchange type is unknown
    /// - Message length is smaller than the header or larger than 64KB
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut initiator_cookie = [0u8; COOKIE_LEN];
        let mut responder_cookie = [0u8; COOKIE_LEN];
        initiator_cookie.copy_from_slice(&data[0..8]);
        responder_cookie.copy_from_slice(&data[8..16]);

        let next_payload = data[16];

        // Only the major version has to match
        let version = data[17];
        if version >> 4 != ISAKMP_VERSION >> 4 {
            return Err(Error::UnsupportedVersion(version));
        }

        let exchange_type = ExchangeType::from_u8(data[18])
            .ok_or(Error::UnsupportedExchangeType(data[18]))?;

        let flags = HeaderFlags::new(data[19]);
        let message_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        if length > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(length));
        }

        if length < HEADER_SIZE as u32 {
            return Err(Error::InvalidLength {
                expected: HEADER_SIZE,
                actual: length as usize,
            });
        }

        Ok(IsakmpHeader {
            initiator_cookie,
            responder_cookie,
            next_payload,
            version,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }

    /// Serialize ISAKMP header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.initiator_cookie);
        bytes[8..16].copy_from_slice(&self.responder_cookie);
        bytes[16] = self.next_payload;
        bytes[17] = self.version;
        bytes[18] = self.exchange_type.to_u8();
        bytes[19] = self.flags.value();
        bytes[20..24].copy_from_slice(&self.message_id.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Whether the Responder cookie has been assigned
    pub fn has_responder_cookie(&self) -> bool {
        self.responder_cookie != ZERO_COOKIE
    }
}

/// Generic payload header (4 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |   RESERVED    |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Type of the following payload
    pub next_payload: u8,
    /// Length of this payload including the header
    pub length: u16,
}

impl PayloadHeader {
    /// Parse a generic payload header
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < PAYLOAD_HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: PAYLOAD_HEADER_SIZE,
                available: data.len(),
            });
        }

        let length = u16::from_be_bytes([data[2], data[3]]);
        if (length as usize) < PAYLOAD_HEADER_SIZE {
            return Err(Error::Malformed(format!(
                "payload length {} shorter than its header",
                length
            )));
        }

        Ok(PayloadHeader {
            next_payload: data[0],
            length,
        })
    }

    /// Serialize the generic payload header
    pub fn to_bytes(&self) -> [u8; PAYLOAD_HEADER_SIZE] {
        let len = self.length.to_be_bytes();
        [self.next_payload, 0, len[0], len[1]]
    }
}

/// One payload of a message, body kept exactly as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    /// Payload type number (may be unknown to this implementation)
    pub payload_type: u8,
    /// Payload body without the generic header
    pub body: Vec<u8>,
}

impl RawPayload {
    /// Known payload type, if any
    pub fn kind(&self) -> Option<PayloadType> {
        PayloadType::from_u8(self.payload_type)
    }
}

/// A decoded ISAKMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message header
    pub header: IsakmpHeader,
    /// Payloads in wire order
    pub payloads: Vec<RawPayload>,
}

impl Message {
    /// Decode a plaintext message
    ///
    /// The payload chain must end exactly at the length given in the header.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = IsakmpHeader::from_bytes(data)?;
        let body = message_body(&header, data)?;
        let payloads = parse_payload_chain(header.next_payload, body, false)?;
        Ok(Message { header, payloads })
    }

    /// Decode a message body that has been decrypted
    ///
    /// Trailing block-cipher padding after the last payload is ignored.
    pub fn from_decrypted(header: IsakmpHeader, plaintext: &[u8]) -> Result<Self> {
        let payloads = parse_payload_chain(header.next_payload, plaintext, true)?;
        Ok(Message { header, payloads })
    }

    /// First payload of a given type
    pub fn find(&self, payload_type: PayloadType) -> Option<&RawPayload> {
        self.payloads
            .iter()
            .find(|p| p.payload_type == payload_type.to_u8())
    }

    /// All payloads of a given type
    pub fn find_all(&self, payload_type: PayloadType) -> impl Iterator<Item = &RawPayload> {
        self.payloads
            .iter()
            .filter(move |p| p.payload_type == payload_type.to_u8())
    }

    /// Verbatim body of the first payload of a given type
    pub fn payload_body(&self, payload_type: PayloadType) -> Option<&[u8]> {
        self.find(payload_type).map(|p| p.body.as_slice())
    }

    /// Type of the first payload
    pub fn first_payload(&self) -> Option<u8> {
        self.payloads.first().map(|p| p.payload_type)
    }
}

/// Slice of `data` covered by the header length, header excluded
pub fn message_body<'a>(header: &IsakmpHeader, data: &'a [u8]) -> Result<&'a [u8]> {
    let length = header.length as usize;
    if data.len() < length {
        return Err(Error::InvalidLength {
            expected: length,
            actual: data.len(),
        });
    }
    Ok(&data[HEADER_SIZE..length])
}

/// Walk a chain of generic payloads
fn parse_payload_chain(first: u8, data: &[u8], allow_padding: bool) -> Result<Vec<RawPayload>> {
    let mut payloads = Vec::new();
    let mut next = first;
    let mut offset = 0;

    while next != PayloadType::None.to_u8() {
        let header = PayloadHeader::from_bytes(&data[offset..])?;
        let end = offset + header.length as usize;
        if end > data.len() {
            return Err(Error::InvalidLength {
                expected: header.length as usize,
                actual: data.len() - offset,
            });
        }

        payloads.push(RawPayload {
            payload_type: next,
            body: data[offset + PAYLOAD_HEADER_SIZE..end].to_vec(),
        });

        next = header.next_payload;
        offset = end;
    }

    if offset != data.len() && !allow_padding {
        return Err(Error::Malformed(format!(
            "{} trailing bytes after last payload",
            data.len() - offset
        )));
    }

    Ok(payloads)
}

/// An outbound message under construction
///
/// Payload bodies are appended in order; the generic headers and their
/// next-payload links are produced when the chain is serialized.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Header template (next payload and length are overwritten)
    pub header: IsakmpHeader,
    payloads: Vec<(PayloadType, Vec<u8>)>,
}

impl OutboundMessage {
    /// Start a new message
    pub fn new(header: IsakmpHeader) -> Self {
        OutboundMessage {
            header,
            payloads: Vec::new(),
        }
    }

    /// Append a payload body
    pub fn push(&mut self, payload_type: PayloadType, body: Vec<u8>) {
        self.payloads.push((payload_type, body));
    }

    /// Body of the first appended payload of a type
    pub fn body(&self, payload_type: PayloadType) -> Option<&[u8]> {
        self.payloads
            .iter()
            .find(|(t, _)| *t == payload_type)
            .map(|(_, b)| b.as_slice())
    }

    /// Types of the appended payloads, in order
    pub fn payload_types(&self) -> Vec<PayloadType> {
        self.payloads.iter().map(|(t, _)| *t).collect()
    }

    /// Serialize the payload chain (everything after the header)
    pub fn payload_chain(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (i, (_, body)) in self.payloads.iter().enumerate() {
            let next = self
                .payloads
                .get(i + 1)
                .map(|(t, _)| *t)
                .unwrap_or(PayloadType::None);
            let length = PAYLOAD_HEADER_SIZE + body.len();
            if length > u16::MAX as usize {
                return Err(Error::MessageTooLarge(length as u32));
            }
            let header = PayloadHeader {
                next_payload: next.to_u8(),
                length: length as u16,
            };
            out.extend_from_slice(&header.to_bytes());
            out.extend_from_slice(body);
        }
        Ok(out)
    }

    /// Assemble header and an already prepared body
    ///
    /// `body` is either the plaintext payload chain or its encryption.
    pub fn assemble(&self, body: &[u8]) -> Result<Vec<u8>> {
        let total = HEADER_SIZE + body.len();
        if total > MAX_MESSAGE_SIZE as usize {
            return Err(Error::MessageTooLarge(total as u32));
        }

        let mut header = self.header.clone();
        header.next_payload = self
            .payloads
            .first()
            .map(|(t, _)| t.to_u8())
            .unwrap_or(PayloadType::None.to_u8());
        header.length = total as u32;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(body);
        Ok(out)
    }

    /// Serialize as a plaintext message
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let chain = self.payload_chain()?;
        self.assemble(&chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[16] = PayloadType::None.to_u8();
        data[17] = ISAKMP_VERSION;
        data[18] = ExchangeType::IdentityProtection.to_u8();
        data[24..28].copy_from_slice(&(HEADER_SIZE as u32).to_be_bytes());
        data
    }

    #[test]
    fn test_header_parse() {
        let data = sample_header();
        let header = IsakmpHeader::from_bytes(&data).unwrap();
        assert_eq!(header.initiator_cookie, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!header.has_responder_cookie());
        assert_eq!(header.exchange_type, ExchangeType::IdentityProtection);
        assert_eq!(header.message_id, 0);
        assert_eq!(header.to_bytes().to_vec(), data);
    }

    #[test]
    fn test_header_too_short() {
        let result = IsakmpHeader::from_bytes(&[0u8; 10]);
        assert!(matches!(
            result,
            Err(Error::BufferTooShort {
                required: 28,
                available: 10
            })
        ));
    }

    #[test]
    fn test_header_rejects_ikev2_version() {
        let mut data = sample_header();
        data[17] = 0x20;
        assert_eq!(
            IsakmpHeader::from_bytes(&data),
            Err(Error::UnsupportedVersion(0x20))
        );
    }

    #[test]
    fn test_header_accepts_other_minor_version() {
        let mut data = sample_header();
        data[17] = 0x11;
        assert!(IsakmpHeader::from_bytes(&data).is_ok());
    }

    #[test]
    fn test_header_length_below_header_size() {
        let mut data = sample_header();
        data[24..28].copy_from_slice(&20u32.to_be_bytes());
        assert!(matches!(
            IsakmpHeader::from_bytes(&data),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_message_keeps_payload_bodies_verbatim() {
        let header = IsakmpHeader::main_mode([9; 8], ZERO_COOKIE, HeaderFlags::default());
        let mut msg = OutboundMessage::new(header);
        msg.push(PayloadType::SA, vec![0xAA, 0xBB, 0xCC]);
        msg.push(PayloadType::VID, vec![0x01]);

        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.header.next_payload, PayloadType::SA.to_u8());
        assert_eq!(decoded.payloads.len(), 2);
        assert_eq!(
            decoded.payload_body(PayloadType::SA),
            Some(&[0xAA, 0xBB, 0xCC][..])
        );
        assert_eq!(decoded.first_payload(), Some(PayloadType::SA.to_u8()));
    }

    #[test]
    fn test_payload_overruns_message() {
        let mut data = sample_header();
        data[16] = PayloadType::Nonce.to_u8();
        // Nonce payload claims 40 bytes but only 8 follow
        data.extend_from_slice(&[0, 0, 0, 40, 1, 2, 3, 4]);
        let total = data.len() as u32;
        data[24..28].copy_from_slice(&total.to_be_bytes());

        assert!(matches!(
            Message::from_bytes(&data),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected_unless_decrypted() {
        let mut data = sample_header();
        data[16] = PayloadType::Nonce.to_u8();
        data.extend_from_slice(&[0, 0, 0, 6, 1, 2, 0, 0]);
        let total = data.len() as u32;
        data[24..28].copy_from_slice(&total.to_be_bytes());

        assert!(matches!(
            Message::from_bytes(&data),
            Err(Error::Malformed(_))
        ));

        let header = IsakmpHeader::from_bytes(&data).unwrap();
        let decrypted = Message::from_decrypted(header, &data[HEADER_SIZE..]).unwrap();
        assert_eq!(decrypted.payload_body(PayloadType::Nonce), Some(&[1, 2][..]));
    }

    #[test]
    fn test_payload_length_shorter_than_header() {
        assert!(matches!(
            PayloadHeader::from_bytes(&[0, 0, 0, 2]),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_datagram() {
        let mut data = sample_header();
        data[24..28].copy_from_slice(&64u32.to_be_bytes());
        assert!(matches!(
            Message::from_bytes(&data),
            Err(Error::InvalidLength {
                expected: 64,
                actual: 28
            })
        ));
    }
}
