//! Minimal DER reader and writer
//!
//! Only the handful of universal types needed to walk an X.509 certificate
//! or CRL are supported. Reading is built on `untrusted`, so every access is
//! bounds-checked and never panics on hostile input.

use crate::ipsec::Error;

/// A DER tag byte
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Tag(pub u8);

#[allow(missing_docs)]
impl Tag {
    pub const BOOLEAN: Self = Self(0x01);
    pub const INTEGER: Self = Self(0x02);
    pub const BIT_STRING: Self = Self(0x03);
    pub const OCTET_STRING: Self = Self(0x04);
    pub const NULL: Self = Self(0x05);
    pub const OID: Self = Self(0x06);
    pub const UTF8_STRING: Self = Self(0x0c);
    pub const PRINTABLE_STRING: Self = Self(0x13);
    pub const UTC_TIME: Self = Self(0x17);
    pub const GENERALIZED_TIME: Self = Self(0x18);
    pub const SEQUENCE: Self = Self(0x30);
    pub const SET: Self = Self(0x31);

    /// A constructed context-specific tag `[n]`.
    pub const fn context(n: u8) -> Self {
        Self(0xa0 | n)
    }

    /// A primitive context-specific tag `[n] IMPLICIT`.
    pub const fn context_primitive(n: u8) -> Self {
        Self(0x80 | n)
    }
}

impl From<untrusted::EndOfInput> for Error {
    fn from(_: untrusted::EndOfInput) -> Self {
        Error::Certificate("truncated DER".into())
    }
}

fn bad_encoding() -> Error {
    Error::Certificate("bad DER encoding".into())
}

/// Parses any DER element, returning its tag and contents.
pub fn any<'a>(buf: &mut untrusted::Reader<'a>) -> Result<(Tag, untrusted::Input<'a>), Error> {
    let tag = Tag(buf.read_byte()?);
    // Multi-byte tags are never needed here.
    if tag.0 & 0x1f == 0x1f {
        return Err(bad_encoding());
    }

    let len = match buf.read_byte()? {
        n if n & 0x80 == 0 => n as usize,
        0x81 => {
            let n = buf.read_byte()?;
            if n < 0x80 {
                return Err(bad_encoding());
            }
            n as usize
        }
        0x82 => {
            let hi = buf.read_byte()? as usize;
            let lo = buf.read_byte()? as usize;
            let n = (hi << 8) | lo;
            if n < 0x100 {
                return Err(bad_encoding());
            }
            n
        }
        _ => return Err(bad_encoding()),
    };

    Ok((tag, buf.read_bytes(len)?))
}

/// Parses an element with the given tag, returning its contents.
pub fn parse<'a>(tag: Tag, buf: &mut untrusted::Reader<'a>) -> Result<untrusted::Input<'a>, Error> {
    let (actual, data) = any(buf)?;
    if actual != tag {
        return Err(bad_encoding());
    }
    Ok(data)
}

/// Parses an element with the given tag if the next byte carries it.
pub fn opt<'a>(
    tag: Tag,
    buf: &mut untrusted::Reader<'a>,
) -> Result<Option<untrusted::Input<'a>>, Error> {
    if !buf.peek(tag.0) {
        return Ok(None);
    }
    parse(tag, buf).map(Some)
}

/// Parses an element with the given tag and runs `f` over all of its contents.
pub fn tagged<'a, R>(
    tag: Tag,
    buf: &mut untrusted::Reader<'a>,
    f: impl FnOnce(&mut untrusted::Reader<'a>) -> Result<R, Error>,
) -> Result<R, Error> {
    parse(tag, buf)?.read_all(bad_encoding(), f)
}

/// Parses an element and returns its complete encoding, header included.
pub fn raw<'a>(buf: &mut untrusted::Reader<'a>) -> Result<untrusted::Input<'a>, Error> {
    let (raw, _) = buf.read_partial(|buf| any(buf))?;
    Ok(raw)
}

/// Parses a non-negative `INTEGER`, returning its big-endian bytes.
pub fn uint<'a>(buf: &mut untrusted::Reader<'a>) -> Result<untrusted::Input<'a>, Error> {
    let data = parse(Tag::INTEGER, buf)?;
    let bytes = data.as_slice_less_safe();
    match bytes {
        [] => Err(bad_encoding()),
        [first, ..] if first & 0x80 != 0 => Err(bad_encoding()),
        [0, second, ..] if second & 0x80 == 0 => Err(bad_encoding()),
        _ => Ok(data),
    }
}

/// Parses a `BIT STRING` with no unused bits.
pub fn bits<'a>(buf: &mut untrusted::Reader<'a>) -> Result<untrusted::Input<'a>, Error> {
    tagged(Tag::BIT_STRING, buf, |buf| {
        if buf.read_byte()? != 0 {
            return Err(bad_encoding());
        }
        Ok(buf.read_bytes_to_end())
    })
}

/// Parses an `OBJECT IDENTIFIER`; OIDs are only ever compared bytewise.
pub fn oid<'a>(buf: &mut untrusted::Reader<'a>) -> Result<&'a [u8], Error> {
    Ok(parse(Tag::OID, buf)?.as_slice_less_safe())
}

/// Parses a `UTCTime` or `GeneralizedTime` without interpreting it.
pub fn time<'a>(buf: &mut untrusted::Reader<'a>) -> Result<untrusted::Input<'a>, Error> {
    let (tag, data) = any(buf)?;
    if tag != Tag::UTC_TIME && tag != Tag::GENERALIZED_TIME {
        return Err(bad_encoding());
    }
    Ok(data)
}

/// Parses an optional `BOOLEAN`.
pub fn opt_bool(buf: &mut untrusted::Reader) -> Result<Option<bool>, Error> {
    match opt(Tag::BOOLEAN, buf)?.map(|b| b.as_slice_less_safe()) {
        None => Ok(None),
        Some([0x00]) => Ok(Some(false)),
        Some([0xff]) => Ok(Some(true)),
        Some(_) => Err(bad_encoding()),
    }
}

/// DER encoding helpers.
pub mod write {
    use super::Tag;

    /// Encodes a single element.
    pub fn element(tag: Tag, contents: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(contents.len() + 4);
        out.push(tag.0);
        match contents.len() {
            n if n < 0x80 => out.push(n as u8),
            n if n < 0x100 => out.extend_from_slice(&[0x81, n as u8]),
            n => out.extend_from_slice(&[0x82, (n >> 8) as u8, n as u8]),
        }
        out.extend_from_slice(contents);
        out
    }

    /// Encodes a constructed element from already-encoded children.
    pub fn constructed(tag: Tag, children: &[&[u8]]) -> Vec<u8> {
        element(tag, &children.concat())
    }

    /// Encodes a `SEQUENCE` from already-encoded children.
    pub fn sequence(children: &[&[u8]]) -> Vec<u8> {
        constructed(Tag::SEQUENCE, children)
    }

    /// Encodes a non-negative `INTEGER` from big-endian bytes.
    pub fn uint(value: &[u8]) -> Vec<u8> {
        let start = value.iter().position(|&b| b != 0).unwrap_or(value.len());
        let trimmed = &value[start..];

        let mut contents = Vec::with_capacity(trimmed.len() + 1);
        if trimmed.first().map_or(true, |b| b & 0x80 != 0) {
            contents.push(0);
        }
        contents.extend_from_slice(trimmed);
        element(Tag::INTEGER, &contents)
    }

    /// Encodes a `BIT STRING` with no unused bits.
    pub fn bits(value: &[u8]) -> Vec<u8> {
        let mut contents = Vec::with_capacity(value.len() + 1);
        contents.push(0);
        contents.extend_from_slice(value);
        element(Tag::BIT_STRING, &contents)
    }

    /// Encodes an `OBJECT IDENTIFIER` from its content bytes.
    pub fn oid(value: &[u8]) -> Vec<u8> {
        element(Tag::OID, value)
    }

    /// Encodes `NULL`.
    pub fn null() -> Vec<u8> {
        element(Tag::NULL, &[])
    }
}
