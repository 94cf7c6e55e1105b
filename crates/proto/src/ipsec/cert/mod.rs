//! X.509 certificates and CRLs
//!
//! Main Mode signature authentication needs only a small part of X.509:
//! the subject and issuer names, the RSA public key, subjectAltName entries
//! for identity checks, and the issuer signature. This module reads exactly
//! that and nothing more. Validity periods and extensions other than
//! subjectAltName are not interpreted.
//!
//! [`CertificateBuilder`] and [`RevocationListBuilder`] issue minimal
//! certificates and CRLs in the same format, which is enough to provision
//! test peers without external tooling.

pub mod der;

use self::der::{write, Tag};
use super::crypto::decode_pem_or_der;
use super::crypto::sign::{self, SignatureDigest};
use super::ikev1::identity::Identifier;
use super::{Error, Result};
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

const OID_RSA_PREFIX: [u8; 8] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01];
const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1d, 0x11];
const OID_COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];

const SAN_RFC822: Tag = Tag::context_primitive(1);
const SAN_DNS: Tag = Tag::context_primitive(2);
const SAN_IP: Tag = Tag::context_primitive(7);

fn bad(what: &str) -> Error {
    Error::Certificate(format!("malformed {}", what))
}

fn digest_oid(digest: SignatureDigest) -> Vec<u8> {
    let last = match digest {
        SignatureDigest::Sha1 => 0x05,
        SignatureDigest::Sha256 => 0x0b,
        SignatureDigest::Sha384 => 0x0c,
        SignatureDigest::Sha512 => 0x0d,
    };
    let mut oid = OID_RSA_PREFIX.to_vec();
    oid.push(last);
    oid
}

fn digest_from_oid(oid: &[u8]) -> Result<SignatureDigest> {
    match oid.split_last() {
        Some((last, prefix)) if prefix == OID_RSA_PREFIX => match *last {
            0x05 => Ok(SignatureDigest::Sha1),
            0x0b => Ok(SignatureDigest::Sha256),
            0x0c => Ok(SignatureDigest::Sha384),
            0x0d => Ok(SignatureDigest::Sha512),
            _ => Err(Error::Certificate("unsupported signature algorithm".into())),
        },
        _ => Err(Error::Certificate("unsupported signature algorithm".into())),
    }
}

/// Parses an `AlgorithmIdentifier`, ignoring the parameters.
fn signature_algorithm(buf: &mut untrusted::Reader) -> Result<SignatureDigest> {
    der::tagged(Tag::SEQUENCE, buf, |buf| {
        let oid = der::oid(buf)?;
        buf.skip_to_end();
        digest_from_oid(oid)
    })
}

/// Parses a `Name`, keeping its full encoding.
fn name<'a>(buf: &mut untrusted::Reader<'a>) -> Result<&'a [u8]> {
    if !buf.peek(Tag::SEQUENCE.0) {
        return Err(bad("name"));
    }
    Ok(der::raw(buf)?.as_slice_less_safe())
}

/// The outer `SEQUENCE { tbs, signatureAlgorithm, signatureValue }` shared by
/// certificates and CRLs.
struct Signed<'a> {
    tbs: &'a [u8],
    tbs_contents: untrusted::Input<'a>,
    digest: SignatureDigest,
    signature: &'a [u8],
}

fn signed(data: &[u8]) -> Result<Signed<'_>> {
    untrusted::Input::from(data).read_all(bad("signed object"), |buf| {
        der::tagged(Tag::SEQUENCE, buf, |buf| {
            let tbs = der::raw(buf)?;
            let tbs_contents = tbs.read_all(bad("tbs"), |buf| der::parse(Tag::SEQUENCE, buf))?;
            let digest = signature_algorithm(buf)?;
            let signature = der::bits(buf)?;
            Ok(Signed {
                tbs: tbs.as_slice_less_safe(),
                tbs_contents,
                digest,
                signature: signature.as_slice_less_safe(),
            })
        })
    })
}

/// Encodes a distinguished name with a single common name attribute
pub fn distinguished_name(common_name: &str) -> Vec<u8> {
    let attribute = write::sequence(&[
        &write::oid(OID_COMMON_NAME),
        &write::element(Tag::UTF8_STRING, common_name.as_bytes()),
    ]);
    write::sequence(&[&write::constructed(Tag::SET, &[&attribute])])
}

/// A parsed X.509 certificate
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    tbs: Vec<u8>,
    serial: Vec<u8>,
    issuer: Vec<u8>,
    subject: Vec<u8>,
    spki: Vec<u8>,
    alt_names: Vec<Identifier>,
    digest: SignatureDigest,
    signature: Vec<u8>,
}

impl Certificate {
    /// Parse a DER-encoded certificate
    pub fn from_der(data: &[u8]) -> Result<Self> {
        let outer = signed(data)?;

        outer.tbs_contents.read_all(bad("certificate"), |buf| {
            let _version = der::opt(Tag::context(0), buf)?;
            let serial = der::uint(buf)?;
            let inner_digest = signature_algorithm(buf)?;
            if inner_digest != outer.digest {
                return Err(Error::Certificate("signature algorithm mismatch".into()));
            }
            let issuer = name(buf)?;
            let _validity = der::parse(Tag::SEQUENCE, buf)?;
            let subject = name(buf)?;
            if !buf.peek(Tag::SEQUENCE.0) {
                return Err(bad("subject public key info"));
            }
            let spki = der::raw(buf)?;
            let _issuer_uid = der::opt(Tag::context_primitive(1), buf)?;
            let _subject_uid = der::opt(Tag::context_primitive(2), buf)?;

            let alt_names = match der::opt(Tag::context(3), buf)? {
                Some(exts) => exts.read_all(bad("extensions"), |buf| {
                    der::tagged(Tag::SEQUENCE, buf, extensions)
                })?,
                None => Vec::new(),
            };

            Ok(Certificate {
                der: data.to_vec(),
                tbs: outer.tbs.to_vec(),
                serial: serial.as_slice_less_safe().to_vec(),
                issuer: issuer.to_vec(),
                subject: subject.to_vec(),
                spki: spki.as_slice_less_safe().to_vec(),
                alt_names,
                digest: outer.digest,
                signature: outer.signature.to_vec(),
            })
        })
    }

    /// Parse a PEM or DER certificate
    pub fn from_pem_or_der(data: &[u8]) -> Result<Self> {
        let (tag, der) = decode_pem_or_der(data)?;
        match tag.as_deref() {
            None | Some("CERTIFICATE") | Some("X509 CERTIFICATE") => Self::from_der(&der),
            Some(other) => Err(Error::Certificate(format!(
                "unexpected PEM block '{}' in certificate file",
                other
            ))),
        }
    }

    /// Read a certificate file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            Error::Certificate(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_pem_or_der(&data)
    }

    /// DER encoding, as carried in a CERT payload
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("CERTIFICATE", self.der.clone()))
    }

    /// Serial number (big-endian, minimal)
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Issuer name (full DER)
    pub fn issuer(&self) -> &[u8] {
        &self.issuer
    }

    /// Subject name (full DER); used as a DER_ASN1_DN identity
    pub fn subject(&self) -> &[u8] {
        &self.subject
    }

    /// Identities listed in subjectAltName
    pub fn alt_names(&self) -> &[Identifier] {
        &self.alt_names
    }

    /// The subject's RSA public key
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        sign::public_key_from_spki(&self.spki)
    }

    /// Check that `issuer` signed this certificate
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        if self.issuer != issuer.subject {
            return Err(Error::Certificate("issuer name mismatch".into()));
        }
        sign::verify_digest(&issuer.public_key()?, self.digest, &self.tbs, &self.signature)
    }

    /// Whether the certificate vouches for an identity
    ///
    /// A DN identity must equal the subject. Names and addresses must appear
    /// in subjectAltName.
    pub fn matches_identifier(&self, id: &Identifier) -> bool {
        match id {
            Identifier::DerDn(dn) => *dn == self.subject,
            Identifier::Fqdn(_)
            | Identifier::UserFqdn(_)
            | Identifier::Ipv4(_)
            | Identifier::Ipv6(_) => self.alt_names.iter().any(|alt| alt.matches(id)),
            _ => false,
        }
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("serial", &hex::encode(&self.serial))
            .field("subject", &hex::encode(&self.subject))
            .field("alt_names", &self.alt_names)
            .finish()
    }
}

fn extensions(buf: &mut untrusted::Reader) -> Result<Vec<Identifier>> {
    let mut alt_names = Vec::new();
    while !buf.at_end() {
        der::tagged(Tag::SEQUENCE, buf, |buf| {
            let oid = der::oid(buf)?;
            let _critical = der::opt_bool(buf)?;
            let value = der::parse(Tag::OCTET_STRING, buf)?;
            if oid == OID_SUBJECT_ALT_NAME {
                alt_names = value.read_all(bad("subjectAltName"), |buf| {
                    der::tagged(Tag::SEQUENCE, buf, general_names)
                })?;
            }
            Ok(())
        })?;
    }
    Ok(alt_names)
}

fn general_names(buf: &mut untrusted::Reader) -> Result<Vec<Identifier>> {
    let mut names = Vec::new();
    while !buf.at_end() {
        let (tag, data) = der::any(buf)?;
        let data = data.as_slice_less_safe();
        let text = || {
            std::str::from_utf8(data)
                .map(str::to_string)
                .map_err(|_| bad("subjectAltName"))
        };

        match tag {
            SAN_RFC822 => names.push(Identifier::UserFqdn(text()?)),
            SAN_DNS => names.push(Identifier::Fqdn(text()?)),
            SAN_IP => {
                if let Ok(v4) = <[u8; 4]>::try_from(data) {
                    names.push(Identifier::Ipv4(v4.into()));
                } else if let Ok(v6) = <[u8; 16]>::try_from(data) {
                    names.push(Identifier::Ipv6(v6.into()));
                } else {
                    return Err(bad("subjectAltName address"));
                }
            }
            // other GeneralName forms carry nothing we can match
            _ => {}
        }
    }
    Ok(names)
}

/// A parsed certificate revocation list
#[derive(Clone)]
pub struct RevocationList {
    der: Vec<u8>,
    tbs: Vec<u8>,
    issuer: Vec<u8>,
    revoked: Vec<Vec<u8>>,
    digest: SignatureDigest,
    signature: Vec<u8>,
}

impl RevocationList {
    /// Parse a DER-encoded CRL
    pub fn from_der(data: &[u8]) -> Result<Self> {
        let outer = signed(data)?;

        outer.tbs_contents.read_all(bad("CRL"), |buf| {
            let _version = der::opt(Tag::INTEGER, buf)?;
            let _digest = signature_algorithm(buf)?;
            let issuer = name(buf)?;
            let _this_update = der::time(buf)?;
            if buf.peek(Tag::UTC_TIME.0) || buf.peek(Tag::GENERALIZED_TIME.0) {
                der::time(buf)?;
            }

            let mut revoked = Vec::new();
            if let Some(entries) = der::opt(Tag::SEQUENCE, buf)? {
                entries.read_all(bad("revoked certificates"), |buf| {
                    while !buf.at_end() {
                        der::tagged(Tag::SEQUENCE, buf, |buf| {
                            revoked.push(der::uint(buf)?.as_slice_less_safe().to_vec());
                            der::time(buf)?;
                            buf.skip_to_end();
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
            }

            let _extensions = der::opt(Tag::context(0), buf)?;

            Ok(RevocationList {
                der: data.to_vec(),
                tbs: outer.tbs.to_vec(),
                issuer: issuer.to_vec(),
                revoked,
                digest: outer.digest,
                signature: outer.signature.to_vec(),
            })
        })
    }

    /// Parse a PEM or DER CRL
    pub fn from_pem_or_der(data: &[u8]) -> Result<Self> {
        let (tag, der) = decode_pem_or_der(data)?;
        match tag.as_deref() {
            None | Some("X509 CRL") => Self::from_der(&der),
            Some(other) => Err(Error::Certificate(format!(
                "unexpected PEM block '{}' in CRL file",
                other
            ))),
        }
    }

    /// Read a CRL file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            Error::Certificate(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_pem_or_der(&data)
    }

    /// DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new("X509 CRL", self.der.clone()))
    }

    /// Check that `issuer` signed this list
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        if self.issuer != issuer.subject {
            return Err(Error::Certificate("CRL issuer mismatch".into()));
        }
        sign::verify_digest(&issuer.public_key()?, self.digest, &self.tbs, &self.signature)
    }

    /// Whether the list revokes `cert`
    pub fn is_revoked(&self, cert: &Certificate) -> bool {
        cert.issuer == self.issuer && self.revoked.iter().any(|s| *s == cert.serial)
    }

    /// Number of revoked serials
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Whether nothing is revoked
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}

/// Validate a peer certificate against a CA and an optional CRL
pub fn verify_chain(
    cert: &Certificate,
    ca: &Certificate,
    crl: Option<&RevocationList>,
) -> Result<()> {
    cert.verify_signed_by(ca)?;
    if let Some(crl) = crl {
        crl.verify_signed_by(ca)?;
        if crl.is_revoked(cert) {
            return Err(Error::Certificate(format!(
                "certificate {} is revoked",
                hex::encode(cert.serial())
            )));
        }
    }
    Ok(())
}

fn algorithm_identifier(digest: SignatureDigest) -> Vec<u8> {
    write::sequence(&[&write::oid(&digest_oid(digest)), &write::null()])
}

fn utc_time(value: &str) -> Vec<u8> {
    write::element(Tag::UTC_TIME, value.as_bytes())
}

fn sign_tbs(tbs: Vec<u8>, digest: SignatureDigest, key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let signature = sign::sign_digest(key, digest, &tbs)?;
    Ok(write::sequence(&[
        &tbs,
        &algorithm_identifier(digest),
        &write::bits(&signature),
    ]))
}

/// Issues minimal RSA certificates
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    common_name: String,
    serial: u64,
    alt_names: Vec<Identifier>,
    digest: SignatureDigest,
}

impl CertificateBuilder {
    /// Start a certificate for `common_name`
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            serial: 1,
            alt_names: Vec::new(),
            digest: SignatureDigest::Sha256,
        }
    }

    /// Set the serial number
    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = serial;
        self
    }

    /// Add a subjectAltName entry (FQDN, user FQDN or address)
    pub fn alt_name(mut self, id: Identifier) -> Self {
        self.alt_names.push(id);
        self
    }

    /// Set the signature digest
    pub fn digest(mut self, digest: SignatureDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Issue a self-signed certificate
    pub fn self_signed(&self, key: &RsaPrivateKey) -> Result<Certificate> {
        let subject = distinguished_name(&self.common_name);
        let tbs = self.tbs(&subject, &key.to_public_key())?;
        Certificate::from_der(&sign_tbs(tbs, self.digest, key)?)
    }

    /// Issue a certificate for `subject_key`, signed by `issuer`
    pub fn signed_by(
        &self,
        subject_key: &RsaPublicKey,
        issuer: &Certificate,
        issuer_key: &RsaPrivateKey,
    ) -> Result<Certificate> {
        let tbs = self.tbs(issuer.subject(), subject_key)?;
        Certificate::from_der(&sign_tbs(tbs, self.digest, issuer_key)?)
    }

    fn tbs(&self, issuer: &[u8], subject_key: &RsaPublicKey) -> Result<Vec<u8>> {
        let spki = subject_key
            .to_public_key_der()
            .map_err(|e| Error::CryptoError(format!("cannot encode public key: {}", e)))?;
        let validity = write::sequence(&[&utc_time("250101000000Z"), &utc_time("491231235959Z")]);

        let mut parts = vec![
            write::element(Tag::context(0), &write::uint(&[2])),
            write::uint(&self.serial.to_be_bytes()),
            algorithm_identifier(self.digest),
            issuer.to_vec(),
            validity,
            distinguished_name(&self.common_name),
            spki.as_bytes().to_vec(),
        ];

        if !self.alt_names.is_empty() {
            let names = self
                .alt_names
                .iter()
                .map(general_name)
                .collect::<Result<Vec<_>>>()?;
            let names: Vec<&[u8]> = names.iter().map(Vec::as_slice).collect();
            let san = write::sequence(&[
                &write::oid(OID_SUBJECT_ALT_NAME),
                &write::element(Tag::OCTET_STRING, &write::sequence(&names)),
            ]);
            parts.push(write::constructed(
                Tag::context(3),
                &[&write::sequence(&[&san])],
            ));
        }

        let parts: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        Ok(write::sequence(&parts))
    }
}

fn general_name(id: &Identifier) -> Result<Vec<u8>> {
    match id {
        Identifier::Fqdn(name) => Ok(write::element(SAN_DNS, name.as_bytes())),
        Identifier::UserFqdn(name) => Ok(write::element(SAN_RFC822, name.as_bytes())),
        Identifier::Ipv4(_) | Identifier::Ipv6(_) => match id.single_ip() {
            Some(IpAddr::V4(v4)) => Ok(write::element(SAN_IP, &v4.octets())),
            Some(IpAddr::V6(v6)) => Ok(write::element(SAN_IP, &v6.octets())),
            None => Err(Error::Internal("single-IP identity without address".into())),
        },
        other => Err(Error::InvalidParameter(format!(
            "{} cannot be a subjectAltName",
            other
        ))),
    }
}

/// Issues CRLs
#[derive(Debug, Clone, Default)]
pub struct RevocationListBuilder {
    revoked: Vec<u64>,
}

impl RevocationListBuilder {
    /// Start an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke a serial number
    pub fn revoke(mut self, serial: u64) -> Self {
        self.revoked.push(serial);
        self
    }

    /// Sign the list as `issuer`
    pub fn signed_by(&self, issuer: &Certificate, key: &RsaPrivateKey) -> Result<RevocationList> {
        let digest = SignatureDigest::Sha256;
        let entries: Vec<Vec<u8>> = self
            .revoked
            .iter()
            .map(|serial| {
                write::sequence(&[&write::uint(&serial.to_be_bytes()), &utc_time("250601000000Z")])
            })
            .collect();

        let mut parts = vec![
            write::uint(&[1]),
            algorithm_identifier(digest),
            issuer.subject().to_vec(),
            utc_time("250601000000Z"),
        ];
        if !entries.is_empty() {
            let entries: Vec<&[u8]> = entries.iter().map(Vec::as_slice).collect();
            parts.push(write::sequence(&entries));
        }

        let parts: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        RevocationList::from_der(&sign_tbs(write::sequence(&parts), digest, key)?)
    }
}
