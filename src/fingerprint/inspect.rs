//! ClientHello inspection.
//!
//! Parses a captured TLS record and reports what the client offered, so a
//! blueprint can be checked against what actually went on the wire.

use md5::{Digest, Md5};
use tls_parser::{parse_tls_plaintext, TlsMessage, TlsMessageHandshake, TlsRecordType};

use super::descriptor::join;
use super::extensions::ids;
use super::grease::strip_grease;
use crate::error::{Error, Result};

/// What a captured ClientHello offered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedHello {
    pub record_version: u16,
    pub legacy_version: u16,
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    /// Extension ids in wire order, GREASE included.
    pub extension_ids: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub alpn_protocols: Vec<String>,
    pub supported_versions: Vec<u16>,
    pub server_name: Option<String>,
}

/// JA3 text and its MD5 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ja3 {
    pub text: String,
    pub hash: String,
}

impl ObservedHello {
    pub fn ja3(&self) -> Ja3 {
        let text = format!(
            "{},{},{},{},{}",
            self.legacy_version,
            join(&strip_grease(&self.cipher_suites)),
            join(&strip_grease(&self.extension_ids)),
            join(&strip_grease(&self.supported_groups)),
            join(&self.point_formats)
        );
        let mut hasher = Md5::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Ja3 { text, hash }
    }

    /// Offered cipher suites without GREASE.
    pub fn cipher_suites_without_grease(&self) -> Vec<u16> {
        strip_grease(&self.cipher_suites)
    }
}

/// Parse a TLS record holding a ClientHello.
pub fn parse_client_hello(record: &[u8]) -> Result<ObservedHello> {
    if record.len() < 5 {
        return Err(Error::format("record shorter than its header"));
    }
    let (_, plaintext) = parse_tls_plaintext(record)
        .map_err(|e| Error::format(format!("invalid TLS record: {e:?}")))?;
    if plaintext.hdr.record_type != TlsRecordType::Handshake {
        return Err(Error::format("not a handshake record"));
    }

    for msg in &plaintext.msg {
        let TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) = msg else {
            continue;
        };
        let mut hello = ObservedHello {
            record_version: plaintext.hdr.version.0,
            legacy_version: ch.version.0,
            session_id: ch.session_id.map(<[u8]>::to_vec).unwrap_or_default(),
            cipher_suites: ch.ciphers.iter().map(|c| c.0).collect(),
            compression_methods: ch.comp.iter().map(|c| c.0).collect(),
            ..Default::default()
        };
        if let Some(raw) = ch.ext {
            read_extensions(raw, &mut hello)?;
        }
        return Ok(hello);
    }

    Err(Error::format("record carries no ClientHello"))
}

/// Walk the raw extension block. tls-parser folds some code points together,
/// so ids are read straight from the wire.
fn read_extensions(raw: &[u8], hello: &mut ObservedHello) -> Result<()> {
    let mut cur = Cursor::new(raw);
    while !cur.is_empty() {
        let id = cur.u16()?;
        let len = cur.u16()? as usize;
        let body = cur.take(len)?;
        hello.extension_ids.push(id);

        let mut b = Cursor::new(body);
        match id {
            ids::SERVER_NAME if !body.is_empty() => {
                let mut list = Cursor::new(b.vec16()?);
                while !list.is_empty() {
                    let kind = list.u8()?;
                    let name = list.vec16()?;
                    if kind == 0 {
                        hello.server_name = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
            }
            ids::SUPPORTED_GROUPS => hello.supported_groups = Cursor::new(b.vec16()?).u16s()?,
            ids::EC_POINT_FORMATS => hello.point_formats = b.vec8()?.to_vec(),
            ids::SIGNATURE_ALGORITHMS => {
                hello.signature_algorithms = Cursor::new(b.vec16()?).u16s()?
            }
            ids::ALPN => {
                let mut list = Cursor::new(b.vec16()?);
                while !list.is_empty() {
                    let proto = list.vec8()?;
                    hello
                        .alpn_protocols
                        .push(String::from_utf8_lossy(proto).into_owned());
                }
            }
            ids::SUPPORTED_VERSIONS => {
                hello.supported_versions = Cursor::new(b.vec8()?).u16s()?
            }
            _ => {}
        }
    }
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::format("truncated ClientHello extension"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec8(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec16(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn u16s(&mut self) -> Result<Vec<u16>> {
        let mut out = Vec::with_capacity(self.buf.len() / 2);
        while !self.is_empty() {
            out.push(self.u16()?);
        }
        Ok(out)
    }
}
