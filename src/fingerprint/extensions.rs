//! TLS extension catalogue.
//!
//! Every extension id a descriptor may list maps to an [`ExtensionEntry`]
//! carrying protocol-correct default contents. Supported groups, point
//! formats and supported versions are taken from the descriptor instead.

use std::net::IpAddr;

use rand::RngCore;

use super::grease::{is_grease, GreaseSet, GREASE_PLACEHOLDER};

/// Extension code points.
pub mod ids {
    pub const SERVER_NAME: u16 = 0;
    pub const STATUS_REQUEST: u16 = 5;
    pub const SUPPORTED_GROUPS: u16 = 10;
    pub const EC_POINT_FORMATS: u16 = 11;
    pub const SIGNATURE_ALGORITHMS: u16 = 13;
    pub const ALPN: u16 = 16;
    pub const STATUS_REQUEST_V2: u16 = 17;
    pub const SIGNED_CERTIFICATE_TIMESTAMP: u16 = 18;
    pub const PADDING: u16 = 21;
    pub const EXTENDED_MASTER_SECRET: u16 = 23;
    pub const TOKEN_BINDING: u16 = 24;
    pub const COMPRESS_CERTIFICATE: u16 = 27;
    pub const RECORD_SIZE_LIMIT: u16 = 28;
    pub const DELEGATED_CREDENTIALS: u16 = 34;
    pub const SESSION_TICKET: u16 = 35;
    pub const PRE_SHARED_KEY: u16 = 41;
    pub const SUPPORTED_VERSIONS: u16 = 43;
    pub const COOKIE: u16 = 44;
    pub const PSK_KEY_EXCHANGE_MODES: u16 = 45;
    pub const SIGNATURE_ALGORITHMS_CERT: u16 = 50;
    pub const KEY_SHARE: u16 = 51;
    pub const QUIC_TRANSPORT_PARAMETERS: u16 = 57;
    pub const NEXT_PROTOCOL_NEGOTIATION: u16 = 13172;
    pub const APPLICATION_SETTINGS: u16 = 17513;
    pub const CHANNEL_ID_OLD: u16 = 30031;
    pub const CHANNEL_ID: u16 = 30032;
    pub const ENCRYPTED_CLIENT_HELLO: u16 = 65037;
    pub const RENEGOTIATION_INFO: u16 = 65281;
}

/// Named groups the catalogue knows key-share sizes for.
pub mod groups {
    pub const SECP256R1: u16 = 23;
    pub const SECP384R1: u16 = 24;
    pub const SECP521R1: u16 = 25;
    pub const X25519: u16 = 29;
    pub const X25519_MLKEM768: u16 = 4588;
    pub const X25519_KYBER768_DRAFT00: u16 = 25497;
}

/// Certificate compression algorithms (RFC 8879).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CertCompression {
    Zlib = 1,
    Brotli = 2,
    Zstd = 3,
}

/// Typed contents of one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionPayload {
    Grease,
    /// Host name is filled in per connection.
    ServerName,
    StatusRequest,
    SupportedGroups(Vec<u16>),
    PointFormats(Vec<u8>),
    SignatureAlgorithms(Vec<u16>),
    Alpn(Vec<String>),
    StatusRequestV2,
    SignedCertificateTimestamp,
    Padding,
    ExtendedMasterSecret,
    TokenBinding {
        major: u8,
        minor: u8,
        key_parameters: Vec<u8>,
    },
    CompressCertificate(Vec<CertCompression>),
    RecordSizeLimit(u16),
    DelegatedCredentials(Vec<u16>),
    SessionTicket,
    /// Sent only when resuming, which this client never does.
    PreSharedKey,
    SupportedVersions(Vec<u16>),
    Cookie,
    PskKeyExchangeModes(Vec<u8>),
    SignatureAlgorithmsCert(Vec<u16>),
    /// Groups a key share is generated for.
    KeyShare(Vec<u16>),
    QuicTransportParameters,
    NextProtocolNegotiation,
    ApplicationSettings(Vec<String>),
    ChannelId,
    EchGrease,
    RenegotiationInfo,
    Opaque(Vec<u8>),
}

/// One extension of a ClientHello blueprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionEntry {
    id: u16,
    payload: ExtensionPayload,
}

/// Values the blueprint derives from the descriptor rather than the catalogue.
#[derive(Debug, Clone, Default)]
pub struct DerivedState {
    pub groups: Vec<u16>,
    pub point_formats: Vec<u8>,
    pub supported_versions: Vec<u16>,
}

const SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601,
];

const SIGNATURE_ALGORITHMS_CERT: &[u16] = &[
    0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
];

const DELEGATED_CREDENTIALS: &[u16] = &[0x0403, 0x0503, 0x0603, 0x0203];

const ECH_PAYLOAD_LENGTHS: &[u16] = &[144, 176, 208, 240];

fn default_protocols() -> Vec<String> {
    vec!["h2".to_string(), "http/1.1".to_string()]
}

/// Default entry for an extension id.
///
/// Ids 10, 11 and 43 get empty lists here; use [`resolve`] to fill them.
pub fn catalogue_entry(id: u16) -> ExtensionEntry {
    use ExtensionPayload as P;

    if is_grease(id) {
        return ExtensionEntry::new(id, P::Grease);
    }

    let payload = match id {
        ids::SERVER_NAME => P::ServerName,
        ids::STATUS_REQUEST => P::StatusRequest,
        ids::SUPPORTED_GROUPS => P::SupportedGroups(Vec::new()),
        ids::EC_POINT_FORMATS => P::PointFormats(Vec::new()),
        ids::SIGNATURE_ALGORITHMS => P::SignatureAlgorithms(SIGNATURE_ALGORITHMS.to_vec()),
        ids::ALPN => P::Alpn(default_protocols()),
        ids::STATUS_REQUEST_V2 => P::StatusRequestV2,
        ids::SIGNED_CERTIFICATE_TIMESTAMP => P::SignedCertificateTimestamp,
        ids::PADDING => P::Padding,
        ids::EXTENDED_MASTER_SECRET => P::ExtendedMasterSecret,
        ids::TOKEN_BINDING => P::TokenBinding {
            major: 0,
            minor: 16,
            key_parameters: vec![2],
        },
        ids::COMPRESS_CERTIFICATE => P::CompressCertificate(vec![CertCompression::Brotli]),
        ids::RECORD_SIZE_LIMIT => P::RecordSizeLimit(0x4001),
        ids::DELEGATED_CREDENTIALS => P::DelegatedCredentials(DELEGATED_CREDENTIALS.to_vec()),
        ids::SESSION_TICKET => P::SessionTicket,
        ids::PRE_SHARED_KEY => P::PreSharedKey,
        ids::SUPPORTED_VERSIONS => P::SupportedVersions(Vec::new()),
        ids::COOKIE => P::Cookie,
        ids::PSK_KEY_EXCHANGE_MODES => P::PskKeyExchangeModes(vec![1]),
        ids::SIGNATURE_ALGORITHMS_CERT => {
            P::SignatureAlgorithmsCert(SIGNATURE_ALGORITHMS_CERT.to_vec())
        }
        ids::KEY_SHARE => P::KeyShare(vec![
            GREASE_PLACEHOLDER,
            groups::X25519_MLKEM768,
            groups::X25519,
        ]),
        ids::QUIC_TRANSPORT_PARAMETERS => P::QuicTransportParameters,
        ids::NEXT_PROTOCOL_NEGOTIATION => P::NextProtocolNegotiation,
        ids::APPLICATION_SETTINGS => P::ApplicationSettings(default_protocols()),
        ids::CHANNEL_ID_OLD | ids::CHANNEL_ID => P::ChannelId,
        ids::ENCRYPTED_CLIENT_HELLO => P::EchGrease,
        ids::RENEGOTIATION_INFO => P::RenegotiationInfo,
        _ => P::Opaque(Vec::new()),
    };
    ExtensionEntry::new(id, payload)
}

/// Entry for an id, with the descriptor-derived lists filled in.
pub fn resolve(id: u16, derived: &DerivedState) -> ExtensionEntry {
    match id {
        ids::SUPPORTED_GROUPS => ExtensionEntry::new(
            id,
            ExtensionPayload::SupportedGroups(derived.groups.clone()),
        ),
        ids::EC_POINT_FORMATS => ExtensionEntry::new(
            id,
            ExtensionPayload::PointFormats(derived.point_formats.clone()),
        ),
        ids::SUPPORTED_VERSIONS => ExtensionEntry::new(
            id,
            ExtensionPayload::SupportedVersions(derived.supported_versions.clone()),
        ),
        _ => catalogue_entry(id),
    }
}

/// Per-ClientHello state used while encoding extensions.
pub struct EncodeContext<'a> {
    pub server_name: Option<&'a str>,
    pub grease: GreaseSet,
    pub rng: &'a mut dyn RngCore,
    grease_extensions: usize,
}

impl<'a> EncodeContext<'a> {
    pub fn new(server_name: Option<&'a str>, rng: &'a mut dyn RngCore) -> Self {
        let grease = GreaseSet::random(&mut *rng);
        Self {
            server_name,
            grease,
            rng,
            grease_extensions: 0,
        }
    }

    /// Replace every GREASE value with the one picked for `kind`.
    fn substitute(&self, values: &[u16], kind: u16) -> Vec<u16> {
        values
            .iter()
            .map(|&v| if is_grease(v) { kind } else { v })
            .collect()
    }

    fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.rng.fill_bytes(&mut buf);
        buf
    }
}

impl ExtensionEntry {
    pub fn new(id: u16, payload: ExtensionPayload) -> Self {
        Self { id, payload }
    }

    /// GREASE extension with the placeholder code point.
    pub fn grease() -> Self {
        Self::new(GREASE_PLACEHOLDER, ExtensionPayload::Grease)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn payload(&self) -> &ExtensionPayload {
        &self.payload
    }

    pub fn is_grease(&self) -> bool {
        matches!(self.payload, ExtensionPayload::Grease)
    }

    /// Encode the full extension (type, length, body).
    ///
    /// Returns `None` for extensions that are left out of this ClientHello:
    /// a pre-shared key without a session and a server name for an IP
    /// literal or an unknown host.
    pub fn encode(&self, ctx: &mut EncodeContext<'_>) -> Option<Vec<u8>> {
        let mut id = self.id;
        if self.is_grease() {
            id = if ctx.grease_extensions == 0 {
                ctx.grease.first_extension
            } else {
                ctx.grease.last_extension
            };
            ctx.grease_extensions += 1;
        }
        let body = self.encode_body(ctx)?;
        let mut out = Vec::with_capacity(4 + body.len());
        put_u16(&mut out, id);
        put_len16(&mut out, body.len());
        out.extend_from_slice(&body);
        Some(out)
    }

    /// Encode the extension body in its RFC wire form.
    pub fn encode_body(&self, ctx: &mut EncodeContext<'_>) -> Option<Vec<u8>> {
        use ExtensionPayload as P;

        let mut body = Vec::new();
        match &self.payload {
            P::Grease => {
                // BoringSSL sends the second GREASE extension with one zero byte.
                if ctx.grease_extensions > 1 {
                    body.push(0);
                }
            }
            P::ServerName => {
                let host = ctx.server_name?;
                if host.parse::<IpAddr>().is_ok() {
                    return None;
                }
                put_len16(&mut body, host.len() + 3);
                body.push(0);
                put_len16(&mut body, host.len());
                body.extend_from_slice(host.as_bytes());
            }
            P::StatusRequest => body.extend_from_slice(&[1, 0, 0, 0, 0]),
            P::SupportedGroups(list) => {
                let list = ctx.substitute(list, ctx.grease.group);
                put_u16_list(&mut body, &list);
            }
            P::PointFormats(formats) => {
                put_len8(&mut body, formats.len());
                body.extend_from_slice(formats);
            }
            P::SignatureAlgorithms(schemes)
            | P::SignatureAlgorithmsCert(schemes)
            | P::DelegatedCredentials(schemes) => put_u16_list(&mut body, schemes),
            P::Alpn(protocols) | P::ApplicationSettings(protocols) => {
                put_protocol_list(&mut body, protocols)
            }
            P::StatusRequestV2 => body.extend_from_slice(&[0, 7, 2, 0, 4, 0, 0, 0, 0]),
            P::SignedCertificateTimestamp
            | P::ExtendedMasterSecret
            | P::SessionTicket
            | P::QuicTransportParameters
            | P::NextProtocolNegotiation
            | P::ChannelId
            | P::Padding => {}
            P::TokenBinding {
                major,
                minor,
                key_parameters,
            } => {
                body.push(*major);
                body.push(*minor);
                put_len8(&mut body, key_parameters.len());
                body.extend_from_slice(key_parameters);
            }
            P::CompressCertificate(algorithms) => {
                put_len8(&mut body, algorithms.len() * 2);
                for alg in algorithms {
                    put_u16(&mut body, *alg as u16);
                }
            }
            P::RecordSizeLimit(limit) => put_u16(&mut body, *limit),
            P::PreSharedKey => return None,
            P::SupportedVersions(versions) => {
                let versions = ctx.substitute(versions, ctx.grease.version);
                put_len8(&mut body, versions.len() * 2);
                for v in versions {
                    put_u16(&mut body, v);
                }
            }
            P::Cookie => put_u16(&mut body, 0),
            P::PskKeyExchangeModes(modes) => {
                put_len8(&mut body, modes.len());
                body.extend_from_slice(modes);
            }
            P::KeyShare(list) => {
                let mut shares = Vec::new();
                for &group in list {
                    if is_grease(group) {
                        put_u16(&mut shares, ctx.grease.group);
                        put_u16(&mut shares, 1);
                        shares.push(0);
                        continue;
                    }
                    let key = match group {
                        groups::SECP256R1 => ec_point(ctx, 64),
                        groups::SECP384R1 => ec_point(ctx, 96),
                        groups::SECP521R1 => ec_point(ctx, 132),
                        groups::X25519_MLKEM768 | groups::X25519_KYBER768_DRAFT00 => {
                            ctx.random_bytes(1216)
                        }
                        _ => ctx.random_bytes(32),
                    };
                    put_u16(&mut shares, group);
                    put_len16(&mut shares, key.len());
                    shares.extend_from_slice(&key);
                }
                put_len16(&mut body, shares.len());
                body.extend_from_slice(&shares);
            }
            P::EchGrease => {
                body.push(0); // outer ClientHello
                put_u16(&mut body, 0x0001); // HKDF-SHA256
                put_u16(&mut body, 0x0001); // AES-128-GCM
                let config_id = ctx.random_bytes(1)[0];
                body.push(config_id);
                let enc = ctx.random_bytes(32);
                put_len16(&mut body, enc.len());
                body.extend_from_slice(&enc);
                let pick = (ctx.rng.next_u32() as usize) % ECH_PAYLOAD_LENGTHS.len();
                let payload = ctx.random_bytes(ECH_PAYLOAD_LENGTHS[pick] as usize);
                put_len16(&mut body, payload.len());
                body.extend_from_slice(&payload);
            }
            P::RenegotiationInfo => body.push(0),
            P::Opaque(data) => body.extend_from_slice(data),
        }
        Some(body)
    }
}

fn ec_point(ctx: &mut EncodeContext<'_>, len: usize) -> Vec<u8> {
    let mut point = Vec::with_capacity(len + 1);
    point.push(0x04);
    point.extend(ctx.random_bytes(len));
    point
}

pub(crate) fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write a 16-bit length prefix. Lengths past `u16::MAX` are a bug in the
/// caller and saturate in release builds.
pub(crate) fn put_len16(out: &mut Vec<u8>, len: usize) {
    debug_assert!(len <= usize::from(u16::MAX), "length {len} overflows u16");
    put_u16(out, u16::try_from(len).unwrap_or(u16::MAX));
}

/// Write an 8-bit length prefix, saturating like [`put_len16`].
pub(crate) fn put_len8(out: &mut Vec<u8>, len: usize) {
    debug_assert!(len <= usize::from(u8::MAX), "length {len} overflows u8");
    out.push(u8::try_from(len).unwrap_or(u8::MAX));
}

fn put_u16_list(out: &mut Vec<u8>, values: &[u16]) {
    put_len16(out, values.len() * 2);
    for v in values {
        put_u16(out, *v);
    }
}

fn put_protocol_list(out: &mut Vec<u8>, protocols: &[String]) {
    let len: usize = protocols.iter().map(|p| p.len() + 1).sum();
    put_len16(out, len);
    for p in protocols {
        put_len8(out, p.len());
        out.extend_from_slice(p.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefixes() {
        let mut out = Vec::new();
        put_len16(&mut out, 0x0102);
        put_len8(&mut out, 7);
        assert_eq!(out, [1, 2, 7]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "overflows u16")]
    fn test_oversized_length_prefix_panics_in_debug() {
        put_len16(&mut Vec::new(), usize::from(u16::MAX) + 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "overflows u8")]
    fn test_oversized_protocol_name_panics_in_debug() {
        put_protocol_list(&mut Vec::new(), &["x".repeat(300)]);
    }

    fn ctx<'a>(host: Option<&'a str>, rng: &'a mut dyn RngCore) -> EncodeContext<'a> {
        EncodeContext::new(host, rng)
    }

    #[test]
    fn test_catalogue_defaults() {
        assert_eq!(catalogue_entry(16).payload(), &ExtensionPayload::Alpn(default_protocols()));
        assert_eq!(
            catalogue_entry(27).payload(),
            &ExtensionPayload::CompressCertificate(vec![CertCompression::Brotli])
        );
        assert_eq!(
            catalogue_entry(51).payload(),
            &ExtensionPayload::KeyShare(vec![GREASE_PLACEHOLDER, 4588, 29])
        );
        assert_eq!(catalogue_entry(30031).payload(), &ExtensionPayload::ChannelId);
        assert_eq!(catalogue_entry(30031).id(), 30031);
        assert!(catalogue_entry(0x2A2A).is_grease());
    }

    #[test]
    fn test_unknown_id_is_opaque() {
        let entry = catalogue_entry(4242);
        assert_eq!(entry.id(), 4242);
        assert_eq!(entry.payload(), &ExtensionPayload::Opaque(Vec::new()));
    }

    #[test]
    fn test_resolve_uses_descriptor_lists() {
        let derived = DerivedState {
            groups: vec![GREASE_PLACEHOLDER, 29, 23],
            point_formats: vec![0],
            supported_versions: vec![GREASE_PLACEHOLDER, 0x0304, 0x0303],
        };
        assert_eq!(
            resolve(10, &derived).payload(),
            &ExtensionPayload::SupportedGroups(vec![GREASE_PLACEHOLDER, 29, 23])
        );
        assert_eq!(resolve(11, &derived).payload(), &ExtensionPayload::PointFormats(vec![0]));
        assert_eq!(
            resolve(43, &derived).payload(),
            &ExtensionPayload::SupportedVersions(vec![GREASE_PLACEHOLDER, 0x0304, 0x0303])
        );
        assert_eq!(resolve(16, &derived), catalogue_entry(16));
    }

    #[test]
    fn test_server_name_body() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(Some("example.com"), &mut rng);
        let body = catalogue_entry(0).encode_body(&mut c).unwrap();
        assert_eq!(&body[..5], &[0, 14, 0, 0, 11]);
        assert_eq!(&body[5..], b"example.com");
    }

    #[test]
    fn test_server_name_skipped_for_ip() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(Some("127.0.0.1"), &mut rng);
        assert!(catalogue_entry(0).encode(&mut c).is_none());
        let mut c = ctx(None, &mut rng);
        assert!(catalogue_entry(0).encode(&mut c).is_none());
    }

    #[test]
    fn test_psk_omitted_without_session() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(Some("example.com"), &mut rng);
        assert!(catalogue_entry(41).encode(&mut c).is_none());
    }

    #[test]
    fn test_alpn_body() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(None, &mut rng);
        let body = catalogue_entry(16).encode_body(&mut c).unwrap();
        assert_eq!(body, b"\x00\x0c\x02h2\x08http/1.1".to_vec());
    }

    #[test]
    fn test_grease_extensions_get_distinct_ids() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(None, &mut rng);
        let first = ExtensionEntry::grease().encode(&mut c).unwrap();
        let last = ExtensionEntry::grease().encode(&mut c).unwrap();
        assert_ne!(first[..2], last[..2]);
        assert_eq!(&first[2..], &[0, 0]);
        assert_eq!(&last[2..], &[0, 1, 0]);
    }

    #[test]
    fn test_key_share_sizes() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(None, &mut rng);
        let body = catalogue_entry(51).encode_body(&mut c).unwrap();
        // grease (2+2+1) + mlkem (2+2+1216) + x25519 (2+2+32)
        let expected = 5 + 1220 + 36;
        assert_eq!(u16::from_be_bytes([body[0], body[1]]) as usize, expected);
        assert_eq!(body.len(), expected + 2);
        assert!(is_grease(u16::from_be_bytes([body[2], body[3]])));
    }

    #[test]
    fn test_supported_versions_grease_substituted() {
        let mut rng = rand::thread_rng();
        let mut c = ctx(None, &mut rng);
        let entry = ExtensionEntry::new(
            43,
            ExtensionPayload::SupportedVersions(vec![GREASE_PLACEHOLDER, 0x0304, 0x0303]),
        );
        let body = entry.encode_body(&mut c).unwrap();
        assert_eq!(body[0], 6);
        assert_eq!(u16::from_be_bytes([body[1], body[2]]), c.grease.version);
        assert_eq!(&body[3..], &[3, 4, 3, 3]);
    }
}
