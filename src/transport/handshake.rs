//! BoringSSL handshake engine.
//!
//! Turns a [`ClientHelloBlueprint`] into one shared `SslConnector` and runs
//! client handshakes with it. Settings that BoringSSL only exposes per
//! connection (ALPS, ECH GREASE, SNI) go on the per-call configuration.

use std::io::Read;
use std::os::raw::c_int;
use std::sync::Arc;

use boring::ssl::{
    ExtensionType, SslConnector, SslConnectorBuilder, SslMethod, SslOptions, SslVerifyMode,
    SslVersion,
};
use boring::x509::X509;
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use foreign_types::ForeignTypeRef;
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::extensions::{groups, ids};
use crate::fingerprint::hello::TLS13_CIPHER_SUITES;
use crate::fingerprint::{
    is_grease, CertCompression, ClientHelloBlueprint, ExtensionPayload, TlsVersion,
};

const DEFAULT_ALPN: &[u8] = b"\x02h2\x08http/1.1";

extern "C" {
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Disabled so the permutation set on the builder is kept.
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// Certificate trust settings shared by every engine of a transport.
#[derive(Debug, Clone, Default)]
pub struct TrustConfig {
    /// Extra roots, PEM or DER.
    pub root_certificates: Vec<Vec<u8>>,
    /// Skip certificate and hostname verification.
    pub accept_invalid_certs: bool,
}

impl TrustConfig {
    fn apply(&self, builder: &mut SslConnectorBuilder) -> Result<()> {
        for cert_bytes in &self.root_certificates {
            let cert = X509::from_der(cert_bytes)
                .or_else(|_| X509::from_pem(cert_bytes))
                .map_err(|e| Error::config(format!("invalid root certificate: {}", e)))?;
            builder
                .cert_store_mut()
                .add_cert(cert)
                .map_err(|e| Error::config(format!("failed to add root certificate: {}", e)))?;
        }
        if self.accept_invalid_certs {
            builder.set_verify(SslVerifyMode::NONE);
        }
        Ok(())
    }
}

/// Established TLS connection plus what ALPN settled on.
#[derive(Debug)]
pub struct TlsConnection {
    stream: SslStream<TcpStream>,
    alpn: String,
}

impl TlsConnection {
    /// Negotiated protocol, empty when the server picked none.
    pub fn alpn(&self) -> &str {
        &self.alpn
    }

    pub fn into_parts(self) -> (SslStream<TcpStream>, String) {
        (self.stream, self.alpn)
    }

    pub fn into_inner(self) -> SslStream<TcpStream> {
        self.stream
    }
}

/// Per-connection settings derived from the blueprint.
#[derive(Debug, Clone, Default)]
struct ConnectionSettings {
    send_sni: bool,
    alps: Vec<String>,
    ech_grease: bool,
}

/// Shared, immutable TLS client configuration.
pub struct HandshakeEngine {
    connector: SslConnector,
    blueprint: Option<Arc<ClientHelloBlueprint>>,
    settings: ConnectionSettings,
    verify_hostname: bool,
}

impl std::fmt::Debug for HandshakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeEngine")
            .field("fingerprinted", &self.blueprint.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl HandshakeEngine {
    /// Build the connector. Without a blueprint, BoringSSL defaults are used.
    pub fn new(blueprint: Option<Arc<ClientHelloBlueprint>>, trust: &TrustConfig) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls_client()).map_err(Error::handshake)?;
        trust.apply(&mut builder)?;

        let settings = match blueprint.as_deref() {
            Some(bp) => configure_blueprint(&mut builder, bp)?,
            None => configure_default(&mut builder)?,
        };

        Ok(Self {
            connector: builder.build(),
            blueprint,
            settings,
            verify_hostname: !trust.accept_invalid_certs,
        })
    }

    pub fn blueprint(&self) -> Option<&ClientHelloBlueprint> {
        self.blueprint.as_deref()
    }

    /// Run the client handshake for `host` over `stream`.
    pub async fn handshake(&self, host: &str, stream: TcpStream) -> Result<TlsConnection> {
        let mut config = self.connector.configure().map_err(Error::handshake)?;
        config.set_verify_hostname(self.verify_hostname);
        if !self.settings.send_sni {
            config.set_use_server_name_indication(false);
        }

        unsafe {
            let ssl = config.as_ptr();
            for proto in &self.settings.alps {
                // Empty settings: the client's ALPS payload is filled in by the HTTP/2 layer.
                if boring_sys::SSL_add_application_settings(
                    ssl,
                    proto.as_ptr(),
                    proto.len(),
                    std::ptr::null(),
                    0,
                ) != 1
                {
                    return Err(Error::handshake(format!(
                        "failed to enable application settings for {}",
                        proto
                    )));
                }
            }
            if self.settings.ech_grease {
                boring_sys::SSL_set_enable_ech_grease(ssl, 1);
            }
        }

        let stream = tokio_boring::connect(config, host, stream)
            .await
            .map_err(Error::handshake)?;

        let alpn = stream
            .ssl()
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();
        tracing::debug!(
            host,
            version = stream.ssl().version_str(),
            cipher = stream.ssl().current_cipher().map(|c| c.name()).unwrap_or("-"),
            alpn = %alpn,
            "TLS handshake complete"
        );

        Ok(TlsConnection { stream, alpn })
    }
}

fn ssl_version(v: TlsVersion) -> SslVersion {
    match v {
        TlsVersion::Tls10 => SslVersion::TLS1,
        TlsVersion::Tls11 => SslVersion::TLS1_1,
        TlsVersion::Tls12 => SslVersion::TLS1_2,
        TlsVersion::Tls13 => SslVersion::TLS1_3,
    }
}

fn configure_default(builder: &mut SslConnectorBuilder) -> Result<ConnectionSettings> {
    builder
        .set_min_proto_version(Some(SslVersion::TLS1_2))
        .map_err(Error::handshake)?;
    builder
        .set_max_proto_version(Some(SslVersion::TLS1_3))
        .map_err(Error::handshake)?;
    builder
        .set_alpn_protos(DEFAULT_ALPN)
        .map_err(Error::handshake)?;
    unsafe {
        SSL_CTX_set_grease_enabled(builder.as_ptr(), 1);
        SSL_CTX_set_permute_extensions(builder.as_ptr(), 1);
    }
    Ok(ConnectionSettings {
        send_sni: true,
        ..Default::default()
    })
}

fn configure_blueprint(
    builder: &mut SslConnectorBuilder,
    bp: &ClientHelloBlueprint,
) -> Result<ConnectionSettings> {
    // Cipher suites, TLS 1.3 ones included, in descriptor order.
    let mut names = Vec::new();
    let mut has_tls13 = false;
    let mut has_legacy = false;
    for &id in bp.cipher_suites() {
        // Signalling values, not suites: renegotiation info and fallback SCSVs.
        if is_grease(id) || id == 0x00ff || id == 0x5600 {
            continue;
        }
        match cipher_name(id) {
            Some(name) => {
                if TLS13_CIPHER_SUITES.contains(&id) {
                    has_tls13 = true;
                } else {
                    has_legacy = true;
                }
                names.push(name);
            }
            None => tracing::warn!("cipher suite {:#06x} is not supported by the TLS engine", id),
        }
    }

    let max = bp.version_max();
    let mut min = bp.version_min();
    if !has_legacy {
        if !(has_tls13 && max >= TlsVersion::Tls13) {
            return Err(Error::handshake(
                "none of the fingerprint's cipher suites can be offered",
            ));
        }
        // Only TLS 1.3 suites, so TLS 1.2 is not offered at all.
        min = TlsVersion::Tls13;
    }
    builder.set_preserve_tls13_cipher_list(true);
    builder
        .set_cipher_list(&names.join(":"))
        .map_err(Error::handshake)?;
    if max >= TlsVersion::Tls13 && !has_tls13 {
        tracing::warn!("TLS 1.3 is enabled but the fingerprint offers no TLS 1.3 suite");
    }
    builder
        .set_min_proto_version(Some(ssl_version(min)))
        .map_err(Error::handshake)?;
    builder
        .set_max_proto_version(Some(ssl_version(max)))
        .map_err(Error::handshake)?;

    if let Some(ExtensionPayload::SupportedGroups(list)) = payload(bp, ids::SUPPORTED_GROUPS) {
        set_groups(builder, list)?;
    }

    if let Some(ExtensionPayload::SignatureAlgorithms(list)) =
        payload(bp, ids::SIGNATURE_ALGORITHMS)
    {
        let names: Vec<&str> = list.iter().filter_map(|&s| sigalg_name(s)).collect();
        if !names.is_empty() {
            builder
                .set_sigalgs_list(&names.join(":"))
                .map_err(Error::handshake)?;
        }
    }

    if let Some(ExtensionPayload::Alpn(protocols)) = payload(bp, ids::ALPN) {
        let mut wire = Vec::new();
        for p in protocols {
            wire.push(p.len() as u8);
            wire.extend_from_slice(p.as_bytes());
        }
        builder.set_alpn_protos(&wire).map_err(Error::handshake)?;
    }

    if !bp.has_extension(ids::SESSION_TICKET) {
        builder.set_options(SslOptions::NO_TICKET);
    }

    unsafe {
        let ctx = builder.as_ptr();
        SSL_CTX_set_grease_enabled(ctx, bp.offers_grease() as c_int);
        SSL_CTX_set_permute_extensions(ctx, 0);
        if bp.has_extension(ids::STATUS_REQUEST) {
            boring_sys::SSL_CTX_enable_ocsp_stapling(ctx);
        }
        if bp.has_extension(ids::SIGNED_CERTIFICATE_TIMESTAMP) {
            boring_sys::SSL_CTX_enable_signed_cert_timestamps(ctx);
        }
        if let Some(ExtensionPayload::CompressCertificate(algs)) =
            payload(bp, ids::COMPRESS_CERTIFICATE)
        {
            for alg in algs {
                let decompress: boring_sys::ssl_cert_decompression_func_t = match alg {
                    CertCompression::Brotli => Some(decompress_brotli_cert),
                    CertCompression::Zlib => Some(decompress_zlib_cert),
                    CertCompression::Zstd => Some(decompress_zstd_cert),
                };
                boring_sys::SSL_CTX_add_cert_compression_alg(ctx, *alg as u16, None, decompress);
            }
        }
    }

    // Extension order, for the extensions BoringSSL emits.
    let mut order = Vec::new();
    for entry in bp.extensions() {
        let id = entry.id();
        if entry.is_grease() || id == ids::PRE_SHARED_KEY || id == ids::PADDING {
            continue;
        }
        if ENGINE_EXTENSIONS.contains(&id) {
            order.push(ExtensionType::from(id));
        } else {
            tracing::warn!("extension {} cannot be reproduced by the TLS engine", id);
        }
    }
    builder
        .set_extension_permutation(&order)
        .map_err(Error::handshake)?;
    tracing::debug!(extensions = order.len(), ja3 = %bp.ja3(), "TLS blueprint configured");

    Ok(ConnectionSettings {
        send_sni: bp.has_extension(ids::SERVER_NAME),
        alps: match payload(bp, ids::APPLICATION_SETTINGS) {
            Some(ExtensionPayload::ApplicationSettings(protocols)) => protocols.clone(),
            _ => Vec::new(),
        },
        ech_grease: bp.has_extension(ids::ENCRYPTED_CLIENT_HELLO),
    })
}

fn payload(bp: &ClientHelloBlueprint, id: u16) -> Option<&ExtensionPayload> {
    bp.extension(id).map(|e| e.payload())
}

/// Extensions BoringSSL can place in a client hello.
const ENGINE_EXTENSIONS: &[u16] = &[
    ids::SERVER_NAME,
    ids::STATUS_REQUEST,
    ids::SUPPORTED_GROUPS,
    ids::EC_POINT_FORMATS,
    ids::SIGNATURE_ALGORITHMS,
    ids::ALPN,
    ids::SIGNED_CERTIFICATE_TIMESTAMP,
    ids::EXTENDED_MASTER_SECRET,
    ids::COMPRESS_CERTIFICATE,
    ids::DELEGATED_CREDENTIALS,
    ids::SESSION_TICKET,
    ids::SUPPORTED_VERSIONS,
    ids::COOKIE,
    ids::PSK_KEY_EXCHANGE_MODES,
    ids::KEY_SHARE,
    ids::QUIC_TRANSPORT_PARAMETERS,
    ids::APPLICATION_SETTINGS,
    ids::CHANNEL_ID,
    ids::ENCRYPTED_CLIENT_HELLO,
    ids::RENEGOTIATION_INFO,
];

fn set_groups(builder: &mut SslConnectorBuilder, list: &[u16]) -> Result<()> {
    let mut names = Vec::new();
    for &g in list {
        if is_grease(g) {
            continue;
        }
        match group_name(g) {
            Some(name) => names.push(name),
            None => tracing::warn!("group {} is not supported by the TLS engine", g),
        }
    }
    if names.is_empty() {
        return Ok(());
    }
    if builder.set_curves_list(&names.join(":")).is_ok() {
        return Ok(());
    }
    // Older BoringSSL builds lack some hybrid groups.
    let classic: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| !n.contains("MLKEM") && !n.contains("Kyber"))
        .collect();
    tracing::warn!(groups = %names.join(":"), "post-quantum groups unavailable, offering classic groups");
    builder
        .set_curves_list(&classic.join(":"))
        .map_err(Error::handshake)
}

fn group_name(id: u16) -> Option<&'static str> {
    Some(match id {
        groups::X25519 => "X25519",
        groups::SECP256R1 => "P-256",
        groups::SECP384R1 => "P-384",
        groups::SECP521R1 => "P-521",
        groups::X25519_MLKEM768 => "X25519MLKEM768",
        groups::X25519_KYBER768_DRAFT00 => "X25519Kyber768Draft00",
        _ => return None,
    })
}

fn cipher_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x1301 => "TLS_AES_128_GCM_SHA256",
        0x1302 => "TLS_AES_256_GCM_SHA384",
        0x1303 => "TLS_CHACHA20_POLY1305_SHA256",
        0xc02b => "ECDHE-ECDSA-AES128-GCM-SHA256",
        0xc02f => "ECDHE-RSA-AES128-GCM-SHA256",
        0xc02c => "ECDHE-ECDSA-AES256-GCM-SHA384",
        0xc030 => "ECDHE-RSA-AES256-GCM-SHA384",
        0xcca9 => "ECDHE-ECDSA-CHACHA20-POLY1305",
        0xcca8 => "ECDHE-RSA-CHACHA20-POLY1305",
        0xc009 => "ECDHE-ECDSA-AES128-SHA",
        0xc00a => "ECDHE-ECDSA-AES256-SHA",
        0xc013 => "ECDHE-RSA-AES128-SHA",
        0xc014 => "ECDHE-RSA-AES256-SHA",
        0xc023 => "ECDHE-ECDSA-AES128-SHA256",
        0xc027 => "ECDHE-RSA-AES128-SHA256",
        0x009c => "AES128-GCM-SHA256",
        0x009d => "AES256-GCM-SHA384",
        0x002f => "AES128-SHA",
        0x0035 => "AES256-SHA",
        0x000a => "DES-CBC3-SHA",
        _ => return None,
    })
}

fn sigalg_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x0403 => "ecdsa_secp256r1_sha256",
        0x0503 => "ecdsa_secp384r1_sha384",
        0x0603 => "ecdsa_secp521r1_sha512",
        0x0804 => "rsa_pss_rsae_sha256",
        0x0805 => "rsa_pss_rsae_sha384",
        0x0806 => "rsa_pss_rsae_sha512",
        0x0401 => "rsa_pkcs1_sha256",
        0x0501 => "rsa_pkcs1_sha384",
        0x0601 => "rsa_pkcs1_sha512",
        0x0201 => "rsa_pkcs1_sha1",
        0x0203 => "ecdsa_sha1",
        0x0807 => "ed25519",
        _ => return None,
    })
}

/// Brotli certificate decompression callback for BoringSSL.
unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let mut decoder = brotli::Decompressor::new(compressed, 4096);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) if decompressed.len() == uncompressed_len => store_buffer(out, &decompressed),
        _ => 0,
    }
}

/// Zlib certificate decompression callback for BoringSSL.
unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let mut decoder = flate2::read::ZlibDecoder::new(compressed);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) if decompressed.len() == uncompressed_len => store_buffer(out, &decompressed),
        _ => 0,
    }
}

/// Zstd certificate decompression callback for BoringSSL.
unsafe extern "C" fn decompress_zstd_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    match zstd::bulk::decompress(compressed, uncompressed_len) {
        Ok(decompressed) if decompressed.len() == uncompressed_len => {
            store_buffer(out, &decompressed)
        }
        _ => 0,
    }
}

/// Copy `data` into a fresh CRYPTO_BUFFER. Returns 1 on success.
unsafe fn store_buffer(out: *mut *mut CRYPTO_BUFFER, data: &[u8]) -> c_int {
    let buffer = boring_sys::CRYPTO_BUFFER_new(data.as_ptr(), data.len(), std::ptr::null_mut());
    if buffer.is_null() {
        return 0;
    }
    *out = buffer;
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintDescriptor;

    fn engine(descriptor: &str) -> Result<HandshakeEngine> {
        let d = FingerprintDescriptor::parse(descriptor)?;
        let bp = Arc::new(ClientHelloBlueprint::from_descriptor(&d));
        HandshakeEngine::new(Some(bp), &TrustConfig::default())
    }

    #[test]
    fn test_chrome_like_blueprint_builds() {
        let e = engine(
            "771,4865-4866-4867-49195-49199-49196-49200-52393-52392,\
             0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513-65037,4588-29-23-24,0",
        )
        .unwrap();
        assert!(e.settings.send_sni);
        assert_eq!(e.settings.alps, vec!["h2", "http/1.1"]);
        assert!(e.settings.ech_grease);
    }

    #[test]
    fn test_tls13_only_blueprint_builds() {
        assert!(engine("772,4865-4866-4867,0-10-11-13-16-43-45-51,29-23,0").is_ok());
    }

    #[test]
    fn test_unusable_ciphers_rejected() {
        // TLS 1.3 suites on a TLS 1.2-only client, plus an unknown suite.
        let err = engine("771,4865-65000,0-10-11,29,0").unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
    }

    #[test]
    fn test_default_engine_builds() {
        let e = HandshakeEngine::new(None, &TrustConfig::default()).unwrap();
        assert!(e.blueprint().is_none());
        assert!(e.settings.send_sni);
    }

    #[test]
    fn test_bad_root_certificate() {
        let trust = TrustConfig {
            root_certificates: vec![b"not a certificate".to_vec()],
            accept_invalid_certs: false,
        };
        assert!(matches!(
            HandshakeEngine::new(None, &trust),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_tls13_order_kept_in_cipher_string() {
        assert!(engine("772,4867-4865-4866-49195,0-10-11-13-16-43-45-51,29-23,0").is_ok());
    }

    #[tokio::test]
    async fn test_handshake_failure_keeps_ssl_source() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let e = engine("772,4865-49195,0-10-11-13-16-43-45-51,29-23,0").unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let err = match e.handshake("localhost", stream).await {
            Err(err) => err,
            Ok(_) => panic!("handshake with a plaintext peer succeeded"),
        };
        assert!(matches!(err, Error::Handshake(_)));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source
            .downcast_ref::<tokio_boring::HandshakeError<TcpStream>>()
            .is_some());
    }

    #[test]
    fn test_name_tables() {
        assert_eq!(cipher_name(0xc02b), Some("ECDHE-ECDSA-AES128-GCM-SHA256"));
        assert_eq!(cipher_name(0x1303), Some("TLS_CHACHA20_POLY1305_SHA256"));
        assert_eq!(cipher_name(0x1304), None);
        assert_eq!(group_name(4588), Some("X25519MLKEM768"));
        assert_eq!(sigalg_name(0x0804), Some("rsa_pss_rsae_sha256"));
    }
}
