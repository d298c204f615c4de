//! Request pipeline: connection establishment, TLS handshake, HTTP exchange.
//!
//! Fingerprinted HTTPS calls run establish → handshake → dispatch on a fresh
//! connection each time. Everything else goes through the pooled standard
//! client.

pub mod connector;
pub mod dispatch;
pub mod h1;
pub mod h2;
pub mod handshake;
pub mod proxy;
pub mod standard;

use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::error::{Error, Result};
use crate::fingerprint::{ClientHelloBlueprint, FingerprintDescriptor};
use crate::request::Request;
use crate::response::Response;

pub use connector::Target;
pub use handshake::{HandshakeEngine, TlsConnection, TrustConfig};
pub use proxy::ProxyConfig;

/// Byte stream an HTTP exchange can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// HTTP transport. Cheap to clone; clones share configuration and the pool.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    blueprint: Option<Arc<ClientHelloBlueprint>>,
    fingerprinted: Option<HandshakeEngine>,
    proxy: Option<Arc<ProxyConfig>>,
    standard: standard::StandardClient,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("ja3", &self.inner.blueprint.as_ref().map(|b| b.ja3()))
            .field("proxy", &self.inner.proxy)
            .finish()
    }
}

impl Transport {
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    /// Blueprint every fingerprinted handshake follows.
    pub fn blueprint(&self) -> Option<&ClientHelloBlueprint> {
        self.inner.blueprint.as_deref()
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.inner.proxy.as_deref()
    }

    /// Execute one request.
    ///
    /// `http` URLs always use the standard client. `https` URLs use it only
    /// when no fingerprint is configured.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let scheme = request.url().scheme().to_ascii_lowercase();
        match (scheme.as_str(), &self.inner.fingerprinted) {
            ("http", _) | ("https", None) => self.inner.standard.send(request).await,
            ("https", Some(engine)) => self.send_fingerprinted(engine, request).await,
            (other, _) => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    async fn send_fingerprinted(&self, engine: &HandshakeEngine, request: Request) -> Result<Response> {
        let target = Target::from_url(request.url())?;
        let tcp = connector::establish(&target, self.inner.proxy.as_deref()).await?;
        let (stream, alpn) = engine.handshake(target.host(), tcp).await?.into_parts();
        dispatch::send(Box::new(stream), &alpn, request).await
    }
}

/// Builder for [`Transport`].
#[derive(Debug, Default)]
pub struct TransportBuilder {
    fingerprint: Option<String>,
    proxy: Option<Url>,
    trust: TrustConfig,
}

impl TransportBuilder {
    /// JA3-style descriptor to reproduce. An empty string means none.
    pub fn fingerprint(mut self, descriptor: impl Into<String>) -> Self {
        self.fingerprint = Some(descriptor.into());
        self
    }

    /// HTTP proxy, `http://[user:pass@]host:port`.
    pub fn proxy(mut self, url: Url) -> Self {
        self.proxy = Some(url);
        self
    }

    /// Trust an extra root certificate (PEM or DER).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.trust.root_certificates.push(cert.into());
        self
    }

    /// Skip certificate verification. Intended for tests.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.trust.accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> Result<Transport> {
        let blueprint = match self.fingerprint.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => {
                let descriptor = FingerprintDescriptor::parse(text)?;
                let blueprint = ClientHelloBlueprint::from_descriptor(&descriptor);
                tracing::debug!(ja3 = %blueprint.ja3(), "fingerprint blueprint built");
                Some(Arc::new(blueprint))
            }
        };
        let proxy = self
            .proxy
            .map(ProxyConfig::from_url)
            .transpose()?
            .map(Arc::new);

        let fingerprinted = blueprint
            .clone()
            .map(|bp| HandshakeEngine::new(Some(bp), &self.trust))
            .transpose()?;
        let default_engine = Arc::new(HandshakeEngine::new(None, &self.trust)?);
        let standard = standard::StandardClient::new(default_engine, proxy.clone());

        Ok(Transport {
            inner: Arc::new(Inner {
                blueprint,
                fingerprinted,
                proxy,
                standard,
            }),
        })
    }
}

/// Deserializable transport settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub fingerprint: Option<String>,
    pub proxy: Option<Url>,
    /// PEM-encoded extra roots.
    pub root_certificates: Vec<String>,
    pub accept_invalid_certs: bool,
}

impl TransportConfig {
    pub fn into_transport(self) -> Result<Transport> {
        let mut builder = Transport::builder().danger_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(fingerprint) = self.fingerprint {
            builder = builder.fingerprint(fingerprint);
        }
        if let Some(proxy) = self.proxy {
            builder = builder.proxy(proxy);
        }
        for pem in self.root_certificates {
            builder = builder.add_root_certificate(pem.into_bytes());
        }
        builder.build()
    }
}

/// Transport for an optional descriptor and optional HTTP proxy.
pub fn new_transport(fingerprint: Option<&str>, proxy: Option<Url>) -> Result<Transport> {
    let mut builder = Transport::builder();
    if let Some(fingerprint) = fingerprint {
        builder = builder.fingerprint(fingerprint);
    }
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder.build()
}
