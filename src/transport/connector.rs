//! TCP connection establishment, direct or through an HTTP CONNECT proxy.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Uri;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;
use url::{Host, Url};

use super::proxy::{self, ProxyConfig};
use crate::error::{Error, ProxyConnectError, Result};

/// Host and port a request is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// `host` must not carry IPv6 brackets.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(Error::http_protocol(format!("URL has no host: {}", url))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::UnsupportedScheme(url.scheme().to_string()))?;
        Ok(Self { host, port })
    }

    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let host = uri
            .host()
            .ok_or_else(|| Error::http_protocol(format!("URI has no host: {}", uri)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = match (uri.port_u16(), uri.scheme_str()) {
            (Some(port), _) => port,
            (None, Some("https")) => 443,
            (None, Some("http")) => 80,
            (None, other) => {
                return Err(Error::UnsupportedScheme(other.unwrap_or("").to_string()));
            }
        };
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Open a TCP stream to `target`, tunnelling through `proxy` when given.
///
/// With a proxy, the returned stream is positioned right after the proxy's
/// response head, ready for the TLS handshake with the target.
pub async fn establish(target: &Target, proxy: Option<&ProxyConfig>) -> Result<TcpStream> {
    match proxy {
        None => dial(&target.authority()).await,
        Some(proxy) => {
            let mut stream = TcpStream::connect(proxy.address()).await.map_err(|source| {
                ProxyConnectError::Dial {
                    proxy: proxy.address().to_string(),
                    source,
                }
            })?;
            stream.set_nodelay(true)?;
            tracing::debug!(proxy = proxy.address(), target = %target.authority(), "proxy connected");
            proxy::connect_tunnel(&mut stream, target, proxy).await?;
            Ok(stream)
        }
    }
}

/// Plain TCP connect.
pub async fn dial(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await.map_err(|source| Error::Dial {
        addr: addr.to_string(),
        source,
    })?;
    stream.set_nodelay(true)?;
    tracing::debug!(addr, "connected");
    Ok(stream)
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    Http(TcpStream),
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// Whether ALPN settled on HTTP/2. Always false for plain TCP.
    pub fn is_h2(&self) -> bool {
        match self {
            MaybeHttpsStream::Http(_) => false,
            MaybeHttpsStream::Https(stream) => {
                stream.ssl().selected_alpn_protocol() == Some(b"h2".as_slice())
            }
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
