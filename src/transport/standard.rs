//! Unspoofed path: a pooled hyper client with BoringSSL defaults.
//!
//! Used for plain HTTP and for HTTPS when no fingerprint is configured.
//! Connections go through the same establisher as the fingerprinted path,
//! so a configured proxy applies here too.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{HeaderValue, PROXY_AUTHORIZATION};
use http::Uri;
use http_body_util::Full;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};

use super::connector::{self, MaybeHttpsStream, Target};
use super::handshake::HandshakeEngine;
use super::proxy::ProxyConfig;
use crate::error::{Error, ProxyConnectError, Result};
use crate::request::Request;
use crate::response::Response;

/// Connector handed to the hyper client.
#[derive(Clone)]
pub struct StandardConnector {
    engine: Arc<HandshakeEngine>,
    proxy: Option<Arc<ProxyConfig>>,
}

impl StandardConnector {
    pub fn new(engine: Arc<HandshakeEngine>, proxy: Option<Arc<ProxyConfig>>) -> Self {
        Self { engine, proxy }
    }

    async fn connect(self, uri: Uri) -> Result<PooledStream> {
        let target = Target::from_uri(&uri)?;
        match uri.scheme_str() {
            Some("https") => {
                let tcp = connector::establish(&target, self.proxy.as_deref()).await?;
                let tls = self.engine.handshake(target.host(), tcp).await?;
                let stream = MaybeHttpsStream::Https(tls.into_inner());
                Ok(PooledStream::new(stream, false))
            }
            Some("http") => match self.proxy.as_deref() {
                // Plain HTTP is forwarded in absolute form, no tunnel.
                Some(proxy) => {
                    let tcp = connector::dial(proxy.address()).await?;
                    Ok(PooledStream::new(MaybeHttpsStream::Http(tcp), true))
                }
                None => {
                    let tcp = connector::dial(&target.authority()).await?;
                    Ok(PooledStream::new(MaybeHttpsStream::Http(tcp), false))
                }
            },
            other => Err(Error::UnsupportedScheme(other.unwrap_or("").to_string())),
        }
    }
}

impl tower::Service<Uri> for StandardConnector {
    type Response = PooledStream;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<PooledStream>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        Box::pin(self.clone().connect(uri))
    }
}

/// Connection as seen by the hyper pool.
pub struct PooledStream {
    inner: TokioIo<MaybeHttpsStream>,
    h2: bool,
    proxied: bool,
}

impl PooledStream {
    fn new(stream: MaybeHttpsStream, proxied: bool) -> Self {
        Self {
            h2: stream.is_h2(),
            inner: TokioIo::new(stream),
            proxied,
        }
    }
}

impl Connection for PooledStream {
    fn connected(&self) -> Connected {
        let connected = Connected::new().proxy(self.proxied);
        if self.h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl Read for PooledStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Write for PooledStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Pooled client for the unspoofed path.
#[derive(Clone)]
pub struct StandardClient {
    client: Client<StandardConnector, Full<Bytes>>,
    proxy: Option<Arc<ProxyConfig>>,
}

impl StandardClient {
    pub fn new(engine: Arc<HandshakeEngine>, proxy: Option<Arc<ProxyConfig>>) -> Self {
        let connector = StandardConnector::new(engine, proxy.clone());
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            proxy,
        }
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        let plain_http = request.url().scheme() == "http";
        let mut http_request = request.into_http()?;

        if plain_http {
            if let Some(auth) = self.proxy.as_deref().and_then(ProxyConfig::authorization) {
                let value = HeaderValue::from_str(auth)
                    .map_err(|e| Error::config(format!("invalid proxy credentials: {}", e)))?;
                http_request.headers_mut().insert(PROXY_AUTHORIZATION, value);
            }
        }

        tracing::debug!(uri = %http_request.uri(), "sending via standard client");
        let response = self
            .client
            .request(http_request)
            .await
            .map_err(from_client_error)?;
        Ok(Response::from_hyper(response, None))
    }
}

/// Surface errors raised by [`StandardConnector`] as their own variants.
/// Everything else stays an [`Error::Client`].
fn from_client_error(err: hyper_util::client::legacy::Error) -> Error {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(ours) = cause.downcast_ref::<Error>() {
            if let Some(typed) = retype(ours) {
                return typed;
            }
        }
        source = cause.source();
    }
    Error::Client(err)
}

fn retype(err: &Error) -> Option<Error> {
    let copy_io = |e: &io::Error| io::Error::new(e.kind(), e.to_string());
    Some(match err {
        Error::ProxyConnect(p) => Error::ProxyConnect(match p {
            ProxyConnectError::Dial { proxy, source } => ProxyConnectError::Dial {
                proxy: proxy.clone(),
                source: copy_io(source),
            },
            ProxyConnectError::Io(e) => ProxyConnectError::Io(copy_io(e)),
            ProxyConnectError::Rejected {
                status,
                status_line,
            } => ProxyConnectError::Rejected {
                status: *status,
                status_line: status_line.clone(),
            },
            ProxyConnectError::Malformed(m) => ProxyConnectError::Malformed(m.clone()),
        }),
        Error::Dial { addr, source } => Error::Dial {
            addr: addr.clone(),
            source: copy_io(source),
        },
        Error::Handshake(e) => Error::handshake(e.to_string()),
        Error::Io(e) => Error::Io(copy_io(e)),
        Error::UnsupportedScheme(s) => Error::UnsupportedScheme(s.clone()),
        Error::Format(m) => Error::Format(m.clone()),
        _ => return None,
    })
}
