//! HTTP responses with a lazily read body.

use std::io::Read;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode, Version};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http2::SendRequest;

use crate::error::{Error, Result};
use crate::transport::h1::H1Body;

/// HTTP response. The body stays on the connection until it is read.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Body,
}

/// Response body source.
pub struct Body {
    kind: BodyKind,
}

enum BodyKind {
    Empty,
    H1(H1Body),
    Hyper {
        incoming: Incoming,
        // Keeps a dedicated HTTP/2 session open until the body is done.
        session: Option<SendRequest<Full<Bytes>>>,
    },
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            BodyKind::Empty => "empty",
            BodyKind::H1(_) => "http/1.1",
            BodyKind::Hyper { .. } => "hyper",
        };
        f.debug_struct("Body").field("kind", &kind).finish()
    }
}

impl Body {
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    pub(crate) fn h1(body: H1Body) -> Self {
        Self {
            kind: BodyKind::H1(body),
        }
    }

    pub(crate) fn hyper(incoming: Incoming, session: Option<SendRequest<Full<Bytes>>>) -> Self {
        Self {
            kind: BodyKind::Hyper { incoming, session },
        }
    }

    /// Next chunk of body data, `None` once the body is complete.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.kind {
            BodyKind::Empty => Ok(None),
            BodyKind::H1(body) => body.chunk().await,
            BodyKind::Hyper { incoming, session } => {
                while let Some(frame) = incoming.frame().await {
                    let frame = frame
                        .map_err(|e| Error::http_protocol(format!("Failed to read body: {}", e)))?;
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Ok(Some(data));
                        }
                    }
                }
                session.take();
                Ok(None)
            }
        }
    }

    /// Read the rest of the body into memory.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Stop reading and release the connection.
    pub async fn close(self) -> Result<()> {
        match self.kind {
            BodyKind::H1(body) => body.close().await,
            BodyKind::Empty | BodyKind::Hyper { .. } => Ok(()),
        }
    }
}

impl Response {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    pub(crate) fn from_hyper(
        response: http::Response<Incoming>,
        session: Option<SendRequest<Full<Bytes>>>,
    ) -> Self {
        let (parts, incoming) = response.into_parts();
        Self::new(
            parts.status,
            parts.version,
            parts.headers,
            Body::hyper(incoming, session),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// First value of a header, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of a header, in received order.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header("content-encoding")
    }

    /// Next chunk of body data.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.body.chunk().await
    }

    /// Whole body, as received.
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }

    /// Whole body, decoded per Content-Encoding (gzip, deflate, br, zstd).
    pub async fn decoded_bytes(self) -> Result<Bytes> {
        let encoding = self.content_encoding().map(|s| s.trim().to_ascii_lowercase());
        let body = self.body.collect().await?;
        match encoding.as_deref() {
            Some("gzip") | Some("x-gzip") => decode_gzip(&body),
            Some("deflate") => decode_deflate(&body),
            Some("br") => decode_brotli(&body),
            Some("zstd") => decode_zstd(&body),
            _ => Ok(body),
        }
    }

    pub async fn text(self) -> Result<String> {
        let body = self.bytes().await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| Error::http_protocol(format!("UTF-8 decode error: {}", e)))
    }

    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(Error::from)
    }

    /// Drop the body unread and close the connection.
    pub async fn close(self) -> Result<()> {
        self.body.close().await
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    // Some servers send raw deflate without the zlib wrapper.
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    brotli::Decompressor::new(data, 4096)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("brotli: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::stream::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| Error::Decompression(format!("zstd: {}", e)))
}
