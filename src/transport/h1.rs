//! RFC 9112 HTTP/1.1 client over an already-negotiated stream.
//!
//! Uses httparse for response heads and raw I/O for the request so header
//! order and spelling go on the wire exactly as given. One request per
//! connection; the body is read lazily from the stream the response owns.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::BoxedIo;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{Body, Response};

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 4096;

const READ_CHUNK: usize = 8192;

/// HTTP/1.1 connection for a single exchange.
pub struct H1Connection {
    io: BoxedIo,
}

impl H1Connection {
    pub fn new(io: BoxedIo) -> Self {
        Self { io }
    }

    /// Write the request and read the response head.
    ///
    /// The returned response owns the connection until its body is done.
    pub async fn send(mut self, request: Request) -> Result<Response> {
        let head = build_request(&request)?;
        tracing::trace!(bytes = head.len(), "writing HTTP/1.1 request head");
        self.io.write_all(&head).await?;
        if let Some(body) = request.body_bytes() {
            self.io.write_all(body).await?;
        }
        self.io.flush().await?;

        self.read_response(request.method()).await
    }

    /// Per RFC 9112 Section 6, 1xx responses before the final one are skipped.
    async fn read_response(mut self, method: &Method) -> Result<Response> {
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);

        loop {
            let header_end = loop {
                if let Some(end) = find_header_end(&buffer) {
                    break end;
                }
                if buffer.len() >= MAX_HEADERS_SIZE {
                    return Err(Error::http_protocol("Response headers too large"));
                }
                buffer.reserve(READ_CHUNK);
                if self.io.read_buf(&mut buffer).await? == 0 {
                    return Err(Error::http_protocol(
                        "Connection closed before response complete",
                    ));
                }
            };

            let head = parse_head(&buffer[..header_end])?;
            buffer.advance(header_end);

            if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
                tracing::trace!(status = head.status.as_u16(), "skipping informational response");
                continue;
            }

            let framing = body_framing(&head, method)?;
            tracing::debug!(status = head.status.as_u16(), ?framing, "HTTP/1.1 response head");
            let body = match framing {
                // Nothing left to read; the connection is dropped here.
                Framing::Done => Body::empty(),
                framing => Body::h1(H1Body {
                    io: Some(self.io),
                    buffer,
                    framing,
                }),
            };
            return Ok(Response::new(head.status, head.version, head.headers, body));
        }
    }
}

/// Serialize the request line and headers.
///
/// The target is origin-form (/path?query). Host comes first, taken from the
/// request headers when given there, else from the URL authority.
fn build_request(request: &Request) -> Result<Vec<u8>> {
    let url = request.url();
    let headers = request.headers();

    for (name, value) in headers {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }

    let mut out = Vec::with_capacity(1024);
    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(url.path().as_bytes());
    if let Some(query) = url.query() {
        out.push(b'?');
        out.extend_from_slice(query.as_bytes());
    }
    out.extend_from_slice(b" HTTP/1.1\r\n");

    out.extend_from_slice(b"Host: ");
    match headers.iter().find(|(n, _)| n.eq_ignore_ascii_case("host")) {
        Some((_, value)) => out.extend_from_slice(value.as_bytes()),
        None => {
            let host = url
                .host_str()
                .ok_or_else(|| Error::http_protocol("Request URL has no host"))?;
            out.extend_from_slice(host.as_bytes());
            if let Some(port) = url.port() {
                out.push(b':');
                out.extend_from_slice(port.to_string().as_bytes());
            }
        }
    }
    out.extend_from_slice(b"\r\n");

    let mut has_framing = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        if name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            has_framing = true;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if !has_framing {
        let len = request.body_bytes().map(Bytes::len);
        let expects_body = matches!(
            *request.method(),
            Method::POST | Method::PUT | Method::PATCH
        );
        if let Some(len) = len.or(expects_body.then_some(0)) {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(len.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b"\r\n");
    Ok(out)
}

struct ResponseHead {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

fn parse_head(buf: &[u8]) -> Result<ResponseHead> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut headers);

    match response
        .parse(buf)
        .map_err(|e| Error::http_protocol(format!("Failed to parse response: {}", e)))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => {
            return Err(Error::http_protocol("Incomplete response headers"));
        }
    }

    let code = response
        .code
        .ok_or_else(|| Error::http_protocol("Missing status code"))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| Error::http_protocol(format!("Invalid status code: {}", code)))?;
    let version = match response.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut map = HeaderMap::with_capacity(response.headers.len());
    for h in response.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| Error::http_protocol(format!("Invalid header name: {:?}", h.name)))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| Error::http_protocol(format!("Invalid value for header {}", h.name)))?;
        map.append(name, value);
    }

    Ok(ResponseHead {
        status,
        version,
        headers: map,
    })
}

/// Decide how the body is delimited, per RFC 9112 Section 6.3.
fn body_framing(head: &ResponseHead, method: &Method) -> Result<Framing> {
    // HEAD responses and 1xx/204/304 never carry a body.
    if *method == Method::HEAD || matches!(head.status.as_u16(), 100..=199 | 204 | 304) {
        return Ok(Framing::Done);
    }

    let transfer_encoding = joined(&head.headers, "transfer-encoding");
    if let Some(te) = transfer_encoding {
        // chunked must be the final transfer coding; Content-Length is ignored.
        let chunked = te
            .split(',')
            .next_back()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("chunked"));
        return Ok(if chunked {
            Framing::ChunkSize
        } else {
            Framing::UntilClose
        });
    }

    match joined(&head.headers, "content-length") {
        Some(cl) => Ok(match parse_content_length(&cl)? {
            0 => Framing::Done,
            len => Framing::Length(len),
        }),
        None => Ok(Framing::UntilClose),
    }
}

fn joined(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Body bytes still expected.
    Length(usize),
    UntilClose,
    ChunkSize,
    /// Data bytes left in the current chunk.
    ChunkData(usize),
    ChunkCrlf,
    /// Trailer bytes consumed so far.
    Trailers(usize),
    Done,
}

/// Body of an HTTP/1.1 response, read from the connection on demand.
pub struct H1Body {
    io: Option<BoxedIo>,
    buffer: BytesMut,
    framing: Framing,
}

impl H1Body {
    /// Next piece of body data; `None` once the framing says the body ended.
    ///
    /// The connection is released as soon as the end is reached.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.framing {
                Framing::Done => {
                    self.io = None;
                    return Ok(None);
                }
                Framing::Length(remaining) => {
                    if remaining == 0 {
                        self.framing = Framing::Done;
                        continue;
                    }
                    if self.buffer.is_empty() && self.fill().await? == 0 {
                        return Err(Error::http_protocol(format!(
                            "Connection closed before receiving full body ({} bytes missing)",
                            remaining
                        )));
                    }
                    let n = remaining.min(self.buffer.len());
                    self.framing = Framing::Length(remaining - n);
                    return Ok(Some(self.buffer.split_to(n).freeze()));
                }
                Framing::UntilClose => {
                    if !self.buffer.is_empty() {
                        return Ok(Some(self.buffer.split().freeze()));
                    }
                    if self.fill().await? == 0 {
                        self.framing = Framing::Done;
                    }
                }
                Framing::ChunkSize => match find_chunk_size(&self.buffer)? {
                    Some((0, end)) => {
                        self.buffer.advance(end);
                        self.framing = Framing::Trailers(0);
                    }
                    Some((size, end)) => {
                        self.buffer.advance(end);
                        self.framing = Framing::ChunkData(size);
                    }
                    None => {
                        if self.fill().await? == 0 {
                            return Err(Error::http_protocol(
                                "Connection closed while reading chunk size",
                            ));
                        }
                    }
                },
                Framing::ChunkData(remaining) => {
                    if remaining == 0 {
                        self.framing = Framing::ChunkCrlf;
                        continue;
                    }
                    if self.buffer.is_empty() && self.fill().await? == 0 {
                        return Err(Error::http_protocol(
                            "Connection closed while reading chunk data",
                        ));
                    }
                    let n = remaining.min(self.buffer.len());
                    self.framing = Framing::ChunkData(remaining - n);
                    return Ok(Some(self.buffer.split_to(n).freeze()));
                }
                Framing::ChunkCrlf => {
                    if self.buffer.len() < 2 {
                        if self.fill().await? == 0 {
                            return Err(Error::http_protocol(
                                "Connection closed while reading chunk data",
                            ));
                        }
                        continue;
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(Error::http_protocol("Missing CRLF after chunk data"));
                    }
                    self.buffer.advance(2);
                    self.framing = Framing::ChunkSize;
                }
                // trailer-section = *( field-line CRLF ) CRLF
                Framing::Trailers(seen) => match find_crlf(&self.buffer) {
                    Some(0) => {
                        self.buffer.advance(2);
                        self.framing = Framing::Done;
                    }
                    Some(pos) => {
                        self.buffer.advance(pos + 2);
                        if seen + pos + 2 > MAX_HEADERS_SIZE {
                            return Err(Error::http_protocol("Trailer section too large"));
                        }
                        self.framing = Framing::Trailers(seen + pos + 2);
                    }
                    None => {
                        if seen + self.buffer.len() > MAX_HEADERS_SIZE {
                            return Err(Error::http_protocol("Trailer section too large"));
                        }
                        // A peer that closes without the final CRLF still sent the whole body.
                        if self.fill().await? == 0 {
                            self.framing = Framing::Done;
                        }
                    }
                },
            }
        }
    }

    /// Shut the connection down without reading the rest.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut io) = self.io.take() {
            if let Err(e) = io.shutdown().await {
                tracing::debug!("HTTP/1.1 shutdown: {}", e);
            }
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<usize> {
        let Some(io) = self.io.as_mut() else {
            return Ok(0);
        };
        self.buffer.reserve(READ_CHUNK);
        Ok(io.read_buf(&mut self.buffer).await?)
    }
}

/// Find the end of HTTP headers (\r\n\r\n).
fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Parse a chunk-size line, returning (size, end_of_line_position).
///
/// `Ok(None)` means the line is not complete yet.
fn find_chunk_size(buffer: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(i) = find_crlf(buffer) else {
        if buffer.len() > MAX_CHUNK_LINE {
            return Err(Error::http_protocol("Chunk size line too long"));
        }
        return Ok(None);
    };
    // chunk extensions after ';' are ignored
    let line = &buffer[..i];
    let size_part = line.split(|&b| b == b';').next().unwrap_or(line);
    let size_str = std::str::from_utf8(size_part)
        .map_err(|_| Error::http_protocol("Invalid chunk size"))?
        .trim();
    let size = usize::from_str_radix(size_str, 16)
        .map_err(|_| Error::http_protocol(format!("Invalid chunk size: {:?}", size_str)))?;
    Ok(Some((size, i + 2)))
}

/// Find the first CRLF in a buffer, returning its position.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Validate a header name per RFC 9110 Section 5.1.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::http_protocol("Empty header name"));
    }
    if !name.bytes().all(is_tchar) {
        return Err(Error::http_protocol(format!(
            "Invalid character in header name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Check if a byte is a valid token character per RFC 9110.
fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Header values must not contain NUL, CR, or LF (prevents header injection).
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::http_protocol(
            "Invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}

/// Parse a Content-Length value per RFC 9112 Section 6.2.
///
/// Repeated values (comma-separated) must all be identical.
fn parse_content_length(value: &str) -> Result<usize> {
    let invalid = || Error::http_protocol(format!("Invalid Content-Length: {}", value));
    let mut parts = value.split(',').map(str::trim);
    let first = parts
        .next()
        .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(invalid)?
        .parse::<usize>()
        .map_err(|_| invalid())?;
    for part in parts {
        if part.parse::<usize>().map_err(|_| invalid())? != first {
            return Err(Error::http_protocol(format!(
                "Conflicting Content-Length values: {}",
                value
            )));
        }
    }
    Ok(first)
}
