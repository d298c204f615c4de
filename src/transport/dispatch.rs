//! Picks the HTTP framing from the negotiated ALPN protocol.

use super::h1::H1Connection;
use super::{h2, BoxedIo};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;

/// Application protocols the dispatcher can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    /// `""` means the server ignored ALPN, which implies HTTP/1.1.
    pub fn from_alpn(alpn: &str) -> Result<Self> {
        match alpn {
            "h2" => Ok(Protocol::Http2),
            "http/1.1" | "" => Ok(Protocol::Http1),
            other => Err(Error::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Send `request` over `io` and read the response.
///
/// Nothing is written when `alpn` names a protocol we do not speak.
pub async fn send(io: BoxedIo, alpn: &str, request: Request) -> Result<Response> {
    let protocol = Protocol::from_alpn(alpn)?;
    tracing::debug!(?protocol, url = %request.url(), "dispatching request");
    match protocol {
        Protocol::Http2 => h2::send(io, request).await,
        Protocol::Http1 => H1Connection::new(io).send(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_protocol_from_alpn() {
        assert_eq!(Protocol::from_alpn("h2").unwrap(), Protocol::Http2);
        assert_eq!(Protocol::from_alpn("http/1.1").unwrap(), Protocol::Http1);
        assert_eq!(Protocol::from_alpn("").unwrap(), Protocol::Http1);
        assert!(matches!(
            Protocol::from_alpn("spdy/3"),
            Err(Error::UnsupportedProtocol(p)) if p == "spdy/3"
        ));
    }

    #[tokio::test]
    async fn test_unknown_protocol_writes_nothing() {
        let (client, mut server) = duplex(1024);
        let request = Request::get("https://example.com/").unwrap();
        let err = send(Box::new(client), "h3", request).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(_)));

        // The client half was dropped without writing.
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_h2_writes_preface() {
        let (client, mut server) = duplex(64 * 1024);
        let request = Request::get("https://example.com/").unwrap();
        let call = tokio::spawn(async move { send(Box::new(client), "h2", request).await });

        let mut preface = [0u8; 24];
        server.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
        drop(server);
        assert!(call.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_http1_writes_request_line() {
        let (client, mut server) = duplex(64 * 1024);
        let request = Request::get("https://example.com/path?q=1")
            .unwrap()
            .header("X-Custom", "1");
        let call = tokio::spawn(async move { send(Box::new(client), "", request).await });

        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(server.read_u8().await.unwrap());
        }
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("GET /path?q=1 HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(head.contains("X-Custom: 1\r\n"));

        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        let resp = call.await.unwrap().unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
}
