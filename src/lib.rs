//! # tlsmimic
//!
//! HTTP transport that reproduces a TLS ClientHello from a JA3-style
//! descriptor.
//!
//! A descriptor such as
//! `"771,4865-4866-4867,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513,29-23-24,0"`
//! is parsed once into a [`ClientHelloBlueprint`]. Every HTTPS request then
//! opens a fresh connection (optionally through an HTTP CONNECT proxy),
//! performs a BoringSSL handshake shaped by the blueprint and speaks
//! HTTP/1.1 or HTTP/2 depending on ALPN.
//!
//! ```no_run
//! # async fn run() -> tlsmimic::Result<()> {
//! let transport = tlsmimic::new_transport(
//!     Some("771,4865-4866-4867-49195-49199,0-23-65281-10-11-35-16-5-13-18-51-45-43-27-17513,29-23-24,0"),
//!     None,
//! )?;
//! let response = transport.send(tlsmimic::Request::get("https://example.com/")?).await?;
//! println!("{} {}", response.status(), response.text().await?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fingerprint;
pub mod request;
pub mod response;
pub mod transport;

pub use error::{Error, ProxyConnectError, Result};
pub use fingerprint::{parse_client_hello, ClientHelloBlueprint, FingerprintDescriptor};
pub use request::Request;
pub use response::{Body, Response};
pub use transport::{new_transport, Transport, TransportBuilder, TransportConfig};
