//! Error types for tlsmimic crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used to carry TLS engine failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building a transport or sending a request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed fingerprint descriptor or ClientHello record.
    #[error("Format error: {0}")]
    Format(String),

    /// Descriptor version outside the known TLS versions.
    #[error("Unsupported TLS version: {0}")]
    UnsupportedVersion(u16),

    /// Proxy scheme other than plain HTTP.
    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedProxy(String),

    /// Proxy dial or CONNECT negotiation failed.
    #[error("Proxy CONNECT failed: {0}")]
    ProxyConnect(#[from] ProxyConnectError),

    /// TCP connection to the target failed.
    #[error("Failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS configuration or handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] BoxError),

    /// ALPN selected a protocol we cannot speak.
    #[error("Unsupported negotiated protocol: {0:?}")]
    UnsupportedProtocol(String),

    /// URL scheme other than http or https.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// IO error on an established connection.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Failure inside the pooled standard client.
    #[error("HTTP client error: {0}")]
    Client(#[source] hyper_util::client::legacy::Error),

    /// Content-Encoding decode failed.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Invalid transport configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure modes of an HTTP CONNECT tunnel.
#[derive(Debug, thiserror::Error)]
pub enum ProxyConnectError {
    /// The proxy itself could not be reached.
    #[error("dial {proxy}: {source}")]
    Dial {
        proxy: String,
        #[source]
        source: io::Error,
    },

    /// Writing the CONNECT request or reading the reply failed.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// The proxy answered with a non-2xx status.
    #[error("{status_line}")]
    Rejected { status: u16, status_line: String },

    /// The proxy reply is not a valid HTTP response head.
    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl Error {
    /// Create a descriptor/record format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Create a handshake error from any error source.
    pub fn handshake(source: impl Into<BoxError>) -> Self {
        Self::Handshake(source.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if the connection could not be opened at all.
    pub fn is_connect(&self) -> bool {
        match self {
            Self::Dial { .. } | Self::ProxyConnect(_) => true,
            Self::Client(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Check if this error came from the proxy leg of the connection.
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::ProxyConnect(_) | Self::UnsupportedProxy(_))
    }
}
