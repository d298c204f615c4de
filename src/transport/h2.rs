//! HTTP/2 exchange over a negotiated stream, backed by hyper.

use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};

use super::BoxedIo;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;

/// Open a client session on `io`, send one request and return its response.
///
/// The session handle travels with the response body so the connection stays
/// up until the body is read or dropped.
pub async fn send(io: BoxedIo, request: Request) -> Result<Response> {
    let (mut sender, conn) = http2::Builder::new(TokioExecutor::new())
        .handshake(TokioIo::new(io))
        .await
        .map_err(|e| Error::http_protocol(format!("HTTP/2 handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::error!("HTTP/2 connection error: {}", e);
        }
    });

    sender
        .ready()
        .await
        .map_err(|e| Error::http_protocol(format!("HTTP/2 session closed: {}", e)))?;

    let response = sender
        .send_request(request.into_http()?)
        .await
        .map_err(|e| Error::http_protocol(format!("HTTP/2 request failed: {}", e)))?;
    tracing::debug!(status = %response.status(), "HTTP/2 response");

    Ok(Response::from_hyper(response, Some(sender)))
}
