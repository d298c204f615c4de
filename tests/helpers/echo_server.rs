use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use boring::ssl::SslAcceptor;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// TLS server that records every raw ClientHello record it receives and
/// answers each request with `alpn=<negotiated> path=<path>`.
pub struct EchoServer {
    addr: SocketAddr,
    hellos: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl EchoServer {
    pub async fn start(acceptor: SslAcceptor) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, hellos) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        break;
                    }
                };
                let acceptor = acceptor.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(record) = peek_client_hello(&stream).await {
                        let _ = tx.send(record);
                    }
                    serve(acceptor, stream).await;
                });
            }
        });

        Self { addr, hellos }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("https://127.0.0.1:{}{}", self.addr.port(), path)
    }

    /// Next recorded ClientHello record.
    pub async fn next_hello(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.hellos.recv())
            .await
            .expect("no ClientHello within 5s")
            .expect("server stopped")
    }
}

/// Wait until the whole first TLS record is buffered and copy it without
/// consuming it.
async fn peek_client_hello(stream: &TcpStream) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 5 + 16 * 1024];
    loop {
        let n = stream.peek(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        if n >= 5 {
            let len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
            if n >= 5 + len {
                return Some(buf[..5 + len].to_vec());
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn serve(acceptor: SslAcceptor, stream: TcpStream) {
    let tls = match tokio_boring::accept(&acceptor, stream).await {
        Ok(tls) => tls,
        Err(e) => {
            tracing::debug!("server handshake failed: {}", e);
            return;
        }
    };
    let alpn = tls
        .ssl()
        .selected_alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default();

    let service = {
        let alpn = alpn.clone();
        service_fn(move |req: http::Request<Incoming>| {
            let body = format!("alpn={} path={}", alpn, req.uri().path());
            async move { Ok::<_, Infallible>(http::Response::new(Full::new(Bytes::from(body)))) }
        })
    };

    let io = TokioIo::new(tls);
    let result = if alpn == "h2" {
        hyper::server::conn::http2::Builder::new(TokioExecutor::new())
            .serve_connection(io, service)
            .await
    } else {
        hyper::server::conn::http1::Builder::new()
            .serve_connection(io, service)
            .await
    };
    if let Err(e) = result {
        tracing::debug!("server connection ended: {}", e);
    }
}
