use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// What the proxy saw on its single connection.
#[derive(Debug)]
pub struct ProxyRecord {
    /// CONNECT request head, blank line included.
    pub request_head: String,
    /// Bytes the client sent after the reply. Only counted when the tunnel
    /// was refused.
    pub bytes_after_reply: usize,
}

/// One-shot HTTP CONNECT proxy.
///
/// Replies with `reply`; on a 2xx reply it tunnels to `upstream`.
pub struct MockProxy {
    addr: SocketAddr,
    record: oneshot::Receiver<ProxyRecord>,
}

impl MockProxy {
    pub async fn start(reply: &'static str, upstream: Option<SocketAddr>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, record) = oneshot::channel();

        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let request_head = read_head(&mut client).await;
            client.write_all(reply.as_bytes()).await.unwrap();

            let tunnel = reply.starts_with("HTTP/1.1 2") || reply.starts_with("HTTP/1.0 2");
            match upstream {
                Some(upstream) if tunnel => {
                    let _ = tx.send(ProxyRecord {
                        request_head,
                        bytes_after_reply: 0,
                    });
                    let mut server = TcpStream::connect(upstream).await.unwrap();
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut server).await;
                }
                _ => {
                    let mut rest = Vec::new();
                    let _ = tokio::time::timeout(
                        Duration::from_millis(500),
                        client.read_to_end(&mut rest),
                    )
                    .await;
                    let _ = tx.send(ProxyRecord {
                        request_head,
                        bytes_after_reply: rest.len(),
                    });
                }
            }
        });

        Self { addr, record }
    }

    pub fn url(&self) -> url::Url {
        format!("http://{}", self.addr).parse().unwrap()
    }

    pub async fn record(self) -> ProxyRecord {
        tokio::time::timeout(Duration::from_secs(5), self.record)
            .await
            .expect("proxy saw no connection")
            .expect("proxy task failed")
    }
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await.unwrap());
    }
    String::from_utf8(head).unwrap()
}
