use tlsmimic::{new_transport, Error, ProxyConnectError, Request};

mod helpers;
use helpers::init_tracing;
use helpers::mock_proxy::MockProxy;

const DESCRIPTOR: &str = "771,4865-4866-4867-49195-49199,0-23-65281-10-11-35-16-5-13-43-45-51,29-23-24,0";

#[tokio::test]
async fn test_rejected_tunnel_sends_no_tls() {
    init_tracing();
    let proxy = MockProxy::start("HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n", None).await;
    let transport = new_transport(Some(DESCRIPTOR), Some(proxy.url())).unwrap();

    let err = transport
        .send(Request::get("https://example.com/").unwrap())
        .await
        .unwrap_err();
    match &err {
        Error::ProxyConnect(ProxyConnectError::Rejected { status, status_line }) => {
            assert_eq!(*status, 403);
            assert_eq!(status_line, "HTTP/1.1 403 Forbidden");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_proxy());
    assert!(err.is_connect());

    let record = proxy.record().await;
    assert!(record
        .request_head
        .starts_with("CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n"));
    assert!(record.request_head.contains("Proxy-Connection: Keep-Alive\r\n"));
    assert_eq!(record.bytes_after_reply, 0);
}

#[tokio::test]
async fn test_proxy_credentials_sent() {
    init_tracing();
    let proxy = MockProxy::start("HTTP/1.1 407 Proxy Authentication Required\r\n\r\n", None).await;
    let mut url = proxy.url();
    url.set_username("alice").unwrap();
    url.set_password(Some("secret")).unwrap();
    let transport = new_transport(Some(DESCRIPTOR), Some(url)).unwrap();

    let err = transport
        .send(Request::get("https://example.com:8443/").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ProxyConnect(ProxyConnectError::Rejected { status: 407, .. })
    ));

    let record = proxy.record().await;
    assert!(record.request_head.starts_with("CONNECT example.com:8443 HTTP/1.1\r\n"));
    assert!(record
        .request_head
        .contains("Proxy-Authorization: Basic YWxpY2U6c2VjcmV0\r\n"));
}

#[tokio::test]
async fn test_malformed_proxy_reply() {
    init_tracing();
    let proxy = MockProxy::start("SSH-2.0-OpenSSH_9.6\r\n\r\n", None).await;
    let transport = new_transport(Some(DESCRIPTOR), Some(proxy.url())).unwrap();

    let err = transport
        .send(Request::get("https://example.com/").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ProxyConnect(ProxyConnectError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_unreachable_proxy() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = new_transport(
        Some(DESCRIPTOR),
        Some(format!("http://{}", addr).parse().unwrap()),
    )
    .unwrap();
    let err = transport
        .send(Request::get("https://example.com/").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ProxyConnect(ProxyConnectError::Dial { .. })
    ));
}
