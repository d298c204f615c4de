#![allow(dead_code)]

pub mod echo_server;
pub mod mock_proxy;
pub mod tls;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("trace")
        .try_init();
}
