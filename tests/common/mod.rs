//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use policy_proxy::config::ProxyConfig;
use policy_proxy::lifecycle::{build_interceptor, Shutdown};
use policy_proxy::HttpServer;

/// Start a mock origin answering every request with `body` served as
/// `content_type` (no header when empty). Returns its address.
pub async fn start_mock_backend(content_type: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        read_head(&mut socket).await;
                        let content_type = if content_type.is_empty() {
                            String::new()
                        } else {
                            format!("Content-Type: {}\r\n", content_type)
                        };
                        let response = format!(
                            "HTTP/1.1 200 OK\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            content_type,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Reads until the end of the request head so the client is not reset.
async fn read_head(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Test configuration with an isolated table file and no metrics listener.
pub fn test_config(store: &Path) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.store.path = store.to_path_buf();
    config.observability.metrics_enabled = false;
    config.timeouts.request_secs = 5;
    config.timeouts.upstream_secs = 5;
    config
}

/// Start the proxy on an ephemeral port. Returns its URL and the shutdown
/// handle keeping it alive.
pub async fn start_proxy(config: ProxyConfig) -> (String, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let interceptor = build_interceptor(&config).unwrap();
    let server = HttpServer::new(config, interceptor);
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (url, shutdown)
}

/// Plain client routing every request through the proxy.
pub fn proxied_client(proxy_url: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(proxy_url).unwrap())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
