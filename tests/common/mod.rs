//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coldstart_proxy::config::{ProxyConfig, RouteConfig, RoutePlaceholderConfig};
use coldstart_proxy::lifecycle::Interceptor;
use coldstart_proxy::scaling::InMemoryEndpointsCache;
use coldstart_proxy::upstream::{Dial, ProxyEnv};
use coldstart_proxy::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A mock backend that answers every request with a fixed body.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start a mock backend on an ephemeral port.
pub async fn start_mock_backend(response: &'static str) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                if !read_request_head(&mut socket).await {
                    return;
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let response_str = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Backend: mock\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                );
                let _ = socket.write_all(response_str.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockBackend { addr, hits }
}

async fn read_request_head(socket: &mut TcpStream) -> bool {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    true
}

/// Dialer that sends every connection to one address, whatever the URL says.
pub struct PinnedDialer {
    pub target: SocketAddr,
    pub dials: AtomicUsize,
}

#[async_trait::async_trait]
impl Dial for PinnedDialer {
    async fn dial(&self, _address: &str) -> std::io::Result<TcpStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        TcpStream::connect(self.target).await
    }
}

pub fn route(upstream: String, placeholder: bool) -> RouteConfig {
    RouteConfig {
        name: "app".into(),
        host: None,
        path_prefix: Some("/".into()),
        priority: 0,
        namespace: "default".into(),
        service: "app".into(),
        upstream,
        placeholder: placeholder.then(|| RoutePlaceholderConfig {
            enabled: true,
            status_code: 503,
            refresh_interval_secs: Some(3),
            content: None,
            headers: Default::default(),
        }),
    }
}

pub fn config(route: RouteConfig, wait_ms: u64) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.timeouts.workload_replicas_ms = wait_ms;
    config.timeouts.response_header_ms = 2_000;
    config.observability.metrics_enabled = false;
    config.routes.push(route);
    config
}

/// A running interceptor on an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub cache: Arc<InMemoryEndpointsCache>,
    pub shutdown: Shutdown,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig, dialer: Option<Arc<dyn Dial>>) -> RunningProxy {
    let mut builder = Interceptor::builder(config).proxy(ProxyEnv::direct());
    if let Some(dialer) = dialer {
        builder = builder.dialer(dialer);
    }
    let interceptor = builder.build().unwrap();
    let cache = interceptor.cache();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = interceptor.run(listener, &stop).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    RunningProxy { addr, cache, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
