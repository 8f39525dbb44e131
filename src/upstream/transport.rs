//! Pooled upstream transport.
//!
//! # Responsibilities
//! - Build the one connection pool shared by every forwarded request
//! - Map `ForwardingConfig` onto pool, TLS and header timeouts
//! - Perform a single round trip, nothing more (no retries)
//!
//! # Timeouts
//! Dialing, proxy tunnels and TLS handshakes carry their own timers in the
//! connector. The response-header timer only runs while no new connection
//! is being established for the request.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::forwarding::ForwardingConfig;
use crate::upstream::connector::{DialConnector, PENDING_CONNECTS};
use crate::upstream::dial::{Dial, TcpDialer};
use crate::upstream::proxy_env::ProxyEnv;

/// A failed upstream round trip.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{}", error_chain(.0))]
    Request(#[from] hyper_util::client::legacy::Error),
    #[error("timeout awaiting response headers after {0:?}")]
    ResponseHeaderTimeout(Duration),
}

/// `err` followed by each of its causes, joined with `": "`. Causes whose
/// text the message already ends with are skipped.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Performs one request/response exchange with an upstream.
#[async_trait]
pub trait RoundTrip: Send + Sync + 'static {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError>;
}

/// Long-lived, cloneable handle to the shared connection pool.
#[derive(Clone)]
pub struct UpstreamTransport {
    client: Client<DialConnector, Body>,
    response_header_timeout: Duration,
}

impl UpstreamTransport {
    /// Pool with the default TCP dialer and proxy settings from the environment.
    pub fn new(cfg: &ForwardingConfig, tls: Arc<ClientConfig>) -> Self {
        Self::builder(cfg, tls).build()
    }

    pub fn builder(cfg: &ForwardingConfig, tls: Arc<ClientConfig>) -> TransportBuilder {
        TransportBuilder {
            cfg: *cfg,
            tls,
            dialer: None,
            proxy: None,
        }
    }
}

/// Configures the pieces of the transport that come from outside the config
/// file.
pub struct TransportBuilder {
    cfg: ForwardingConfig,
    tls: Arc<ClientConfig>,
    dialer: Option<Arc<dyn Dial>>,
    proxy: Option<ProxyEnv>,
}

impl TransportBuilder {
    /// Replace the default TCP dialer.
    pub fn dialer(mut self, dialer: Arc<dyn Dial>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Override the proxy settings read from the environment.
    pub fn proxy(mut self, proxy: ProxyEnv) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn build(self) -> UpstreamTransport {
        let cfg = self.cfg;
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(TcpDialer::new(cfg.connect_timeout())));
        let proxy = self.proxy.unwrap_or_else(ProxyEnv::from_env);
        if !proxy.is_direct() {
            tracing::info!("Upstream connections honour proxy environment variables");
        }

        let connector = DialConnector::new(
            dialer,
            self.tls,
            proxy,
            cfg.connect_timeout(),
            cfg.tls_handshake_timeout(),
            cfg.force_http2(),
        );

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(cfg.idle_conn_timeout())
            .pool_max_idle_per_host(cfg.max_idle_conns())
            .build(connector);

        tracing::debug!(
            max_idle_conns = cfg.max_idle_conns(),
            idle_conn_timeout = ?cfg.idle_conn_timeout(),
            tls_handshake_timeout = ?cfg.tls_handshake_timeout(),
            response_header_timeout = ?cfg.response_header_timeout(),
            force_http2 = cfg.force_http2(),
            "Upstream transport built"
        );

        UpstreamTransport {
            client,
            response_header_timeout: cfg.response_header_timeout(),
        }
    }
}

#[async_trait]
impl RoundTrip for UpstreamTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let timeout = self.response_header_timeout;
        let (pending, mut connecting) = watch::channel(0usize);
        let exchange = PENDING_CONNECTS.scope(Arc::new(pending), self.client.request(request));
        tokio::pin!(exchange);
        let headers_due = tokio::time::sleep(timeout);
        tokio::pin!(headers_due);

        loop {
            tokio::select! {
                biased;
                response = &mut exchange => return Ok(response?.map(Body::new)),
                Ok(()) = connecting.changed() => {
                    if *connecting.borrow_and_update() == 0 {
                        headers_due.as_mut().reset(Instant::now() + timeout);
                    }
                }
                _ = &mut headers_due, if *connecting.borrow() == 0 => {
                    return Err(TransportError::ResponseHeaderTimeout(timeout));
                }
            }
        }
    }
}
