//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the forwarding handler as fallback
//! - Wire up middleware (request ID, tracing, timeout, routing)
//! - Serve plain or TLS connections until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, Request, Response};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::TlsConfig;
use crate::forwarding::ForwardingHandler;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::net::tls::load_tls_config;
use crate::observability::metrics;
use crate::routing::{route_request, RouteTable};

/// Time in-flight requests get to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP server for the interceptor.
pub struct HttpServer {
    router: Router,
    tls: Option<TlsConfig>,
}

impl HttpServer {
    pub fn new(
        routes: Arc<RouteTable>,
        handler: Arc<ForwardingHandler>,
        request_timeout: Duration,
        tls: Option<TlsConfig>,
    ) -> Self {
        let router = Self::build_router(routes, handler, request_timeout);
        Self { router, tls }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(routes: Arc<RouteTable>, handler: Arc<ForwardingHandler>, request_timeout: Duration) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .fallback(forward)
            .with_state(handler)
            .layer(middleware::from_fn_with_state(routes, route_request))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    /// The fully layered router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        match self.tls {
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                    })
                    .await?;
            }
            Some(tls) => {
                tracing::info!(address = %addr, "HTTPS server starting");
                let rustls = load_tls_config(&tls).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
                });
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Fallback handler: every routed request ends up here.
async fn forward(State(handler): State<Arc<ForwardingHandler>>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();

    let response = handler.serve(request).await;

    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
