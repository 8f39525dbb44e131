//! Request-forwarding core of a scale-to-zero HTTP interceptor.
//!
//! Requests are routed to a scale target, held until the target has ready
//! endpoints (or answered with a placeholder page while it has none), then
//! forwarded over a pooled upstream transport. Every forwarded response
//! carries `X-KEDA-HTTP-Cold-Start`.

pub mod admin;
pub mod config;
pub mod forwarding;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod placeholder;
pub mod routing;
pub mod scaling;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use forwarding::{ForwardingHandler, COLD_START_HEADER};
pub use http::HttpServer;
pub use lifecycle::{Interceptor, Shutdown};
