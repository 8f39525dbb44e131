//! Placeholder responses for targets scaled to zero.
//!
//! # Data Flow
//! ```text
//! ForwardingHandler sees zero ready endpoints
//!     → PlaceholderResponder::serve_placeholder(request parts, target)
//!     → template.rs renders status, headers and body
//!     → complete response, or an error the handler turns into a 502
//! ```

pub mod template;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::Response;

use crate::forwarding::RoutingTarget;

pub use template::TemplatePlaceholder;

/// Response header marking a placeholder response.
pub const PLACEHOLDER_SERVED_HEADER: &str = "x-keda-http-placeholder-served";

#[derive(Debug, thiserror::Error)]
pub enum PlaceholderError {
    #[error("no placeholder configured for {namespace}/{service}")]
    NotConfigured { namespace: String, service: String },
    #[error("invalid placeholder status code {0}")]
    InvalidStatus(u16),
    #[error("invalid placeholder header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Produces the complete fallback response for a target with no capacity.
///
/// On error nothing has been sent; the caller writes its own response.
#[async_trait]
pub trait PlaceholderResponder: Send + Sync + 'static {
    async fn serve_placeholder(
        &self,
        request: &Parts,
        target: &RoutingTarget,
    ) -> Result<Response<Body>, PlaceholderError>;
}
