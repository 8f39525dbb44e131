//! Request forwarding for scale-to-zero backends.
//!
//! A request arrives here already routed: its `RoutingTarget` names the
//! backend, the upstream URL and the placeholder settings. The handler
//! decides between a placeholder page, a bounded wait for capacity and a
//! plain forward.

mod config;
mod handler;
mod target;
mod upstream;

pub use config::ForwardingConfig;
pub use handler::{ForwardingHandler, COLD_START_HEADER, PLACEHOLDER_FAILURE_BODY};
pub use target::{PlaceholderSettings, RoutingTarget, RoutingTargetExt};
pub use upstream::Upstream;

