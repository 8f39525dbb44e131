//! Scale-from-zero coordination.
//!
//! # Data Flow
//! ```text
//! Readiness sources (prober.rs, admin API):
//!     Probe result / operator update
//!     → InMemoryEndpointsCache::set_ready
//!     → watch channel notifies waiters
//!
//! Request path (wait.rs):
//!     WaitFunc::wait(ctx, namespace, service)
//!     → Ok(false) when ready, Ok(true) after blocking, Err at deadline
//! ```

pub mod endpoints;
pub mod prober;
pub mod wait;

pub use endpoints::{Endpoints, EndpointsCache, InMemoryEndpointsCache, LookupError, ServiceReadiness};
pub use prober::ReadinessProber;
pub use wait::{EndpointsWaiter, WaitContext, WaitError, WaitFunc};
