//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → middleware.rs (attach routing object, count pending)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → matched Route, or 404
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Compile matchers and routing objects
//!     → Sort by priority
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod middleware;
pub mod router;

pub use middleware::route_request;
pub use router::{Route, RouteError, RouteTable};
