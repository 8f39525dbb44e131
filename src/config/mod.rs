//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → ForwardingConfig / RouteTable / TLS built once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, resolve_config, ConfigError};
pub use validation::{validate_config, ValidationError};
pub use schema::{
    AdminConfig, ListenerConfig, ObservabilityConfig, PlaceholderFeatureConfig, ProxyConfig,
    ReadinessConfig, RouteConfig, RoutePlaceholderConfig, TimeoutConfig, TlsConfig, TracingConfig,
    UpstreamTlsConfig,
};
