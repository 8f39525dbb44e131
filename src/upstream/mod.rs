//! Outbound transport subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardingConfig + TLS client config + Dial strategy
//!     → transport.rs (one pooled hyper client per handler)
//!     → traced.rs (optional span decorator, chosen once)
//!     → Arc<dyn RoundTrip> used by every request
//!
//! Per connection:
//!     connector.rs → proxy_env.rs → dial.rs → tls handshake
//! ```
//!
//! # Design Decisions
//! - The pool is built once and injected, never global
//! - Dialing is pluggable so network routing stays outside the proxy
//! - Transport timeouts are independent of the capacity wait timeout

pub mod connector;
pub mod dial;
pub mod proxy_env;
pub mod tls;
pub mod traced;
pub mod transport;

pub use connector::{ConnectError, DialConnector};
pub use dial::{Dial, TcpDialer};
pub use proxy_env::ProxyEnv;
pub use tls::{build_client_config, TlsConfigError};
pub use traced::{select_round_tripper, Traced, ROUND_TRIP_SPAN};
pub use transport::{RoundTrip, TransportBuilder, TransportError, UpstreamTransport};
