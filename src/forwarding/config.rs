//! Immutable forwarding parameters.

use std::time::Duration;

use crate::config::TimeoutConfig;

/// Timeouts and pool parameters used by the forwarding handler and the
/// upstream transport.
///
/// Built once at startup and copied into every component that needs it.
/// There are no setters; a new value means a new handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardingConfig {
    wait_timeout: Duration,
    response_header_timeout: Duration,
    connect_timeout: Duration,
    force_http2: bool,
    max_idle_conns: usize,
    idle_conn_timeout: Duration,
    tls_handshake_timeout: Duration,
    expect_continue_timeout: Duration,
}

impl ForwardingConfig {
    /// Build from the `[timeouts]` config section.
    pub fn from_timeouts(t: &TimeoutConfig) -> Self {
        Self {
            wait_timeout: Duration::from_millis(t.workload_replicas_ms),
            response_header_timeout: Duration::from_millis(t.response_header_ms),
            connect_timeout: Duration::from_millis(t.connect_ms),
            force_http2: t.force_http2,
            max_idle_conns: t.max_idle_conns,
            idle_conn_timeout: Duration::from_millis(t.idle_conn_ms),
            tls_handshake_timeout: Duration::from_millis(t.tls_handshake_ms),
            expect_continue_timeout: Duration::from_millis(t.expect_continue_ms),
        }
    }

    /// Upper bound on how long a request waits for workload capacity.
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn response_header_timeout(&self) -> Duration {
        self.response_header_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn force_http2(&self) -> bool {
        self.force_http2
    }

    pub fn max_idle_conns(&self) -> usize {
        self.max_idle_conns
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        self.idle_conn_timeout
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        self.tls_handshake_timeout
    }

    /// Carried for completeness; hyper's client writes request bodies
    /// without waiting for `100 Continue`.
    pub fn expect_continue_timeout(&self) -> Duration {
        self.expect_continue_timeout
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self::from_timeouts(&TimeoutConfig::default())
    }
}
