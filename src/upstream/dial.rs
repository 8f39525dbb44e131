//! Outbound dialing strategy.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Opens the raw TCP connection for an upstream (or proxy) address.
///
/// Swapping the dialer changes how connections reach the network, e.g. to
/// pin traffic to a sidecar or a mesh gateway, without touching pooling or
/// TLS.
#[async_trait]
pub trait Dial: Send + Sync + 'static {
    /// Connect to `address` in `host:port` form.
    async fn dial(&self, address: &str) -> io::Result<TcpStream>;
}

/// Plain TCP dialer with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dial for TcpDialer {
    async fn dial(&self, address: &str) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial {} timed out after {:?}", address, self.connect_timeout),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
