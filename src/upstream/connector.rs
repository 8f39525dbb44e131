//! Connector plugging a `Dial` strategy into hyper's pooled client.
//!
//! # Data Flow
//! ```text
//! Uri from the pool
//!     → proxy_env.rs (direct, absolute-form proxy, or CONNECT tunnel)
//!     → Dial::dial (caller supplied)
//!     → TLS handshake for https (bounded by the handshake timeout)
//!     → UpstreamStream handed back to the pool
//! ```
//!
//! Every attempt is counted in the calling round trip's `PENDING_CONNECTS`
//! so the response-header timer can pause while a connection is being
//! established.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::upstream::dial::Dial;
use crate::upstream::proxy_env::ProxyEnv;

const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

tokio::task_local! {
    /// Connection attempts in flight for the round trip polled by this task.
    pub(crate) static PENDING_CONNECTS: Arc<watch::Sender<usize>>;
}

/// Holds one slot in `PENDING_CONNECTS` until the attempt settles.
struct ConnectAttempt(Option<Arc<watch::Sender<usize>>>);

impl ConnectAttempt {
    fn begin() -> Self {
        let pending = PENDING_CONNECTS.try_with(Arc::clone).ok();
        if let Some(pending) = &pending {
            pending.send_modify(|n| *n += 1);
        }
        Self(pending)
    }
}

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        if let Some(pending) = &self.0 {
            pending.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

/// Failure to establish an upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("upstream URI {0} has no host")]
    MissingHost(Uri),
    #[error("unsupported upstream scheme in {0}")]
    UnsupportedScheme(Uri),
    #[error("dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid TLS server name {0}")]
    InvalidServerName(String),
    #[error("TLS handshake with {host} timed out after {timeout:?}")]
    TlsHandshakeTimeout { host: String, timeout: Duration },
    #[error("TLS handshake with {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("proxy tunnel to {target} timed out after {timeout:?}")]
    TunnelTimeout { target: String, timeout: Duration },
    #[error("proxy tunnel to {target}: {reason}")]
    Tunnel { target: String, reason: String },
}

/// `tower::Service<Uri>` handing connections to `hyper_util`'s pool.
#[derive(Clone)]
pub struct DialConnector {
    dialer: Arc<dyn Dial>,
    tls: Arc<ClientConfig>,
    proxy: Arc<ProxyEnv>,
    tunnel_timeout: Duration,
    tls_handshake_timeout: Duration,
}

impl DialConnector {
    /// `tls` is used as given, except that ALPN `h2` is offered when
    /// `attempt_http2` is set. `tunnel_timeout` bounds a proxy CONNECT
    /// exchange.
    pub fn new(
        dialer: Arc<dyn Dial>,
        tls: Arc<ClientConfig>,
        proxy: ProxyEnv,
        tunnel_timeout: Duration,
        tls_handshake_timeout: Duration,
        attempt_http2: bool,
    ) -> Self {
        let mut tls = (*tls).clone();
        tls.alpn_protocols = if attempt_http2 {
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        } else {
            vec![b"http/1.1".to_vec()]
        };

        Self {
            dialer,
            tls: Arc::new(tls),
            proxy: Arc::new(proxy),
            tunnel_timeout,
            tls_handshake_timeout,
        }
    }

    async fn connect(self, dst: Uri) -> Result<UpstreamStream, ConnectError> {
        let https = match dst.scheme_str() {
            Some("https") => true,
            Some("http") | None => false,
            Some(_) => return Err(ConnectError::UnsupportedScheme(dst)),
        };
        let host = dst
            .host()
            .ok_or_else(|| ConnectError::MissingHost(dst.clone()))?
            .to_string();
        let port = dst.port_u16().unwrap_or(if https { 443 } else { 80 });
        let target = format!("{}:{}", host, port);

        match self.proxy.proxy_for(https, &host, port) {
            None => {
                let tcp = self.dial(&target).await?;
                if https {
                    self.handshake(tcp, &host).await
                } else {
                    Ok(UpstreamStream::plain(tcp, false))
                }
            }
            Some(proxy) => {
                let proxy_addr = proxy.address();
                tracing::trace!(target = %target, proxy = %proxy_addr, "Connecting through proxy");
                let mut tcp = self.dial(&proxy_addr).await?;
                if https {
                    tokio::time::timeout(self.tunnel_timeout, tunnel(&mut tcp, &target))
                        .await
                        .map_err(|_| ConnectError::TunnelTimeout {
                            target: target.clone(),
                            timeout: self.tunnel_timeout,
                        })??;
                    self.handshake(tcp, &host).await
                } else {
                    Ok(UpstreamStream::plain(tcp, true))
                }
            }
        }
    }

    async fn dial(&self, address: &str) -> Result<TcpStream, ConnectError> {
        self.dialer
            .dial(address)
            .await
            .map_err(|source| ConnectError::Dial {
                address: address.to_string(),
                source,
            })
    }

    async fn handshake(&self, tcp: TcpStream, host: &str) -> Result<UpstreamStream, ConnectError> {
        let name = ServerName::try_from(host.trim_start_matches('[').trim_end_matches(']').to_string())
            .map_err(|_| ConnectError::InvalidServerName(host.to_string()))?;
        let connector = TlsConnector::from(self.tls.clone());

        let tls = tokio::time::timeout(self.tls_handshake_timeout, connector.connect(name, tcp))
            .await
            .map_err(|_| ConnectError::TlsHandshakeTimeout {
                host: host.to_string(),
                timeout: self.tls_handshake_timeout,
            })?
            .map_err(|source| ConnectError::Tls {
                host: host.to_string(),
                source,
            })?;

        Ok(UpstreamStream::tls(tls))
    }
}

impl tower::Service<Uri> for DialConnector {
    type Response = UpstreamStream;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<UpstreamStream, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let attempt = ConnectAttempt::begin();
        let connector = self.clone();
        Box::pin(async move {
            let _attempt = attempt;
            connector.connect(dst).await
        })
    }
}

/// Issue `CONNECT target` on an open proxy connection.
async fn tunnel(tcp: &mut TcpStream, target: &str) -> Result<(), ConnectError> {
    let fail = |reason: String| ConnectError::Tunnel {
        target: target.to_string(),
        reason,
    };

    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    tcp.write_all(request.as_bytes())
        .await
        .map_err(|e| fail(e.to_string()))?;

    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = tcp.read(&mut chunk).await.map_err(|e| fail(e.to_string()))?;
        if n == 0 {
            return Err(fail("proxy closed the connection".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_CONNECT_RESPONSE {
            return Err(fail("proxy response headers too large".into()));
        }
    }

    let status_line = buf
        .split(|b| *b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default();
    let status = status_line.split_whitespace().nth(1);
    if status == Some("200") {
        Ok(())
    } else {
        Err(fail(format!("unexpected proxy response: {status_line}")))
    }
}

enum Io {
    Plain(TokioIo<TcpStream>),
    Tls(Box<TokioIo<TlsStream<TcpStream>>>),
}

/// An established upstream connection, plain or TLS.
pub struct UpstreamStream {
    io: Io,
    proxied: bool,
    h2: bool,
}

impl UpstreamStream {
    fn plain(tcp: TcpStream, proxied: bool) -> Self {
        Self {
            io: Io::Plain(TokioIo::new(tcp)),
            proxied,
            h2: false,
        }
    }

    fn tls(tls: TlsStream<TcpStream>) -> Self {
        let h2 = tls.get_ref().1.alpn_protocol() == Some(b"h2".as_slice());
        Self {
            io: Io::Tls(Box::new(TokioIo::new(tls))),
            proxied: false,
            h2,
        }
    }
}

impl Connection for UpstreamStream {
    fn connected(&self) -> Connected {
        let connected = Connected::new().proxy(self.proxied);
        if self.h2 {
            connected.negotiated_h2()
        } else {
            connected
        }
    }
}

impl Read for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(io) => Pin::new(io).poll_read(cx, buf),
            Io::Tls(io) => Pin::new(io.as_mut()).poll_read(cx, buf),
        }
    }
}

impl Write for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().io {
            Io::Plain(io) => Pin::new(io).poll_write(cx, buf),
            Io::Tls(io) => Pin::new(io.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(io) => Pin::new(io).poll_flush(cx),
            Io::Tls(io) => Pin::new(io.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(io) => Pin::new(io).poll_shutdown(cx),
            Io::Tls(io) => Pin::new(io.as_mut()).poll_shutdown(cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.io {
            Io::Plain(io) => io.is_write_vectored(),
            Io::Tls(io) => io.is_write_vectored(),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().io {
            Io::Plain(io) => Pin::new(io).poll_write_vectored(cx, bufs),
            Io::Tls(io) => Pin::new(io.as_mut()).poll_write_vectored(cx, bufs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::dial::TcpDialer;
    use tokio::net::TcpListener;
    use tower::Service;

    fn connector(proxy: ProxyEnv) -> DialConnector {
        let tls = crate::upstream::tls::build_client_config(&Default::default()).unwrap();
        DialConnector::new(
            Arc::new(TcpDialer::new(Duration::from_secs(1))),
            tls,
            proxy,
            Duration::from_secs(1),
            Duration::from_millis(200),
            false,
        )
    }

    #[tokio::test]
    async fn plain_connection_is_not_proxied() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let uri: Uri = format!("http://{}/", addr).parse().unwrap();
        let stream = connector(ProxyEnv::direct()).call(uri).await.unwrap();
        assert!(!stream.proxied);
        assert!(!stream.h2);
    }

    #[tokio::test]
    async fn plain_target_goes_to_proxy_in_absolute_form() {
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy.local_addr().unwrap();
        let env = ProxyEnv::from_lookup(|k| (k == "HTTP_PROXY").then(|| proxy_addr.to_string()));

        let stream = connector(env)
            .call(Uri::from_static("http://backend.example:8080/"))
            .await
            .unwrap();
        assert!(stream.proxied);
    }

    #[tokio::test]
    async fn tunnel_accepts_200() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tunnel(&mut tcp, "backend.example:443").await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT backend.example:443 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn tunnel_rejects_other_statuses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await;
        });

        let mut tcp = TcpStream::connect(addr).await.unwrap();
        let err = tunnel(&mut tcp, "backend.example:443").await.unwrap_err();
        assert!(err.to_string().contains("407"));
    }

    #[tokio::test]
    async fn tls_handshake_is_bounded() {
        // Accepts TCP but never speaks TLS.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let uri: Uri = format!("https://localhost:{}/", addr.port()).parse().unwrap();
        let err = match connector(ProxyEnv::direct()).call(uri).await {
            Ok(_) => panic!("handshake should not complete"),
            Err(e) => e,
        };
        assert!(matches!(err, ConnectError::TlsHandshakeTimeout { .. }));
    }

    #[tokio::test]
    async fn attempts_are_counted_while_in_flight() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(0usize);
        let tx = Arc::new(tx);

        let uri: Uri = format!("http://{}/", addr).parse().unwrap();
        let mut connector = connector(ProxyEnv::direct());
        let connecting = PENDING_CONNECTS.sync_scope(tx.clone(), || connector.call(uri));
        assert_eq!(*rx.borrow(), 1);

        connecting.await.unwrap();
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test]
    async fn attempts_outside_a_round_trip_are_not_counted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let uri: Uri = format!("http://{}/", addr).parse().unwrap();
        assert!(connector(ProxyEnv::direct()).call(uri).await.is_ok());
    }

    #[test]
    fn alpn_follows_http2_flag() {
        let tls = crate::upstream::tls::build_client_config(&Default::default()).unwrap();
        let dialer: Arc<dyn Dial> = Arc::new(TcpDialer::new(Duration::from_secs(1)));

        let h2 = DialConnector::new(dialer.clone(), tls.clone(), ProxyEnv::direct(), Duration::from_secs(1), Duration::from_secs(1), true);
        assert_eq!(h2.tls.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);

        let h1 = DialConnector::new(dialer, tls, ProxyEnv::direct(), Duration::from_secs(1), Duration::from_secs(1), false);
        assert_eq!(h1.tls.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
