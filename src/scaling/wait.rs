//! Waiting for workload capacity.
//!
//! # Responsibilities
//! - Block a request until its target has ready endpoints
//! - Report whether the request hit a cold start
//! - Give up at the caller's deadline
//!
//! # Design Decisions
//! - Cancellation is dropping the future; no waiter outlives its request
//! - The deadline travels in a `WaitContext` so coordinators can see it

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::scaling::endpoints::InMemoryEndpointsCache;

/// Deadline of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitContext {
    deadline: Instant,
    timeout: Duration,
}

impl WaitContext {
    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The configured bound this context was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Why a wait ended without capacity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("context deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("endpoints watch for {namespace}/{service} closed")]
    WatchClosed { namespace: String, service: String },
    #[error("{0}")]
    Other(String),
}

/// Capacity wait coordinator.
///
/// Returns `Ok(true)` when the call had to block because the target had no
/// capacity, `Ok(false)` when capacity was already there. Must be safe to
/// call from any number of requests at once.
#[async_trait]
pub trait WaitFunc: Send + Sync + 'static {
    async fn wait(&self, ctx: WaitContext, namespace: &str, service: &str) -> Result<bool, WaitError>;
}

/// Waits on the in-memory endpoints cache.
#[derive(Debug, Clone)]
pub struct EndpointsWaiter {
    cache: Arc<InMemoryEndpointsCache>,
}

impl EndpointsWaiter {
    pub fn new(cache: Arc<InMemoryEndpointsCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl WaitFunc for EndpointsWaiter {
    async fn wait(&self, ctx: WaitContext, namespace: &str, service: &str) -> Result<bool, WaitError> {
        let mut rx = self.cache.subscribe(namespace, service);
        if rx.borrow_and_update().active() > 0 {
            return Ok(false);
        }

        tracing::debug!(
            namespace,
            service,
            remaining = ?ctx.remaining(),
            "No ready endpoints, waiting for scale up"
        );

        let ready = async {
            loop {
                rx.changed().await.map_err(|_| WaitError::WatchClosed {
                    namespace: namespace.to_string(),
                    service: service.to_string(),
                })?;
                if rx.borrow_and_update().active() > 0 {
                    return Ok(true);
                }
            }
        };

        match tokio::time::timeout_at(ctx.deadline(), ready).await {
            Ok(result) => result,
            Err(_) => Err(WaitError::DeadlineExceeded(ctx.timeout())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_service_is_not_a_cold_start() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        cache.set_ready("default", "app", 1);
        let waiter = EndpointsWaiter::new(cache);

        let cold = waiter
            .wait(WaitContext::with_timeout(Duration::from_secs(1)), "default", "app")
            .await
            .unwrap();
        assert!(!cold);
    }

    #[tokio::test]
    async fn scale_up_unblocks_waiter() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        cache.set_ready("default", "app", 0);
        let waiter = EndpointsWaiter::new(cache.clone());

        let handle = tokio::spawn(async move {
            let result = waiter
                .wait(WaitContext::with_timeout(Duration::from_secs(5)), "default", "app")
                .await;
            result
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.set_ready("default", "app", 1);

        assert_eq!(handle.await.unwrap(), Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_deadline() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        let waiter = EndpointsWaiter::new(cache);
        let started = Instant::now();

        let err = waiter
            .wait(WaitContext::with_timeout(Duration::from_millis(300)), "default", "app")
            .await
            .unwrap_err();

        assert_eq!(err, WaitError::DeadlineExceeded(Duration::from_millis(300)));
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(err.to_string().starts_with("context deadline exceeded"));
    }

    #[tokio::test]
    async fn unrelated_updates_keep_waiting() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        cache.set_ready("default", "app", 0);
        let waiter = EndpointsWaiter::new(cache.clone());

        let handle = tokio::spawn(async move {
            let result = waiter
                .wait(WaitContext::with_timeout(Duration::from_millis(200)), "default", "app")
                .await;
            result
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.set_ready("default", "other", 3);
        cache.set_ready("default", "app", 0);

        assert!(matches!(handle.await.unwrap(), Err(WaitError::DeadlineExceeded(_))));
    }
}
