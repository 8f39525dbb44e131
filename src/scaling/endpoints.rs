//! Endpoint readiness cache.
//!
//! # Responsibilities
//! - Answer "how many ready endpoints does this service have" without I/O
//! - Notify waiters when a service's readiness changes
//!
//! # Design Decisions
//! - One `watch` channel per service; readers never block writers
//! - Unknown services are a lookup error, zero ready endpoints is not
//! - Populated from outside (prober, admin API, or an orchestrator watch)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

/// Readiness snapshot of one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    /// Number of ready endpoints backing the service.
    pub ready: usize,
}

impl Endpoints {
    pub fn new(ready: usize) -> Self {
        Self { ready }
    }

    /// Active endpoint count used by scale-from-zero decisions.
    pub fn active(&self) -> usize {
        self.ready
    }
}

/// A readiness lookup that could not be answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no endpoints known for service {namespace}/{service}")]
    NotFound { namespace: String, service: String },
}

/// Low-latency, eventually consistent readiness lookup.
///
/// Implementations must answer from memory; this is called on the request
/// fast path.
pub trait EndpointsCache: Send + Sync + 'static {
    fn get(&self, namespace: &str, service: &str) -> Result<Endpoints, LookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ServiceKey {
    namespace: String,
    service: String,
}

impl ServiceKey {
    fn new(namespace: &str, service: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            service: service.to_string(),
        }
    }
}

/// Readiness entry as listed by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReadiness {
    pub namespace: String,
    pub service: String,
    pub ready: usize,
}

/// In-process readiness cache backed by `DashMap` and `watch` channels.
#[derive(Debug, Default)]
pub struct InMemoryEndpointsCache {
    services: DashMap<ServiceKey, watch::Sender<Endpoints>>,
}

impl InMemoryEndpointsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ready endpoint count of a service and wake its waiters.
    pub fn set_ready(&self, namespace: &str, service: &str, ready: usize) {
        let endpoints = Endpoints::new(ready);
        match self.services.entry(ServiceKey::new(namespace, service)) {
            Entry::Occupied(entry) => {
                let previous = entry.get().send_replace(endpoints);
                if previous != endpoints {
                    tracing::debug!(
                        namespace,
                        service,
                        previous = previous.ready,
                        ready,
                        "Endpoints readiness changed"
                    );
                }
            }
            Entry::Vacant(entry) => {
                tracing::debug!(namespace, service, ready, "Tracking endpoints");
                entry.insert(watch::channel(endpoints).0);
            }
        }
    }

    /// Subscribe to readiness changes of a service.
    ///
    /// Subscribing to an unknown service starts tracking it with zero ready
    /// endpoints.
    pub fn subscribe(&self, namespace: &str, service: &str) -> watch::Receiver<Endpoints> {
        self.services
            .entry(ServiceKey::new(namespace, service))
            .or_insert_with(|| watch::channel(Endpoints::default()).0)
            .subscribe()
    }

    /// All tracked services, sorted by namespace then service.
    pub fn snapshot_all(&self) -> Vec<ServiceReadiness> {
        let mut all: Vec<_> = self
            .services
            .iter()
            .map(|entry| ServiceReadiness {
                namespace: entry.key().namespace.clone(),
                service: entry.key().service.clone(),
                ready: entry.value().borrow().ready,
            })
            .collect();
        all.sort_by(|a, b| (&a.namespace, &a.service).cmp(&(&b.namespace, &b.service)));
        all
    }
}

impl EndpointsCache for InMemoryEndpointsCache {
    fn get(&self, namespace: &str, service: &str) -> Result<Endpoints, LookupError> {
        self.services
            .get(&ServiceKey::new(namespace, service))
            .map(|tx| *tx.borrow())
            .ok_or_else(|| LookupError::NotFound {
                namespace: namespace.to_string(),
                service: service.to_string(),
            })
    }
}
