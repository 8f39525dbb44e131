//! Readiness probing.
//!
//! # Responsibilities
//! - Periodically probe every routed upstream
//! - Feed the endpoints cache: one ready endpoint on success, zero otherwise
//!
//! # Design Decisions
//! - Probes share the forwarding connection pool
//! - Each (namespace, service) is probed once per tick, however many routes use it

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Uri};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::ReadinessConfig;
use crate::forwarding::RoutingTarget;
use crate::scaling::endpoints::InMemoryEndpointsCache;
use crate::upstream::RoundTrip;

/// Background task keeping the endpoints cache in line with upstream health.
pub struct ReadinessProber {
    cache: Arc<InMemoryEndpointsCache>,
    round_tripper: Arc<dyn RoundTrip>,
    config: ReadinessConfig,
    targets: BTreeMap<(String, String), Uri>,
}

impl ReadinessProber {
    pub fn new<'a>(
        cache: Arc<InMemoryEndpointsCache>,
        round_tripper: Arc<dyn RoundTrip>,
        config: ReadinessConfig,
        targets: impl IntoIterator<Item = &'a RoutingTarget>,
    ) -> Self {
        let mut deduped = BTreeMap::new();
        for target in targets {
            deduped
                .entry((target.namespace.clone(), target.service.clone()))
                .or_insert_with(|| target.upstream.clone());
        }
        Self {
            cache,
            round_tripper,
            config,
            targets: deduped,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.probe_enabled {
            tracing::info!("Readiness probing disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            services = self.targets.len(),
            "Readiness prober starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Readiness prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every service once and record the results.
    pub async fn probe_all(&self) {
        for ((namespace, service), upstream) in &self.targets {
            let ready = self.probe(upstream).await;
            self.cache.set_ready(namespace, service, usize::from(ready));
        }
    }

    async fn probe(&self, upstream: &Uri) -> bool {
        let uri = probe_uri(upstream, &self.config.path);
        let request = match Request::get(&uri)
            .header("user-agent", "coldstart-proxy-readiness")
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "Failed to build readiness probe");
                return false;
            }
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match time::timeout(timeout, self.round_tripper.round_trip(request)).await {
            Ok(Ok(response)) => {
                let ok = response.status().is_success();
                if !ok {
                    tracing::debug!(uri = %uri, status = %response.status(), "Readiness probe failed: non-success status");
                }
                ok
            }
            Ok(Err(e)) => {
                tracing::debug!(uri = %uri, error = %e, "Readiness probe failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(uri = %uri, "Readiness probe failed: timeout");
                false
            }
        }
    }
}

fn probe_uri(upstream: &Uri, path: &str) -> String {
    let scheme = upstream.scheme_str().unwrap_or("http");
    let authority = upstream.authority().map(|a| a.as_str()).unwrap_or_default();
    let base = upstream.path().trim_end_matches('/');
    format!("{scheme}://{authority}{base}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::EndpointsCache;
    use crate::upstream::TransportError;
    use async_trait::async_trait;
    use axum::http::{Response, StatusCode};
    use std::sync::Mutex;

    struct ByHost {
        healthy: &'static str,
        probed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RoundTrip for ByHost {
        async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
            self.probed.lock().unwrap().push(request.uri().to_string());
            let status = if request.uri().host() == Some(self.healthy) {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            Ok(Response::builder().status(status).body(Body::empty()).unwrap())
        }
    }

    fn target(ns: &str, svc: &str, upstream: &'static str) -> RoutingTarget {
        RoutingTarget::new(ns, svc, Uri::from_static(upstream))
    }

    #[test]
    fn probe_uri_keeps_base_path() {
        assert_eq!(
            probe_uri(&Uri::from_static("http://app:8080/api/"), "/healthz"),
            "http://app:8080/api/healthz"
        );
        assert_eq!(
            probe_uri(&Uri::from_static("https://app"), "/ready"),
            "https://app/ready"
        );
    }

    #[tokio::test]
    async fn probe_results_land_in_cache() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        let rt = Arc::new(ByHost {
            healthy: "up",
            probed: Mutex::new(Vec::new()),
        });
        let targets = [
            target("default", "up", "http://up:80"),
            target("default", "down", "http://down:80"),
            target("default", "up", "http://up:80/other"),
        ];
        let prober = ReadinessProber::new(cache.clone(), rt.clone(), ReadinessConfig::default(), &targets);

        prober.probe_all().await;

        assert_eq!(cache.get("default", "up").unwrap().active(), 1);
        assert_eq!(cache.get("default", "down").unwrap().active(), 0);
        assert_eq!(rt.probed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_prober_returns_immediately() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        let rt = Arc::new(ByHost {
            healthy: "up",
            probed: Mutex::new(Vec::new()),
        });
        let targets = [target("default", "up", "http://up:80")];
        let prober = ReadinessProber::new(cache.clone(), rt, ReadinessConfig::default(), &targets);
        let (_tx, rx) = broadcast::channel(1);

        prober.run(rx).await;

        assert!(cache.get("default", "up").is_err());
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let cache = Arc::new(InMemoryEndpointsCache::new());
        let rt = Arc::new(ByHost {
            healthy: "up",
            probed: Mutex::new(Vec::new()),
        });
        let targets = [target("default", "up", "http://up:80")];
        let config = ReadinessConfig {
            probe_enabled: true,
            ..Default::default()
        };
        let prober = ReadinessProber::new(cache.clone(), rt, config, &targets);
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn(prober.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(cache.get("default", "up").unwrap().active(), 1);
    }
}
