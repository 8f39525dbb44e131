//! Span instrumentation around upstream round trips.
//!
//! # Design Decisions
//! - The traced/untraced choice is made once, when the handler is built
//! - Exactly one span per round trip; bytes, status and headers pass through untouched

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use tracing::field::{display, Empty};
use tracing::Instrument;

use crate::config::TracingConfig;
use crate::upstream::transport::{RoundTrip, TransportError};

/// Span name recorded for every traced round trip.
pub const ROUND_TRIP_SPAN: &str = "upstream.round_trip";

/// Wraps a round tripper in a `tracing` span.
#[derive(Debug, Clone)]
pub struct Traced<T> {
    inner: T,
}

impl<T> Traced<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: RoundTrip> RoundTrip for Traced<T> {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let span = tracing::info_span!(
            "upstream.round_trip",
            otel.kind = "client",
            http.request.method = %request.method(),
            url.full = %request.uri(),
            network.protocol.version = ?request.version(),
            http.response.status_code = Empty,
            error = Empty,
        );

        let result = self.inner.round_trip(request).instrument(span.clone()).await;
        match &result {
            Ok(response) => {
                span.record("http.response.status_code", response.status().as_u16());
            }
            Err(e) => {
                span.record("error", display(e));
            }
        }
        result
    }
}

/// Pick the round tripper used for the lifetime of a handler.
pub fn select_round_tripper<T: RoundTrip>(transport: T, tracing: &TracingConfig) -> Arc<dyn RoundTrip> {
    if tracing.enabled {
        Arc::new(Traced::new(transport))
    } else {
        Arc::new(transport)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Span counting for tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tracing::span::{Attributes, Id};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, Layer};

    /// Counts spans opened with a given name.
    #[derive(Clone)]
    pub(crate) struct SpanCounter {
        name: &'static str,
        count: Arc<AtomicUsize>,
    }

    impl SpanCounter {
        pub(crate) fn new(name: &'static str) -> Self {
            Self {
                name,
                count: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl<S: Subscriber> Layer<S> for SpanCounter {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            if attrs.metadata().name() == self.name {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
