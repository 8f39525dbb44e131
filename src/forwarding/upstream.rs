//! Reverse-proxy mechanics for a single forwarded request.
//!
//! # Responsibilities
//! - Point the request at the target's upstream URL
//! - Strip hop-by-hop headers in both directions
//! - Append the client address to `X-Forwarded-For`
//! - Turn transport failures into a 502
//!
//! # Design Decisions
//! - Bodies are streamed, never buffered
//! - `Host` follows the upstream authority

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::PathAndQuery;
use axum::http::{Request, Response, StatusCode, Uri};

use crate::forwarding::RoutingTarget;
use crate::upstream::RoundTrip;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Forwards requests through the handler's round tripper.
#[derive(Clone)]
pub struct Upstream {
    round_tripper: Arc<dyn RoundTrip>,
}

impl Upstream {
    pub fn new(round_tripper: Arc<dyn RoundTrip>) -> Self {
        Self { round_tripper }
    }

    /// Forward `request` to `target` and return the upstream response, or a
    /// 502 describing why there is none.
    pub async fn forward(&self, target: &RoutingTarget, request: Request<Body>) -> Response<Body> {
        let (mut parts, body) = request.into_parts();

        let uri = match upstream_uri(&target.upstream, &parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(upstream = %target.upstream, error = %e, "Could not build upstream URI");
                return bad_gateway(format!("error on backend ({e})"));
            }
        };

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::HOST);
        if let Some(ip) = client_addr {
            append_forwarded_for(&mut parts.headers, &ip.to_string());
        }
        parts.uri = uri;
        // The pool negotiates the upstream protocol on its own.
        parts.version = Default::default();

        let upstream_request = Request::from_parts(parts, body);
        match self.round_tripper.round_trip(upstream_request).await {
            Ok(mut response) => {
                strip_hop_by_hop(response.headers_mut());
                response
            }
            Err(e) => {
                tracing::error!(
                    namespace = %target.namespace,
                    service = %target.service,
                    error = %e,
                    "Upstream request failed"
                );
                bad_gateway(format!("error on backend ({e})"))
            }
        }
    }
}

/// Join the incoming path and query onto the upstream base URL.
fn upstream_uri(base: &Uri, incoming: &Uri) -> Result<Uri, axum::http::Error> {
    let base_path = base.path().trim_end_matches('/');
    let incoming = incoming
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");
    let path_and_query = format!("{base_path}{incoming}");

    let mut builder = Uri::builder().path_and_query(path_and_query);
    if let Some(scheme) = base.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = base.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    // Upgrade only travels with Connection: upgrade, which was just removed.
    headers.remove(header::UPGRADE);
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };
    if let Ok(value) = HeaderValue::try_from(value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// A 502 with a plain text body.
pub(crate) fn bad_gateway(body: String) -> Response<Body> {
    plain_response(StatusCode::BAD_GATEWAY, body)
}

pub(crate) fn plain_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
