//! Throttling for the credential endpoints.
//!
//! Each client IP gets one bucket per endpoint, so a burst of failed logins
//! never locks the same client out of registering and vice versa.

use crate::api::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use ipnetwork::IpNetwork;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_governor::GovernorError;
use tower_governor::key_extractor::KeyExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialRoute {
    Register,
    Login,
}

impl CredentialRoute {
    /// Only `/register` and `/login` (at any nesting depth) are credential routes.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/').rsplit('/').next() {
            Some("register") => Some(Self::Register),
            Some("login") => Some(Self::Login),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub client_ip: IpAddr,
    pub route: CredentialRoute,
}

/// Resolves the client behind a request. `X-Forwarded-For` is only believed when the peer is a trusted proxy.
#[derive(Debug, Clone)]
pub struct CredentialKeyExtractor {
    trusted_proxies: Arc<[IpNetwork]>,
}

impl CredentialKeyExtractor {
    #[must_use]
    pub fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { trusted_proxies: trusted_proxies.into() }
    }

    #[must_use]
    pub fn client_ip(&self, headers: &HeaderMap, peer: IpAddr) -> IpAddr {
        if !self.is_trusted(peer) {
            return peer;
        }

        // Walk the hops from the nearest proxy outwards; the first untrusted one is the client.
        headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .find(|ip| !self.is_trusted(*ip))
            .unwrap_or(peer)
    }

    fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(ip))
    }
}

impl KeyExtractor for CredentialKeyExtractor {
    type Key = CredentialKey;

    fn extract<T>(&self, req: &axum::http::Request<T>) -> Result<Self::Key, GovernorError> {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .ok_or(GovernorError::UnableToExtractKey)?;
        let route = CredentialRoute::from_path(req.uri().path()).ok_or(GovernorError::UnableToExtractKey)?;

        Ok(CredentialKey { client_ip: self.client_ip(req.headers(), peer), route })
    }
}

#[derive(Clone, Debug)]
struct Metrics {
    decisions_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("tokenvault-server");
        Self {
            decisions_total: meter
                .u64_counter("auth_rate_limit_decisions_total")
                .with_description("Credential endpoint rate limit decisions by endpoint and outcome")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CredentialLimiter {
    pub extractor: CredentialKeyExtractor,
    metrics: Metrics,
}

impl CredentialLimiter {
    #[must_use]
    pub fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { extractor: CredentialKeyExtractor::new(trusted_proxies), metrics: Metrics::new() }
    }

    pub fn record(&self, route: Option<CredentialRoute>, status: StatusCode, retry_after: Option<&str>) {
        let endpoint = route.map_or("unknown", CredentialRoute::as_str);
        let outcome = if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(endpoint, retry_after = retry_after.unwrap_or("?"), "Credential rate limit exceeded");
            "throttled"
        } else {
            "allowed"
        };

        self.metrics
            .decisions_total
            .add(1, &[KeyValue::new("endpoint", endpoint), KeyValue::new("outcome", outcome)]);
    }
}

/// Wraps the governor layer and records each decision it makes.
pub async fn track_credential_limits(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let route = CredentialRoute::from_path(req.uri().path());
    let response = next.run(req).await;

    let retry_after = response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok());
    state.credential_limiter.record(route, response.status(), retry_after);

    response
}
