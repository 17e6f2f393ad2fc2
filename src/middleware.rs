use crate::error::{ApiError, RateLimitError};
use crate::key_generator::{normalize_path, RateLimitKey};
use crate::rate_limit_config::RateLimitPolicy;
use crate::rate_limiter::{Decision, RateLimiter};
use crate::response::RateLimitExceeded;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Rate limit state for one route: the shared limiter plus that route's
/// validated policy. Obtained from [`RateLimiter::limit_route`].
#[derive(Clone)]
pub struct RouteGuard {
    limiter: RateLimiter,
    policy: Arc<RateLimitPolicy>,
}

impl RouteGuard {
    pub(crate) fn new(limiter: RateLimiter, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn key_for(&self, request: &Request) -> RateLimitKey {
        let matched = request.extensions().get::<MatchedPath>().map(MatchedPath::as_str);
        let path = normalize_path(matched, request.uri().path());
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let keys = self.limiter.key_generator();
        let identities = keys.resolve_identities(self.policy.identity_options(), request.headers(), peer);
        keys.generate_key(&path, request.method(), &identities)
    }

    pub async fn check(&self, key: &RateLimitKey) -> Result<Decision, RateLimitError> {
        self.limiter.check(&self.policy, key).await
    }
}

/// Route middleware: counts the request, then either continues with quota
/// headers attached or answers 429. Store failures answer 500; requests are
/// never let through when the limit could not be checked.
pub async fn enforce_rate_limit(
    State(guard): State<RouteGuard>,
    request: Request,
    next: Next,
) -> Response {
    let key = guard.key_for(&request);

    match guard.check(&key).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            set_quota_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            info!(
                target: "windowgate::middleware",
                key = %key,
                count = decision.current_count,
                retry_after = decision.reset_seconds,
                "Rate limit exceeded"
            );
            rate_limited_response(&decision)
        }
        Err(err) => {
            error!(
                target: "windowgate::middleware",
                key = %key,
                error = %err,
                "Rate limit check failed, rejecting request"
            );
            ApiError::from(err).into_response()
        }
    }
}

fn set_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
}

fn rate_limited_response(decision: &Decision) -> Response {
    let body = RateLimitExceeded::new(decision.reset_seconds);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

    let headers = response.headers_mut();
    set_quota_headers(headers, decision);
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_seconds));
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.reset_seconds));
    response
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let started = Instant::now();

    info!(
        target: "windowgate::middleware",
        %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "windowgate::middleware",
        %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}
