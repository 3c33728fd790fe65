//! Gateway pipeline stages.
//!
//! The gateway wires these in a fixed order, outermost first:
//! [`LoggingMiddleware`] → [`RateLimitMiddleware`] → [`AuthMiddleware`] →
//! [`MetricsMiddleware`] → router. Stages hold only shared, read-mostly
//! collaborators; everything request-specific lives in the
//! [`RequestContext`] they are handed.
use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header},
};
use tracing::Instrument;

use crate::{
    core::{
        auth::TokenValidator,
        context::RequestContext,
        pipeline::{Middleware, Next},
        rate_limiter::ClientRateLimiter,
        responses::error_response,
    },
    metrics, tracing_setup,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Add the fixed permissive cross-origin headers to a proxied response.
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

/// Outermost stage: one log line per request with the final status and
/// total latency, plus `X-Request-ID` on every response.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let span = tracing_setup::create_request_span(method.as_str(), &path, &ctx.request_id);

        let mut response = next.run(req, ctx).instrument(span.clone()).await;

        let status = response.status();
        let elapsed = ctx.started_at.elapsed();
        span.record("http.status_code", status.as_u16());
        span.record("duration_ms", elapsed.as_millis() as u64);

        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        span.in_scope(|| {
            if status.is_server_error() {
                tracing::warn!(
                    %method,
                    path = %path,
                    client = %ctx.client,
                    status = status.as_u16(),
                    latency_ms,
                    "request completed"
                );
            } else {
                tracing::info!(
                    %method,
                    path = %path,
                    client = %ctx.client,
                    status = status.as_u16(),
                    latency_ms,
                    "request completed"
                );
            }
        });

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

/// Rejects callers whose token bucket is empty with `429` and `Retry-After`.
pub struct RateLimitMiddleware {
    limiter: ClientRateLimiter,
}

impl RateLimitMiddleware {
    pub fn new(limiter: ClientRateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        match self.limiter.check(&ctx.client) {
            Ok(()) => next.run(req, ctx).await,
            Err(wait) => {
                metrics::increment_rate_limited();
                tracing::warn!(
                    client = %ctx.client,
                    retry_after_ms = wait.as_millis() as u64,
                    "Rate limit exceeded"
                );

                let mut response =
                    error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
                // Whole seconds, rounded up
                let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after.max(1)));
                response
            }
        }
    }
}

/// Verifies the bearer token unless the path is on the skip-list, and
/// attaches the decoded claims to the request context.
pub struct AuthMiddleware {
    validator: Arc<TokenValidator>,
}

impl AuthMiddleware {
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        if self.validator.should_skip(req.uri().path()) {
            return next.run(req, ctx).await;
        }

        match self.validator.authenticate(req.headers()) {
            Ok(claims) => {
                tracing::debug!(subject = %claims.subject_id, "Request authenticated");
                ctx.claims = Some(claims);
                next.run(req, ctx).await
            }
            Err(e) => {
                metrics::increment_auth_failure(e.reason());
                tracing::debug!(client = %ctx.client, reason = e.reason(), "Authentication failed");
                error_response(StatusCode::UNAUTHORIZED, e.public_message())
            }
        }
    }
}

/// Innermost stage: request counter and latency histogram, labelled with the
/// route the router matched.
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().as_str().to_string();

        let response = next.run(req, ctx).await;

        let route = ctx.route_label();
        metrics::increment_request_total(route, &method, response.status().as_u16());
        metrics::record_request_duration(route, &method, start.elapsed());
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use http::HeaderName;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;
    use crate::core::{
        context::AuthClaims,
        pipeline::{Endpoint, MiddlewareChain},
    };

    /// Echoes the authenticated subject, if any.
    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, _req: Request<Body>, ctx: &mut RequestContext) -> Response<Body> {
            ctx.route = Some("/echo".to_string());
            let subject = ctx
                .claims
                .as_ref()
                .map(|c: &AuthClaims| c.subject_id.clone())
                .unwrap_or_default();
            Response::new(Body::from(subject))
        }
    }

    fn validator() -> Arc<TokenValidator> {
        Arc::new(TokenValidator::new(
            "secret",
            vec!["/health".to_string()],
            HeaderName::from_static("authorization"),
        ))
    }

    fn token() -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 60;
        encode(
            &Header::default(),
            &json!({"user_id": 5, "email": "e@x.io", "exp": exp}),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_cors_headers_are_fixed() {
        let mut headers = HeaderMap::new();
        apply_cors_headers(&mut headers);

        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn test_auth_rejects_missing_token_and_attaches_claims() {
        let chain = MiddlewareChain::new(Arc::new(Echo))
            .with(Arc::new(AuthMiddleware::new(validator())));

        let denied = chain.handle(get("/orders"), &mut RequestContext::new(None)).await;
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let skipped = chain.handle(get("/health"), &mut RequestContext::new(None)).await;
        assert_eq!(skipped.status(), StatusCode::OK);

        let mut req = get("/orders");
        req.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token())).unwrap(),
        );
        let mut ctx = RequestContext::new(None);
        let allowed = chain.handle(req, &mut ctx).await;
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(ctx.claims.unwrap().email, "e@x.io");
    }

    #[tokio::test]
    async fn test_rate_limit_sets_retry_after() {
        let limiter = ClientRateLimiter::with_rate(1.0, 1).unwrap();
        let chain = MiddlewareChain::new(Arc::new(Echo))
            .with(Arc::new(RateLimitMiddleware::new(limiter)));

        let first = chain.handle(get("/a"), &mut RequestContext::new(None)).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = chain.handle(get("/a"), &mut RequestContext::new(None)).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[header::RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_logging_sees_short_circuit_and_sets_request_id() {
        let chain = MiddlewareChain::new(Arc::new(Echo))
            .with(Arc::new(LoggingMiddleware))
            .with(Arc::new(AuthMiddleware::new(validator())))
            .with(Arc::new(MetricsMiddleware));

        let mut ctx = RequestContext::new(None);
        let response = chain.handle(get("/private"), &mut ctx).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], ctx.request_id.as_str());
        // Metrics never ran, so no route was recorded
        assert!(ctx.route.is_none());
    }
}
