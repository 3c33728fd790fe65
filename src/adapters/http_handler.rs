use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
};
use hyper::{Request, Response};

use crate::{
    adapters::middleware::apply_cors_headers,
    core::{
        context::RequestContext,
        pipeline::Endpoint,
        responses::error_response,
        routing::{Route, RouteTable},
    },
    metrics,
    ports::http_client::{HttpClient, HttpClientError},
};

pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_EMAIL: &str = "x-user-email";

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Terminal endpoint of the pipeline: answers the built-in endpoints and
/// reverse-proxies everything else according to the route table.
pub struct ProxyRouter {
    routes: Arc<RouteTable>,
    http_client: Arc<dyn HttpClient>,
}

impl ProxyRouter {
    pub fn new(routes: Arc<RouteTable>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            routes,
            http_client,
        }
    }

    fn handle_health_check() -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::from("OK"));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn handle_metrics() -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::from(metrics::render().unwrap_or_default()));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        response
    }

    /// Forward the request to `target` and relay the backend response.
    async fn forward(
        &self,
        mut req: Request<AxumBody>,
        route: &Route,
        target: Uri,
        ctx: &RequestContext,
    ) -> Response<AxumBody> {
        let method = req.method().clone();
        let original_host = req.headers().get(header::HOST).cloned();

        *req.uri_mut() = target;
        prepare_forward_headers(req.headers_mut(), ctx, original_host);

        tracing::debug!(
            route = route.path(),
            %method,
            target = %req.uri(),
            "Forwarding request to backend"
        );

        let _timer = metrics::BackendRequestTimer::new(route.path());
        match self.http_client.send_request(req).await {
            Ok(mut response) => {
                metrics::increment_backend_request_total(
                    route.path(),
                    method.as_str(),
                    response.status().as_str(),
                );
                strip_hop_by_hop(response.headers_mut());
                apply_cors_headers(response.headers_mut());
                response
            }
            Err(HttpClientError::Timeout(after)) => {
                metrics::increment_backend_request_total(route.path(), method.as_str(), "timeout");
                tracing::error!(
                    route = route.path(),
                    backend = %route.backend(),
                    timeout = ?after,
                    "Backend request timed out"
                );
                error_response(StatusCode::GATEWAY_TIMEOUT, "Gateway timeout")
            }
            Err(e) => {
                metrics::increment_backend_request_total(route.path(), method.as_str(), "error");
                tracing::error!(
                    route = route.path(),
                    backend = %route.backend(),
                    error = %e,
                    "Backend request failed"
                );
                error_response(StatusCode::BAD_GATEWAY, "Bad gateway")
            }
        }
    }
}

#[async_trait]
impl Endpoint for ProxyRouter {
    async fn call(&self, req: Request<AxumBody>, ctx: &mut RequestContext) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        match path.as_str() {
            HEALTH_PATH => {
                ctx.route = Some(HEALTH_PATH.to_string());
                return Self::handle_health_check();
            }
            METRICS_PATH => {
                ctx.route = Some(METRICS_PATH.to_string());
                return Self::handle_metrics();
            }
            _ => {}
        }

        let Some(matched) = self.routes.find(&path) else {
            tracing::debug!(path = %path, "No route matched");
            return error_response(StatusCode::NOT_FOUND, "Not found");
        };
        let route = matched.route;
        ctx.route = Some(route.path().to_string());

        if !route.allows(req.method()) {
            tracing::debug!(route = route.path(), method = %req.method(), "Method not allowed");
            let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
            if let Ok(allow) = HeaderValue::from_str(&route.allow_header()) {
                response.headers_mut().insert(header::ALLOW, allow);
            }
            return response;
        }

        let target = match route.target_uri(&matched.forward_path, req.uri().query()) {
            Ok(target) => target,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build backend URI");
                return error_response(StatusCode::BAD_GATEWAY, "Bad gateway");
            }
        };

        self.forward(req, route, target, ctx).await
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Rewrite inbound headers for the backend: hop-by-hop headers go, the
/// standard forwarding headers and the authenticated identity are added.
/// Identity headers supplied by the caller are always discarded.
pub fn prepare_forward_headers(
    headers: &mut HeaderMap,
    ctx: &RequestContext,
    original_host: Option<HeaderValue>,
) {
    strip_hop_by_hop(headers);
    headers.remove(X_USER_ID);
    headers.remove(X_USER_EMAIL);

    if let Some(ip) = ctx.client.ip() {
        let forwarded_for = match headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
        {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    if let Some(claims) = &ctx.claims {
        if let Ok(value) = HeaderValue::from_str(&claims.subject_id) {
            headers.insert(X_USER_ID, value);
        }
        if let Ok(value) = HeaderValue::from_str(&claims.email) {
            headers.insert(X_USER_EMAIL, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::Mutex,
        time::Duration,
    };

    use http_body_util::BodyExt;

    use super::*;
    use crate::{config::models::RouteConfig, core::context::AuthClaims, ports::HttpClientResult};

    /// Records the requests it receives and answers with a canned result.
    #[derive(Default)]
    struct FakeClient {
        seen: Mutex<Vec<(String, String, HeaderMap)>>,
        fail_with: Option<fn() -> HttpClientError>,
    }

    #[async_trait]
    impl HttpClient for FakeClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            self.seen.lock().unwrap().push((
                req.method().to_string(),
                req.uri().to_string(),
                req.headers().clone(),
            ));
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            let mut response = Response::new(AxumBody::from("backend"));
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            Ok(response)
        }
    }

    fn router(client: Arc<FakeClient>) -> ProxyRouter {
        let table = RouteTable::from_config(&[
            RouteConfig::new("/orders", "http://svc:9000", ["GET"]),
            RouteConfig::new("/users", "http://users:9001/api", ["GET", "POST"]),
        ])
        .unwrap();
        ProxyRouter::new(Arc::new(table), client)
    }

    fn request(method: &str, uri: &str) -> Request<AxumBody> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "gateway.local")
            .body(AxumBody::empty())
            .unwrap()
    }

    fn ctx() -> RequestContext {
        let addr: SocketAddr = "192.0.2.10:40000".parse().unwrap();
        RequestContext::new(Some(addr))
    }

    #[tokio::test]
    async fn test_health_is_answered_locally() {
        let client = Arc::new(FakeClient::default());
        let mut ctx = ctx();
        let response = router(client.clone())
            .call(request("GET", "/health"), &mut ctx)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prefix_is_stripped_and_cors_added() {
        let client = Arc::new(FakeClient::default());
        let response = router(client.clone())
            .call(request("GET", "/orders/42?expand=1"), &mut ctx())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers().get(header::CONNECTION).is_none());

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].1, "http://svc:9000/42?expand=1");
        assert_eq!(seen[0].2[X_FORWARDED_FOR], "192.0.2.10");
        assert_eq!(seen[0].2[X_FORWARDED_HOST], "gateway.local");
    }

    #[tokio::test]
    async fn test_method_not_allowed_never_forwards() {
        let client = Arc::new(FakeClient::default());
        let mut ctx = ctx();
        let response = router(client.clone())
            .call(request("POST", "/orders"), &mut ctx)
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET");
        assert_eq!(ctx.route.as_deref(), Some("/orders"));
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let client = Arc::new(FakeClient::default());
        let mut ctx = ctx();
        let response = router(client).call(request("GET", "/nope"), &mut ctx).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(ctx.route.is_none());
    }

    #[tokio::test]
    async fn test_backend_failures_map_to_gateway_errors() {
        let unreachable = Arc::new(FakeClient {
            fail_with: Some(|| HttpClientError::ConnectionError("refused".into())),
            ..FakeClient::default()
        });
        let response = router(unreachable)
            .call(request("GET", "/orders/1"), &mut ctx())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let slow = Arc::new(FakeClient {
            fail_with: Some(|| HttpClientError::Timeout(Duration::from_secs(15))),
            ..FakeClient::default()
        });
        let response = router(slow).call(request("GET", "/orders/1"), &mut ctx()).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_identity_headers_come_from_claims_only() {
        let client = Arc::new(FakeClient::default());
        let mut ctx = ctx();
        ctx.claims = Some(AuthClaims {
            subject_id: "42".to_string(),
            email: "a@example.com".to_string(),
            expires_at: 0,
        });
        let mut req = request("POST", "/users");
        req.headers_mut()
            .insert(X_USER_ID, HeaderValue::from_static("1"));
        req.headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("x-secret"));
        req.headers_mut()
            .insert("x-secret", HeaderValue::from_static("drop-me"));

        router(client.clone()).call(req, &mut ctx).await;

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].0, "POST");
        // Exact match keeps the path
        assert_eq!(seen[0].1, "http://users:9001/api/users");
        assert_eq!(seen[0].2[X_USER_ID], "42");
        assert_eq!(seen[0].2[X_USER_EMAIL], "a@example.com");
        assert!(seen[0].2.get("x-secret").is_none());
    }
}
