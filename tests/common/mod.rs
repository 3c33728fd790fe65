//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderValue, header},
};
use gatekeep::{
    Gateway, HttpClientAdapter,
    config::{GatewayConfig, RouteConfig},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const SECRET: &str = "integration-secret";

/// A throwaway backend on 127.0.0.1 that echoes what it received as JSON.
pub struct EchoBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Like [`start`](Self::start) but every response is delayed.
    pub async fn start_with_delay(delay: Duration) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let app = Router::new().fallback(move |req: Request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let (parts, body) = req.into_parts();
                let header = |name: &str| {
                    parts
                        .headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                let mut summary = json!({
                    "method": parts.method.as_str(),
                    "path": parts.uri.path(),
                    "query": parts.uri.query(),
                    "host": header("host"),
                    "x_user_id": header("x-user-id"),
                    "x_user_email": header("x-user-email"),
                    "x_forwarded_for": header("x-forwarded-for"),
                    "authorization": header("authorization"),
                });
                let body = body
                    .collect()
                    .await
                    .map(|b| b.to_bytes())
                    .unwrap_or_default();
                summary["body"] = Value::String(String::from_utf8_lossy(&body).into_owned());
                Json(summary)
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, hits }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A port on 127.0.0.1 with nothing listening.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn config_with_routes(routes: Vec<RouteConfig>) -> GatewayConfig {
    let mut builder = GatewayConfig::builder()
        .host("127.0.0.1")
        .port(0)
        .jwt_secret(SECRET);
    for route in routes {
        builder = builder.route(route);
    }
    builder.build().unwrap()
}

pub fn build_gateway(config: &GatewayConfig) -> Gateway {
    let client = HttpClientAdapter::new(config.backend_timeout().unwrap()).unwrap();
    Gateway::from_config(config, Arc::new(client)).unwrap()
}

/// Sign a token for `user_id` expiring `ttl_secs` from now (negative = expired).
pub fn token(user_id: u64, email: &str, ttl_secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    encode(
        &Header::default(),
        &json!({"user_id": user_id, "email": email, "exp": now + ttl_secs}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Build a request as the server would see it from `client`.
pub fn request_from(client: SocketAddr, method: &str, uri: &str) -> Request {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "gateway.test")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(client));
    req
}

pub fn with_bearer(mut req: Request, token: &str) -> Request {
    req.headers_mut().insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    req
}

pub fn client_addr(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([10, 1, 0, last_octet], 40000))
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
