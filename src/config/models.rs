//! Configuration data structures for the gateway.
//!
//! These types map directly to the route file (YAML by default, JSON / TOML
//! also accepted). Everything except the route list carries defaults so that
//! a minimal file only needs `routes`.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Secret used when `JWT_SECRET` is not provided. Startup logs a warning
/// whenever this value is in effect.
pub const DEFAULT_JWT_SECRET: &str = "your-secret-key-change-in-production";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// A single forwarding rule: requests under `path` go to `backend`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// Mount point, e.g. `/orders`
    pub path: String,
    /// Absolute backend origin, e.g. `http://orders:9000`
    pub backend: String,
    /// Allowed methods, compared case-insensitively
    pub methods: Vec<String>,
}

impl RouteConfig {
    pub fn new<I, S>(path: impl Into<String>, backend: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            backend: backend.into(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }
}

/// Per-client token bucket settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Refill rate in tokens per second
    pub requests_per_second: f64,
    /// Bucket capacity
    pub burst: u32,
    /// How often idle buckets are evicted (humantime, e.g. "10m")
    pub idle_eviction: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 30,
            idle_eviction: "10m".to_string(),
        }
    }
}

/// Bearer token authentication settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret used to verify token signatures
    pub jwt_secret: String,
    /// Path prefixes that bypass authentication
    pub skip_paths: Vec<String>,
    /// Header carrying the `Bearer <token>` credential
    pub header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            skip_paths: vec![
                "/auth/login".to_string(),
                "/auth/register".to_string(),
                "/metrics".to_string(),
                "/health".to_string(),
            ],
            header: "authorization".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Upper bound for a single backend round trip
    pub backend: String,
    /// How long in-flight requests may run after a shutdown signal
    pub shutdown_grace: String,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            backend: "15s".to_string(),
            shutdown_grace: "30s".to_string(),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Socket address string the gateway binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn backend_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.timeouts.backend)
    }

    pub fn shutdown_grace(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.timeouts.shutdown_grace)
    }

    pub fn eviction_interval(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.rate_limit.idle_eviction)
    }

    /// True when the built-in development secret is in effect.
    pub fn uses_default_secret(&self) -> bool {
        self.auth.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            routes: Vec::new(),
            rate_limit: RateLimitSettings::default(),
            auth: AuthSettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }
}

/// Builder for GatewayConfig, mostly used when embedding the gateway or in tests
#[derive(Default)]
pub struct GatewayConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    routes: Vec<RouteConfig>,
    rate_limit: Option<RateLimitSettings>,
    auth: Option<AuthSettings>,
    timeouts: Option<TimeoutSettings>,
}

impl GatewayConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Append a route; order is preserved.
    pub fn route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    pub fn rate_limit(mut self, requests_per_second: f64, burst: u32) -> Self {
        let mut settings = self.rate_limit.take().unwrap_or_default();
        settings.requests_per_second = requests_per_second;
        settings.burst = burst;
        self.rate_limit = Some(settings);
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        let mut settings = self.auth.take().unwrap_or_default();
        settings.jwt_secret = secret.into();
        self.auth = Some(settings);
        self
    }

    pub fn backend_timeout(mut self, timeout: impl Into<String>) -> Self {
        let mut settings = self.timeouts.take().unwrap_or_default();
        settings.backend = timeout.into();
        self.timeouts = Some(settings);
        self
    }

    pub fn shutdown_grace(mut self, grace: impl Into<String>) -> Self {
        let mut settings = self.timeouts.take().unwrap_or_default();
        settings.shutdown_grace = grace.into();
        self.timeouts = Some(settings);
        self
    }

    /// Build the final GatewayConfig
    pub fn build(self) -> Result<GatewayConfig, String> {
        if self.routes.is_empty() {
            return Err("At least one route must be configured".to_string());
        }

        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(default_host),
            port: self.port.unwrap_or_else(default_port),
            routes: self.routes,
            rate_limit: self.rate_limit.unwrap_or_default(),
            auth: self.auth.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}
