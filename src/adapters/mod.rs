pub mod http_client;
pub mod http_handler;
pub mod middleware;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
pub use http_handler::ProxyRouter;
pub use middleware::{AuthMiddleware, LoggingMiddleware, MetricsMiddleware, RateLimitMiddleware};
