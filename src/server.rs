//! Gateway wiring and lifecycle.
//!
//! [`Gateway::from_config`] builds the immutable route table, the shared
//! rate limiter and token validator, and the middleware chain in its fixed
//! order. [`Gateway::serve`] runs the accept loop until shutdown is
//! signalled, then stops accepting and gives in-flight requests a bounded
//! grace period before aborting them.
use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    http::{Response, StatusCode},
    routing::any,
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch, time::timeout};
use tower_http::catch_panic::CatchPanicLayer;

use crate::{
    adapters::{
        AuthMiddleware, LoggingMiddleware, MetricsMiddleware, ProxyRouter, RateLimitMiddleware,
    },
    config::models::GatewayConfig,
    core::{
        auth::TokenValidator,
        context::RequestContext,
        pipeline::MiddlewareChain,
        rate_limiter::{ClientRateLimiter, RateLimitError},
        responses,
        routing::{RouteError, RouteTable},
    },
    ports::http_client::HttpClient,
    utils::graceful_shutdown::GracefulShutdown,
};

/// How long connections get to write their `503` once the grace period is over.
pub const FORCED_CLOSE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid route table: {0}")]
    Routes(#[from] RouteError),

    #[error("invalid rate limit settings: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("invalid setting '{field}': {message}")]
    InvalidSetting { field: &'static str, message: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[source] std::io::Error),

    #[error("in-flight requests did not complete within the {0:?} grace period")]
    ShutdownTimeout(Duration),
}

pub struct Gateway {
    chain: Arc<MiddlewareChain>,
    routes: Arc<RouteTable>,
    limiter: ClientRateLimiter,
    shutdown_grace: Duration,
    eviction_interval: Duration,
    /// Flipped once the grace period is over; every in-flight request
    /// still running is then cut short.
    force_stop: watch::Sender<bool>,
}

impl Gateway {
    /// Wire the gateway from an already validated configuration.
    pub fn from_config(
        config: &GatewayConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, GatewayError> {
        let routes = Arc::new(RouteTable::from_config(&config.routes)?);
        let limiter = ClientRateLimiter::new(&config.rate_limit)?;
        let validator = TokenValidator::from_settings(&config.auth).map_err(|e| {
            GatewayError::InvalidSetting {
                field: "auth.header",
                message: e.to_string(),
            }
        })?;
        let shutdown_grace = positive_duration("timeouts.shutdown_grace", config.shutdown_grace())?;
        let eviction_interval =
            positive_duration("rate_limit.idle_eviction", config.eviction_interval())?;

        let chain = MiddlewareChain::new(Arc::new(ProxyRouter::new(routes.clone(), http_client)))
            .with(Arc::new(LoggingMiddleware))
            .with(Arc::new(RateLimitMiddleware::new(limiter.clone())))
            .with(Arc::new(AuthMiddleware::new(Arc::new(validator))))
            .with(Arc::new(MetricsMiddleware));

        tracing::debug!(stages = ?chain.stage_names(), "Middleware chain assembled");

        Ok(Self {
            chain: Arc::new(chain),
            routes,
            limiter,
            shutdown_grace,
            eviction_interval,
            force_stop: watch::channel(false).0,
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn limiter(&self) -> &ClientRateLimiter {
        &self.limiter
    }

    /// Run one request through the middleware chain.
    pub async fn handle(&self, req: Request, remote_addr: Option<SocketAddr>) -> Response<Body> {
        let mut ctx = RequestContext::new(remote_addr);
        self.chain.handle(req, &mut ctx).await
    }

    /// Axum router sending every path and method through the chain.
    ///
    /// The peer address is read from the `ConnectInfo` extension when the
    /// router is served with `into_make_service_with_connect_info`.
    pub fn router(&self) -> Router {
        let chain = self.chain.clone();
        let force_stop = self.force_stop.subscribe();
        let handler = move |req: Request| {
            let chain = chain.clone();
            let force_stop = force_stop.clone();
            async move {
                let remote_addr = req
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| *addr);
                let mut ctx = RequestContext::new(remote_addr);
                let request_id = ctx.request_id.clone();
                tokio::select! {
                    response = chain.handle(req, &mut ctx) => response,
                    _ = stopped(force_stop) => {
                        tracing::warn!(
                            request_id = %request_id,
                            "Request terminated at the end of the shutdown grace period"
                        );
                        responses::error_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "Service shutting down",
                        )
                    }
                }
            }
        };

        Router::new()
            .route("/", any(handler.clone()))
            .route("/{*path}", any(handler))
            .layer(CatchPanicLayer::custom(
                |_: Box<dyn Any + Send + 'static>| responses::internal_error(),
            ))
    }

    pub async fn bind(addr: &str) -> Result<TcpListener, GatewayError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    /// Serve until `shutdown` fires, then drain within the grace period.
    ///
    /// New connections are refused as soon as shutdown begins. Requests
    /// still running when the grace period ends are cut short with a `503`
    /// (their backend calls are dropped), the remaining connections get
    /// [`FORCED_CLOSE_WAIT`] to write that response, and the call returns
    /// [`GatewayError::ShutdownTimeout`]. A connection that stalls even
    /// the `503` write stays with the runtime until it is dropped.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: Arc<GracefulShutdown>,
    ) -> Result<(), GatewayError> {
        let local_addr = listener.local_addr().map_err(GatewayError::Server)?;
        for route in self.routes.iter() {
            tracing::info!(
                path = route.path(),
                backend = %route.backend(),
                methods = ?route.methods(),
                "Configured route"
            );
        }

        let eviction = self
            .limiter
            .spawn_eviction(self.eviction_interval, shutdown.shutdown_token())?;

        let app = self.router();
        let mut server_token = shutdown.shutdown_token();
        let mut server = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { server_token.wait_for_shutdown().await })
            .await
        });

        tracing::info!(address = %local_addr, "Gatekeep gateway listening");

        let mut token = shutdown.shutdown_token();
        let result = tokio::select! {
            joined = &mut server => flatten(joined),
            _ = token.wait_for_shutdown() => {
                tracing::info!(
                    grace = ?self.shutdown_grace,
                    "Stopped accepting connections, draining in-flight requests"
                );
                match timeout(self.shutdown_grace, &mut server).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        tracing::error!(
                            grace = ?self.shutdown_grace,
                            "Grace period elapsed, aborting remaining requests"
                        );
                        self.force_stop.send_replace(true);
                        if timeout(FORCED_CLOSE_WAIT, &mut server).await.is_err() {
                            server.abort();
                        }
                        Err(GatewayError::ShutdownTimeout(self.shutdown_grace))
                    }
                }
            }
        };

        eviction.abort();
        if result.is_ok() {
            tracing::info!("Graceful shutdown completed");
        }
        result
    }
}

/// Resolves once `force_stop` has been set.
async fn stopped(mut force_stop: watch::Receiver<bool>) {
    loop {
        if *force_stop.borrow_and_update() {
            return;
        }
        if force_stop.changed().await.is_err() {
            // The gateway is gone; nothing will ever force a stop
            std::future::pending::<()>().await;
        }
    }
}

fn positive_duration(
    field: &'static str,
    parsed: Result<Duration, humantime::DurationError>,
) -> Result<Duration, GatewayError> {
    match parsed {
        Ok(d) if d.is_zero() => Err(GatewayError::InvalidSetting {
            field,
            message: "must be greater than zero".to_string(),
        }),
        Ok(d) => Ok(d),
        Err(e) => Err(GatewayError::InvalidSetting {
            field,
            message: e.to_string(),
        }),
    }
}

fn flatten(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), GatewayError> {
    match joined {
        Ok(served) => served.map_err(GatewayError::Server),
        Err(e) => Err(GatewayError::Server(std::io::Error::other(e))),
    }
}
