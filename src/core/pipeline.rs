//! Ordered, short-circuiting request pipeline.
//!
//! A [`MiddlewareChain`] is a fixed list of [`Middleware`] stages in front of
//! one [`Endpoint`]. Each stage receives the request, the per-request
//! [`RequestContext`] and a [`Next`] handle for the remainder of the chain.
//! It either awaits `next.run(..)` and passes the response on (possibly
//! modified), or returns its own response without touching `next`.
//!
//! Responses travel back up the chain by value, so an outer stage always
//! sees the final status of whatever an inner stage produced. Every stage
//! and the endpoint run behind a fault boundary: a panic is converted into a
//! 500 response at the point it happened, which the outer stages then
//! observe like any other response.
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use axum::body::Body;
use futures_util::FutureExt;
use http::{Request, Response};

use crate::core::{context::RequestContext, responses};

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body>;
}

/// Terminal handler at the end of a chain.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    async fn call(&self, req: Request<Body>, ctx: &mut RequestContext) -> Response<Body>;
}

/// The remainder of a chain, handed to each stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// Run the remaining stages and the endpoint.
    pub async fn run(self, req: Request<Body>, ctx: &mut RequestContext) -> Response<Body> {
        let request_id = ctx.request_id.clone();
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    endpoint: self.endpoint,
                };
                guarded(stage.name(), &request_id, stage.handle(req, ctx, next)).await
            }
            None => guarded("endpoint", &request_id, self.endpoint.call(req, ctx)).await,
        }
    }
}

async fn guarded<F>(stage: &'static str, request_id: &str, fut: F) -> Response<Body>
where
    F: Future<Output = Response<Body>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            tracing::error!(
                stage,
                request_id,
                panic = %panic_message(payload.as_ref()),
                "Request handling panicked; answering with 500"
            );
            responses::internal_error()
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Stages in the order they wrap each other, outermost first.
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
}

impl MiddlewareChain {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            stages: Vec::new(),
            endpoint,
        }
    }

    /// Append a stage inside all stages added so far.
    pub fn with(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn handle(&self, req: Request<Body>, ctx: &mut RequestContext) -> Response<Body> {
        Next {
            stages: &self.stages,
            endpoint: self.endpoint.as_ref(),
        }
        .run(req, ctx)
        .await
    }
}
