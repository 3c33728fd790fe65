pub mod auth;
pub mod context;
pub mod pipeline;
pub mod rate_limiter;
pub mod responses;
pub mod routing;

pub use auth::{AuthError, TokenValidator};
pub use context::{AuthClaims, ClientIdentity, RequestContext};
pub use pipeline::{Endpoint, Middleware, MiddlewareChain, Next};
pub use rate_limiter::{ClientRateLimiter, RateLimitError};
pub use routing::{MatchKind, Route, RouteError, RouteMatch, RouteTable};
