//! Per-request state threaded explicitly through the middleware chain.
//!
//! A `RequestContext` is created when a request enters the gateway, is
//! handed by `&mut` to every stage and dropped once the response has been
//! produced. Nothing in it is shared with other requests.
use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use uuid::Uuid;

/// Rate limiter key for a caller.
///
/// Keyed by peer IP rather than IP:port so that reconnecting clients keep
/// draining the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    Address(IpAddr),
    /// No peer address was attached to the request; all such callers share one bucket.
    Unknown,
}

impl ClientIdentity {
    pub fn from_remote_addr(addr: Option<SocketAddr>) -> Self {
        addr.map_or(ClientIdentity::Unknown, |a| ClientIdentity::Address(a.ip()))
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            ClientIdentity::Address(ip) => Some(*ip),
            ClientIdentity::Unknown => None,
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::Address(ip) => write!(f, "{ip}"),
            ClientIdentity::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity attributes decoded from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub subject_id: String,
    pub email: String,
    /// Expiry as a unix timestamp (seconds)
    pub expires_at: i64,
}

/// Scoped state for one in-flight request.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub client: ClientIdentity,
    pub remote_addr: Option<SocketAddr>,
    /// Set by the auth stage once a credential has been verified
    pub claims: Option<AuthClaims>,
    /// Mount path of the matched route, set by the router
    pub route: Option<String>,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            client: ClientIdentity::from_remote_addr(remote_addr),
            remote_addr,
            claims: None,
            route: None,
            started_at: Instant::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.claims.is_some()
    }

    /// Route label for metrics; unmatched requests share one series.
    pub fn route_label(&self) -> &str {
        self.route.as_deref().unwrap_or("unmatched")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_port() {
        let a: SocketAddr = "10.0.0.7:50000".parse().unwrap();
        let b: SocketAddr = "10.0.0.7:50001".parse().unwrap();

        assert_eq!(
            ClientIdentity::from_remote_addr(Some(a)),
            ClientIdentity::from_remote_addr(Some(b))
        );
        assert_eq!(
            ClientIdentity::from_remote_addr(None),
            ClientIdentity::Unknown
        );
    }

    #[test]
    fn test_contexts_are_independent() {
        let first = RequestContext::new(None);
        let second = RequestContext::new(None);

        assert_ne!(first.request_id, second.request_id);
        assert!(!first.is_authenticated());
        assert_eq!(first.route_label(), "unmatched");
    }
}
