//! Immutable route table and path matching.
//!
//! Each route claims its exact path and the sub-tree below it
//! (`path + "/"`). Among all candidates the longest mount path wins. A
//! sub-tree match has the mount path stripped before forwarding; an exact
//! match forwards the path untouched. This layer performs no I/O.
use http::{Method, Uri};
use thiserror::Error;
use url::Url;

use crate::config::models::RouteConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid route path '{0}': must start with '/' and not end with '/'")]
    InvalidPath(String),
    #[error("invalid backend URL '{backend}' for route '{path}': {reason}")]
    InvalidBackend {
        path: String,
        backend: String,
        reason: String,
    },
    #[error("route '{0}' allows no methods")]
    NoMethods(String),
    #[error("route '{path}' lists invalid method '{method}'")]
    InvalidMethod { path: String, method: String },
    #[error("route '{0}' is configured more than once")]
    DuplicatePath(String),
    #[error("could not build forward URI '{0}'")]
    InvalidTarget(String),
}

/// Mount paths start with `/` and never end with one; the sub-tree is
/// matched implicitly.
pub fn check_path(path: &str) -> Result<(), RouteError> {
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(RouteError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Backends are absolute `http`/`https` URLs with a host.
pub fn check_backend(path: &str, backend: &str) -> Result<Url, RouteError> {
    let invalid_backend = |reason: String| RouteError::InvalidBackend {
        path: path.to_string(),
        backend: backend.to_string(),
        reason,
    };
    let url = Url::parse(backend).map_err(|e| invalid_backend(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid_backend(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host().is_none() {
        return Err(invalid_backend("missing host".to_string()));
    }
    Ok(url)
}

/// At least one method, each a valid HTTP method token.
pub fn check_methods(path: &str, methods: &[String]) -> Result<(), RouteError> {
    if methods.is_empty() {
        return Err(RouteError::NoMethods(path.to_string()));
    }
    if let Some(bad) = methods
        .iter()
        .find(|m| m.is_empty() || Method::from_bytes(m.to_ascii_uppercase().as_bytes()).is_err())
    {
        return Err(RouteError::InvalidMethod {
            path: path.to_string(),
            method: bad.clone(),
        });
    }
    Ok(())
}

/// A validated forwarding rule.
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    backend: Url,
    methods: Vec<String>,
}

impl Route {
    pub fn new(config: &RouteConfig) -> Result<Self, RouteError> {
        check_path(&config.path)?;
        let backend = check_backend(&config.path, &config.backend)?;
        check_methods(&config.path, &config.methods)?;

        Ok(Self {
            path: config.path.clone(),
            backend,
            methods: config.methods.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Case-insensitive membership test against the allowed methods.
    pub fn allows(&self, method: &Method) -> bool {
        self.methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method.as_str()))
    }

    /// Value for an `Allow` header on 405 responses.
    pub fn allow_header(&self) -> String {
        self.methods
            .iter()
            .map(|m| m.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Join the backend origin (and any base path it carries) with the
    /// forwarded path and the original query string.
    pub fn target_uri(&self, forward_path: &str, query: Option<&str>) -> Result<Uri, RouteError> {
        let base = self.backend.path().trim_end_matches('/');
        let mut target = format!(
            "{}{}{}",
            self.backend.origin().ascii_serialization(),
            base,
            forward_path
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }

        target
            .parse::<Uri>()
            .map_err(|_| RouteError::InvalidTarget(target))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub kind: MatchKind,
    /// Path the backend will see
    pub forward_path: String,
}

/// Ordered, read-only sequence of routes built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteError> {
        let mut built: Vec<Route> = Vec::with_capacity(routes.len());
        for config in routes {
            if built.iter().any(|r| r.path == config.path) {
                return Err(RouteError::DuplicatePath(config.path.clone()));
            }
            built.push(Route::new(config)?);
        }
        Ok(Self { routes: built })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Longest-prefix match to find the route for an incoming path.
    pub fn find(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter_map(|route| {
                if path == route.path {
                    Some((route, MatchKind::Exact))
                } else if path
                    .strip_prefix(route.path.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
                {
                    Some((route, MatchKind::Prefix))
                } else {
                    None
                }
            })
            .max_by_key(|(route, _)| route.path.len())
            .map(|(route, kind)| {
                let forward_path = match kind {
                    MatchKind::Exact => path.to_string(),
                    MatchKind::Prefix => path[route.path.len()..].to_string(),
                };
                RouteMatch {
                    route,
                    kind,
                    forward_path,
                }
            })
    }
}
