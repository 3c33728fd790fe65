//! Startup validation for the gateway configuration.
//!
//! Every problem is collected and reported together; any error is fatal and
//! stops the gateway before it binds a socket.
#![allow(clippy::collapsible_if)]

use std::{collections::HashSet, net::SocketAddr, time::Duration};

use eyre::Result;

use crate::{
    config::models::{GatewayConfig, RouteConfig},
    core::{
        rate_limiter::{self, RateLimitError},
        routing::{self, RouteError},
    },
};

/// Paths answered by the gateway itself; routes may not claim them.
pub const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Invalid route: {0}")]
    Route(#[from] RouteError),

    #[error("Invalid field '{field}': {source}")]
    RateLimit {
        field: &'static str,
        #[source]
        source: RateLimitError,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr()) {
            errors.push(e);
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        } else {
            for route in &config.routes {
                if let Err(mut route_errors) = Self::validate_single_route(route) {
                    errors.append(&mut route_errors);
                }
            }
        }

        if let Err(conflict_error_list) = Self::check_route_conflicts(&config.routes) {
            errors.extend(conflict_error_list);
        }

        if let Err(mut settings_errors) = Self::validate_settings(config) {
            errors.append(&mut settings_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Host must be an IP address and port a number (e.g. '0.0.0.0:8000')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate a single route configuration.
    ///
    /// Shape checks are the same ones the route table applies when it is
    /// built; this collects all of them instead of stopping at the first.
    fn validate_single_route(route: &RouteConfig) -> Result<(), Vec<ValidationError>> {
        let path = route.path.as_str();
        let mut errors: Vec<ValidationError> = [
            routing::check_path(path).err(),
            routing::check_backend(path, &route.backend).err(),
            routing::check_methods(path, &route.methods).err(),
        ]
        .into_iter()
        .flatten()
        .map(ValidationError::from)
        .collect();

        if RESERVED_PATHS.contains(&path) {
            errors.push(ValidationError::InvalidField {
                field: format!("route path: {path}"),
                message: "Path is reserved for a built-in gateway endpoint".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Two routes may not claim the same exact path
    fn check_route_conflicts(routes: &[RouteConfig]) -> Result<(), Vec<ValidationError>> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for route in routes {
            if !seen.insert(route.path.as_str()) {
                errors.push(ValidationError::RouteConflict {
                    message: format!("Path '{}' is configured more than once", route.path),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_settings(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let rate_limit = &config.rate_limit;

        if let Err(source) = rate_limiter::refill_period(rate_limit.requests_per_second) {
            errors.push(ValidationError::RateLimit {
                field: "rate_limit.requests_per_second",
                source,
            });
        }

        if rate_limit.burst == 0 {
            errors.push(ValidationError::RateLimit {
                field: "rate_limit.burst",
                source: RateLimitError::ZeroBurst,
            });
        }

        let durations = [
            ("rate_limit.idle_eviction", config.eviction_interval()),
            ("timeouts.backend", config.backend_timeout()),
            ("timeouts.shutdown_grace", config.shutdown_grace()),
        ];
        for (field, parsed) in durations {
            let message = match parsed {
                Ok(d) if d == Duration::ZERO => "Must be greater than zero".to_string(),
                Ok(_) => continue,
                Err(e) => format!("Invalid duration: {e}"),
            };
            errors.push(ValidationError::InvalidField {
                field: field.to_string(),
                message,
            });
        }

        if config.auth.jwt_secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.jwt_secret".to_string(),
            });
        }

        if http::HeaderName::from_bytes(config.auth.header.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "auth.header".to_string(),
                message: format!("Invalid header name '{}'", config.auth.header),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfig::builder()
            .route(RouteConfig::new("/orders", "http://orders:9000", ["GET", "post"]))
            .build()
            .unwrap()
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(ServerConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_rejects_relative_backend() {
        let mut config = minimal_valid_config();
        config.routes[0].backend = "orders:9000/api".to_string();

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_non_http_backend() {
        let mut config = minimal_valid_config();
        config.routes[0].backend = "ftp://orders".to_string();

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_duplicate_paths() {
        let mut config = minimal_valid_config();
        config
            .routes
            .push(RouteConfig::new("/orders", "http://other:9000", ["GET"]));

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn validate_rejects_reserved_and_malformed_paths() {
        let mut config = minimal_valid_config();
        config
            .routes
            .push(RouteConfig::new("/health", "http://h:1", ["GET"]));
        config
            .routes
            .push(RouteConfig::new("users", "http://u:1", ["GET"]));
        config
            .routes
            .push(RouteConfig::new("/trailing/", "http://t:1", ["GET"]));

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("Found 3 validation errors"));
    }

    #[test]
    fn validate_rejects_empty_methods() {
        let mut config = minimal_valid_config();
        config.routes[0].methods.clear();

        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_zero_burst_and_bad_durations() {
        let mut config = minimal_valid_config();
        config.rate_limit.burst = 0;
        config.timeouts.backend = "soon".to_string();

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("rate_limit.burst"));
        assert!(err.to_string().contains("timeouts.backend"));
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut config = minimal_valid_config();
        config.rate_limit.idle_eviction = "0s".to_string();
        config.timeouts.backend = "0s".to_string();
        config.timeouts.shutdown_grace = "0ms".to_string();

        let message = ServerConfigValidator::validate(&config)
            .unwrap_err()
            .to_string();
        assert!(message.contains("Found 3 validation errors"));
        assert!(message.contains("rate_limit.idle_eviction"));
        assert!(message.contains("timeouts.shutdown_grace"));
    }

    #[test]
    fn validate_rejects_rates_too_small_to_represent() {
        let mut config = minimal_valid_config();
        config.rate_limit.requests_per_second = 1e-20;

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("rate_limit.requests_per_second"));
    }

    #[test]
    fn validate_rejects_invalid_method_names() {
        let mut config = minimal_valid_config();
        config.routes[0].methods.push("NOT VALID".to_string());

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("NOT VALID"));
    }

    #[test]
    fn validate_rejects_empty_route_table() {
        let config = GatewayConfig::default();
        assert!(ServerConfigValidator::validate(&config).is_err());
    }
}
