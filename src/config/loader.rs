use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load the route file plus environment overrides.
///
/// `GATEWAY_PORT` / `GATEWAY_HOST` override the listen address and
/// `JWT_SECRET` overrides the token signing secret.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    // Route files are YAML unless the extension says otherwise
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .add_source(Environment::with_prefix("GATEWAY").try_parsing(true))
        .set_override_option("auth.jwt_secret", std::env::var("JWT_SECRET").ok())
        .wrap_err("Failed to apply JWT_SECRET override")?
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_yaml_routes() {
        let yaml_content = r#"
routes:
  - path: "/users"
    backend: "http://users:8081"
    methods: ["GET", "POST"]
  - path: "/orders"
    backend: "http://orders:8082"
    methods: ["get"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].path, "/users");
        assert_eq!(config.routes[1].backend, "http://orders:8082");
        assert_eq!(config.routes[1].methods, vec!["get".to_string()]);
        assert_eq!(config.rate_limit.burst, 30);
    }

    #[tokio::test]
    async fn test_load_yaml_with_sections() {
        let yaml_content = r#"
routes:
  - path: "/orders"
    backend: "http://orders:8082"
    methods: ["GET"]
rate_limit:
  requests_per_second: 2.5
  burst: 4
timeouts:
  backend: "5s"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config_sync(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.rate_limit.requests_per_second, 2.5);
        assert_eq!(config.rate_limit.burst, 4);
        assert_eq!(
            config.backend_timeout().unwrap(),
            std::time::Duration::from_secs(5)
        );
        assert_eq!(config.timeouts.shutdown_grace, "30s");
    }

    #[tokio::test]
    async fn test_load_json_routes() {
        let json_content = r#"
{
  "routes": [
    { "path": "/api", "backend": "http://backend:8080", "methods": ["GET"] }
  ]
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config_sync("/definitely/not/here/routes.yaml").is_err());
    }
}
