// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (DB pool, CORS) may still read their
// own env vars — this module covers the core server settings.

use std::net::SocketAddr;

/// Core session server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT verification secret for access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string; in-memory stores when unset.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `waypoint_server=debug`).
    pub log_filter: String,
}

const DEV_JWT_SECRET: &str = "waypoint_local_development_jwt_secret_32_chars";

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `WAYPOINT_HOST` | `0.0.0.0` |
    /// | `WAYPOINT_PORT` | `8080` |
    /// | `WAYPOINT_JWT_SECRET` | dev-only placeholder |
    /// | `WAYPOINT_DATABASE_URL` | *(none — in-memory stores)* |
    /// | `WAYPOINT_CORS_ORIGINS` | *(none — cors.rs uses dev defaults)* |
    /// | `WAYPOINT_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("WAYPOINT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("WAYPOINT_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("WAYPOINT_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("WAYPOINT_DATABASE_URL").ok();
        let cors_origins = env("WAYPOINT_CORS_ORIGINS").ok();

        let log_filter = env("WAYPOINT_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_url, cors_origins, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = ServerConfig::from_env_fn(env_from_map(HashMap::new()));

        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.is_dev_jwt_secret());
        assert_eq!(config.database_url, None);
        assert_eq!(config.cors_origins, None);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn explicit_env_overrides_defaults() {
        let config = ServerConfig::from_env_fn(env_from_map(HashMap::from([
            ("WAYPOINT_HOST", "127.0.0.1"),
            ("WAYPOINT_PORT", "9100"),
            ("WAYPOINT_JWT_SECRET", "a_real_secret_that_is_at_least_32_chars"),
            ("WAYPOINT_DATABASE_URL", "postgres://localhost/waypoint?sslmode=require"),
            ("WAYPOINT_LOG_FILTER", "waypoint_server=debug"),
        ])));

        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9100");
        assert!(!config.is_dev_jwt_secret());
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/waypoint?sslmode=require")
        );
        assert_eq!(config.log_filter, "waypoint_server=debug");
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let config =
            ServerConfig::from_env_fn(env_from_map(HashMap::from([("WAYPOINT_PORT", "nope")])));
        assert_eq!(config.listen_addr.port(), 8080);
    }
}
