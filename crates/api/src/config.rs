//! Application configuration loaded from environment variables.

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `REDIS_URL` — cache store backend; unset selects the in-memory store
/// - `DATABASE_URL` — durable store backend; unset selects the in-memory store
///
/// The backend URLs come as a pair: admission decisions made against Redis
/// must be fulfilled against a durable database, and vice versa. Leaving
/// both unset runs the whole pipeline in process, which is what local runs
/// and the integration tests use.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            redis_url: std::env::var("REDIS_URL").ok(),
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns `(redis_url, database_url)` when both backends are
    /// configured, `None` when neither is.
    ///
    /// A half-configured pair is a deployment mistake, not a mode: the
    /// caller should refuse to start rather than mix an external cache
    /// with in-memory persistence.
    pub fn backends(&self) -> Result<Option<(&str, &str)>, &'static str> {
        match (self.redis_url.as_deref(), self.database_url.as_deref()) {
            (Some(redis), Some(database)) => Ok(Some((redis, database))),
            (None, None) => Ok(None),
            _ => Err("REDIS_URL and DATABASE_URL must be configured together"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            redis_url: None,
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runs_in_memory() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.backends(), Ok(None));
    }

    #[test]
    fn addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn paired_backends_are_returned_together() {
        let config = Config {
            redis_url: Some("redis://localhost:6379".to_string()),
            database_url: Some("postgres://localhost/seckill".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.backends(),
            Ok(Some(("redis://localhost:6379", "postgres://localhost/seckill")))
        );
    }

    #[test]
    fn half_configured_backends_are_refused() {
        let config = Config {
            redis_url: Some("redis://localhost:6379".to_string()),
            ..Config::default()
        };
        assert!(config.backends().is_err());
    }
}
