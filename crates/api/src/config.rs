//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::BookId;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `CART_TTL_SECS`: idle time before a cart is swept (default: `1800`)
/// - `SWEEP_INTERVAL_SECS`: time between sweeps (default: `60`)
/// - `LOCK_TIMEOUT_MS`: how long a transaction waits for a row lock (default: `5000`)
/// - `SEED_BOOKS`: initial stock for the in-memory store as `id:stock` pairs,
///   e.g. `1:5,2:3` (default: none; ignored with a database)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub cart_ttl: Duration,
    pub sweep_interval: Duration,
    pub lock_timeout: Duration,
    pub seed_books: Vec<(BookId, i64)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        fn parse_key<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }
        let lookup = &lookup;

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_key(lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_key(lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: parse_key(lookup, "DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database_max_connections),
            cart_ttl: parse_key(lookup, "CART_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cart_ttl),
            sweep_interval: parse_key(lookup, "SWEEP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            lock_timeout: parse_key(lookup, "LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            seed_books: lookup("SEED_BOOKS")
                .and_then(|raw| parse_seed_books(&raw))
                .unwrap_or(defaults.seed_books),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            cart_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(5),
            seed_books: Vec::new(),
        }
    }
}

/// Parses `id:stock` pairs separated by commas. Any malformed pair rejects
/// the whole list.
fn parse_seed_books(raw: &str) -> Option<Vec<(BookId, i64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (id, stock) = pair.split_once(':')?;
            let id = BookId::new(id.trim().parse().ok()?);
            let stock: i64 = stock.trim().parse().ok()?;
            (id.is_valid() && stock >= 0).then_some((id, stock))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.cart_ttl, Duration::from_secs(1800));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_environment_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/bookshop"),
            ("DATABASE_MAX_CONNECTIONS", "32"),
            ("CART_TTL_SECS", "120"),
            ("SWEEP_INTERVAL_SECS", "5"),
            ("LOCK_TIMEOUT_MS", "250"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/bookshop")
        );
        assert_eq!(config.database_max_connections, 32);
        assert_eq!(config.cart_ttl, Duration::from_secs(120));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("LOG_FORMAT", "xml"),
            ("DATABASE_URL", ""),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_seed_books() {
        let config = from_pairs(&[("SEED_BOOKS", "1:5, 2:3,")]);
        assert_eq!(
            config.seed_books,
            vec![(BookId::new(1), 5), (BookId::new(2), 3)]
        );

        assert!(from_pairs(&[]).seed_books.is_empty());
        assert!(from_pairs(&[("SEED_BOOKS", "1:5,2")]).seed_books.is_empty());
        assert!(from_pairs(&[("SEED_BOOKS", "0:5")]).seed_books.is_empty());
        assert!(from_pairs(&[("SEED_BOOKS", "1:-1")]).seed_books.is_empty());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
