/*!
common/src/lib.rs

Shared configuration types for hnstories.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override merging
- Resolved accessors that apply the built-in defaults
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upstream API root used when `upstream.base_url` is not configured.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://hacker-news.firebaseio.com/v0";

/// Five hours.
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 5 * 60 * 60;

pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 10;

pub const DEFAULT_USER_AGENT: &str = "hnstories/0.1.0";

/// Upper bound accepted for any cache lifetime (one year).
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Upper bound accepted for `aggregator.max_concurrent_fetches`.
pub const MAX_CONCURRENT_FETCHES: usize = 1024;

/// HTTP server section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g. "0.0.0.0")
    pub bind: Option<String>,
    pub port: Option<u16>,
    /// Value sent in `Access-Control-Allow-Origin`; "*" when unset
    pub cors_allowed_origin: Option<String>,
}

/// Upstream item-tracking API section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
}

/// Story cache section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: Option<u64>,
    /// How long an id whose detail fetch came back empty is skipped.
    /// Unset disables negative caching.
    pub negative_ttl_seconds: Option<u64>,
}

/// Aggregation tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Upper bound on in-flight detail fetches; unset or 0 means unbounded
    pub max_concurrent_fetches: Option<usize>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    /// With neither present the built-in defaults are returned.
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let base = self.upstream_base_url();
        let parsed = url::Url::parse(&base)
            .with_context(|| format!("upstream.base_url is not a valid URL: {}", base))?;
        if parsed.cannot_be_a_base() {
            anyhow::bail!("upstream.base_url cannot be used as a base URL: {}", base);
        }
        if self.cache.ttl_seconds == Some(0) {
            anyhow::bail!("cache.ttl_seconds must be greater than zero");
        }
        for (name, ttl) in [
            ("cache.ttl_seconds", self.cache.ttl_seconds),
            ("cache.negative_ttl_seconds", self.cache.negative_ttl_seconds),
        ] {
            if ttl.is_some_and(|secs| secs > MAX_TTL_SECONDS) {
                anyhow::bail!("{} must not exceed {} seconds", name, MAX_TTL_SECONDS);
            }
        }
        if self
            .aggregator
            .max_concurrent_fetches
            .is_some_and(|n| n > MAX_CONCURRENT_FETCHES)
        {
            anyhow::bail!(
                "aggregator.max_concurrent_fetches must not exceed {}",
                MAX_CONCURRENT_FETCHES
            );
        }
        Ok(())
    }

    /// Upstream root without a trailing slash.
    pub fn upstream_base_url(&self) -> String {
        self.upstream
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_UPSTREAM_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(
            self.upstream
                .timeout_seconds
                .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
        )
    }

    pub fn user_agent(&self) -> String {
        self.upstream
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS))
    }

    pub fn negative_cache_ttl(&self) -> Option<Duration> {
        self.cache
            .negative_ttl_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn max_concurrent_fetches(&self) -> Option<usize> {
        self.aggregator.max_concurrent_fetches.filter(|n| *n > 0)
    }

    pub fn cors_allowed_origin(&self) -> String {
        self.server
            .cors_allowed_origin
            .clone()
            .unwrap_or_else(|| "*".to_string())
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").expect("parse empty config");
        assert_eq!(cfg.upstream_base_url(), DEFAULT_UPSTREAM_BASE_URL);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(18_000));
        assert_eq!(cfg.negative_cache_ttl(), None);
        assert_eq!(cfg.max_concurrent_fetches(), None);
        assert_eq!(cfg.cors_allowed_origin(), "*");
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn config_from_string() {
        let toml = r#"
            [server]
            port = 9000

            [upstream]
            base_url = "http://localhost:1234/v0/"
            timeout_seconds = 3

            [cache]
            ttl_seconds = 60
            negative_ttl_seconds = 0

            [aggregator]
            max_concurrent_fetches = 16
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.server.port, Some(9000));
        assert_eq!(cfg.upstream_base_url(), "http://localhost:1234/v0");
        assert_eq!(cfg.upstream_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(60));
        // zero disables negative caching
        assert_eq!(cfg.negative_cache_ttl(), None);
        assert_eq!(cfg.max_concurrent_fetches(), Some(16));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.upstream.base_url = Some("not a url".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.cache.ttl_seconds = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_bounds_lifetimes_and_fetch_cap() {
        let mut cfg = Config::default();
        cfg.cache.ttl_seconds = Some(u64::MAX);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.cache.negative_ttl_seconds = Some(MAX_TTL_SECONDS + 1);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.aggregator.max_concurrent_fetches = Some(usize::MAX);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.cache.ttl_seconds = Some(MAX_TTL_SECONDS);
        cfg.cache.negative_ttl_seconds = Some(MAX_TTL_SECONDS);
        cfg.aggregator.max_concurrent_fetches = Some(MAX_CONCURRENT_FETCHES);
        cfg.validate().expect("limits themselves are accepted");
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        std::fs::write(
            &default_path,
            "[cache]\nttl_seconds = 100\n\n[upstream]\ntimeout_seconds = 5\n",
        )
        .expect("write default");
        std::fs::write(&override_path, "[cache]\nttl_seconds = 200\n").expect("write override");

        let cfg = Config::load_with_defaults(
            Some(default_path.as_path()),
            Some(override_path.as_path()),
        )
        .await
        .expect("load config");
        assert_eq!(cfg.cache.ttl_seconds, Some(200));
        assert_eq!(cfg.upstream.timeout_seconds, Some(5));

        let missing = dir.path().join("missing.toml");
        let cfg = Config::load_with_defaults(Some(missing.as_path()), None)
            .await
            .expect("missing files fall back to defaults");
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS));
    }

    #[tokio::test]
    async fn from_file_reports_missing_path() {
        let err = Config::from_file("/definitely/not/here.toml")
            .await
            .expect_err("missing file");
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
