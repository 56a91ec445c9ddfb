//! Configuration for the translation proxy.
//!
//! Populated from CLI flags, environment variables, and an optional `.env`
//! file, validated at startup with actionable error messages.

#[cfg(feature = "cli")]
use clap::Parser;
use std::env;

/// Which JSON path upstream uses for the incremental streaming delta.
///
/// `Auto` tries `choices[0].delta.content`, then top-level `content`, then
/// `system_response`, in that order, without guessing beyond the configured
/// preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentField {
    #[default]
    Auto,
    Delta,
    Content,
    SystemResponse,
}

impl std::str::FromStr for ContentField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ContentField::Auto),
            "delta" => Ok(ContentField::Delta),
            "content" => Ok(ContentField::Content),
            "system_response" => Ok(ContentField::SystemResponse),
            other => Err(format!(
                "invalid delta field '{other}', expected one of: auto, delta, content, system_response"
            )),
        }
    }
}

/// Application configuration for the translation proxy.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "translation-proxy"))]
#[cfg_attr(
    feature = "cli",
    command(about = "Caching, deduplicating proxy in front of an upstream translation LLM endpoint")
)]
#[cfg_attr(feature = "cli", command(version))]
pub struct Config {
    /// Server port to listen on
    #[cfg_attr(feature = "cli", arg(short, long, env = "PORT", default_value = "8080"))]
    pub port: u16,

    /// Server host to bind to
    #[cfg_attr(feature = "cli", arg(long, env = "HOST", default_value = "0.0.0.0"))]
    pub host: String,

    /// Maximum number of cache entries
    #[cfg_attr(feature = "cli", arg(long, env = "CACHE_MAX_SIZE", default_value = "1000"))]
    pub cache_max_size: usize,

    /// Cache entry time-to-live in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "CACHE_TTL", default_value = "3600"))]
    pub cache_ttl_seconds: u64,

    /// Upstream HTTP request timeout in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "HTTP_TIMEOUT", default_value = "30"))]
    pub http_timeout_seconds: u64,

    /// Upstream connect timeout in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "CONNECT_TIMEOUT", default_value = "10"))]
    pub connect_timeout_seconds: u64,

    /// Maximum idle pooled connections per host
    #[cfg_attr(feature = "cli", arg(long, env = "MAX_CONNECTIONS", default_value = "100"))]
    pub max_connections: usize,

    /// Maximum keepalive duration for pooled connections, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "MAX_KEEPALIVE", default_value = "60"))]
    pub max_keepalive_seconds: u64,

    /// Per-client requests-per-minute admission rate
    #[cfg_attr(feature = "cli", arg(long, env = "RATE_LIMIT_RPM", default_value = "60"))]
    pub rate_limit_rpm: u32,

    /// Per-client token bucket burst capacity
    #[cfg_attr(feature = "cli", arg(long, env = "RATE_LIMIT_BURST", default_value = "10"))]
    pub rate_limit_burst: u32,

    /// Authentication failures allowed within the failure window before lockout
    #[cfg_attr(
        feature = "cli",
        arg(long, env = "AUTH_FAILURE_MAX_ATTEMPTS", default_value = "5")
    )]
    pub auth_failure_max_attempts: usize,

    /// Duration of an auth lockout in seconds
    #[cfg_attr(
        feature = "cli",
        arg(long, env = "AUTH_FAILURE_LOCKOUT_SECONDS", default_value = "300")
    )]
    pub auth_failure_lockout_seconds: u64,

    /// Width of the rolling auth-failure window in seconds
    #[cfg_attr(
        feature = "cli",
        arg(long, env = "AUTH_FAILURE_WINDOW_SECONDS", default_value = "60")
    )]
    pub auth_failure_window_seconds: u64,

    /// Maximum concurrent upstream API calls in flight at once
    #[cfg_attr(
        feature = "cli",
        arg(long, env = "MAX_CONCURRENT_API_CALLS", default_value = "50")
    )]
    pub max_concurrent_api_calls: usize,

    /// Enable in-flight request coalescing
    #[cfg_attr(feature = "cli", arg(long, env = "DEDUP_ENABLED", default_value = "true"))]
    pub dedup_enabled: bool,

    /// Maximum time to wait to acquire the cache lock before treating the
    /// lookup as a miss, in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "LOCK_TIMEOUT", default_value = "50"))]
    pub lock_timeout_ms: u64,

    /// Interval between periodic cache/rate-limiter cleanup sweeps, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "CLEANUP_INTERVAL", default_value = "60"))]
    pub cleanup_interval_seconds: u64,

    /// How long an idle per-client rate limiter bucket is retained, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "CLIENT_TTL", default_value = "1800"))]
    pub client_ttl_seconds: u64,

    /// Comma-separated list of allowed CORS origins. Empty means permissive.
    #[cfg_attr(feature = "cli", arg(long, env = "ALLOWED_ORIGINS", default_value = ""))]
    pub allowed_origins: String,

    /// Identifier for this process instance, returned on every response
    #[cfg_attr(feature = "cli", arg(long, env = "INSTANCE_ID", default_value = ""))]
    pub instance_id: String,

    /// Which JSON path carries the upstream streaming delta
    #[cfg_attr(feature = "cli", arg(long, env = "DELTA_FIELD", default_value = "auto"))]
    pub delta_field: String,

    /// Log level (error, warn, info, debug, trace)
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_LOG", default_value = "info"))]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_test()
    }
}

impl Config {
    /// Parse configuration from command line arguments and environment
    /// variables, loading `.env` first, then validate and set up logging.
    #[cfg(feature = "cli")]
    pub fn parse_args() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::parse();
        if config.instance_id.is_empty() {
            config.instance_id = uuid::Uuid::new_v4().to_string();
        }

        config.setup_logging();

        if let Err(err) = config.validate() {
            eprintln!("Configuration validation failed: {}", err);
            std::process::exit(1);
        }

        config
    }

    /// A configuration suitable for tests: all the same defaults as the CLI
    /// parser would produce, with a freshly generated instance id.
    pub fn for_test() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            cache_max_size: 1000,
            cache_ttl_seconds: 3600,
            http_timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_connections: 100,
            max_keepalive_seconds: 60,
            rate_limit_rpm: 60,
            rate_limit_burst: 10,
            auth_failure_max_attempts: 5,
            auth_failure_lockout_seconds: 300,
            auth_failure_window_seconds: 60,
            max_concurrent_api_calls: 50,
            dedup_enabled: true,
            lock_timeout_ms: 50,
            cleanup_interval_seconds: 60,
            client_ttl_seconds: 1800,
            allowed_origins: String::new(),
            instance_id: "test-instance".to_string(),
            delta_field: "auto".to_string(),
            log_level: "info".to_string(),
        }
    }

    pub fn content_field(&self) -> ContentField {
        self.delta_field.parse().unwrap_or_default()
    }

    pub fn allowed_origins_list(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn setup_logging(&self) {
        #[cfg(feature = "cli")]
        let _ = tracing_subscriber::fmt()
            .with_env_filter(&self.log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init();
    }

    /// Validate configuration values, returning an actionable error message
    /// on the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0. Please specify a valid port number (1-65535).".to_string());
        }

        if self.host.is_empty() {
            return Err("Host cannot be empty.".to_string());
        }

        if self.cache_max_size == 0 {
            return Err("CACHE_MAX_SIZE must be greater than 0.".to_string());
        }

        if self.rate_limit_burst == 0 {
            return Err("RATE_LIMIT_BURST must be greater than 0.".to_string());
        }

        if self.max_concurrent_api_calls == 0 {
            return Err("MAX_CONCURRENT_API_CALLS must be greater than 0.".to_string());
        }

        if self.auth_failure_max_attempts == 0 {
            return Err("AUTH_FAILURE_MAX_ATTEMPTS must be greater than 0.".to_string());
        }

        self.delta_field.parse::<ContentField>()?;

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Valid options are: {}",
                self.log_level,
                valid_log_levels.join(", ")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_test_config_validates() {
        assert!(Config::for_test().validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::for_test();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_delta_field() {
        let mut config = Config::for_test();
        config.delta_field = "nonsense".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_allowed_origins_list() {
        let mut config = Config::for_test();
        config.allowed_origins = "https://a.com, https://b.com".to_string();
        assert_eq!(
            config.allowed_origins_list(),
            vec!["https://a.com".to_string(), "https://b.com".to_string()]
        );
    }

    #[test]
    fn empty_allowed_origins_list_is_empty() {
        let config = Config::for_test();
        assert!(config.allowed_origins_list().is_empty());
    }

    #[test]
    fn content_field_defaults_to_auto() {
        assert_eq!(Config::for_test().content_field(), ContentField::Auto);
    }
}
