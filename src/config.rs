//! Configuration for remedy-link
//!
//! Library users build a [`ClientConfig`] directly or from the environment.
//! The binary parses [`Args`] with clap, which falls back to the same
//! environment variables.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::events::{ReconnectBackoff, StreamConfig};
use crate::types::{ClientError, Result};

/// Request client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address every request path is joined to
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum retries for transient failures
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay: Duration,
    /// Base delay used instead when the server rate-limits (429)
    pub rate_limit_base_delay: Duration,
    /// Upper bound for any single backoff delay
    pub max_retry_delay: Duration,
    /// Refresh the credential when it expires within this window
    pub refresh_threshold: Duration,
    /// Endpoint paths for the session operations
    pub login_path: String,
    pub logout_path: String,
    pub refresh_path: String,
    pub session_path: String,
    /// Client-side route of the login view
    pub login_route: String,
    /// Log every request and response at debug level
    pub logging_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            rate_limit_base_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(30),
            refresh_threshold: Duration::from_secs(5 * 60),
            login_path: "/auth/login".to_string(),
            logout_path: "/auth/logout".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            session_path: "/auth/me".to_string(),
            login_route: "/login".to_string(),
            logging_enabled: false,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `base_url` with defaults for everything else
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Create config from environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("REMEDY_API_URL").unwrap_or(defaults.base_url),
            timeout: env_millis("REMEDY_TIMEOUT_MS").unwrap_or(defaults.timeout),
            max_retries: std::env::var("REMEDY_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: env_millis("REMEDY_RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay),
            logging_enabled: std::env::var("REMEDY_REQUEST_LOGGING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.logging_enabled),
            ..defaults
        }
    }

    /// Parsed base URL with a trailing slash so relative joins keep its path
    pub fn base(&self) -> Result<Url> {
        normalize_base(&self.base_url)
    }

    /// Resolve a request path against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base()?.join(path.trim_start_matches('/'))?)
    }

    /// Reject configurations the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        let base = self.base()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "base_url must be http or https, got {}",
                base.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be non-zero".into()));
        }
        if self.retry_base_delay.is_zero() {
            return Err(ClientError::Config(
                "retry_base_delay must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a base address, adding a trailing slash so joins keep its path
pub(crate) fn normalize_base(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ClientError::Config("base_url is required".into()));
    }
    let mut base = Url::parse(trimmed)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

pub(crate) fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// remedy-link - operator client for the remediation control panel API
#[derive(Parser, Debug, Clone)]
#[command(name = "remedy-link")]
#[command(about = "Talk to the remediation control panel API and tail its event stream")]
pub struct Args {
    /// Base address of the REST API
    #[arg(long, env = "REMEDY_API_URL", default_value = "http://localhost:8000/api")]
    pub api_url: String,

    /// File used as the durable credential location
    #[arg(long, env = "REMEDY_CREDENTIAL_FILE", default_value = ".remedy/credential.json")]
    pub credential_file: PathBuf,

    /// Request timeout in milliseconds
    #[arg(long, env = "REMEDY_TIMEOUT_MS", default_value = "10000")]
    pub timeout_ms: u64,

    /// Maximum retries for transient failures
    #[arg(long, env = "REMEDY_MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds
    #[arg(long, env = "REMEDY_RETRY_BASE_DELAY_MS", default_value = "1000")]
    pub retry_base_delay_ms: u64,

    /// Log each request and response
    #[arg(long, env = "REMEDY_REQUEST_LOGGING", default_value = "false")]
    pub request_logging: bool,

    /// Event stream path, relative to the API URL
    #[arg(long, env = "REMEDY_STREAM_PATH", default_value = "/events/stream")]
    pub stream_path: String,

    /// Maximum consecutive reconnect attempts for the event stream
    #[arg(long, env = "REMEDY_MAX_RECONNECT", default_value = "10")]
    pub max_reconnect_attempts: u32,

    /// Reconnect delay in milliseconds
    #[arg(long, env = "REMEDY_RECONNECT_INTERVAL_MS", default_value = "3000")]
    pub reconnect_interval_ms: u64,

    /// Event stream open timeout in milliseconds
    #[arg(long, env = "REMEDY_STREAM_OPEN_TIMEOUT_MS", default_value = "30000")]
    pub stream_open_timeout_ms: u64,

    /// Use a fixed reconnect interval instead of exponential backoff
    #[arg(long, env = "REMEDY_FIXED_RECONNECT", default_value = "false")]
    pub fixed_reconnect: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Operator commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Authenticate and store the credential
    Login {
        #[arg(long, env = "REMEDY_EMAIL")]
        email: String,
        #[arg(long, env = "REMEDY_PASSWORD")]
        password: String,
    },
    /// Drop the stored credential
    Logout,
    /// Fetch a resource and print the unwrapped payload
    Get {
        /// Path relative to the API URL
        path: String,
        /// Report pagination totals
        #[arg(long)]
        paginated: bool,
    },
    /// Tail the event stream until interrupted
    Watch {
        /// Only print these event types (repeatable)
        #[arg(long = "event")]
        events: Vec<String>,
    },
}

impl Args {
    /// Request client configuration from CLI/env
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_url.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            logging_enabled: self.request_logging,
            ..Default::default()
        }
    }

    /// Event stream configuration from CLI/env
    pub fn stream_config(&self) -> StreamConfig {
        let interval = Duration::from_millis(self.reconnect_interval_ms);
        StreamConfig {
            base_url: self.api_url.clone(),
            stream_path: self.stream_path.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            open_timeout: Duration::from_millis(self.stream_open_timeout_ms),
            backoff: if self.fixed_reconnect {
                ReconnectBackoff::Fixed(interval)
            } else {
                ReconnectBackoff::Exponential {
                    base: interval,
                    max: Duration::from_secs(30),
                }
            },
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.client_config().validate()?;
        if self.max_reconnect_attempts == 0 {
            return Err(ClientError::Config(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.refresh_threshold, Duration::from_secs(300));
        assert!(config.rate_limit_base_delay > config.retry_base_delay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let config = ClientConfig::new("https://panel.example.com/api");
        assert_eq!(
            config.endpoint("/incidents").unwrap().as_str(),
            "https://panel.example.com/api/incidents"
        );
        assert_eq!(
            config.endpoint("sites/7").unwrap().as_str(),
            "https://panel.example.com/api/sites/7"
        );
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("not a url").validate().is_err());
        assert!(ClientConfig::new("ftp://panel").validate().is_err());

        let mut config = ClientConfig::new("http://localhost");
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "remedy-link",
            "--api-url",
            "http://panel.local/api",
            "--fixed-reconnect",
            "watch",
            "--event",
            "incident_update",
        ])
        .unwrap();

        assert_eq!(args.client_config().base_url, "http://panel.local/api");
        assert_eq!(
            args.stream_config().backoff,
            ReconnectBackoff::Fixed(Duration::from_millis(3000))
        );
        assert!(matches!(args.command, Command::Watch { ref events } if events.len() == 1));
        assert!(args.validate().is_ok());
    }
}
