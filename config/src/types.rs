use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub repository: RepositoryConfig,
    pub cache: CachesConfig,
    /// Versioned user ids to ingest. Empty means every user the repository knows.
    pub users: Vec<String>,
    pub poll: PollConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl ConnectorConfig {
    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "repository.url must be set".to_string(),
            ));
        }
        self.cache.users.intervals("cache.users")?;
        self.cache.credentials.intervals("cache.credentials")?;
        parse_duration(&self.cache.token_expiry_margin)?;
        if parse_duration(&self.poll.interval)?.is_zero() {
            return Err(ConfigError::InvalidValue(
                "poll.interval must be greater than zero".to_string(),
            ));
        }
        if self.poll.max_concurrent_users == 0 {
            return Err(ConfigError::InvalidValue(
                "poll.max_concurrent_users must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Base URL of the user repository service, e.g. `https://repo.example.org/`.
    pub url: String,
    /// OAuth2 client-credentials token URL. When absent, basic auth is used
    /// if a client id and secret are configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub source_type: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token_url: None,
            client_id: None,
            client_secret: None,
            source_type: "Oura".to_string(),
            connect_timeout_secs: 60,
            request_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
    pub users: CacheSettings,
    pub credentials: CacheSettings,
    /// Access tokens are treated as expired this long before their expiry time.
    pub token_expiry_margin: String,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            users: CacheSettings {
                refresh: "1h".to_string(),
                retry: "1m".to_string(),
            },
            credentials: CacheSettings {
                refresh: "1d".to_string(),
                retry: "1m".to_string(),
            },
            token_expiry_margin: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub refresh: String,
    pub retry: String,
}

impl CacheSettings {
    /// Parsed `(refresh, retry)` intervals. Fails when retry exceeds refresh.
    pub fn intervals(&self, section: &str) -> Result<(Duration, Duration), ConfigError> {
        let refresh = parse_duration(&self.refresh)?;
        let retry = parse_duration(&self.retry)?;
        if retry > refresh {
            return Err(ConfigError::InvalidValue(format!(
                "{section}: retry interval {} exceeds refresh interval {}",
                self.retry, self.refresh
            )));
        }
        Ok((refresh, retry))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval: String,
    pub max_concurrent_users: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: "5m".to_string(),
            max_concurrent_users: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9464".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            filter: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// Parse a duration such as `90`, `30s`, `5m`, `1h` or `1d`.
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;
    let factor = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(ConfigError::InvalidDuration(s.to_string())),
    };
    value
        .checked_mul(factor)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))
}
