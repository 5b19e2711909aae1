use std::env;

use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub scan: ScanConfig,
    pub resolver: ResolverConfig,
    pub metadata: MetadataConfig,
    pub fingerprint: FingerprintConfig,
    pub prediction: PredictionConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
    pub ssl_mode: SslMode,
    pub application_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub interval_seconds: u64,
    pub concurrency: usize,
    pub dedup_window_minutes: i64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolverConfig {
    pub timeout_ms: u64,
    pub max_hops: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FingerprintConfig {
    pub enabled: bool,
    pub sample_seconds: u64,
    pub capture_timeout_ms: u64,
    pub submit_timeout_ms: u64,
    pub primary_url: String,
    #[serde(skip_serializing)]
    pub primary_token: Option<String>,
    pub secondary_url: Option<String>,
    #[serde(skip_serializing)]
    pub secondary_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionConfig {
    pub min_history_plays: i64,
    pub history_window_days: i64,
    pub history_top_limit: i64,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let postgres = PostgresConfig::from_env()?;
        let scan = ScanConfig::from_env()?;
        let resolver = ResolverConfig::from_env()?;
        let metadata = MetadataConfig::from_env()?;
        let fingerprint = FingerprintConfig::from_env()?;
        let prediction = PredictionConfig::from_env()?;

        Ok(Self {
            postgres,
            scan,
            resolver,
            metadata,
            fingerprint,
            prediction,
        })
    }
}

impl PostgresConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw_url = env_required("PG_URL")?;
        let user = env::var("PG_USER").ok().filter(|s| !s.is_empty());
        let password = env::var("PG_PASS")
            .or_else(|_| env::var("PG_PASSWORD"))
            .ok()
            .filter(|s| !s.is_empty());

        let connection_string =
            build_connection_string(&raw_url, user.as_deref(), password.as_deref())?;
        let max_connections = env_u32("PG_MAX_CONNECTIONS", 10)?;
        let ssl_mode = parse_ssl_mode(env::var("PG_SSL_MODE").ok().as_deref());
        let application_name =
            env::var("PG_APP_NAME").unwrap_or_else(|_| "nowplaying-service".into());

        Ok(Self {
            connection_string,
            max_connections,
            ssl_mode,
            application_name,
        })
    }
}

impl ScanConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let interval_seconds = env_u64("SCAN_INTERVAL_SECONDS", 60)?;
        let concurrency = env_usize("SCAN_CONCURRENCY", 8)?;
        let dedup_window_minutes = env_i64("SCAN_DEDUP_WINDOW_MINUTES", 10)?;
        let user_agent = env::var("SCAN_USER_AGENT")
            .unwrap_or_else(|_| "nowplaying-service-rs/0.1".to_string());

        let config = Self {
            interval_seconds,
            concurrency,
            dedup_window_minutes,
            user_agent,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "SCAN_INTERVAL_SECONDS must be greater than zero.".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Message(
                "SCAN_CONCURRENCY must be greater than zero.".into(),
            ));
        }
        if self.dedup_window_minutes <= 0 {
            return Err(ConfigError::Message(
                "SCAN_DEDUP_WINDOW_MINUTES must be greater than zero.".into(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Message(
                "SCAN_USER_AGENT must not be blank.".into(),
            ));
        }
        Ok(())
    }
}

impl ResolverConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = env_u64("RESOLVER_TIMEOUT_MS", 5000)?;
        let max_hops = env_usize("RESOLVER_MAX_HOPS", 3)?;
        if max_hops == 0 {
            return Err(ConfigError::Message(
                "RESOLVER_MAX_HOPS must be greater than zero.".into(),
            ));
        }
        Ok(Self {
            timeout_ms,
            max_hops,
        })
    }
}

impl MetadataConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = env_u64("METADATA_TIMEOUT_MS", 15_000)?;
        let max_attempts = env_u32("METADATA_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::Message(
                "METADATA_MAX_ATTEMPTS must be greater than zero.".into(),
            ));
        }
        Ok(Self {
            timeout_ms,
            max_attempts,
        })
    }
}

impl FingerprintConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let enabled = env_bool("FINGERPRINT_ENABLED").unwrap_or(true);
        let sample_seconds = env_u64("FINGERPRINT_SAMPLE_SECONDS", 15)?;
        let capture_timeout_ms = env_u64("FINGERPRINT_CAPTURE_TIMEOUT_MS", 25_000)?;
        let submit_timeout_ms = env_u64("FINGERPRINT_SUBMIT_TIMEOUT_MS", 15_000)?;
        let primary_url = env::var("FINGERPRINT_PRIMARY_URL")
            .unwrap_or_else(|_| "https://api.audd.io/".to_string());
        let primary_token = env::var("FINGERPRINT_PRIMARY_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let secondary_url = env::var("FINGERPRINT_SECONDARY_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let secondary_token = env::var("FINGERPRINT_SECONDARY_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let config = Self {
            enabled,
            sample_seconds,
            capture_timeout_ms,
            submit_timeout_ms,
            primary_url,
            primary_token,
            secondary_url,
            secondary_token,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_seconds == 0 || self.sample_seconds > 60 {
            return Err(ConfigError::Message(
                "FINGERPRINT_SAMPLE_SECONDS must be between 1 and 60.".into(),
            ));
        }
        Url::parse(&self.primary_url).map_err(|err| {
            ConfigError::Message(format!("Invalid FINGERPRINT_PRIMARY_URL: {err}"))
        })?;
        if let Some(secondary) = &self.secondary_url {
            Url::parse(secondary).map_err(|err| {
                ConfigError::Message(format!("Invalid FINGERPRINT_SECONDARY_URL: {err}"))
            })?;
        }
        Ok(())
    }
}

impl PredictionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let min_history_plays = env_i64("PREDICTION_MIN_HISTORY_PLAYS", 5)?;
        let history_window_days = env_i64("PREDICTION_HISTORY_WINDOW_DAYS", 14)?;
        let history_top_limit = env_i64("PREDICTION_HISTORY_TOP_LIMIT", 10)?;
        if min_history_plays <= 0 || history_window_days <= 0 || history_top_limit <= 0 {
            return Err(ConfigError::Message(
                "PREDICTION_* values must be greater than zero.".into(),
            ));
        }
        Ok(Self {
            min_history_plays,
            history_window_days,
            history_top_limit,
        })
    }
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Message(format!("{key} must be set")))
}

fn env_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid u32"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid u64"))),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid usize"))),
        Err(_) => Ok(default),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Message(format!("{key} must be a valid integer"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str) -> Option<bool> {
    match env::var(key) {
        Ok(value) => match value.to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Err(_) => None,
    }
}

fn build_connection_string(
    raw_url: &str,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<String, ConfigError> {
    if raw_url.contains("://") {
        let url = Url::parse(raw_url)
            .map_err(|err| ConfigError::Message(format!("Invalid PG_URL: {err}")))?;
        if url.scheme() != "postgres" && url.scheme() != "postgresql" {
            return Err(ConfigError::Message(
                "PG_URL must start with postgres:// or postgresql://".into(),
            ));
        }
        if url.path().is_empty() || url.path() == "/" {
            return Err(ConfigError::Message(
                "PG_URL must include database name in the path".into(),
            ));
        }
        return Ok(raw_url.to_string());
    }

    let (host_part, database) = parse_host_target(raw_url).ok_or_else(|| {
        ConfigError::Message("PG_URL must be full postgres URL or host:port/database".into())
    })?;

    let mut url = String::from("postgresql://");
    if let Some(user) = user {
        url.push_str(&percent_encode(user));
        if let Some(password) = password {
            url.push(':');
            url.push_str(&percent_encode(password));
        }
        url.push('@');
    }
    url.push_str(&host_part);
    url.push('/');
    url.push_str(&database);
    Ok(url)
}

fn parse_host_target(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    let slash = trimmed.find('/')?;
    let host = trimmed[..slash].trim();
    let database = trimmed[slash + 1..].trim();
    if host.is_empty() || database.is_empty() {
        return None;
    }
    Some((host.to_string(), database.to_string()))
}

fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn parse_ssl_mode(value: Option<&str>) -> SslMode {
    match value.map(|v| v.to_lowercase()) {
        Some(mode) if mode == "disable" => SslMode::Disable,
        Some(mode) if mode == "require" || mode == "verify-full" => SslMode::Require,
        _ => SslMode::Prefer,
    }
}
