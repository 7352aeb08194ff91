use std::env;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_CHANNEL: &str = "wiki";
pub const DEFAULT_STREAM_URL: &str = "https://stream.wikimedia.org/v2/stream/recentchange";
pub const DEFAULT_SQLITE_PATH: &str = "data/wikiflow.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Redis,
    Sqlite,
    Memory,
}

impl BackendType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Some(BackendType::Redis),
            "sqlite" => Some(BackendType::Sqlite),
            "memory" => Some(BackendType::Memory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Redis => "redis",
            BackendType::Sqlite => "sqlite",
            BackendType::Memory => "memory",
        }
    }

    /// `--backend <name>` wins over `STORE_BACKEND`.
    pub fn parse_from_args() -> Result<Option<Self>, ConfigError> {
        let args: Vec<String> = env::args().collect();
        Self::parse_backend_arg(&args)
    }

    /// A `--backend` flag without a value, or with an unknown one, is an
    /// error rather than a silent fallback.
    pub fn parse_backend_arg(args: &[String]) -> Result<Option<Self>, ConfigError> {
        let Some(idx) = args.iter().position(|x| x == "--backend") else {
            return Ok(None);
        };
        let raw = args
            .get(idx + 1)
            .ok_or_else(|| ConfigError::MissingVariable("--backend".to_string()))?;
        BackendType::parse(raw).map(Some).ok_or_else(|| {
            ConfigError::InvalidValue(format!("--backend must be redis, sqlite or memory, got '{}'", raw))
        })
    }
}

/// How the ingestor waits between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Reconnect forever, without delay.
    Immediate,
    /// Reconnect forever, doubling the delay up to `max`.
    Backoff { initial: Duration, max: Duration },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub channel: String,
    pub interval_secs: i64,
    pub retention_secs: i64,
    pub stream_url: String,
    pub backend: BackendType,
    pub sqlite_path: String,
    pub read_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub rust_log: String,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing value for {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Unset falls back to `default`; set but blank (`REDIS_URL=` in a `.env`)
/// is reported instead of guessed at.
fn string_var(name: &str, default: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Err(ConfigError::MissingVariable(name.to_string())),
        Ok(raw) => Ok(raw),
        Err(_) => Ok(default.to_string()),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_url = string_var("REDIS_URL", DEFAULT_REDIS_URL)?;
        let channel = string_var("PUBSUB_CHANNEL", DEFAULT_CHANNEL)?;
        let stream_url = string_var("STREAM_URL", DEFAULT_STREAM_URL)?;

        let interval_secs = parse_var("AGGREGATION_INTERVAL_SECS", 10i64)?;
        let retention_secs = parse_var("RETENTION_WINDOW_SECS", 1800i64)?;
        let read_timeout_secs = parse_var("STREAM_READ_TIMEOUT_SECS", 60u64)?;

        let backend = match BackendType::parse_from_args()? {
            Some(backend) => backend,
            None => {
                let raw = string_var("STORE_BACKEND", "redis")?;
                BackendType::parse(&raw).ok_or_else(|| {
                    ConfigError::InvalidValue(format!(
                        "STORE_BACKEND must be redis, sqlite or memory, got '{}'",
                        raw
                    ))
                })?
            }
        };

        let sqlite_path = string_var("SQLITE_PATH", DEFAULT_SQLITE_PATH)?;

        let reconnect = match env::var("RECONNECT_BACKOFF_MAX_SECS") {
            Ok(_) => {
                let max = parse_var("RECONNECT_BACKOFF_MAX_SECS", 0u64)?;
                ReconnectPolicy::Backoff {
                    initial: Duration::from_secs(1),
                    max: Duration::from_secs(max.max(1)),
                }
            }
            Err(_) => ReconnectPolicy::Immediate,
        };

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            redis_url,
            channel,
            interval_secs,
            retention_secs,
            stream_url,
            backend,
            sqlite_path,
            read_timeout: Duration::from_secs(read_timeout_secs),
            reconnect,
            rust_log,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs <= 0 {
            return Err(ConfigError::InvalidValue(format!(
                "AGGREGATION_INTERVAL_SECS must be positive, got {}",
                self.interval_secs
            )));
        }

        if self.retention_secs < self.interval_secs || self.retention_secs % self.interval_secs != 0 {
            return Err(ConfigError::InvalidValue(format!(
                "RETENTION_WINDOW_SECS ({}) must be a positive multiple of AGGREGATION_INTERVAL_SECS ({})",
                self.retention_secs, self.interval_secs
            )));
        }

        if !self.stream_url.starts_with("http://") && !self.stream_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "STREAM_URL must start with http:// or https://".to_string(),
            ));
        }

        if self.backend == BackendType::Redis
            && !self.redis_url.starts_with("redis://")
            && !self.redis_url.starts_with("rediss://")
            && !self.redis_url.starts_with("unix://")
        {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis://, rediss:// or unix://".to_string(),
            ));
        }

        if self.channel.is_empty() {
            return Err(ConfigError::InvalidValue("PUBSUB_CHANNEL cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn bucket_clock(&self) -> crate::bucket::BucketClock {
        crate::bucket::BucketClock::new(self.interval_secs, self.retention_secs)
    }
}
