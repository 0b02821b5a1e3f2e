use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub engine: EngineConfig,
    pub limiter: LimiterConfig,
    /// Mark session cookies `Secure`. On when `APP_ENV=production`.
    pub secure_cookies: bool,
    pub sessions: SessionConfig,
}

/// Lifetimes of session records and the per-user index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Renew a session whose remaining lifetime drops below this
    pub extend_threshold: Duration,
    /// Lifetime of a user's token index; must outlive any single session
    pub index_ttl: Duration,
    /// Sliding lifetime of one session record
    pub session_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// How long a failure keeps counting
    pub attempt_window: Duration,
    /// First ban length; doubles with every further failure
    pub ban_base: Duration,
    pub ban_max: Duration,
    /// Failures tolerated before bans start
    pub free_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EngineKind {
    #[default]
    Embedded,
    Redis,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cleanup_interval_seconds: u64,
    /// Directory of the embedded engine file
    pub data_dir: String,
    pub kind: EngineKind,
    pub redis_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            extend_threshold: Duration::from_secs(10 * 60),
            index_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            session_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            attempt_window: Duration::from_secs(60 * 60),
            ban_base: Duration::from_secs(5),
            ban_max: Duration::from_secs(60 * 60),
            free_attempts: 3,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 60,
            data_dir: "./data".to_string(),
            kind: EngineKind::Embedded,
            redis_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |name: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        ConfigError::ValidationError(format!(
                            "{name} must be a whole number of seconds, got {raw:?}"
                        ))
                    }),
            }
        };

        let session_defaults = SessionConfig::default();
        let sessions = SessionConfig {
            session_ttl: seconds("SESSION_TTL_SECONDS", session_defaults.session_ttl)?,
            extend_threshold: seconds(
                "SESSION_EXTEND_THRESHOLD_SECONDS",
                session_defaults.extend_threshold,
            )?,
            index_ttl: seconds("SESSION_INDEX_TTL_SECONDS", session_defaults.index_ttl)?,
        };

        let limiter_defaults = LimiterConfig::default();
        let free_attempts = match lookup("LOGIN_MAX_FREE_ATTEMPTS") {
            None => limiter_defaults.free_attempts,
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "LOGIN_MAX_FREE_ATTEMPTS must be a non-negative integer, got {raw:?}"
                ))
            })?,
        };
        let limiter = LimiterConfig {
            attempt_window: seconds(
                "LOGIN_ATTEMPT_WINDOW_SECONDS",
                limiter_defaults.attempt_window,
            )?,
            ban_base: seconds("LOGIN_BAN_BASE_SECONDS", limiter_defaults.ban_base)?,
            ban_max: seconds("LOGIN_BAN_MAX_SECONDS", limiter_defaults.ban_max)?,
            free_attempts,
        };

        let engine_defaults = EngineConfig::default();
        let kind = lookup("ENGINE")
            .map(|s| match s.to_lowercase().as_str() {
                "redis" => EngineKind::Redis,
                _ => EngineKind::Embedded,
            })
            .unwrap_or_default();
        let engine = EngineConfig {
            cleanup_interval_seconds: lookup("CLEANUP_INTERVAL_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(engine_defaults.cleanup_interval_seconds),
            data_dir: lookup("DATA_DIR").unwrap_or(engine_defaults.data_dir),
            kind,
            redis_url: lookup("REDIS_URL").filter(|s| !s.trim().is_empty()),
        };

        let secure_cookies = lookup("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        let config = Config {
            engine,
            limiter,
            secure_cookies,
            sessions,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sessions = &self.sessions;
        if sessions.session_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "SESSION_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if sessions.extend_threshold.is_zero() || sessions.extend_threshold > sessions.session_ttl
        {
            return Err(ConfigError::ValidationError(
                "SESSION_EXTEND_THRESHOLD_SECONDS must be within (0, SESSION_TTL_SECONDS]"
                    .to_string(),
            ));
        }
        if sessions.index_ttl <= sessions.session_ttl {
            return Err(ConfigError::ValidationError(
                "SESSION_INDEX_TTL_SECONDS must exceed SESSION_TTL_SECONDS".to_string(),
            ));
        }

        let limiter = &self.limiter;
        if limiter.attempt_window.is_zero() || limiter.ban_base.is_zero() {
            return Err(ConfigError::ValidationError(
                "LOGIN_ATTEMPT_WINDOW_SECONDS and LOGIN_BAN_BASE_SECONDS must be greater than 0"
                    .to_string(),
            ));
        }
        if limiter.ban_max < limiter.ban_base {
            return Err(ConfigError::ValidationError(
                "LOGIN_BAN_MAX_SECONDS must be at least LOGIN_BAN_BASE_SECONDS".to_string(),
            ));
        }

        if self.engine.kind == EngineKind::Redis && self.engine.redis_url.is_none() {
            return Err(ConfigError::ValidationError(
                "REDIS_URL is required when ENGINE=redis".to_string(),
            ));
        }
        if self.engine.kind == EngineKind::Embedded && self.engine.cleanup_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "CLEANUP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
