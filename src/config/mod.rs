//! Configuration loading for the GradeSync relay.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `GRADESYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "GRADESYNC_";

/// Longest a single sync (streaming or not) may run.
pub const MAX_SYNC_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Application configuration derived from `GRADESYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Base URL of the GradeSync service
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// Deadline for listing courses
    #[serde(default = "default_courses_timeout_ms")]
    pub courses_timeout_ms: u64,
    /// Deadline for synchronous and streaming sync calls
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// How long finished jobs are kept for polling
    #[serde(default = "default_job_ttl_seconds")]
    pub job_ttl_seconds: u64,
    /// Period of the background retention sweep
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Browser origins allowed to call the API; empty allows any origin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            upstream_base_url: default_upstream_base_url(),
            courses_timeout_ms: default_courses_timeout_ms(),
            sync_timeout_ms: default_sync_timeout_ms(),
            job_ttl_seconds: default_job_ttl_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Parsed GradeSync base URL.
    pub fn upstream_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.upstream_base_url)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Returns a redacted JSON representation.
    ///
    /// Credentials embedded in the upstream URL are masked.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if let Ok(mut url) = Url::parse(&config.upstream_base_url)
            && (!url.username().is_empty() || url.password().is_some())
        {
            let _ = url.set_username("[REDACTED]");
            let _ = url.set_password(None);
            config.upstream_base_url = url.to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.upstream_base_url).map_err(|source| {
            ConfigError::InvalidUpstreamUrl {
                value: self.upstream_base_url.clone(),
                reason: source.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUpstreamUrl {
                value: self.upstream_base_url.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        if !(1_000..=600_000).contains(&self.courses_timeout_ms) {
            return Err(ConfigError::InvalidCoursesTimeout {
                value: self.courses_timeout_ms,
            });
        }

        if !(1_000..=MAX_SYNC_TIMEOUT_MS).contains(&self.sync_timeout_ms) {
            return Err(ConfigError::InvalidSyncTimeout {
                value: self.sync_timeout_ms,
            });
        }

        if self.job_ttl_seconds < 60 {
            return Err(ConfigError::InvalidJobTtl {
                value: self.job_ttl_seconds,
            });
        }

        if !(10..=86_400).contains(&self.sweep_interval_seconds) {
            return Err(ConfigError::InvalidSweepInterval {
                value: self.sweep_interval_seconds,
            });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_upstream_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_courses_timeout_ms() -> u64 {
    60_000 // 1 minute
}

fn default_sync_timeout_ms() -> u64 {
    MAX_SYNC_TIMEOUT_MS
}

fn default_job_ttl_seconds() -> u64 {
    12 * 60 * 60 // 12 hours
}

fn default_sweep_interval_seconds() -> u64 {
    600 // 10 minutes
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid GradeSync base URL '{value}': {reason}")]
    InvalidUpstreamUrl { value: String, reason: String },
    #[error("courses timeout must be between 1000 and 600000 ms, got {value}")]
    InvalidCoursesTimeout { value: u64 },
    #[error("sync timeout must be between 1000 and 3600000 ms, got {value}")]
    InvalidSyncTimeout { value: u64 },
    #[error("job TTL must be at least 60 seconds, got {value}")]
    InvalidJobTtl { value: u64 },
    #[error("sweep interval must be between 10 and 86400 seconds, got {value}")]
    InvalidSweepInterval { value: u64 },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid numeric value for {key}: '{value}'")]
    InvalidNumber { key: String, value: String },
}

/// Loads configuration using layered `.env` files and `GRADESYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let upstream_base_url = take_string(&mut layered, "UPSTREAM_BASE_URL")
            .unwrap_or_else(default_upstream_base_url);
        let courses_timeout_ms = take_number(&mut layered, "COURSES_TIMEOUT_MS")?
            .unwrap_or_else(default_courses_timeout_ms);
        let sync_timeout_ms =
            take_number(&mut layered, "SYNC_TIMEOUT_MS")?.unwrap_or_else(default_sync_timeout_ms);
        let job_ttl_seconds =
            take_number(&mut layered, "JOB_TTL_SECONDS")?.unwrap_or_else(default_job_ttl_seconds);
        let sweep_interval_seconds = take_number(&mut layered, "SWEEP_INTERVAL_SECONDS")?
            .unwrap_or_else(default_sweep_interval_seconds);
        let cors_allowed_origins = take_string(&mut layered, "CORS_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            upstream_base_url,
            courses_timeout_ms,
            sync_timeout_ms,
            job_ttl_seconds,
            sweep_interval_seconds,
            cors_allowed_origins,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_number(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match take_string(layered, key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                key: format!("{ENV_PREFIX}{key}"),
                value,
            }),
    }
}
