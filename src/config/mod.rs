//! Configuration loading for the chain sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CHAIN_SYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "CHAIN_SYNC_";

/// Application configuration derived from `CHAIN_SYNC_*` environment variables.
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
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Scheduler loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    /// `max_retries` stamped on newly created jobs
    #[serde(default = "default_scheduler_default_max_retries")]
    pub default_max_retries: i32,
}

/// Executor worker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_executor_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_executor_claim_batch")]
    pub claim_batch: u64,
    #[serde(default = "default_executor_max_run_seconds")]
    pub max_run_seconds: u64,
    /// Claims older than this are considered abandoned and reaped
    #[serde(default = "default_executor_lease_seconds")]
    pub lease_seconds: u64,
}

/// Health aggregator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_health_window_seconds")]
    pub window_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_scheduler_tick_interval_seconds(),
            default_max_retries: default_scheduler_default_max_retries(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_executor_tick_ms(),
            concurrency: default_executor_concurrency(),
            claim_batch: default_executor_claim_batch(),
            max_run_seconds: default_executor_max_run_seconds(),
            lease_seconds: default_executor_lease_seconds(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_health_interval_seconds(),
            window_seconds: default_health_window_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.profile.as_str(), "local" | "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections);
        }

        self.scheduler.validate()?;
        self.executor.validate()?;
        self.health.validate()?;

        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(5..=3600).contains(&self.tick_interval_seconds) {
            return Err(ConfigError::InvalidSchedulerTickInterval {
                value: self.tick_interval_seconds,
            });
        }

        if !(1..=20).contains(&self.default_max_retries) {
            return Err(ConfigError::InvalidMaxRetries {
                value: self.default_max_retries,
            });
        }

        Ok(())
    }
}

impl ExecutorConfig {
    /// Validate executor configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms < 100 {
            return Err(ConfigError::InvalidExecutorTick { value: self.tick_ms });
        }

        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidExecutorConcurrency {
                value: self.concurrency,
            });
        }

        if self.claim_batch == 0 {
            return Err(ConfigError::InvalidExecutorClaimBatch);
        }

        // A lease shorter than the run timeout would let the reaper steal live work
        if self.max_run_seconds == 0 || self.lease_seconds <= self.max_run_seconds {
            return Err(ConfigError::InvalidExecutorLease {
                lease: self.lease_seconds,
                max_run: self.max_run_seconds,
            });
        }

        Ok(())
    }
}

impl HealthConfig {
    /// Validate health aggregator configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds < 60 {
            return Err(ConfigError::InvalidHealthInterval {
                value: self.interval_seconds,
            });
        }

        if self.window_seconds == 0 {
            return Err(ConfigError::InvalidHealthWindow);
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

fn default_database_url() -> String {
    "sqlite://chain_sync.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_scheduler_tick_interval_seconds() -> u64 {
    60
}

fn default_scheduler_default_max_retries() -> i32 {
    3
}

fn default_executor_tick_ms() -> u64 {
    2000
}

fn default_executor_concurrency() -> usize {
    4
}

fn default_executor_claim_batch() -> u64 {
    16
}

fn default_executor_max_run_seconds() -> u64 {
    300
}

fn default_executor_lease_seconds() -> u64 {
    600
}

fn default_health_interval_seconds() -> u64 {
    3600
}

fn default_health_window_seconds() -> u64 {
    3600
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path:?}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("at least one operator token is required (CHAIN_SYNC_OPERATOR_TOKEN or CHAIN_SYNC_OPERATOR_TOKENS)")]
    MissingOperatorTokens,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be positive")]
    InvalidDbMaxConnections,
    #[error("scheduler tick interval must be between 5 and 3600 seconds, got {value}")]
    InvalidSchedulerTickInterval { value: u64 },
    #[error("default max retries must be between 1 and 20, got {value}")]
    InvalidMaxRetries { value: i32 },
    #[error("executor tick must be at least 100ms, got {value}")]
    InvalidExecutorTick { value: u64 },
    #[error("executor concurrency must be between 1 and 64, got {value}")]
    InvalidExecutorConcurrency { value: usize },
    #[error("executor claim batch must be positive")]
    InvalidExecutorClaimBatch,
    #[error("executor lease ({lease}s) must exceed the job run timeout ({max_run}s)")]
    InvalidExecutorLease { lease: u64, max_run: u64 },
    #[error("health aggregation interval must be at least 60 seconds, got {value}")]
    InvalidHealthInterval { value: u64 },
    #[error("health aggregation window must be positive")]
    InvalidHealthWindow,
}

/// Loads configuration using layered `.env` files and `CHAIN_SYNC_*` env vars.
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

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`,
    /// then the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

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
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Either a comma-separated list or a single token
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let scheduler = SchedulerConfig {
            tick_interval_seconds: take_parsed(&mut layered, "SCHEDULER_TICK_INTERVAL_SECONDS")?
                .unwrap_or_else(default_scheduler_tick_interval_seconds),
            default_max_retries: take_parsed(&mut layered, "SCHEDULER_DEFAULT_MAX_RETRIES")?
                .unwrap_or_else(default_scheduler_default_max_retries),
        };

        let executor = ExecutorConfig {
            tick_ms: take_parsed(&mut layered, "EXECUTOR_TICK_MS")?
                .unwrap_or_else(default_executor_tick_ms),
            concurrency: take_parsed(&mut layered, "EXECUTOR_CONCURRENCY")?
                .unwrap_or_else(default_executor_concurrency),
            claim_batch: take_parsed(&mut layered, "EXECUTOR_CLAIM_BATCH")?
                .unwrap_or_else(default_executor_claim_batch),
            max_run_seconds: take_parsed(&mut layered, "EXECUTOR_MAX_RUN_SECONDS")?
                .unwrap_or_else(default_executor_max_run_seconds),
            lease_seconds: take_parsed(&mut layered, "EXECUTOR_LEASE_SECONDS")?
                .unwrap_or_else(default_executor_lease_seconds),
        };

        let health = HealthConfig {
            interval_seconds: take_parsed(&mut layered, "HEALTH_INTERVAL_SECONDS")?
                .unwrap_or_else(default_health_interval_seconds),
            window_seconds: take_parsed(&mut layered, "HEALTH_WINDOW_SECONDS")?
                .unwrap_or_else(default_health_window_seconds),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            scheduler,
            executor,
            health,
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

/// Numeric keys reject garbage instead of silently falling back to defaults.
fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
    }
}
