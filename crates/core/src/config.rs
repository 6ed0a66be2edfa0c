use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{ResolutionEngineConfig, RoundingDrift};
use crate::recorder::AuditRetryPolicy;

const DEFAULT_CONFIG_FILE: &str = "payrail.toml";

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub routing: RoutingConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Knobs for the routing core itself: audit-write retry bounds and the
/// engine's rounding policy.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingConfig {
    pub audit_retry_attempts: u32,
    pub audit_retry_base_delay_ms: u64,
    pub rounding_drift: RoundingDrift,
    pub minor_unit_scale: u32,
}

impl RoutingConfig {
    pub fn retry_policy(&self) -> AuditRetryPolicy {
        AuditRetryPolicy {
            max_attempts: self.audit_retry_attempts,
            base_delay: Duration::from_millis(self.audit_retry_base_delay_ms),
        }
    }

    pub fn engine_config(&self) -> ResolutionEngineConfig {
        ResolutionEngineConfig {
            minor_unit_scale: self.minor_unit_scale,
            rounding_drift: self.rounding_drift,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Highest-precedence overrides, typically from CLI flags.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    logging: Option<FileLogging>,
    routing: Option<FileRouting>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRouting {
    audit_retry_attempts: Option<u32>,
    audit_retry_base_delay_ms: Option<u64>,
    rounding_drift: Option<RoundingDrift>,
    minor_unit_scale: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://payrail.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            routing: RoutingConfig {
                audit_retry_attempts: 3,
                audit_retry_base_delay_ms: 50,
                rounding_drift: RoundingDrift::Management,
                minor_unit_scale: 2,
            },
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then `PAYRAIL_*` environment
    /// variables, then explicit overrides; validated at the end.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(&options)? {
            let raw = fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
            let file: FileConfig = toml::from_str(&raw)
                .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?;
            config.apply_file(file);
        }

        config.apply_env(|key| env::var(key).ok())?;

        if let Some(url) = options.overrides.database_url {
            config.database.url = url;
        }
        if let Some(level) = options.overrides.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(database) = file.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
        if let Some(routing) = file.routing {
            if let Some(attempts) = routing.audit_retry_attempts {
                self.routing.audit_retry_attempts = attempts;
            }
            if let Some(base_delay) = routing.audit_retry_base_delay_ms {
                self.routing.audit_retry_base_delay_ms = base_delay;
            }
            if let Some(drift) = routing.rounding_drift {
                self.routing.rounding_drift = drift;
            }
            if let Some(scale) = routing.minor_unit_scale {
                self.routing.minor_unit_scale = scale;
            }
        }
    }

    fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("PAYRAIL_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(raw) = lookup("PAYRAIL_DB_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("PAYRAIL_DB_MAX_CONNECTIONS", &raw)?;
        }
        if let Some(raw) = lookup("PAYRAIL_DB_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("PAYRAIL_DB_TIMEOUT_SECS", &raw)?;
        }
        if let Some(level) = lookup("PAYRAIL_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("PAYRAIL_LOG_FORMAT") {
            self.logging.format =
                LogFormat::parse(&raw).ok_or_else(|| ConfigError::InvalidEnvOverride {
                    key: "PAYRAIL_LOG_FORMAT".to_string(),
                    value: raw,
                })?;
        }
        if let Some(raw) = lookup("PAYRAIL_AUDIT_RETRY_ATTEMPTS") {
            self.routing.audit_retry_attempts = parse_env("PAYRAIL_AUDIT_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("PAYRAIL_AUDIT_RETRY_BASE_DELAY_MS") {
            self.routing.audit_retry_base_delay_ms =
                parse_env("PAYRAIL_AUDIT_RETRY_BASE_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("PAYRAIL_ROUNDING_DRIFT") {
            self.routing.rounding_drift = match raw.trim().to_ascii_lowercase().as_str() {
                "management" => RoundingDrift::Management,
                "owner" => RoundingDrift::Owner,
                _ => {
                    return Err(ConfigError::InvalidEnvOverride {
                        key: "PAYRAIL_ROUNDING_DRIFT".to_string(),
                        value: raw,
                    })
                }
            };
        }
        if let Some(raw) = lookup("PAYRAIL_MINOR_UNIT_SCALE") {
            self.routing.minor_unit_scale = parse_env("PAYRAIL_MINOR_UNIT_SCALE", &raw)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.routing.audit_retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "routing.audit_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.routing.minor_unit_scale > 9 {
            return Err(ConfigError::Validation(
                "routing.minor_unit_scale must be 9 or fewer decimal places".to_string(),
            ));
        }
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level `{}` is not one of {LEVELS:?}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

fn resolve_config_path(options: &LoadOptions) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = &options.config_path {
        if path.exists() {
            return Ok(Some(path.clone()));
        }
        if options.require_file {
            return Err(ConfigError::MissingConfigFile(path.clone()));
        }
        return Ok(None);
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return Ok(Some(default_path.to_path_buf()));
    }
    if options.require_file {
        return Err(ConfigError::MissingConfigFile(default_path.to_path_buf()));
    }
    Ok(None)
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
