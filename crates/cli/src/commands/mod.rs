pub mod doctor;
pub mod history;
pub mod migrate;
pub mod resolve;
pub mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use payrail_core::config::{AppConfig, LoadOptions};
use payrail_core::facade::RoutingFacade;
use payrail_db::{
    connect, migrations, DbPool, PoolSettings, SqlAuditStore, SqlBookingOverrideRepository,
    SqlRuleRepository,
};

pub type SqlFacade =
    RoutingFacade<SqlRuleRepository, SqlBookingOverrideRepository, SqlAuditStore>;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string_pretty(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) type CommandFailure = (&'static str, String, u8);

pub(crate) fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, CommandFailure> {
    AppConfig::load(LoadOptions {
        config_path,
        require_file: false,
        overrides: Default::default(),
    })
    .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2))
}

pub(crate) fn build_runtime() -> Result<tokio::runtime::Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        ("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    })
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    connect(
        &config.database.url,
        PoolSettings {
            max_connections: config.database.max_connections,
            acquire_timeout_secs: config.database.timeout_secs,
        },
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4))
}

pub(crate) async fn open_migrated_pool(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = open_pool(config).await?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5))?;
    Ok(pool)
}

pub(crate) fn build_facade(config: &AppConfig, pool: DbPool) -> SqlFacade {
    RoutingFacade::new(
        Arc::new(SqlRuleRepository::new(pool.clone())),
        Arc::new(SqlBookingOverrideRepository::new(pool.clone())),
        Arc::new(SqlAuditStore::new(pool)),
        payrail_core::engine::DeterministicResolutionEngine::new(config.routing.engine_config()),
        config.routing.retry_policy(),
    )
}
