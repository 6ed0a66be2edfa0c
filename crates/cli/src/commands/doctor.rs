use std::path::PathBuf;

use serde::Serialize;

use payrail_db::migrations;

use super::{build_runtime, load_config, open_pool, CommandResult};

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: String,
    status: String,
    detail: String,
}

fn check(name: &str, outcome: Result<String, String>) -> DoctorCheck {
    match outcome {
        Ok(detail) => DoctorCheck { name: name.to_string(), status: "ok".to_string(), detail },
        Err(detail) => {
            DoctorCheck { name: name.to_string(), status: "failed".to_string(), detail }
        }
    }
}

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let mut checks = Vec::new();

    let config = match load_config(config_path) {
        Ok(config) => {
            checks.push(check(
                "config",
                Ok(format!("database.url = `{}`", config.database.url)),
            ));
            Some(config)
        }
        Err((_, message, _)) => {
            checks.push(check("config", Err(message)));
            None
        }
    };

    if let Some(config) = config {
        match build_runtime() {
            Ok(runtime) => runtime.block_on(async {
                match open_pool(&config).await {
                    Ok(pool) => {
                        checks.push(check("database", Ok("connection established".to_string())));

                        match migrations::schema_present(&pool).await {
                            Ok(true) => checks
                                .push(check("schema", Ok("routing schema present".to_string()))),
                            Ok(false) => checks.push(check(
                                "schema",
                                Err("routing schema missing; run `payrail migrate`".to_string()),
                            )),
                            Err(error) => checks.push(check("schema", Err(error.to_string()))),
                        }

                        pool.close().await;
                    }
                    Err((_, message, _)) => checks.push(check("database", Err(message))),
                }
            }),
            Err((_, message, _)) => checks.push(check("runtime", Err(message))),
        }
    }

    let failed = checks.iter().filter(|entry| entry.status != "ok").count();
    let data = serde_json::to_value(&checks).ok();
    if failed == 0 {
        CommandResult::success_with_data("doctor", "all checks passed", data)
    } else {
        let mut result = CommandResult::failure(
            "doctor",
            "checks_failed",
            format!("{failed} check(s) failed"),
            7,
        );
        // Keep the per-check detail visible on failure too.
        if let Some(data) = data {
            result.output = format!(
                "{}\n{}",
                result.output,
                serde_json::to_string_pretty(&data).unwrap_or_default()
            );
        }
        result
    }
}
