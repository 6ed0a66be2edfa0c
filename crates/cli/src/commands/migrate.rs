use std::path::PathBuf;

use super::{build_runtime, load_config, open_pool, CommandResult};
use payrail_db::migrations;

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err((class, message, code)) => {
            return CommandResult::failure("migrate", class, message, code)
        }
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err((class, message, code)) => {
            return CommandResult::failure("migrate", class, message, code)
        }
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), super::CommandFailure>(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((class, message, code)) => CommandResult::failure("migrate", class, message, code),
    }
}
