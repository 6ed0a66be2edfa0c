use std::path::PathBuf;

use payrail_core::audit::{AuditEntityKind, HistoryPage};

use super::{build_facade, build_runtime, load_config, open_migrated_pool, CommandResult};

pub struct HistoryArgs {
    pub entity_kind: String,
    pub entity_id: String,
    pub offset: u64,
    pub limit: u32,
}

fn parse_entity_kind(raw: &str) -> Option<AuditEntityKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "platform_rule" => Some(AuditEntityKind::PlatformRule),
        "property_override" => Some(AuditEntityKind::PropertyOverride),
        "booking_override" => Some(AuditEntityKind::BookingOverride),
        "booking" => Some(AuditEntityKind::Booking),
        _ => None,
    }
}

pub fn run(config_path: Option<PathBuf>, args: HistoryArgs) -> CommandResult {
    let Some(entity_kind) = parse_entity_kind(&args.entity_kind) else {
        return CommandResult::failure(
            "history",
            "invalid_entity_kind",
            format!(
                "`{}` is not one of platform_rule, property_override, booking_override, booking",
                args.entity_kind
            ),
            2,
        );
    };

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err((class, message, code)) => {
            return CommandResult::failure("history", class, message, code)
        }
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err((class, message, code)) => {
            return CommandResult::failure("history", class, message, code)
        }
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let facade = build_facade(&config, pool);

        facade
            .history(
                entity_kind,
                &args.entity_id,
                HistoryPage { offset: args.offset, limit: args.limit },
            )
            .await
            .map_err(|error| ("audit_read", error.to_string(), 6u8))
    });

    match result {
        Ok(entries) => {
            let count = entries.len();
            CommandResult::success_with_data(
                "history",
                format!(
                    "{count} audit entr{} for {} `{}` from offset {}",
                    if count == 1 { "y" } else { "ies" },
                    args.entity_kind,
                    args.entity_id,
                    args.offset
                ),
                serde_json::to_value(&entries).ok(),
            )
        }
        Err((class, message, code)) => CommandResult::failure("history", class, message, code),
    }
}
