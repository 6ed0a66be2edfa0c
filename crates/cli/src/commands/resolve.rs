use std::path::PathBuf;
use std::str::FromStr;

use rust_decimal::Decimal;

use payrail_core::domain::overrides::{BookingId, PropertyId};
use payrail_core::domain::rule::ChannelId;
use payrail_core::errors::RoutingError;

use super::{build_facade, build_runtime, load_config, open_migrated_pool, CommandResult};

pub struct ResolveArgs {
    pub booking_id: String,
    pub property_id: String,
    pub channel: String,
    pub net_payout: String,
    pub actor: String,
}

pub fn run(config_path: Option<PathBuf>, args: ResolveArgs) -> CommandResult {
    let net_payout = match Decimal::from_str(args.net_payout.trim()) {
        Ok(value) => value,
        Err(error) => {
            return CommandResult::failure(
                "resolve",
                "invalid_amount",
                format!("`{}` is not a decimal amount: {error}", args.net_payout),
                2,
            )
        }
    };

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err((class, message, code)) => {
            return CommandResult::failure("resolve", class, message, code)
        }
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err((class, message, code)) => {
            return CommandResult::failure("resolve", class, message, code)
        }
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let facade = build_facade(&config, pool);

        facade
            .resolve_booking(
                &BookingId(args.booking_id.clone()),
                &PropertyId(args.property_id.clone()),
                &ChannelId::new(args.channel.as_str()),
                net_payout,
                &args.actor,
            )
            .await
            .map_err(|error| {
                let class = match &error {
                    RoutingError::Validation(_) => "validation",
                    RoutingError::Store(_) => "rule_store",
                    RoutingError::AuditWriteFailed { .. } => "audit_write",
                };
                (class, error.to_string(), 6u8)
            })
    });

    match result {
        Ok(resolved) => CommandResult::success_with_data(
            "resolve",
            format!(
                "booking `{}` resolved as {} via channel `{}`",
                args.booking_id,
                resolved.routing_type.as_str(),
                args.channel
            ),
            serde_json::to_value(&resolved).ok(),
        ),
        Err((class, message, code)) => CommandResult::failure("resolve", class, message, code),
    }
}
