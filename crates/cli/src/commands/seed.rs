use std::path::PathBuf;

use rust_decimal::Decimal;

use payrail_core::domain::rule::{ChannelId, PlatformRuleDraft, RoutingType};
use payrail_core::errors::{RoutingError, StoreError};

use super::{build_facade, build_runtime, load_config, open_migrated_pool, CommandResult};

fn demo_rules() -> Vec<PlatformRuleDraft> {
    vec![
        PlatformRuleDraft {
            id: None,
            expected_version: None,
            channel: ChannelId::new("airbnb"),
            display_name: "Airbnb".to_string(),
            owner_pct: Decimal::new(70, 0),
            management_pct: Decimal::new(30, 0),
            routing_type: RoutingType::SplitPayout,
            payment_method: Some("bank_transfer".to_string()),
            platform_fee_pct: Decimal::new(3, 0),
            supports_split_payout: true,
            notes: Some("demo channel".to_string()),
        },
        PlatformRuleDraft {
            id: None,
            expected_version: None,
            channel: ChannelId::new("booking_com"),
            display_name: "Booking.com".to_string(),
            owner_pct: Decimal::new(75, 0),
            management_pct: Decimal::new(25, 0),
            routing_type: RoutingType::SplitPayout,
            payment_method: Some("virtual_card".to_string()),
            platform_fee_pct: Decimal::new(2, 0),
            supports_split_payout: false,
            notes: Some("demo channel".to_string()),
        },
        PlatformRuleDraft {
            id: None,
            expected_version: None,
            channel: ChannelId::new("direct"),
            display_name: "Direct booking".to_string(),
            owner_pct: Decimal::ONE_HUNDRED,
            management_pct: Decimal::ZERO,
            routing_type: RoutingType::FullToOwner,
            payment_method: None,
            platform_fee_pct: Decimal::ZERO,
            supports_split_payout: false,
            notes: Some("demo channel".to_string()),
        },
    ]
}

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err((class, message, code)) => return CommandResult::failure("seed", class, message, code),
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err((class, message, code)) => return CommandResult::failure("seed", class, message, code),
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let facade = build_facade(&config, pool);

        let mut created = 0usize;
        let mut skipped = 0usize;
        for draft in demo_rules() {
            match facade.rule_store().upsert_platform_rule(draft, "seed").await {
                Ok(_) => created += 1,
                // Re-seeding an existing channel is a no-op, not a failure.
                Err(RoutingError::Store(StoreError::DuplicateChannelRule(_))) => skipped += 1,
                Err(error) => return Err(("seed", error.to_string(), 6u8)),
            }
        }
        Ok::<(usize, usize), super::CommandFailure>((created, skipped))
    });

    match result {
        Ok((created, skipped)) => CommandResult::success(
            "seed",
            format!("seeded demo platform rules: {created} created, {skipped} already present"),
        ),
        Err((class, message, code)) => CommandResult::failure("seed", class, message, code),
    }
}
