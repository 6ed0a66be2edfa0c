use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformRuleId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_ascii_lowercase())
    }
}

/// How a booking's net payout is divided between owner and management.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingType {
    SplitPayout,
    FullToOwner,
    FullToManagement,
}

impl RoutingType {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "split_payout" => Ok(Self::SplitPayout),
            "full_to_owner" => Ok(Self::FullToOwner),
            "full_to_management" => Ok(Self::FullToManagement),
            other => Err(ValidationError::UnknownRoutingType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SplitPayout => "split_payout",
            Self::FullToOwner => "full_to_owner",
            Self::FullToManagement => "full_to_management",
        }
    }
}

/// Percentage/routing-type invariant shared by rule writes and merged
/// resolutions. `SplitPayout` requires the two sides to sum to exactly 100;
/// the full-to-one-side types require the other side to be zero.
pub fn check_percentage_split(
    routing_type: RoutingType,
    owner_pct: Decimal,
    management_pct: Decimal,
) -> Result<(), ValidationError> {
    check_percentage_range("owner_pct", owner_pct)?;
    check_percentage_range("management_pct", management_pct)?;

    let consistent = match routing_type {
        RoutingType::SplitPayout => owner_pct + management_pct == Decimal::ONE_HUNDRED,
        RoutingType::FullToOwner => management_pct == Decimal::ZERO,
        RoutingType::FullToManagement => owner_pct == Decimal::ZERO,
    };

    if consistent {
        Ok(())
    } else {
        Err(ValidationError::InvalidPercentageSplit { routing_type, owner_pct, management_pct })
    }
}

pub fn check_percentage_range(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::PercentageOutOfRange { field, value });
    }
    Ok(())
}

/// Channel-level default routing rule. One active rule per channel; edits
/// bump `version` and never rewrite history (resolutions are audited with
/// the values that were in force).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformRule {
    pub id: PlatformRuleId,
    pub channel: ChannelId,
    pub display_name: String,
    pub owner_pct: Decimal,
    pub management_pct: Decimal,
    pub routing_type: RoutingType,
    pub payment_method: Option<String>,
    pub platform_fee_pct: Decimal,
    pub supports_split_payout: bool,
    pub notes: Option<String>,
    pub active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied shape for `RuleStore::upsert_platform_rule`. `id == None`
/// creates; otherwise `expected_version` must match the stored rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformRuleDraft {
    pub id: Option<PlatformRuleId>,
    pub expected_version: Option<i64>,
    pub channel: ChannelId,
    pub display_name: String,
    pub owner_pct: Decimal,
    pub management_pct: Decimal,
    pub routing_type: RoutingType,
    pub payment_method: Option<String>,
    pub platform_fee_pct: Decimal,
    pub supports_split_payout: bool,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{check_percentage_split, ChannelId, RoutingType};
    use crate::errors::ValidationError;

    #[test]
    fn parses_known_routing_types() {
        assert_eq!(RoutingType::parse("split_payout").unwrap(), RoutingType::SplitPayout);
        assert_eq!(RoutingType::parse(" Full_To_Owner ").unwrap(), RoutingType::FullToOwner);
        assert_eq!(
            RoutingType::parse("full_to_management").unwrap(),
            RoutingType::FullToManagement
        );
    }

    #[test]
    fn rejects_unknown_routing_type() {
        let error = RoutingType::parse("round_robin").expect_err("should not parse");
        assert_eq!(error, ValidationError::UnknownRoutingType("round_robin".to_string()));
    }

    #[test]
    fn split_payout_requires_sum_of_one_hundred() {
        assert!(check_percentage_split(
            RoutingType::SplitPayout,
            Decimal::new(70, 0),
            Decimal::new(30, 0),
        )
        .is_ok());

        let error = check_percentage_split(
            RoutingType::SplitPayout,
            Decimal::new(70, 0),
            Decimal::new(40, 0),
        )
        .expect_err("110 should fail");
        assert!(matches!(error, ValidationError::InvalidPercentageSplit { .. }));
    }

    #[test]
    fn full_to_owner_requires_zero_management_side() {
        assert!(check_percentage_split(
            RoutingType::FullToOwner,
            Decimal::ONE_HUNDRED,
            Decimal::ZERO,
        )
        .is_ok());

        let error =
            check_percentage_split(RoutingType::FullToOwner, Decimal::ONE_HUNDRED, Decimal::ONE)
                .expect_err("non-zero management side should fail");
        assert!(matches!(error, ValidationError::InvalidPercentageSplit { .. }));
    }

    #[test]
    fn percentages_outside_range_are_rejected() {
        let error = check_percentage_split(
            RoutingType::SplitPayout,
            Decimal::new(150, 0),
            Decimal::new(-50, 0),
        )
        .expect_err("out of range should fail");
        assert!(matches!(error, ValidationError::PercentageOutOfRange { field: "owner_pct", .. }));
    }

    #[test]
    fn channel_ids_normalize_case_and_whitespace() {
        assert_eq!(ChannelId::new("  AirBnB "), ChannelId("airbnb".to_string()));
    }
}
