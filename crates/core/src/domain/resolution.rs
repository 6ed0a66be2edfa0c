use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::overrides::{BookingId, PropertyRuleOverride};
use crate::domain::rule::{ChannelId, PlatformRule, PlatformRuleId, RoutingType};

/// Override tier, broadest to most specific.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTier {
    Platform,
    Property,
    Booking,
}

/// Which tier supplied each effective field of a resolution. The platform
/// fee has no override tier, so its provenance is always `Platform`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub owner_pct: RoutingTier,
    pub management_pct: RoutingTier,
    pub routing_type: RoutingTier,
    pub platform_fee_pct: RoutingTier,
}

impl FieldProvenance {
    pub fn platform_baseline() -> Self {
        Self {
            owner_pct: RoutingTier::Platform,
            management_pct: RoutingTier::Platform,
            routing_type: RoutingTier::Platform,
            platform_fee_pct: RoutingTier::Platform,
        }
    }
}

/// Monetary outcome of a resolution, in the currency's minor unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    pub owner_amount: Decimal,
    pub management_amount: Decimal,
    pub platform_fee_amount: Decimal,
}

impl PayoutSplit {
    pub fn total(&self) -> Decimal {
        self.owner_amount + self.management_amount + self.platform_fee_amount
    }
}

/// Fully merged result of applying all applicable override tiers to the
/// platform baseline, plus the computed split. Deliberately carries no
/// timestamps or generated ids: identical inputs yield identical values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRouting {
    pub booking_id: BookingId,
    pub channel: ChannelId,
    pub platform_rule_id: PlatformRuleId,
    pub owner_pct: Decimal,
    pub management_pct: Decimal,
    pub routing_type: RoutingType,
    pub platform_fee_pct: Decimal,
    pub net_payout: Decimal,
    pub split: PayoutSplit,
    pub provenance: FieldProvenance,
}

/// The rules gathered for one resolution: the channel's platform rule and,
/// when present, the property's override of it. Gathering does not resolve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleCandidates {
    pub platform: PlatformRule,
    pub property_override: Option<PropertyRuleOverride>,
}
