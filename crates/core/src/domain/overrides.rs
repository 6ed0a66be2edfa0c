use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rule::{
    check_percentage_range, check_percentage_split, PlatformRuleId, RoutingType,
};
use crate::errors::ValidationError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyOverrideId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingOverrideId(pub String);

/// Property-level override of a platform rule. Every field is independently
/// optional; `None` inherits from the platform baseline at resolution time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyRuleOverride {
    pub id: PropertyOverrideId,
    pub property_id: PropertyId,
    pub platform_rule_id: PlatformRuleId,
    pub owner_pct: Option<Decimal>,
    pub management_pct: Option<Decimal>,
    pub routing_type: Option<RoutingType>,
    pub special_instructions: Option<String>,
    pub active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PropertyRuleOverride {
    /// Write-time check. When both percentages are present they must satisfy
    /// the split invariant against the override's own routing type, or sum
    /// to 100 when the routing type is inherited. Partial combinations are
    /// legal here; the merge in the resolution engine re-validates the final
    /// result fail-closed.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        if let Some(owner_pct) = self.owner_pct {
            check_percentage_range("owner_pct", owner_pct)?;
        }
        if let Some(management_pct) = self.management_pct {
            check_percentage_range("management_pct", management_pct)?;
        }

        if let (Some(owner_pct), Some(management_pct)) = (self.owner_pct, self.management_pct) {
            let routing_type = self.routing_type.unwrap_or(RoutingType::SplitPayout);
            check_percentage_split(routing_type, owner_pct, management_pct)?;
        }

        Ok(())
    }

    pub fn is_noop(&self) -> bool {
        self.owner_pct.is_none() && self.management_pct.is_none() && self.routing_type.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyOverrideDraft {
    pub id: Option<PropertyOverrideId>,
    pub expected_version: Option<i64>,
    pub property_id: PropertyId,
    pub platform_rule_id: PlatformRuleId,
    pub owner_pct: Option<Decimal>,
    pub management_pct: Option<Decimal>,
    pub routing_type: Option<RoutingType>,
    pub special_instructions: Option<String>,
}

/// Manual exception for one booking. All three routed fields are required
/// together so the most specific tier never produces a mixed-tier result,
/// and the justification makes the exception explainable after the fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingRoutingOverride {
    pub id: BookingOverrideId,
    pub booking_id: BookingId,
    pub owner_pct: Decimal,
    pub management_pct: Decimal,
    pub routing_type: RoutingType,
    pub justification: String,
    pub superseded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BookingRoutingOverride {
    pub fn is_current(&self) -> bool {
        self.superseded_at.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookingOverrideDraft {
    pub booking_id: BookingId,
    pub owner_pct: Decimal,
    pub management_pct: Decimal,
    pub routing_type: RoutingType,
    pub justification: String,
}

impl BookingOverrideDraft {
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        if self.justification.trim().is_empty() {
            return Err(ValidationError::EmptyJustification);
        }
        check_percentage_split(self.routing_type, self.owner_pct, self.management_pct)
    }
}
