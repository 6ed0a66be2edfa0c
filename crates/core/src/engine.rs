use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::overrides::{BookingId, BookingRoutingOverride};
use crate::domain::resolution::{
    FieldProvenance, PayoutSplit, ResolvedRouting, RoutingTier, RuleCandidates,
};
use crate::domain::rule::{check_percentage_split, RoutingType};
use crate::errors::ValidationError;

/// Which side absorbs the residual minor unit left by rounding a
/// `SplitPayout`. The default is `Management`; the other side's amount is
/// always `remaining - rounded`, so the split sums exactly to the net payout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingDrift {
    #[default]
    Management,
    Owner,
}

#[derive(Clone, Copy, Debug)]
pub struct ResolutionEngineConfig {
    /// Decimal places of the currency's minor unit.
    pub minor_unit_scale: u32,
    pub rounding_drift: RoundingDrift,
}

impl Default for ResolutionEngineConfig {
    fn default() -> Self {
        Self { minor_unit_scale: 2, rounding_drift: RoundingDrift::Management }
    }
}

#[derive(Clone, Debug)]
pub struct ResolutionRequest<'a> {
    pub booking_id: &'a BookingId,
    pub candidates: &'a RuleCandidates,
    pub booking_override: Option<&'a BookingRoutingOverride>,
    pub net_payout: Decimal,
}

pub trait ResolutionEngine: Send + Sync {
    fn resolve(&self, request: ResolutionRequest<'_>) -> Result<ResolvedRouting, ValidationError>;
}

/// Pure tier merge and split computation. Never touches storage, never
/// retries; identical inputs produce identical output.
#[derive(Clone, Debug, Default)]
pub struct DeterministicResolutionEngine {
    config: ResolutionEngineConfig,
}

impl DeterministicResolutionEngine {
    pub fn new(config: ResolutionEngineConfig) -> Self {
        Self { config }
    }

    fn round_minor(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(
            self.config.minor_unit_scale,
            RoundingStrategy::MidpointNearestEven,
        )
    }
}

impl ResolutionEngine for DeterministicResolutionEngine {
    fn resolve(&self, request: ResolutionRequest<'_>) -> Result<ResolvedRouting, ValidationError> {
        if request.net_payout < Decimal::ZERO {
            return Err(ValidationError::NegativeNetPayout(request.net_payout));
        }

        let platform = &request.candidates.platform;
        let mut owner_pct = platform.owner_pct;
        let mut management_pct = platform.management_pct;
        let mut routing_type = platform.routing_type;
        let platform_fee_pct = platform.platform_fee_pct;
        let mut provenance = FieldProvenance::platform_baseline();

        // Property tier: field-level, only non-null fields replace the
        // baseline.
        if let Some(property) = &request.candidates.property_override {
            if let Some(value) = property.owner_pct {
                owner_pct = value;
                provenance.owner_pct = RoutingTier::Property;
            }
            if let Some(value) = property.management_pct {
                management_pct = value;
                provenance.management_pct = RoutingTier::Property;
            }
            if let Some(value) = property.routing_type {
                routing_type = value;
                provenance.routing_type = RoutingTier::Property;
            }
        }

        // Booking tier: wholesale. The booking-level schema requires all
        // three fields together, so the most specific tier never yields a
        // mixed-tier split.
        if let Some(booking) = request.booking_override {
            owner_pct = booking.owner_pct;
            management_pct = booking.management_pct;
            routing_type = booking.routing_type;
            provenance.owner_pct = RoutingTier::Booking;
            provenance.management_pct = RoutingTier::Booking;
            provenance.routing_type = RoutingTier::Booking;
        }

        // Fail-closed: a merge of individually valid tiers can still be
        // inconsistent (e.g. property owner 80 over platform management 30).
        // Never renormalize.
        check_percentage_split(routing_type, owner_pct, management_pct).map_err(|error| {
            match error {
                ValidationError::InvalidPercentageSplit {
                    routing_type,
                    owner_pct,
                    management_pct,
                } => ValidationError::UnresolvableSplit { routing_type, owner_pct, management_pct },
                other => other,
            }
        })?;

        let platform_fee_amount =
            self.round_minor(request.net_payout * platform_fee_pct / Decimal::ONE_HUNDRED);
        let remaining = request.net_payout - platform_fee_amount;

        let (owner_amount, management_amount) = match routing_type {
            RoutingType::FullToOwner => (remaining, Decimal::ZERO),
            RoutingType::FullToManagement => (Decimal::ZERO, remaining),
            RoutingType::SplitPayout => match self.config.rounding_drift {
                RoundingDrift::Management => {
                    let owner = self.round_minor(remaining * owner_pct / Decimal::ONE_HUNDRED);
                    (owner, remaining - owner)
                }
                RoundingDrift::Owner => {
                    let management =
                        self.round_minor(remaining * management_pct / Decimal::ONE_HUNDRED);
                    (remaining - management, management)
                }
            },
        };

        Ok(ResolvedRouting {
            booking_id: request.booking_id.clone(),
            channel: platform.channel.clone(),
            platform_rule_id: platform.id.clone(),
            owner_pct,
            management_pct,
            routing_type,
            platform_fee_pct,
            net_payout: request.net_payout,
            split: PayoutSplit { owner_amount, management_amount, platform_fee_amount },
            provenance,
        })
    }
}
