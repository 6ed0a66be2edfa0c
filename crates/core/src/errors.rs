use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::rule::RoutingType;

/// Pure invariant violations. Caller-facing and non-retryable: the input is
/// wrong and must be corrected before resubmitting.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("owner {owner_pct}% + management {management_pct}% is invalid for {routing_type:?} routing")]
    InvalidPercentageSplit {
        routing_type: RoutingType,
        owner_pct: Decimal,
        management_pct: Decimal,
    },
    #[error("`{field}` is {value}%, outside the 0..=100 range")]
    PercentageOutOfRange { field: &'static str, value: Decimal },
    #[error("unknown routing type `{0}`")]
    UnknownRoutingType(String),
    #[error("merged tiers produce an inconsistent split: owner {owner_pct}% + management {management_pct}% under {routing_type:?} routing")]
    UnresolvableSplit {
        routing_type: RoutingType,
        owner_pct: Decimal,
        management_pct: Decimal,
    },
    #[error("a booking override requires a non-empty justification")]
    EmptyJustification,
    #[error("net payout {0} must not be negative")]
    NegativeNetPayout(Decimal),
}

/// Storage-layer failures surfaced by repository implementations. The core
/// never depends on a concrete driver, so causes arrive as messages.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stale version: expected {expected}, found {found}")]
    StaleVersion { expected: i64, found: i64 },
}

/// Rule store failures: validation, uniqueness conflicts, and optimistic
/// concurrency. `StaleRuleVersion` is the one retryable case, by refetching
/// and reapplying.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no active platform rule for channel `{0}`")]
    UnknownChannel(String),
    #[error("platform rule `{0}` not found")]
    RuleNotFound(String),
    #[error("property override `{0}` not found")]
    OverrideNotFound(String),
    #[error("an active platform rule already exists for channel `{0}`")]
    DuplicateChannelRule(String),
    #[error("an active override already exists for property `{property_id}` on rule `{platform_rule_id}`")]
    PropertyOverrideConflict { property_id: String, platform_rule_id: String },
    #[error("platform rule `{rule_id}` is referenced by {override_count} active property override(s); pass cascade to deactivate them too")]
    RuleInUse { rule_id: String, override_count: usize },
    #[error("stale version for rule `{rule_id}`: expected {expected}, found {found}")]
    StaleRuleVersion { rule_id: String, expected: i64, found: i64 },
    #[error("editing `{0}` requires the version from the caller's read")]
    MissingExpectedVersion(String),
    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),
}

/// Facade-level failures. An operation whose audit entry cannot be persisted
/// after bounded retries is reported failed even when its computation
/// succeeded: an un-audited financial resolution is not a committed one.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("audit write failed after {attempts} attempt(s): {source}")]
    AuditWriteFailed {
        attempts: u32,
        #[source]
        source: RepositoryError,
    },
}

impl RoutingError {
    /// Whether a caller can meaningfully retry without changing input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::StaleRuleVersion { .. })
                | Self::Store(StoreError::Repository(RepositoryError::Storage(_)))
                | Self::AuditWriteFailed { .. }
        )
    }
}
