use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use payrail_core::errors::RepositoryError;
use payrail_core::RoutingType;

pub mod audit;
pub mod booking_overrides;
pub mod rules;

pub use audit::SqlAuditStore;
pub use booking_overrides::SqlBookingOverrideRepository;
pub use rules::SqlRuleRepository;

pub(crate) fn db_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(error.to_string())
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    use std::str::FromStr;
    Decimal::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("{field}: {error} (`{raw}`)")))
}

pub(crate) fn parse_datetime(field: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{field}: {error} (`{raw}`)")))
}

pub(crate) fn parse_routing_type(raw: &str) -> Result<RoutingType, RepositoryError> {
    RoutingType::parse(raw).map_err(decode_error)
}
