use sqlx::Row;

use payrail_core::domain::overrides::{BookingId, BookingOverrideId, BookingRoutingOverride};
use payrail_core::errors::RepositoryError;
use payrail_core::repository::BookingOverrideRepository;

use super::{db_error, parse_datetime, parse_decimal, parse_routing_type};
use crate::DbPool;

pub struct SqlBookingOverrideRepository {
    pool: DbPool,
}

impl SqlBookingOverrideRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "id, booking_id, owner_pct_text, management_pct_text, routing_type,
    justification, superseded_at, created_at";

fn row_to_override(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<BookingRoutingOverride, RepositoryError> {
    let id: String = row.try_get("id").map_err(db_error)?;
    let booking_id: String = row.try_get("booking_id").map_err(db_error)?;
    let owner_pct: String = row.try_get("owner_pct_text").map_err(db_error)?;
    let management_pct: String = row.try_get("management_pct_text").map_err(db_error)?;
    let routing_type: String = row.try_get("routing_type").map_err(db_error)?;
    let justification: String = row.try_get("justification").map_err(db_error)?;
    let superseded_at: Option<String> = row.try_get("superseded_at").map_err(db_error)?;
    let created_at: String = row.try_get("created_at").map_err(db_error)?;

    Ok(BookingRoutingOverride {
        id: BookingOverrideId(id),
        booking_id: BookingId(booking_id),
        owner_pct: parse_decimal("owner_pct", &owner_pct)?,
        management_pct: parse_decimal("management_pct", &management_pct)?,
        routing_type: parse_routing_type(&routing_type)?,
        justification,
        superseded_at: superseded_at
            .map(|raw| parse_datetime("superseded_at", &raw))
            .transpose()?,
        created_at: parse_datetime("created_at", &created_at)?,
    })
}

#[async_trait::async_trait]
impl BookingOverrideRepository for SqlBookingOverrideRepository {
    async fn find_current(
        &self,
        booking_id: &BookingId,
    ) -> Result<Option<BookingRoutingOverride>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM booking_routing_override
             WHERE booking_id = ? AND superseded_at IS NULL"
        ))
        .bind(&booking_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_override(row)?)),
            None => Ok(None),
        }
    }

    async fn supersede_and_save(
        &self,
        value: BookingRoutingOverride,
    ) -> Result<Option<BookingRoutingOverride>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let prior_row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM booking_routing_override
             WHERE booking_id = ? AND superseded_at IS NULL"
        ))
        .bind(&value.booking_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        let prior = match prior_row {
            Some(ref row) => Some(row_to_override(row)?),
            None => None,
        };

        if prior.is_some() {
            sqlx::query(
                "UPDATE booking_routing_override SET superseded_at = ?
                 WHERE booking_id = ? AND superseded_at IS NULL",
            )
            .bind(value.created_at.to_rfc3339())
            .bind(&value.booking_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        sqlx::query(
            "INSERT INTO booking_routing_override (id, booking_id, owner_pct_text,
                 management_pct_text, routing_type, justification, superseded_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&value.id.0)
        .bind(&value.booking_id.0)
        .bind(value.owner_pct.to_string())
        .bind(value.management_pct.to_string())
        .bind(value.routing_type.as_str())
        .bind(&value.justification)
        .bind(value.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(prior)
    }

    async fn list_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingRoutingOverride>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM booking_routing_override
             WHERE booking_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&booking_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_override).collect()
    }
}
