use sqlx::Row;

use payrail_core::audit::{AuditAction, AuditEntityKind, AuditEntry, AuditStore, HistoryPage};
use payrail_core::errors::RepositoryError;

use super::{db_error, decode_error, parse_datetime};
use crate::DbPool;

/// Append-only audit persistence. The implementation issues INSERT and
/// SELECT statements only; rows are never updated or deleted.
pub struct SqlAuditStore {
    pool: DbPool,
}

impl SqlAuditStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "entry_id, action, entity_kind, entity_id, before_json, after_json,
    actor, reason, occurred_at, prev_hash, entry_hash";

fn parse_action(raw: &str) -> Result<AuditAction, RepositoryError> {
    match raw {
        "rule_created" => Ok(AuditAction::RuleCreated),
        "rule_updated" => Ok(AuditAction::RuleUpdated),
        "override_applied" => Ok(AuditAction::OverrideApplied),
        "booking_resolved" => Ok(AuditAction::BookingResolved),
        other => Err(decode_error(format!("unknown audit action `{other}`"))),
    }
}

fn parse_entity_kind(raw: &str) -> Result<AuditEntityKind, RepositoryError> {
    match raw {
        "platform_rule" => Ok(AuditEntityKind::PlatformRule),
        "property_override" => Ok(AuditEntityKind::PropertyOverride),
        "booking_override" => Ok(AuditEntityKind::BookingOverride),
        "booking" => Ok(AuditEntityKind::Booking),
        other => Err(decode_error(format!("unknown audit entity kind `{other}`"))),
    }
}

fn parse_snapshot(
    field: &str,
    raw: Option<String>,
) -> Result<Option<serde_json::Value>, RepositoryError> {
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|error| RepositoryError::Decode(format!("{field}: {error}")))
    })
    .transpose()
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let entry_id: String = row.try_get("entry_id").map_err(db_error)?;
    let action: String = row.try_get("action").map_err(db_error)?;
    let entity_kind: String = row.try_get("entity_kind").map_err(db_error)?;
    let entity_id: String = row.try_get("entity_id").map_err(db_error)?;
    let before_json: Option<String> = row.try_get("before_json").map_err(db_error)?;
    let after_json: Option<String> = row.try_get("after_json").map_err(db_error)?;
    let actor: String = row.try_get("actor").map_err(db_error)?;
    let reason: Option<String> = row.try_get("reason").map_err(db_error)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(db_error)?;
    let prev_hash: Option<String> = row.try_get("prev_hash").map_err(db_error)?;
    let entry_hash: String = row.try_get("entry_hash").map_err(db_error)?;

    Ok(AuditEntry {
        entry_id,
        action: parse_action(&action)?,
        entity_kind: parse_entity_kind(&entity_kind)?,
        entity_id,
        before: parse_snapshot("before_json", before_json)?,
        after: parse_snapshot("after_json", after_json)?,
        actor,
        reason,
        occurred_at: parse_datetime("occurred_at", &occurred_at)?,
        prev_hash,
        entry_hash,
    })
}

#[async_trait::async_trait]
impl AuditStore for SqlAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO audit_entry (entry_id, action, entity_kind, entity_id, before_json,
                 after_json, actor, reason, occurred_at, prev_hash, entry_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id)
        .bind(entry.action.as_str())
        .bind(entry.entity_kind.as_str())
        .bind(&entry.entity_id)
        .bind(entry.before.as_ref().map(|value| value.to_string()))
        .bind(entry.after.as_ref().map(|value| value.to_string()))
        .bind(&entry.actor)
        .bind(&entry.reason)
        .bind(entry.occurred_at.to_rfc3339())
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn latest(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<Option<AuditEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM audit_entry
             WHERE entity_kind = ? AND entity_id = ?
             ORDER BY seq DESC LIMIT 1"
        ))
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_entry(row)?)),
            None => Ok(None),
        }
    }

    async fn history(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM audit_entry
             WHERE entity_kind = ? AND entity_id = ?
             ORDER BY seq ASC LIMIT ? OFFSET ?"
        ))
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .bind(i64::from(page.limit))
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use payrail_core::audit::{
        AuditAction, AuditEntityKind, AuditEntry, AuditStore, HistoryPage,
    };

    use super::SqlAuditStore;
    use crate::{connect, migrations, PoolSettings};

    async fn setup() -> SqlAuditStore {
        let pool = connect(
            "sqlite::memory:",
            PoolSettings { max_connections: 1, acquire_timeout_secs: 30 },
        )
        .await
        .expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlAuditStore::new(pool)
    }

    fn entry(actor: &str) -> AuditEntry {
        AuditEntry::new(
            AuditAction::BookingResolved,
            AuditEntityKind::Booking,
            "bk-1",
            actor,
        )
        .with_after(serde_json::json!({"owner_amount": "679.00"}))
        .with_reason("resolution")
    }

    #[tokio::test]
    async fn entries_round_trip_and_keep_write_order() {
        let store = setup().await;
        for n in 0..3 {
            store.append(entry(&format!("actor-{n}"))).await.expect("append");
        }

        let history = store
            .history(AuditEntityKind::Booking, "bk-1", HistoryPage::default())
            .await
            .expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].actor, "actor-0");
        assert_eq!(history[2].actor, "actor-2");
        assert_eq!(history[0].action, AuditAction::BookingResolved);
        assert_eq!(
            history[0].after,
            Some(serde_json::json!({"owner_amount": "679.00"}))
        );
        assert_eq!(history[0].reason.as_deref(), Some("resolution"));
    }

    #[tokio::test]
    async fn latest_is_the_most_recent_append() {
        let store = setup().await;
        store.append(entry("first")).await.expect("append");
        store.append(entry("second")).await.expect("append");

        let head = store
            .latest(AuditEntityKind::Booking, "bk-1")
            .await
            .expect("latest")
            .expect("entry");
        assert_eq!(head.actor, "second");
    }

    #[tokio::test]
    async fn duplicate_entry_ids_are_rejected() {
        let store = setup().await;
        let fixed = entry("actor");
        store.append(fixed.clone()).await.expect("append");
        assert!(store.append(fixed).await.is_err());
    }

    #[tokio::test]
    async fn paging_restarts_where_it_left_off() {
        let store = setup().await;
        for n in 0..5 {
            store.append(entry(&format!("actor-{n}"))).await.expect("append");
        }

        let tail = store
            .history(
                AuditEntityKind::Booking,
                "bk-1",
                HistoryPage { offset: 3, limit: 10 },
            )
            .await
            .expect("page");
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].actor, "actor-3");
    }
}
