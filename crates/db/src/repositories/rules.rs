use sqlx::Row;

use payrail_core::domain::overrides::{PropertyId, PropertyOverrideId, PropertyRuleOverride};
use payrail_core::domain::rule::{ChannelId, PlatformRule, PlatformRuleId};
use payrail_core::errors::RepositoryError;
use payrail_core::repository::RuleRepository;

use super::{db_error, parse_datetime, parse_decimal, parse_routing_type};
use crate::DbPool;

pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const RULE_COLUMNS: &str = "id, channel, display_name, owner_pct_text, management_pct_text,
    routing_type, payment_method, platform_fee_pct_text, supports_split_payout, notes,
    active, version, created_at, updated_at";

const OVERRIDE_COLUMNS: &str = "id, property_id, platform_rule_id, owner_pct_text,
    management_pct_text, routing_type, special_instructions, active, version,
    created_at, updated_at";

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<PlatformRule, RepositoryError> {
    let id: String = row.try_get("id").map_err(db_error)?;
    let channel: String = row.try_get("channel").map_err(db_error)?;
    let display_name: String = row.try_get("display_name").map_err(db_error)?;
    let owner_pct: String = row.try_get("owner_pct_text").map_err(db_error)?;
    let management_pct: String = row.try_get("management_pct_text").map_err(db_error)?;
    let routing_type: String = row.try_get("routing_type").map_err(db_error)?;
    let payment_method: Option<String> = row.try_get("payment_method").map_err(db_error)?;
    let platform_fee_pct: String = row.try_get("platform_fee_pct_text").map_err(db_error)?;
    let supports_split_payout: i64 = row.try_get("supports_split_payout").map_err(db_error)?;
    let notes: Option<String> = row.try_get("notes").map_err(db_error)?;
    let active: i64 = row.try_get("active").map_err(db_error)?;
    let version: i64 = row.try_get("version").map_err(db_error)?;
    let created_at: String = row.try_get("created_at").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(PlatformRule {
        id: PlatformRuleId(id),
        channel: ChannelId(channel),
        display_name,
        owner_pct: parse_decimal("owner_pct", &owner_pct)?,
        management_pct: parse_decimal("management_pct", &management_pct)?,
        routing_type: parse_routing_type(&routing_type)?,
        payment_method,
        platform_fee_pct: parse_decimal("platform_fee_pct", &platform_fee_pct)?,
        supports_split_payout: supports_split_payout != 0,
        notes,
        active: active != 0,
        version,
        created_at: parse_datetime("created_at", &created_at)?,
        updated_at: parse_datetime("updated_at", &updated_at)?,
    })
}

fn row_to_override(row: &sqlx::sqlite::SqliteRow) -> Result<PropertyRuleOverride, RepositoryError> {
    let id: String = row.try_get("id").map_err(db_error)?;
    let property_id: String = row.try_get("property_id").map_err(db_error)?;
    let platform_rule_id: String = row.try_get("platform_rule_id").map_err(db_error)?;
    let owner_pct: Option<String> = row.try_get("owner_pct_text").map_err(db_error)?;
    let management_pct: Option<String> = row.try_get("management_pct_text").map_err(db_error)?;
    let routing_type: Option<String> = row.try_get("routing_type").map_err(db_error)?;
    let special_instructions: Option<String> =
        row.try_get("special_instructions").map_err(db_error)?;
    let active: i64 = row.try_get("active").map_err(db_error)?;
    let version: i64 = row.try_get("version").map_err(db_error)?;
    let created_at: String = row.try_get("created_at").map_err(db_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(db_error)?;

    Ok(PropertyRuleOverride {
        id: PropertyOverrideId(id),
        property_id: PropertyId(property_id),
        platform_rule_id: PlatformRuleId(platform_rule_id),
        owner_pct: owner_pct.map(|raw| parse_decimal("owner_pct", &raw)).transpose()?,
        management_pct: management_pct
            .map(|raw| parse_decimal("management_pct", &raw))
            .transpose()?,
        routing_type: routing_type.map(|raw| parse_routing_type(&raw)).transpose()?,
        special_instructions,
        active: active != 0,
        version,
        created_at: parse_datetime("created_at", &created_at)?,
        updated_at: parse_datetime("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn find_rule(
        &self,
        id: &PlatformRuleId,
    ) -> Result<Option<PlatformRule>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM platform_rule WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_rule(row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_rule_for_channel(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<PlatformRule>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM platform_rule WHERE channel = ? AND active = 1"
        ))
        .bind(&channel.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_rule(row)?)),
            None => Ok(None),
        }
    }

    async fn insert_rule(&self, rule: PlatformRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO platform_rule (id, channel, display_name, owner_pct_text,
                 management_pct_text, routing_type, payment_method, platform_fee_pct_text,
                 supports_split_payout, notes, active, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.id.0)
        .bind(&rule.channel.0)
        .bind(&rule.display_name)
        .bind(rule.owner_pct.to_string())
        .bind(rule.management_pct.to_string())
        .bind(rule.routing_type.as_str())
        .bind(&rule.payment_method)
        .bind(rule.platform_fee_pct.to_string())
        .bind(i64::from(rule.supports_split_payout))
        .bind(&rule.notes)
        .bind(i64::from(rule.active))
        .bind(rule.version)
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_rule(
        &self,
        rule: PlatformRule,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE platform_rule
             SET channel = ?, display_name = ?, owner_pct_text = ?, management_pct_text = ?,
                 routing_type = ?, payment_method = ?, platform_fee_pct_text = ?,
                 supports_split_payout = ?, notes = ?, active = ?, version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&rule.channel.0)
        .bind(&rule.display_name)
        .bind(rule.owner_pct.to_string())
        .bind(rule.management_pct.to_string())
        .bind(rule.routing_type.as_str())
        .bind(&rule.payment_method)
        .bind(rule.platform_fee_pct.to_string())
        .bind(i64::from(rule.supports_split_payout))
        .bind(&rule.notes)
        .bind(i64::from(rule.active))
        .bind(rule.version)
        .bind(rule.updated_at.to_rfc3339())
        .bind(&rule.id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            let found: Option<i64> =
                sqlx::query("SELECT version FROM platform_rule WHERE id = ?")
                    .bind(&rule.id.0)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(|row| row.try_get("version"))
                    .transpose()
                    .map_err(db_error)?;

            return match found {
                Some(found) => {
                    Err(RepositoryError::StaleVersion { expected: expected_version, found })
                }
                None => Err(RepositoryError::Storage(format!(
                    "platform rule `{}` not found",
                    rule.id.0
                ))),
            };
        }

        Ok(())
    }

    async fn find_override(
        &self,
        id: &PropertyOverrideId,
    ) -> Result<Option<PropertyRuleOverride>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM property_rule_override WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_override(row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_override(
        &self,
        property_id: &PropertyId,
        platform_rule_id: &PlatformRuleId,
    ) -> Result<Option<PropertyRuleOverride>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM property_rule_override
             WHERE property_id = ? AND platform_rule_id = ? AND active = 1"
        ))
        .bind(&property_id.0)
        .bind(&platform_rule_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(ref row) => Ok(Some(row_to_override(row)?)),
            None => Ok(None),
        }
    }

    async fn insert_override(&self, value: PropertyRuleOverride) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO property_rule_override (id, property_id, platform_rule_id,
                 owner_pct_text, management_pct_text, routing_type, special_instructions,
                 active, version, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&value.id.0)
        .bind(&value.property_id.0)
        .bind(&value.platform_rule_id.0)
        .bind(value.owner_pct.map(|pct| pct.to_string()))
        .bind(value.management_pct.map(|pct| pct.to_string()))
        .bind(value.routing_type.map(|rt| rt.as_str()))
        .bind(&value.special_instructions)
        .bind(i64::from(value.active))
        .bind(value.version)
        .bind(value.created_at.to_rfc3339())
        .bind(value.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_override(
        &self,
        value: PropertyRuleOverride,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE property_rule_override
             SET property_id = ?, platform_rule_id = ?, owner_pct_text = ?,
                 management_pct_text = ?, routing_type = ?, special_instructions = ?,
                 active = ?, version = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&value.property_id.0)
        .bind(&value.platform_rule_id.0)
        .bind(value.owner_pct.map(|pct| pct.to_string()))
        .bind(value.management_pct.map(|pct| pct.to_string()))
        .bind(value.routing_type.map(|rt| rt.as_str()))
        .bind(&value.special_instructions)
        .bind(i64::from(value.active))
        .bind(value.version)
        .bind(value.updated_at.to_rfc3339())
        .bind(&value.id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            let found: Option<i64> =
                sqlx::query("SELECT version FROM property_rule_override WHERE id = ?")
                    .bind(&value.id.0)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error)?
                    .map(|row| row.try_get("version"))
                    .transpose()
                    .map_err(db_error)?;

            return match found {
                Some(found) => {
                    Err(RepositoryError::StaleVersion { expected: expected_version, found })
                }
                None => Err(RepositoryError::Storage(format!(
                    "property override `{}` not found",
                    value.id.0
                ))),
            };
        }

        Ok(())
    }

    async fn list_active_overrides_for_rule(
        &self,
        platform_rule_id: &PlatformRuleId,
    ) -> Result<Vec<PropertyRuleOverride>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM property_rule_override
             WHERE platform_rule_id = ? AND active = 1
             ORDER BY id ASC"
        ))
        .bind(&platform_rule_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_override).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use payrail_core::domain::overrides::{PropertyId, PropertyOverrideId, PropertyRuleOverride};
    use payrail_core::domain::rule::{ChannelId, PlatformRule, PlatformRuleId, RoutingType};
    use payrail_core::errors::RepositoryError;
    use payrail_core::repository::RuleRepository;

    use super::SqlRuleRepository;
    use crate::{connect, migrations, PoolSettings};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect(
            "sqlite::memory:",
            PoolSettings { max_connections: 1, acquire_timeout_secs: 30 },
        )
        .await
        .expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_rule(id: &str, channel: &str) -> PlatformRule {
        let now = Utc::now();
        PlatformRule {
            id: PlatformRuleId(id.to_string()),
            channel: ChannelId::new(channel),
            display_name: channel.to_string(),
            owner_pct: Decimal::new(705, 1), // 70.5
            management_pct: Decimal::new(295, 1),
            routing_type: RoutingType::SplitPayout,
            payment_method: Some("bank_transfer".to_string()),
            platform_fee_pct: Decimal::new(3, 0),
            supports_split_payout: true,
            notes: Some("standard contract".to_string()),
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_override(id: &str, rule_id: &str) -> PropertyRuleOverride {
        let now = Utc::now();
        PropertyRuleOverride {
            id: PropertyOverrideId(id.to_string()),
            property_id: PropertyId("prop-17".to_string()),
            platform_rule_id: PlatformRuleId(rule_id.to_string()),
            owner_pct: Some(Decimal::new(80, 0)),
            management_pct: None,
            routing_type: None,
            special_instructions: Some("wire owner directly".to_string()),
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn rule_round_trips_through_text_encodings() {
        let pool = setup().await;
        let repo = SqlRuleRepository::new(pool);
        let rule = sample_rule("rule-1", "airbnb");

        repo.insert_rule(rule.clone()).await.expect("insert");
        let found = repo
            .find_rule(&PlatformRuleId("rule-1".to_string()))
            .await
            .expect("find")
            .expect("exists");

        assert_eq!(found.owner_pct, Decimal::new(705, 1));
        assert_eq!(found.management_pct, Decimal::new(295, 1));
        assert_eq!(found.routing_type, RoutingType::SplitPayout);
        assert_eq!(found.payment_method.as_deref(), Some("bank_transfer"));
        assert!(found.supports_split_payout);
        assert_eq!(found.version, 1);
    }

    #[tokio::test]
    async fn channel_lookup_skips_deactivated_rules() {
        let pool = setup().await;
        let repo = SqlRuleRepository::new(pool);

        let mut rule = sample_rule("rule-1", "airbnb");
        repo.insert_rule(rule.clone()).await.expect("insert");

        rule.active = false;
        rule.version = 2;
        repo.update_rule(rule, 1).await.expect("deactivate");

        let found = repo
            .find_active_rule_for_channel(&ChannelId::new("airbnb"))
            .await
            .expect("lookup");
        assert!(found.is_none());

        // The deactivated channel slot is free for a successor rule.
        repo.insert_rule(sample_rule("rule-2", "airbnb")).await.expect("insert successor");
        let found = repo
            .find_active_rule_for_channel(&ChannelId::new("airbnb"))
            .await
            .expect("lookup")
            .expect("successor");
        assert_eq!(found.id.0, "rule-2");
    }

    #[tokio::test]
    async fn stale_update_is_rejected_with_found_version() {
        let pool = setup().await;
        let repo = SqlRuleRepository::new(pool);
        repo.insert_rule(sample_rule("rule-1", "airbnb")).await.expect("insert");

        let mut edit = sample_rule("rule-1", "airbnb");
        edit.version = 2;
        repo.update_rule(edit.clone(), 1).await.expect("first edit");

        let error = repo.update_rule(edit, 1).await.expect_err("stale second edit");
        assert!(matches!(error, RepositoryError::StaleVersion { expected: 1, found: 2 }));
    }

    #[tokio::test]
    async fn partial_override_round_trips_null_fields() {
        let pool = setup().await;
        let repo = SqlRuleRepository::new(pool);
        repo.insert_rule(sample_rule("rule-1", "airbnb")).await.expect("insert rule");
        repo.insert_override(sample_override("po-1", "rule-1")).await.expect("insert override");

        let found = repo
            .find_active_override(
                &PropertyId("prop-17".to_string()),
                &PlatformRuleId("rule-1".to_string()),
            )
            .await
            .expect("find")
            .expect("exists");

        assert_eq!(found.owner_pct, Some(Decimal::new(80, 0)));
        assert_eq!(found.management_pct, None);
        assert_eq!(found.routing_type, None);
        assert_eq!(found.special_instructions.as_deref(), Some("wire owner directly"));
    }

    #[tokio::test]
    async fn active_pair_uniqueness_is_enforced_by_the_schema() {
        let pool = setup().await;
        let repo = SqlRuleRepository::new(pool);
        repo.insert_rule(sample_rule("rule-1", "airbnb")).await.expect("insert rule");
        repo.insert_override(sample_override("po-1", "rule-1")).await.expect("first");

        let error = repo
            .insert_override(sample_override("po-2", "rule-1"))
            .await
            .expect_err("duplicate active pair");
        assert!(matches!(error, RepositoryError::Storage(_)));
    }

    #[tokio::test]
    async fn listing_overrides_for_a_rule_filters_inactive_ones() {
        let pool = setup().await;
        let repo = SqlRuleRepository::new(pool);
        repo.insert_rule(sample_rule("rule-1", "airbnb")).await.expect("insert rule");

        let mut first = sample_override("po-1", "rule-1");
        repo.insert_override(first.clone()).await.expect("insert first");

        first.active = false;
        first.version = 2;
        repo.update_override(first, 1).await.expect("deactivate first");

        let mut second = sample_override("po-2", "rule-1");
        second.property_id = PropertyId("prop-18".to_string());
        repo.insert_override(second).await.expect("insert second");

        let active = repo
            .list_active_overrides_for_rule(&PlatformRuleId("rule-1".to_string()))
            .await
            .expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.0, "po-2");
    }
}
