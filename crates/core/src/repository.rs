use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::overrides::{
    BookingId, BookingRoutingOverride, PropertyId, PropertyOverrideId, PropertyRuleOverride,
};
use crate::domain::rule::{ChannelId, PlatformRule, PlatformRuleId};
use crate::errors::RepositoryError;

/// Storage port for platform rules and property overrides. Updates are
/// compare-and-swap on `version`; a write based on a stale read surfaces
/// `RepositoryError::StaleVersion` instead of silently overwriting.
#[async_trait::async_trait]
pub trait RuleRepository: Send + Sync {
    async fn find_rule(&self, id: &PlatformRuleId)
        -> Result<Option<PlatformRule>, RepositoryError>;

    async fn find_active_rule_for_channel(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<PlatformRule>, RepositoryError>;

    async fn insert_rule(&self, rule: PlatformRule) -> Result<(), RepositoryError>;

    async fn update_rule(
        &self,
        rule: PlatformRule,
        expected_version: i64,
    ) -> Result<(), RepositoryError>;

    async fn find_override(
        &self,
        id: &PropertyOverrideId,
    ) -> Result<Option<PropertyRuleOverride>, RepositoryError>;

    async fn find_active_override(
        &self,
        property_id: &PropertyId,
        platform_rule_id: &PlatformRuleId,
    ) -> Result<Option<PropertyRuleOverride>, RepositoryError>;

    async fn insert_override(&self, value: PropertyRuleOverride) -> Result<(), RepositoryError>;

    async fn update_override(
        &self,
        value: PropertyRuleOverride,
        expected_version: i64,
    ) -> Result<(), RepositoryError>;

    async fn list_active_overrides_for_rule(
        &self,
        platform_rule_id: &PlatformRuleId,
    ) -> Result<Vec<PropertyRuleOverride>, RepositoryError>;
}

/// Storage port for booking-level overrides. A new override supersedes the
/// prior one atomically; superseded rows are retained, never deleted.
#[async_trait::async_trait]
pub trait BookingOverrideRepository: Send + Sync {
    async fn find_current(
        &self,
        booking_id: &BookingId,
    ) -> Result<Option<BookingRoutingOverride>, RepositoryError>;

    /// Marks the current override (if any) superseded and stores the new
    /// one, returning the prior as it stood before being superseded.
    async fn supersede_and_save(
        &self,
        value: BookingRoutingOverride,
    ) -> Result<Option<BookingRoutingOverride>, RepositoryError>;

    async fn list_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingRoutingOverride>, RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<HashMap<String, PlatformRule>>,
    overrides: RwLock<HashMap<String, PropertyRuleOverride>>,
}

#[async_trait::async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn find_rule(
        &self,
        id: &PlatformRuleId,
    ) -> Result<Option<PlatformRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.get(&id.0).cloned())
    }

    async fn find_active_rule_for_channel(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<PlatformRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.values().find(|rule| rule.active && rule.channel == *channel).cloned())
    }

    async fn insert_rule(&self, rule: PlatformRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.id.0.clone(), rule);
        Ok(())
    }

    async fn update_rule(
        &self,
        rule: PlatformRule,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        let Some(existing) = rules.get(&rule.id.0) else {
            return Err(RepositoryError::Storage(format!(
                "platform rule `{}` not found",
                rule.id.0
            )));
        };
        if existing.version != expected_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_version,
                found: existing.version,
            });
        }
        rules.insert(rule.id.0.clone(), rule);
        Ok(())
    }

    async fn find_override(
        &self,
        id: &PropertyOverrideId,
    ) -> Result<Option<PropertyRuleOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides.get(&id.0).cloned())
    }

    async fn find_active_override(
        &self,
        property_id: &PropertyId,
        platform_rule_id: &PlatformRuleId,
    ) -> Result<Option<PropertyRuleOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .values()
            .find(|value| {
                value.active
                    && value.property_id == *property_id
                    && value.platform_rule_id == *platform_rule_id
            })
            .cloned())
    }

    async fn insert_override(&self, value: PropertyRuleOverride) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write().await;
        overrides.insert(value.id.0.clone(), value);
        Ok(())
    }

    async fn update_override(
        &self,
        value: PropertyRuleOverride,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write().await;
        let Some(existing) = overrides.get(&value.id.0) else {
            return Err(RepositoryError::Storage(format!(
                "property override `{}` not found",
                value.id.0
            )));
        };
        if existing.version != expected_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_version,
                found: existing.version,
            });
        }
        overrides.insert(value.id.0.clone(), value);
        Ok(())
    }

    async fn list_active_overrides_for_rule(
        &self,
        platform_rule_id: &PlatformRuleId,
    ) -> Result<Vec<PropertyRuleOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        let mut found: Vec<PropertyRuleOverride> = overrides
            .values()
            .filter(|value| value.active && value.platform_rule_id == *platform_rule_id)
            .cloned()
            .collect();
        found.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryBookingOverrideRepository {
    overrides: RwLock<Vec<BookingRoutingOverride>>,
}

#[async_trait::async_trait]
impl BookingOverrideRepository for InMemoryBookingOverrideRepository {
    async fn find_current(
        &self,
        booking_id: &BookingId,
    ) -> Result<Option<BookingRoutingOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .iter()
            .find(|value| value.booking_id == *booking_id && value.is_current())
            .cloned())
    }

    async fn supersede_and_save(
        &self,
        value: BookingRoutingOverride,
    ) -> Result<Option<BookingRoutingOverride>, RepositoryError> {
        let mut overrides = self.overrides.write().await;
        let prior = overrides
            .iter()
            .find(|existing| existing.booking_id == value.booking_id && existing.is_current())
            .cloned();
        if let Some(existing) = overrides
            .iter_mut()
            .find(|existing| existing.booking_id == value.booking_id && existing.is_current())
        {
            existing.superseded_at = Some(value.created_at);
        }
        overrides.push(value);
        Ok(prior)
    }

    async fn list_for_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingRoutingOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides.iter().filter(|value| value.booking_id == *booking_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        BookingOverrideRepository, InMemoryBookingOverrideRepository, InMemoryRuleRepository,
        RuleRepository,
    };
    use crate::domain::overrides::{BookingId, BookingOverrideId, BookingRoutingOverride};
    use crate::domain::rule::{ChannelId, PlatformRule, PlatformRuleId, RoutingType};
    use crate::errors::RepositoryError;

    fn sample_rule(id: &str, channel: &str) -> PlatformRule {
        let now = Utc::now();
        PlatformRule {
            id: PlatformRuleId(id.to_string()),
            channel: ChannelId::new(channel),
            display_name: channel.to_string(),
            owner_pct: Decimal::new(70, 0),
            management_pct: Decimal::new(30, 0),
            routing_type: RoutingType::SplitPayout,
            payment_method: None,
            platform_fee_pct: Decimal::new(3, 0),
            supports_split_payout: true,
            notes: None,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_booking_override(booking_id: &str, seq: u32) -> BookingRoutingOverride {
        BookingRoutingOverride {
            id: BookingOverrideId(format!("bo-{booking_id}-{seq}")),
            booking_id: BookingId(booking_id.to_string()),
            owner_pct: Decimal::new(60, 0),
            management_pct: Decimal::new(40, 0),
            routing_type: RoutingType::SplitPayout,
            justification: "negotiated exception".to_string(),
            superseded_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stale_rule_update_is_rejected() {
        let repo = InMemoryRuleRepository::default();
        repo.insert_rule(sample_rule("rule-1", "airbnb")).await.expect("insert");

        let mut edited = sample_rule("rule-1", "airbnb");
        edited.version = 2;
        repo.update_rule(edited.clone(), 1).await.expect("first writer wins");

        let error = repo.update_rule(edited, 1).await.expect_err("second writer is stale");
        assert!(matches!(error, RepositoryError::StaleVersion { expected: 1, found: 2 }));
    }

    #[tokio::test]
    async fn channel_lookup_ignores_inactive_rules() {
        let repo = InMemoryRuleRepository::default();
        let mut retired = sample_rule("rule-old", "airbnb");
        retired.active = false;
        repo.insert_rule(retired).await.expect("insert retired");
        repo.insert_rule(sample_rule("rule-new", "airbnb")).await.expect("insert active");

        let found = repo
            .find_active_rule_for_channel(&ChannelId::new("airbnb"))
            .await
            .expect("lookup")
            .expect("active rule");
        assert_eq!(found.id.0, "rule-new");
    }

    #[tokio::test]
    async fn supersede_keeps_prior_booking_override_queryable() {
        let repo = InMemoryBookingOverrideRepository::default();
        let booking = BookingId("bk-1".to_string());

        let prior = repo
            .supersede_and_save(sample_booking_override("bk-1", 1))
            .await
            .expect("first save");
        assert!(prior.is_none());

        let prior = repo
            .supersede_and_save(sample_booking_override("bk-1", 2))
            .await
            .expect("second save")
            .expect("prior returned");
        assert_eq!(prior.id.0, "bo-bk-1-1");
        assert!(prior.is_current());

        let current = repo.find_current(&booking).await.expect("find").expect("current");
        assert_eq!(current.id.0, "bo-bk-1-2");

        let all = repo.list_for_booking(&booking).await.expect("list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().filter(|value| value.is_current()).count() == 1);
    }
}
