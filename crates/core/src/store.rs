use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntityKind, AuditEntry, AuditStore};
use crate::domain::overrides::{
    PropertyId, PropertyOverrideDraft, PropertyOverrideId, PropertyRuleOverride,
};
use crate::domain::resolution::RuleCandidates;
use crate::domain::rule::{
    check_percentage_range, check_percentage_split, ChannelId, PlatformRule, PlatformRuleDraft,
    PlatformRuleId,
};
use crate::errors::{RepositoryError, RoutingError, StoreError};
use crate::recorder::AuditRecorder;
use crate::repository::RuleRepository;

fn snapshot<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Validated CRUD over platform rules and property overrides. Every write
/// lands an audit entry through the recorder before it is reported
/// committed; a write whose audit entry cannot be persisted fails.
pub struct RuleStore<R, A> {
    rules: Arc<R>,
    audit: AuditRecorder<A>,
}

impl<R, A> Clone for RuleStore<R, A> {
    fn clone(&self) -> Self {
        Self { rules: Arc::clone(&self.rules), audit: self.audit.clone() }
    }
}

impl<R, A> RuleStore<R, A>
where
    R: RuleRepository,
    A: AuditStore,
{
    pub fn new(rules: Arc<R>, audit: AuditRecorder<A>) -> Self {
        Self { rules, audit }
    }

    /// Create or edit a platform rule. Creation requires the channel to be
    /// free of an active rule; edits require the version from the caller's
    /// read and never touch already-resolved bookings.
    pub async fn upsert_platform_rule(
        &self,
        draft: PlatformRuleDraft,
        actor: &str,
    ) -> Result<PlatformRule, RoutingError> {
        check_percentage_split(draft.routing_type, draft.owner_pct, draft.management_pct)?;
        check_percentage_range("platform_fee_pct", draft.platform_fee_pct)?;

        match draft.id.clone() {
            None => self.create_platform_rule(draft, actor).await,
            Some(id) => self.update_platform_rule(id, draft, actor).await,
        }
    }

    async fn create_platform_rule(
        &self,
        draft: PlatformRuleDraft,
        actor: &str,
    ) -> Result<PlatformRule, RoutingError> {
        if let Some(existing) = self
            .rules
            .find_active_rule_for_channel(&draft.channel)
            .await
            .map_err(StoreError::Repository)?
        {
            return Err(StoreError::DuplicateChannelRule(existing.channel.0).into());
        }

        let now = Utc::now();
        let rule = PlatformRule {
            id: PlatformRuleId(Uuid::new_v4().to_string()),
            channel: draft.channel,
            display_name: draft.display_name,
            owner_pct: draft.owner_pct,
            management_pct: draft.management_pct,
            routing_type: draft.routing_type,
            payment_method: draft.payment_method,
            platform_fee_pct: draft.platform_fee_pct,
            supports_split_payout: draft.supports_split_payout,
            notes: draft.notes,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        self.rules.insert_rule(rule.clone()).await.map_err(StoreError::Repository)?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::RuleCreated,
                    AuditEntityKind::PlatformRule,
                    rule.id.0.clone(),
                    actor,
                )
                .with_after(snapshot(&rule)),
            )
            .await?;

        info!(
            event_name = "rules.platform_rule_created",
            rule_id = %rule.id.0,
            channel = %rule.channel.0,
            actor,
            "platform rule created"
        );
        Ok(rule)
    }

    async fn update_platform_rule(
        &self,
        id: PlatformRuleId,
        draft: PlatformRuleDraft,
        actor: &str,
    ) -> Result<PlatformRule, RoutingError> {
        let existing = self
            .rules
            .find_rule(&id)
            .await
            .map_err(StoreError::Repository)?
            .ok_or_else(|| StoreError::RuleNotFound(id.0.clone()))?;

        let expected_version = draft
            .expected_version
            .ok_or_else(|| StoreError::MissingExpectedVersion(id.0.clone()))?;

        if draft.channel != existing.channel {
            if let Some(clash) = self
                .rules
                .find_active_rule_for_channel(&draft.channel)
                .await
                .map_err(StoreError::Repository)?
            {
                if clash.id != existing.id {
                    return Err(StoreError::DuplicateChannelRule(clash.channel.0).into());
                }
            }
        }

        let updated = PlatformRule {
            id: existing.id.clone(),
            channel: draft.channel,
            display_name: draft.display_name,
            owner_pct: draft.owner_pct,
            management_pct: draft.management_pct,
            routing_type: draft.routing_type,
            payment_method: draft.payment_method,
            platform_fee_pct: draft.platform_fee_pct,
            supports_split_payout: draft.supports_split_payout,
            notes: draft.notes,
            active: existing.active,
            version: existing.version + 1,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        self.rules
            .update_rule(updated.clone(), expected_version)
            .await
            .map_err(|error| stale_to_store(error, &existing.id.0, expected_version))?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::RuleUpdated,
                    AuditEntityKind::PlatformRule,
                    updated.id.0.clone(),
                    actor,
                )
                .with_before(snapshot(&existing))
                .with_after(snapshot(&updated)),
            )
            .await?;

        info!(
            event_name = "rules.platform_rule_updated",
            rule_id = %updated.id.0,
            version = updated.version,
            actor,
            "platform rule updated"
        );
        Ok(updated)
    }

    /// Create or edit a property-level override. At most one active override
    /// per `(property, platform rule)` pair; an existing one must be edited
    /// through its id, never silently replaced.
    pub async fn upsert_property_override(
        &self,
        draft: PropertyOverrideDraft,
        actor: &str,
    ) -> Result<PropertyRuleOverride, RoutingError> {
        let rule = self
            .rules
            .find_rule(&draft.platform_rule_id)
            .await
            .map_err(StoreError::Repository)?
            .filter(|rule| rule.active)
            .ok_or_else(|| StoreError::RuleNotFound(draft.platform_rule_id.0.clone()))?;

        match draft.id.clone() {
            None => self.create_property_override(rule, draft, actor).await,
            Some(id) => self.update_property_override(id, draft, actor).await,
        }
    }

    async fn create_property_override(
        &self,
        rule: PlatformRule,
        draft: PropertyOverrideDraft,
        actor: &str,
    ) -> Result<PropertyRuleOverride, RoutingError> {
        if self
            .rules
            .find_active_override(&draft.property_id, &rule.id)
            .await
            .map_err(StoreError::Repository)?
            .is_some()
        {
            return Err(StoreError::PropertyOverrideConflict {
                property_id: draft.property_id.0,
                platform_rule_id: rule.id.0,
            }
            .into());
        }

        let now = Utc::now();
        let value = PropertyRuleOverride {
            id: PropertyOverrideId(Uuid::new_v4().to_string()),
            property_id: draft.property_id,
            platform_rule_id: draft.platform_rule_id,
            owner_pct: draft.owner_pct,
            management_pct: draft.management_pct,
            routing_type: draft.routing_type,
            special_instructions: draft.special_instructions,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        value.check_invariants()?;
        if value.is_noop() {
            debug!(
                event_name = "rules.property_override_noop",
                override_id = %value.id.0,
                "property override sets no fields; every field inherits"
            );
        }

        self.rules.insert_override(value.clone()).await.map_err(StoreError::Repository)?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::RuleCreated,
                    AuditEntityKind::PropertyOverride,
                    value.id.0.clone(),
                    actor,
                )
                .with_after(snapshot(&value)),
            )
            .await?;

        info!(
            event_name = "rules.property_override_created",
            override_id = %value.id.0,
            property_id = %value.property_id.0,
            rule_id = %value.platform_rule_id.0,
            actor,
            "property override created"
        );
        Ok(value)
    }

    async fn update_property_override(
        &self,
        id: PropertyOverrideId,
        draft: PropertyOverrideDraft,
        actor: &str,
    ) -> Result<PropertyRuleOverride, RoutingError> {
        let existing = self
            .rules
            .find_override(&id)
            .await
            .map_err(StoreError::Repository)?
            .ok_or_else(|| StoreError::OverrideNotFound(id.0.clone()))?;

        let expected_version = draft
            .expected_version
            .ok_or_else(|| StoreError::MissingExpectedVersion(id.0.clone()))?;

        let updated = PropertyRuleOverride {
            id: existing.id.clone(),
            property_id: draft.property_id,
            platform_rule_id: draft.platform_rule_id,
            owner_pct: draft.owner_pct,
            management_pct: draft.management_pct,
            routing_type: draft.routing_type,
            special_instructions: draft.special_instructions,
            active: existing.active,
            version: existing.version + 1,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        updated.check_invariants()?;

        self.rules
            .update_override(updated.clone(), expected_version)
            .await
            .map_err(|error| stale_to_store(error, &existing.id.0, expected_version))?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::RuleUpdated,
                    AuditEntityKind::PropertyOverride,
                    updated.id.0.clone(),
                    actor,
                )
                .with_before(snapshot(&existing))
                .with_after(snapshot(&updated)),
            )
            .await?;

        info!(
            event_name = "rules.property_override_updated",
            override_id = %updated.id.0,
            version = updated.version,
            actor,
            "property override updated"
        );
        Ok(updated)
    }

    /// Gather the candidates for one resolution: the channel's active rule
    /// and the property's active override of it, if any. Read-only.
    pub async fn effective_candidates(
        &self,
        property_id: &PropertyId,
        channel: &ChannelId,
    ) -> Result<RuleCandidates, StoreError> {
        let platform = self
            .rules
            .find_active_rule_for_channel(channel)
            .await?
            .ok_or_else(|| StoreError::UnknownChannel(channel.0.clone()))?;

        let property_override =
            self.rules.find_active_override(property_id, &platform.id).await?;

        Ok(RuleCandidates { platform, property_override })
    }

    /// Soft-deactivate a rule. Active property overrides block the
    /// deactivation unless the caller explicitly cascades onto them.
    pub async fn deactivate_platform_rule(
        &self,
        id: &PlatformRuleId,
        expected_version: i64,
        cascade: bool,
        actor: &str,
    ) -> Result<PlatformRule, RoutingError> {
        let existing = self
            .rules
            .find_rule(id)
            .await
            .map_err(StoreError::Repository)?
            .ok_or_else(|| StoreError::RuleNotFound(id.0.clone()))?;

        if !existing.active {
            return Ok(existing);
        }

        let referencing = self
            .rules
            .list_active_overrides_for_rule(id)
            .await
            .map_err(StoreError::Repository)?;
        if !referencing.is_empty() && !cascade {
            return Err(StoreError::RuleInUse {
                rule_id: id.0.clone(),
                override_count: referencing.len(),
            }
            .into());
        }

        for value in referencing {
            let mut deactivated = value.clone();
            deactivated.active = false;
            deactivated.version = value.version + 1;
            deactivated.updated_at = Utc::now();

            self.rules
                .update_override(deactivated.clone(), value.version)
                .await
                .map_err(|error| stale_to_store(error, &value.id.0, value.version))?;

            self.audit
                .record(
                    AuditEntry::new(
                        AuditAction::RuleUpdated,
                        AuditEntityKind::PropertyOverride,
                        value.id.0.clone(),
                        actor,
                    )
                    .with_before(snapshot(&value))
                    .with_after(snapshot(&deactivated))
                    .with_reason("cascade deactivation of platform rule"),
                )
                .await?;
        }

        let mut updated = existing.clone();
        updated.active = false;
        updated.version = existing.version + 1;
        updated.updated_at = Utc::now();

        self.rules
            .update_rule(updated.clone(), expected_version)
            .await
            .map_err(|error| stale_to_store(error, &existing.id.0, expected_version))?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::RuleUpdated,
                    AuditEntityKind::PlatformRule,
                    updated.id.0.clone(),
                    actor,
                )
                .with_before(snapshot(&existing))
                .with_after(snapshot(&updated))
                .with_reason("rule deactivated"),
            )
            .await?;

        info!(
            event_name = "rules.platform_rule_deactivated",
            rule_id = %updated.id.0,
            cascade,
            actor,
            "platform rule deactivated"
        );
        Ok(updated)
    }
}

fn stale_to_store(error: RepositoryError, entity_id: &str, expected: i64) -> StoreError {
    match error {
        RepositoryError::StaleVersion { found, .. } => StoreError::StaleRuleVersion {
            rule_id: entity_id.to_string(),
            expected,
            found,
        },
        other => StoreError::Repository(other),
    }
}
