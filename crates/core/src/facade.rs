use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntityKind, AuditEntry, AuditStore, HistoryPage};
use crate::domain::overrides::{
    BookingId, BookingOverrideDraft, BookingOverrideId, BookingRoutingOverride, PropertyId,
};
use crate::domain::resolution::ResolvedRouting;
use crate::domain::rule::ChannelId;
use crate::engine::{DeterministicResolutionEngine, ResolutionEngine, ResolutionRequest};
use crate::errors::{RoutingError, StoreError};
use crate::recorder::{AuditRecorder, AuditRetryPolicy};
use crate::repository::{BookingOverrideRepository, RuleRepository};
use crate::store::RuleStore;

fn snapshot<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// The one entry point external collaborators use. Resolution and override
/// application are all-or-nothing: nothing is reported committed until its
/// audit entry has been persisted.
pub struct RoutingFacade<R, B, A, E = DeterministicResolutionEngine> {
    store: RuleStore<R, A>,
    bookings: Arc<B>,
    audit: AuditRecorder<A>,
    engine: E,
}

impl<R, B, A> RoutingFacade<R, B, A, DeterministicResolutionEngine>
where
    R: RuleRepository,
    B: BookingOverrideRepository,
    A: AuditStore,
{
    pub fn with_defaults(rules: Arc<R>, bookings: Arc<B>, audit: Arc<A>) -> Self {
        Self::new(
            rules,
            bookings,
            audit,
            DeterministicResolutionEngine::default(),
            AuditRetryPolicy::default(),
        )
    }
}

impl<R, B, A, E> RoutingFacade<R, B, A, E>
where
    R: RuleRepository,
    B: BookingOverrideRepository,
    A: AuditStore,
    E: ResolutionEngine,
{
    pub fn new(
        rules: Arc<R>,
        bookings: Arc<B>,
        audit_store: Arc<A>,
        engine: E,
        retry: AuditRetryPolicy,
    ) -> Self {
        let audit = AuditRecorder::new(audit_store, retry);
        Self { store: RuleStore::new(rules, audit.clone()), bookings, audit, engine }
    }

    /// Administrative surface: platform rules and property overrides.
    pub fn rule_store(&self) -> &RuleStore<R, A> {
        &self.store
    }

    /// Audit read surface: history pages and chain verification.
    pub fn audit(&self) -> &AuditRecorder<A> {
        &self.audit
    }

    /// Compute the effective split for one booking and audit the outcome.
    /// If the audit entry cannot be persisted the resolution is reported
    /// failed even though the computation succeeded.
    pub async fn resolve_booking(
        &self,
        booking_id: &BookingId,
        property_id: &PropertyId,
        channel: &ChannelId,
        net_payout: Decimal,
        actor: &str,
    ) -> Result<ResolvedRouting, RoutingError> {
        let candidates = self.store.effective_candidates(property_id, channel).await?;
        let booking_override = self
            .bookings
            .find_current(booking_id)
            .await
            .map_err(StoreError::Repository)?;

        let resolved = self.engine.resolve(ResolutionRequest {
            booking_id,
            candidates: &candidates,
            booking_override: booking_override.as_ref(),
            net_payout,
        })?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::BookingResolved,
                    AuditEntityKind::Booking,
                    booking_id.0.clone(),
                    actor,
                )
                .with_after(snapshot(&resolved)),
            )
            .await?;

        info!(
            event_name = "routing.booking_resolved",
            booking_id = %booking_id.0,
            channel = %channel.0,
            routing_type = resolved.routing_type.as_str(),
            owner_amount = %resolved.split.owner_amount,
            management_amount = %resolved.split.management_amount,
            actor,
            "booking routing resolved"
        );
        Ok(resolved)
    }

    /// Record a manual exception for one booking. The prior override, if
    /// any, is superseded but retained; the mandatory justification lands in
    /// the audit entry's reason.
    pub async fn apply_booking_override(
        &self,
        draft: BookingOverrideDraft,
        actor: &str,
    ) -> Result<BookingRoutingOverride, RoutingError> {
        draft.check_invariants()?;

        let value = BookingRoutingOverride {
            id: BookingOverrideId(Uuid::new_v4().to_string()),
            booking_id: draft.booking_id,
            owner_pct: draft.owner_pct,
            management_pct: draft.management_pct,
            routing_type: draft.routing_type,
            justification: draft.justification,
            superseded_at: None,
            created_at: Utc::now(),
        };

        let prior = self
            .bookings
            .supersede_and_save(value.clone())
            .await
            .map_err(StoreError::Repository)?;

        let mut entry = AuditEntry::new(
            AuditAction::OverrideApplied,
            AuditEntityKind::BookingOverride,
            value.booking_id.0.clone(),
            actor,
        )
        .with_after(snapshot(&value))
        .with_reason(value.justification.clone());
        if let Some(prior) = &prior {
            entry = entry.with_before(snapshot(prior));
        }
        self.audit.record(entry).await?;

        info!(
            event_name = "routing.booking_override_applied",
            booking_id = %value.booking_id.0,
            override_id = %value.id.0,
            superseded = prior.is_some(),
            actor,
            "booking override applied"
        );
        Ok(value)
    }

    /// Audit-trail view for the dashboard: entries for one entity in write
    /// order, restartable via the page offset.
    pub async fn history(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<AuditEntry>, RoutingError> {
        self.audit.history(entity_kind, entity_id, page).await
    }

    /// Every override version ever applied to a booking, superseded ones
    /// included.
    pub async fn list_booking_overrides(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingRoutingOverride>, RoutingError> {
        Ok(self
            .bookings
            .list_for_booking(booking_id)
            .await
            .map_err(StoreError::Repository)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::RoutingFacade;
    use crate::audit::{
        AuditAction, AuditEntityKind, AuditEntry, AuditStore, HistoryPage, InMemoryAuditStore,
    };
    use crate::domain::overrides::{BookingId, BookingOverrideDraft, PropertyId, PropertyOverrideDraft};
    use crate::domain::rule::{ChannelId, PlatformRuleDraft, RoutingType};
    use crate::engine::DeterministicResolutionEngine;
    use crate::errors::{RepositoryError, RoutingError, ValidationError};
    use crate::recorder::AuditRetryPolicy;
    use crate::repository::{InMemoryBookingOverrideRepository, InMemoryRuleRepository};

    type TestFacade<A> = RoutingFacade<
        InMemoryRuleRepository,
        InMemoryBookingOverrideRepository,
        A,
        DeterministicResolutionEngine,
    >;

    fn facade() -> (TestFacade<InMemoryAuditStore>, Arc<InMemoryAuditStore>) {
        let audit = Arc::new(InMemoryAuditStore::default());
        let facade = RoutingFacade::new(
            Arc::new(InMemoryRuleRepository::default()),
            Arc::new(InMemoryBookingOverrideRepository::default()),
            Arc::clone(&audit),
            DeterministicResolutionEngine::default(),
            AuditRetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1) },
        );
        (facade, audit)
    }

    fn airbnb_draft() -> PlatformRuleDraft {
        PlatformRuleDraft {
            id: None,
            expected_version: None,
            channel: ChannelId::new("airbnb"),
            display_name: "Airbnb".to_string(),
            owner_pct: Decimal::new(70, 0),
            management_pct: Decimal::new(30, 0),
            routing_type: RoutingType::SplitPayout,
            payment_method: None,
            platform_fee_pct: Decimal::new(3, 0),
            supports_split_payout: true,
            notes: None,
        }
    }

    async fn seed_airbnb<A: AuditStore>(facade: &TestFacade<A>) {
        facade
            .rule_store()
            .upsert_platform_rule(airbnb_draft(), "operator")
            .await
            .expect("seed rule");
    }

    #[tokio::test]
    async fn resolves_and_audits_a_platform_baseline_booking() {
        let (facade, _) = facade();
        seed_airbnb(&facade).await;

        let booking = BookingId("bk-1".to_string());
        let resolved = facade
            .resolve_booking(
                &booking,
                &PropertyId("prop-17".to_string()),
                &ChannelId::new("airbnb"),
                Decimal::new(100_000, 2),
                "ingest",
            )
            .await
            .expect("resolve");

        assert_eq!(resolved.split.owner_amount, Decimal::new(67_900, 2));
        assert_eq!(resolved.split.management_amount, Decimal::new(29_100, 2));
        assert_eq!(resolved.split.platform_fee_amount, Decimal::new(3_000, 2));

        let trail = facade
            .history(AuditEntityKind::Booking, "bk-1", HistoryPage::default())
            .await
            .expect("history");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::BookingResolved);
        assert!(trail[0].after.is_some());
    }

    #[tokio::test]
    async fn booking_override_beats_property_override_beats_platform() {
        let (facade, _) = facade();
        seed_airbnb(&facade).await;

        let rule = facade
            .rule_store()
            .effective_candidates(&PropertyId("prop-17".to_string()), &ChannelId::new("airbnb"))
            .await
            .expect("candidates")
            .platform;

        facade
            .rule_store()
            .upsert_property_override(
                PropertyOverrideDraft {
                    id: None,
                    expected_version: None,
                    property_id: PropertyId("prop-17".to_string()),
                    platform_rule_id: rule.id.clone(),
                    owner_pct: Some(Decimal::new(80, 0)),
                    management_pct: Some(Decimal::new(20, 0)),
                    routing_type: None,
                    special_instructions: None,
                },
                "operator",
            )
            .await
            .expect("property override");

        let booking = BookingId("bk-2".to_string());
        let with_property = facade
            .resolve_booking(
                &booking,
                &PropertyId("prop-17".to_string()),
                &ChannelId::new("airbnb"),
                Decimal::new(100_000, 2),
                "ingest",
            )
            .await
            .expect("resolve with property override");
        assert_eq!(with_property.split.owner_amount, Decimal::new(77_600, 2));
        assert_eq!(with_property.split.management_amount, Decimal::new(19_400, 2));

        facade
            .apply_booking_override(
                BookingOverrideDraft {
                    booking_id: booking.clone(),
                    owner_pct: Decimal::ONE_HUNDRED,
                    management_pct: Decimal::ZERO,
                    routing_type: RoutingType::FullToOwner,
                    justification: "owner-direct deal".to_string(),
                },
                "operator",
            )
            .await
            .expect("booking override");

        let with_booking = facade
            .resolve_booking(
                &booking,
                &PropertyId("prop-17".to_string()),
                &ChannelId::new("airbnb"),
                Decimal::new(100_000, 2),
                "ingest",
            )
            .await
            .expect("resolve with booking override");
        assert_eq!(with_booking.routing_type, RoutingType::FullToOwner);
        assert_eq!(with_booking.split.owner_amount, Decimal::new(97_000, 2));
        assert_eq!(with_booking.split.management_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn superseded_overrides_stay_queryable() {
        let (facade, _) = facade();
        seed_airbnb(&facade).await;
        let booking = BookingId("bk-3".to_string());

        for (owner, management) in [(60i64, 40i64), (55, 45)] {
            facade
                .apply_booking_override(
                    BookingOverrideDraft {
                        booking_id: booking.clone(),
                        owner_pct: Decimal::new(owner, 0),
                        management_pct: Decimal::new(management, 0),
                        routing_type: RoutingType::SplitPayout,
                        justification: "renegotiated".to_string(),
                    },
                    "operator",
                )
                .await
                .expect("override");
        }

        let versions = facade.list_booking_overrides(&booking).await.expect("list");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().filter(|value| value.is_current()).count(), 1);

        let trail = facade
            .history(AuditEntityKind::BookingOverride, "bk-3", HistoryPage::default())
            .await
            .expect("history");
        assert_eq!(trail.len(), 2);
        assert!(trail[1].before.is_some());
        assert_eq!(trail[1].reason.as_deref(), Some("renegotiated"));
    }

    #[tokio::test]
    async fn empty_justification_is_rejected() {
        let (facade, _) = facade();
        seed_airbnb(&facade).await;

        let error = facade
            .apply_booking_override(
                BookingOverrideDraft {
                    booking_id: BookingId("bk-4".to_string()),
                    owner_pct: Decimal::new(60, 0),
                    management_pct: Decimal::new(40, 0),
                    routing_type: RoutingType::SplitPayout,
                    justification: "".to_string(),
                },
                "operator",
            )
            .await
            .expect_err("blank justification");
        assert!(matches!(
            error,
            RoutingError::Validation(ValidationError::EmptyJustification)
        ));
    }

    #[tokio::test]
    async fn repeated_resolution_is_byte_identical() {
        let (facade, audit) = facade();
        seed_airbnb(&facade).await;
        let booking = BookingId("bk-5".to_string());
        let property = PropertyId("prop-17".to_string());
        let channel = ChannelId::new("airbnb");

        let first = facade
            .resolve_booking(&booking, &property, &channel, Decimal::new(54_321, 2), "ingest")
            .await
            .expect("first");
        let second = facade
            .resolve_booking(&booking, &property, &channel, Decimal::new(54_321, 2), "ingest")
            .await
            .expect("second");

        assert_eq!(
            serde_json::to_vec(&first).expect("serialize"),
            serde_json::to_vec(&second).expect("serialize"),
        );

        // Both resolutions were audited; nothing reduced the count.
        let trail = audit
            .history(AuditEntityKind::Booking, "bk-5", HistoryPage::default())
            .await
            .expect("history");
        assert_eq!(trail.len(), 2);
    }

    /// Audit store whose writes always fail: the fail-closed path.
    #[derive(Default)]
    struct UnavailableAuditStore;

    #[async_trait::async_trait]
    impl AuditStore for UnavailableAuditStore {
        async fn append(&self, _entry: AuditEntry) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("audit storage unavailable".to_string()))
        }

        async fn latest(
            &self,
            _entity_kind: AuditEntityKind,
            _entity_id: &str,
        ) -> Result<Option<AuditEntry>, RepositoryError> {
            Ok(None)
        }

        async fn history(
            &self,
            _entity_kind: AuditEntityKind,
            _entity_id: &str,
            _page: HistoryPage,
        ) -> Result<Vec<AuditEntry>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn resolution_fails_closed_when_audit_is_unavailable() {
        let rules = Arc::new(InMemoryRuleRepository::default());
        let bookings = Arc::new(InMemoryBookingOverrideRepository::default());

        // Seed through a working audit store, then swap in the broken one.
        let seeded = RoutingFacade::new(
            Arc::clone(&rules),
            Arc::clone(&bookings),
            Arc::new(InMemoryAuditStore::default()),
            DeterministicResolutionEngine::default(),
            AuditRetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1) },
        );
        seeded
            .rule_store()
            .upsert_platform_rule(airbnb_draft(), "operator")
            .await
            .expect("seed");

        let broken = RoutingFacade::new(
            rules,
            bookings,
            Arc::new(UnavailableAuditStore),
            DeterministicResolutionEngine::default(),
            AuditRetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) },
        );

        let error = broken
            .resolve_booking(
                &BookingId("bk-6".to_string()),
                &PropertyId("prop-17".to_string()),
                &ChannelId::new("airbnb"),
                Decimal::new(100_000, 2),
                "ingest",
            )
            .await
            .expect_err("un-audited resolution must not be returned");
        assert!(matches!(error, RoutingError::AuditWriteFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn unknown_channel_is_a_typed_error() {
        let (facade, _) = facade();
        let error = facade
            .resolve_booking(
                &BookingId("bk-7".to_string()),
                &PropertyId("prop-17".to_string()),
                &ChannelId::new("vrbo"),
                Decimal::new(100_000, 2),
                "ingest",
            )
            .await
            .expect_err("no rule seeded");
        assert!(matches!(
            error,
            RoutingError::Store(crate::errors::StoreError::UnknownChannel(_))
        ));
    }
}
