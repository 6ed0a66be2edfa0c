use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audit::{
    hash_entry_material, AuditEntityKind, AuditEntry, AuditStore, HistoryPage,
};
use crate::errors::{RepositoryError, RoutingError, StoreError};

/// Bounded retry for audit writes. Storage hiccups get a few attempts with
/// exponential backoff; exhaustion fails the enclosing operation because a
/// resolution or rule change without its audit entry must not be reported
/// committed.
#[derive(Clone, Copy, Debug)]
pub struct AuditRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for AuditRetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(50) }
    }
}

impl AuditRetryPolicy {
    fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Outcome of re-walking an entity's hash chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub entity_kind: AuditEntityKind,
    pub entity_id: String,
    pub valid: bool,
    pub verified_entries: usize,
    pub failure_reason: Option<String>,
}

/// Append-side discipline around an `AuditStore`: seals each entry into the
/// entity's hash chain, retries transient write failures, and exposes the
/// read surface used by audit-trail views.
pub struct AuditRecorder<A> {
    store: Arc<A>,
    retry: AuditRetryPolicy,
}

impl<A> Clone for AuditRecorder<A> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), retry: self.retry }
    }
}

impl<A: AuditStore> AuditRecorder<A> {
    pub fn new(store: Arc<A>, retry: AuditRetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Seal and append one entry. Returns the sealed entry as persisted.
    pub async fn record(&self, entry: AuditEntry) -> Result<AuditEntry, RoutingError> {
        let mut last_error: Option<RepositoryError> = None;

        for attempt in 1..=self.retry.max_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay_before(attempt)).await;
            }

            let head = match self.store.latest(entry.entity_kind, &entry.entity_id).await {
                Ok(head) => head,
                Err(error) => {
                    warn!(
                        event_name = "audit.record.head_read_failed",
                        attempt,
                        entity_kind = entry.entity_kind.as_str(),
                        entity_id = %entry.entity_id,
                        "could not read audit chain head: {error}"
                    );
                    last_error = Some(error);
                    continue;
                }
            };

            let mut sealed = entry.clone();
            sealed.seal(head.map(|prev| prev.entry_hash));

            match self.store.append(sealed.clone()).await {
                Ok(()) => return Ok(sealed),
                Err(error) => {
                    warn!(
                        event_name = "audit.record.append_failed",
                        attempt,
                        entity_kind = entry.entity_kind.as_str(),
                        entity_id = %entry.entity_id,
                        "audit append failed: {error}"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(RoutingError::AuditWriteFailed {
            attempts: self.retry.max_attempts.max(1),
            source: last_error
                .unwrap_or_else(|| RepositoryError::Storage("audit retry exhausted".to_string())),
        })
    }

    pub async fn history(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<AuditEntry>, RoutingError> {
        self.store
            .history(entity_kind, entity_id, page)
            .await
            .map_err(|error| RoutingError::Store(StoreError::Repository(error)))
    }

    /// Walk the whole chain for an entity and report the first divergence.
    pub async fn verify_chain(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<ChainVerification, RoutingError> {
        let mut verified = 0usize;
        let mut previous_hash: Option<String> = None;
        let mut offset = 0u64;
        let page_size = 200u32;

        loop {
            let page = self
                .store
                .history(entity_kind, entity_id, HistoryPage { offset, limit: page_size })
                .await
                .map_err(|error| RoutingError::Store(StoreError::Repository(error)))?;
            let page_len = page.len();

            for entry in page {
                if entry.prev_hash != previous_hash {
                    return Ok(ChainVerification {
                        entity_kind,
                        entity_id: entity_id.to_string(),
                        valid: false,
                        verified_entries: verified,
                        failure_reason: Some(format!(
                            "previous hash mismatch at entry {}",
                            entry.entry_id
                        )),
                    });
                }

                if hash_entry_material(&entry) != entry.entry_hash {
                    return Ok(ChainVerification {
                        entity_kind,
                        entity_id: entity_id.to_string(),
                        valid: false,
                        verified_entries: verified,
                        failure_reason: Some(format!(
                            "entry hash mismatch at entry {}",
                            entry.entry_id
                        )),
                    });
                }

                previous_hash = Some(entry.entry_hash);
                verified += 1;
            }

            if page_len < page_size as usize {
                break;
            }
            offset += page_len as u64;
        }

        Ok(ChainVerification {
            entity_kind,
            entity_id: entity_id.to_string(),
            valid: true,
            verified_entries: verified,
            failure_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{AuditRecorder, AuditRetryPolicy};
    use crate::audit::{
        AuditAction, AuditEntityKind, AuditEntry, AuditStore, HistoryPage, InMemoryAuditStore,
    };
    use crate::errors::{RepositoryError, RoutingError};

    fn fast_policy(max_attempts: u32) -> AuditRetryPolicy {
        AuditRetryPolicy { max_attempts, base_delay: Duration::from_millis(1) }
    }

    fn rule_entry(actor: &str) -> AuditEntry {
        AuditEntry::new(
            AuditAction::RuleUpdated,
            AuditEntityKind::PlatformRule,
            "rule-1",
            actor,
        )
    }

    /// Fails the first `failures` appends, then behaves like the in-memory store.
    struct FlakyAuditStore {
        inner: InMemoryAuditStore,
        remaining_failures: Mutex<u32>,
    }

    impl FlakyAuditStore {
        fn new(failures: u32) -> Self {
            Self { inner: InMemoryAuditStore::default(), remaining_failures: Mutex::new(failures) }
        }
    }

    #[async_trait::async_trait]
    impl AuditStore for FlakyAuditStore {
        async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
            {
                let mut remaining = self.remaining_failures.lock().expect("lock");
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RepositoryError::Storage("transient write failure".to_string()));
                }
            }
            self.inner.append(entry).await
        }

        async fn latest(
            &self,
            entity_kind: AuditEntityKind,
            entity_id: &str,
        ) -> Result<Option<AuditEntry>, RepositoryError> {
            self.inner.latest(entity_kind, entity_id).await
        }

        async fn history(
            &self,
            entity_kind: AuditEntityKind,
            entity_id: &str,
            page: HistoryPage,
        ) -> Result<Vec<AuditEntry>, RepositoryError> {
            self.inner.history(entity_kind, entity_id, page).await
        }
    }

    #[tokio::test]
    async fn record_links_entries_into_a_hash_chain() {
        let store = Arc::new(InMemoryAuditStore::default());
        let recorder = AuditRecorder::new(Arc::clone(&store), fast_policy(3));

        let first = recorder.record(rule_entry("first")).await.expect("record first");
        let second = recorder.record(rule_entry("second")).await.expect("record second");

        assert_eq!(first.prev_hash, None);
        assert_eq!(second.prev_hash, Some(first.entry_hash.clone()));
        assert_ne!(second.entry_hash, first.entry_hash);

        let verification = recorder
            .verify_chain(AuditEntityKind::PlatformRule, "rule-1")
            .await
            .expect("verify");
        assert!(verification.valid);
        assert_eq!(verification.verified_entries, 2);
    }

    #[tokio::test]
    async fn record_retries_transient_failures() {
        let store = Arc::new(FlakyAuditStore::new(2));
        let recorder = AuditRecorder::new(store, fast_policy(3));

        let sealed = recorder.record(rule_entry("operator")).await.expect("third attempt wins");
        assert!(!sealed.entry_hash.is_empty());
    }

    #[tokio::test]
    async fn record_fails_closed_after_bounded_attempts() {
        let store = Arc::new(FlakyAuditStore::new(10));
        let recorder = AuditRecorder::new(store, fast_policy(3));

        let error = recorder.record(rule_entry("operator")).await.expect_err("should exhaust");
        assert!(matches!(error, RoutingError::AuditWriteFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn verify_chain_detects_a_tampered_entry() {
        let store = Arc::new(InMemoryAuditStore::default());
        let recorder = AuditRecorder::new(Arc::clone(&store), fast_policy(3));
        let sealed = recorder.record(rule_entry("operator")).await.expect("record");

        // Forge a follow-up entry appended behind the recorder's back.
        let mut forged = rule_entry("intruder");
        forged.prev_hash = Some(sealed.entry_hash.clone());
        forged.entry_hash = "forged".to_string();
        store.append(forged).await.expect("append forged");

        let verification = recorder
            .verify_chain(AuditEntityKind::PlatformRule, "rule-1")
            .await
            .expect("verify");
        assert!(!verification.valid);
        assert_eq!(verification.verified_entries, 1);
        assert!(verification
            .failure_reason
            .unwrap_or_default()
            .contains("entry hash mismatch"));
    }
}
