use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::RepositoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RuleCreated,
    RuleUpdated,
    OverrideApplied,
    BookingResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleCreated => "rule_created",
            Self::RuleUpdated => "rule_updated",
            Self::OverrideApplied => "override_applied",
            Self::BookingResolved => "booking_resolved",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityKind {
    PlatformRule,
    PropertyOverride,
    BookingOverride,
    Booking,
}

impl AuditEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformRule => "platform_rule",
            Self::PropertyOverride => "property_override",
            Self::BookingOverride => "booking_override",
            Self::Booking => "booking",
        }
    }
}

/// One immutable line of the audit trail. Corrections are new entries, never
/// edits; `prev_hash`/`entry_hash` chain entries per entity so tampering and
/// reordering are detectable after the fact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub action: AuditAction,
    pub entity_kind: AuditEntityKind,
    pub entity_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub actor: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Fresh, unsealed entry. The recorder assigns `prev_hash` and
    /// `entry_hash` at append time.
    pub fn new(
        action: AuditAction,
        entity_kind: AuditEntityKind,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            action,
            entity_kind,
            entity_id: entity_id.into(),
            before: None,
            after: None,
            actor: actor.into(),
            reason: None,
            occurred_at: Utc::now(),
            prev_hash: None,
            entry_hash: String::new(),
        }
    }

    pub fn with_before(mut self, snapshot: serde_json::Value) -> Self {
        self.before = Some(snapshot);
        self
    }

    pub fn with_after(mut self, snapshot: serde_json::Value) -> Self {
        self.after = Some(snapshot);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub(crate) fn seal(&mut self, prev_hash: Option<String>) {
        self.prev_hash = prev_hash;
        self.entry_hash = hash_entry_material(self);
    }
}

pub fn hash_entry_material(entry: &AuditEntry) -> String {
    let snapshot_hash = {
        let before = entry.before.as_ref().map(|v| v.to_string()).unwrap_or_default();
        let after = entry.after.as_ref().map(|v| v.to_string()).unwrap_or_default();
        sha256_hex(format!("{before}|{after}").as_bytes())
    };

    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        entry.entry_id,
        entry.entity_kind.as_str(),
        entry.entity_id,
        entry.action.as_str(),
        entry.actor,
        entry.occurred_at.to_rfc3339(),
        snapshot_hash,
        entry.prev_hash.as_deref().unwrap_or(""),
    );
    sha256_hex(material.as_bytes())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Restartable position in an entity's history: skip `offset` entries, take
/// at most `limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub offset: u64,
    pub limit: u32,
}

impl Default for HistoryPage {
    fn default() -> Self {
        Self { offset: 0, limit: 100 }
    }
}

/// Append-only audit storage. No update or delete method exists, by
/// construction: the trait is the whole write surface.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError>;

    /// Chain head for an entity, used to link the next entry.
    async fn latest(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<Option<AuditEntry>, RepositoryError>;

    /// Entries for an entity in write order.
    async fn history(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<AuditEntry>, RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }

    async fn latest(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
    ) -> Result<Option<AuditEntry>, RepositoryError> {
        Ok(self
            .entries()
            .into_iter()
            .rev()
            .find(|entry| entry.entity_kind == entity_kind && entry.entity_id == entity_id))
    }

    async fn history(
        &self,
        entity_kind: AuditEntityKind,
        entity_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        Ok(self
            .entries()
            .into_iter()
            .filter(|entry| entry.entity_kind == entity_kind && entry.entity_id == entity_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }
}
