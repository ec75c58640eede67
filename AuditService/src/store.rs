use async_trait::async_trait;
use audit_models::error::helpers;
use audit_models::{AnchorReference, AuditError, AuditOutcome, AuditRecord, AuditResult, AuditStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Keyed persistence for audit records and the single source of truth for status.
///
/// Each mutating method owns one group of fields: `transition` writes the
/// lifecycle fields and only while the record is pending, `attach_anchor`
/// writes the provenance fields and nothing else.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: AuditRecord) -> AuditResult<()>;

    /// Fails with `NotFound` for an unknown id.
    async fn get(&self, id: &str) -> AuditResult<AuditRecord>;

    /// Moves a pending record to its terminal state.
    async fn transition(&self, id: &str, outcome: AuditOutcome, at: DateTime<Utc>) -> AuditResult<AuditRecord>;

    async fn attach_anchor(&self, id: &str, anchor: AnchorReference) -> AuditResult<AuditRecord>;

    /// Completed and pending records for a contact, newest first.
    async fn list_by_email(&self, email: &str) -> AuditResult<Vec<AuditRecord>>;
}

/// Process-local store used when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<DashMap<String, AuditRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, record: AuditRecord) -> AuditResult<()> {
        if self.records.contains_key(&record.id) {
            return Err(AuditError::Persistence(format!("duplicate audit id {}", record.id)));
        }
        debug!(audit_id = %record.id, tier = %record.tier, "record created");
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> AuditResult<AuditRecord> {
        helpers::require_found(self.records.get(id).map(|r| r.value().clone()), id)
    }

    async fn transition(&self, id: &str, outcome: AuditOutcome, at: DateTime<Utc>) -> AuditResult<AuditRecord> {
        let mut entry = helpers::require_found(self.records.get_mut(id), id)?;
        entry.apply(outcome, at)?;
        debug!(audit_id = %id, status = %entry.status, "record transitioned");
        Ok(entry.clone())
    }

    async fn attach_anchor(&self, id: &str, anchor: AnchorReference) -> AuditResult<AuditRecord> {
        let mut entry = helpers::require_found(self.records.get_mut(id), id)?;
        entry.attach_anchor(anchor);
        Ok(entry.clone())
    }

    async fn list_by_email(&self, email: &str) -> AuditResult<Vec<AuditRecord>> {
        let mut matches: Vec<AuditRecord> = self
            .records
            .iter()
            .filter(|r| r.submitter_email.as_deref() == Some(email))
            .filter(|r| matches!(r.status, AuditStatus::Completed | AuditStatus::Pending))
            .map(|r| r.value().clone())
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }
}
