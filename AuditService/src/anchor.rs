use analysis_integrations::ContentStore;
use audit_models::{AnchorReference, AuditError, AuditResult, ContentHash};
use dashmap::DashMap;
use provenance_ledger::utils::format_receipt;
use provenance_ledger::AuditLedger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::RecordStore;
use crate::timeouts::{external_call, store_call};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRequest {
    pub id: String,
    pub submitter: String,
    pub source: String,
    pub audit_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReceipt {
    pub audit_id: String,
    pub source_hash: ContentHash,
    pub content_locator: String,
    pub ledger_reference: String,
    pub sender: String,
    pub block_number: Option<u64>,
}

/// Pins an audit result and records its locator on the ledger.
///
/// Steps run in order and stop at the first failure. The record's anchor
/// fields are written only after both external writes succeed, and its
/// status is never touched. Re-running is safe: the ledger overwrites the
/// locator for the same `(sender, hash)` key.
///
/// Anchors for the same audit id run one at a time, so the record always
/// points at the ledger's latest entry for that audit.
pub struct ProvenanceAnchor {
    records: Arc<dyn RecordStore>,
    content_store: Arc<dyn ContentStore>,
    ledger: Arc<dyn AuditLedger>,
    call_timeout: Duration,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ProvenanceAnchor {
    pub fn new(
        records: Arc<dyn RecordStore>,
        content_store: Arc<dyn ContentStore>,
        ledger: Arc<dyn AuditLedger>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            records,
            content_store,
            ledger,
            call_timeout,
            in_flight: DashMap::new(),
        }
    }

    pub async fn anchor(&self, request: AnchorRequest) -> AuditResult<AnchorReceipt> {
        let document: serde_json::Value = serde_json::from_str(&request.audit_text)
            .map_err(|e| AuditError::Validation(format!("audit text is not JSON: {}", e)))?;

        let id = request.id.clone();
        let lock = self.in_flight.entry(id.clone()).or_default().clone();
        let guard = lock.lock().await;
        let result = self.anchor_exclusive(request, document).await;
        drop(guard);
        drop(lock);
        self.in_flight.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn anchor_exclusive(&self, request: AnchorRequest, document: serde_json::Value) -> AuditResult<AnchorReceipt> {
        let record = store_call(self.call_timeout, self.records.get(&request.id)).await?;
        let source_hash = ContentHash::of(&request.source);
        if source_hash != record.source_hash {
            return Err(AuditError::Validation(format!(
                "source hash {} does not match audit {} ({})",
                source_hash, record.id, record.source_hash
            )));
        }

        let sender = self.ledger.sender();
        if !request.submitter.eq_ignore_ascii_case(&format!("{:?}", sender)) {
            warn!(
                audit_id = %record.id,
                submitter = %request.submitter,
                ?sender,
                "ledger entry is bound to the signing account, not the submitter"
            );
        }

        let locator = external_call(
            "ipfs",
            self.call_timeout,
            self.content_store.pin_json(&format!("audit-{}", record.id), &document),
        )
        .await?;

        let receipt = external_call("ledger", self.call_timeout, async {
            self.ledger
                .store_audit(source_hash, &locator)
                .await
                .map_err(AuditError::from)
        })
        .await?;

        let reference = AnchorReference {
            content_locator: locator.clone(),
            ledger_reference: receipt.reference(),
        };
        store_call(self.call_timeout, self.records.attach_anchor(&record.id, reference.clone())).await?;

        info!(
            audit_id = %record.id,
            %source_hash,
            locator = %locator,
            ledger = %format_receipt(&receipt),
            "audit anchored"
        );

        Ok(AnchorReceipt {
            audit_id: record.id,
            source_hash,
            content_locator: locator,
            ledger_reference: reference.ledger_reference,
            sender: format!("{:?}", receipt.sender),
            block_number: receipt.block_number,
        })
    }
}
