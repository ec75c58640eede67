use async_trait::async_trait;
use audit_models::{AnchorReference, AuditError, AuditOutcome, AuditRecord, AuditResult, AuditStatus};
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::SupabaseConfig;
use crate::store::RecordStore;

const DEFAULT_TABLE: &str = "Audit";

/// Record store backed by a Supabase (PostgREST) table.
///
/// Status changes are conditional updates filtered on `status=eq.pending`, so
/// the database itself refuses to rewrite a terminal record.
pub struct SupabaseRecordStore {
    table_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SupabaseRecordStore {
    pub fn new(config: &SupabaseConfig) -> Self {
        let table = config.table.as_deref().unwrap_or(DEFAULT_TABLE);
        Self {
            table_url: format!("{}/rest/v1/{}", config.url.trim_end_matches('/'), table),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> AuditResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| AuditError::Persistence(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, detail = %detail, "record store request failed");
            return Err(AuditError::Persistence(format!("HTTP {}: {}", status, detail)));
        }
        Ok(response)
    }

    async fn rows(&self, response: Response) -> AuditResult<Vec<AuditRecord>> {
        response
            .json::<Vec<AuditRecord>>()
            .await
            .map_err(|e| AuditError::Persistence(format!("unexpected row format: {}", e)))
    }

    async fn fetch(&self, id: &str) -> AuditResult<Option<AuditRecord>> {
        let request = self
            .client
            .get(&self.table_url)
            .query(&[("id", format!("eq.{}", id)), ("select", "*".to_string())]);
        let response = self.send(request).await?;
        Ok(self.rows(response).await?.into_iter().next())
    }

    fn transition_patch(outcome: &AuditOutcome, at: DateTime<Utc>) -> Value {
        match outcome {
            AuditOutcome::Completed(report) => json!({
                "status": AuditStatus::Completed,
                "completedAt": at,
                "findings": report.vulnerabilities,
                "gasOptimizations": report.gas_optimizations,
            }),
            AuditOutcome::Failed(reason) => json!({
                "status": AuditStatus::Error,
                "errorMessage": reason,
            }),
        }
    }
}

#[async_trait]
impl RecordStore for SupabaseRecordStore {
    async fn create(&self, record: AuditRecord) -> AuditResult<()> {
        let request = self
            .client
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(&record);
        self.send(request).await?;
        debug!(audit_id = %record.id, "record inserted");
        Ok(())
    }

    async fn get(&self, id: &str) -> AuditResult<AuditRecord> {
        self.fetch(id)
            .await?
            .ok_or_else(|| AuditError::NotFound(id.to_string()))
    }

    async fn transition(&self, id: &str, outcome: AuditOutcome, at: DateTime<Utc>) -> AuditResult<AuditRecord> {
        let target = outcome.status();
        let request = self
            .client
            .patch(&self.table_url)
            .query(&[("id", format!("eq.{}", id)), ("status", "eq.pending".to_string())])
            .header("Prefer", "return=representation")
            .json(&Self::transition_patch(&outcome, at));
        let response = self.send(request).await?;

        if let Some(updated) = self.rows(response).await?.into_iter().next() {
            return Ok(updated);
        }

        // Nothing matched: either the id is unknown or the record is already terminal.
        match self.fetch(id).await? {
            Some(current) => Err(AuditError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: target,
            }),
            None => Err(AuditError::NotFound(id.to_string())),
        }
    }

    async fn attach_anchor(&self, id: &str, anchor: AnchorReference) -> AuditResult<AuditRecord> {
        let request = self
            .client
            .patch(&self.table_url)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&anchor);
        let response = self.send(request).await?;
        self.rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AuditError::NotFound(id.to_string()))
    }

    async fn list_by_email(&self, email: &str) -> AuditResult<Vec<AuditRecord>> {
        let request = self.client.get(&self.table_url).query(&[
            ("submitterEmail", format!("eq.{}", email)),
            ("status", "in.(completed,pending)".to_string()),
            ("order", "createdAt.desc".to_string()),
            ("select", "*".to_string()),
        ]);
        let response = self.send(request).await?;
        self.rows(response).await
    }
}
