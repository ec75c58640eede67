use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{helpers, AuditResult};
use crate::hash::ContentHash;
use crate::tier::Tier;
use crate::types::{AnalysisReport, Finding, GasOptimization};

/// Lifecycle status. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Pending,
    Completed,
    Error,
}

impl AuditStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuditStatus::Pending)
    }

    pub fn can_transition_to(&self, next: AuditStatus) -> bool {
        matches!(
            (self, next),
            (AuditStatus::Pending, AuditStatus::Completed) | (AuditStatus::Pending, AuditStatus::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Completed => "completed",
            AuditStatus::Error => "error",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a submission at intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAudit {
    pub id: String,
    pub submitter_wallet: String,
    pub submitter_email: Option<String>,
    pub source_hash: ContentHash,
    pub tier: Tier,
}

impl NewAudit {
    /// Computes tier and hash once and allocates a fresh id.
    pub fn from_source(source: &str, wallet: &str, email: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            submitter_wallet: wallet.to_string(),
            submitter_email: email.map(str::to_string),
            source_hash: ContentHash::of(source),
            tier: Tier::route(source),
        }
    }
}

/// Result of running the analysis for a pending audit.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    Completed(AnalysisReport),
    Failed(String),
}

impl AuditOutcome {
    pub fn status(&self) -> AuditStatus {
        match self {
            AuditOutcome::Completed(_) => AuditStatus::Completed,
            AuditOutcome::Failed(_) => AuditStatus::Error,
        }
    }
}

/// Provenance pointers written by a successful anchor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorReference {
    pub content_locator: String,
    pub ledger_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub submitter_wallet: String,
    pub submitter_email: Option<String>,
    pub source_hash: ContentHash,
    pub tier: Tier,
    pub status: AuditStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub findings: Option<Vec<Finding>>,
    pub gas_optimizations: Option<GasOptimization>,
    pub error_message: Option<String>,
    pub content_locator: Option<String>,
    pub ledger_reference: Option<String>,
}

impl AuditRecord {
    pub fn pending(new: NewAudit, created_at: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            submitter_wallet: new.submitter_wallet,
            submitter_email: new.submitter_email,
            source_hash: new.source_hash,
            tier: new.tier,
            status: AuditStatus::Pending,
            created_at,
            completed_at: None,
            findings: None,
            gas_optimizations: None,
            error_message: None,
            content_locator: None,
            ledger_reference: None,
        }
    }

    /// Applies a terminal outcome. Fails unless the record is still pending.
    pub fn apply(&mut self, outcome: AuditOutcome, now: DateTime<Utc>) -> AuditResult<()> {
        helpers::check_transition(&self.id, self.status, outcome.status())?;
        match outcome {
            AuditOutcome::Completed(report) => {
                self.status = AuditStatus::Completed;
                self.completed_at = Some(now);
                self.findings = Some(report.vulnerabilities);
                self.gas_optimizations = Some(report.gas_optimizations);
            }
            AuditOutcome::Failed(reason) => {
                self.status = AuditStatus::Error;
                self.error_message = Some(reason);
            }
        }
        Ok(())
    }

    pub fn attach_anchor(&mut self, anchor: AnchorReference) {
        self.content_locator = Some(anchor.content_locator);
        self.ledger_reference = Some(anchor.ledger_reference);
    }

    pub fn is_anchored(&self) -> bool {
        self.content_locator.is_some() && self.ledger_reference.is_some()
    }

    /// Findings and gas data as a report, present only once completed.
    pub fn report(&self) -> Option<AnalysisReport> {
        match (&self.findings, &self.gas_optimizations) {
            (Some(findings), Some(gas)) if self.status == AuditStatus::Completed => Some(AnalysisReport {
                vulnerabilities: findings.clone(),
                gas_optimizations: gas.clone(),
            }),
            _ => None,
        }
    }
}
