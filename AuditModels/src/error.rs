use thiserror::Error;

use crate::record::AuditStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("{service} call failed: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Record store error: {0}")]
    Persistence(String),

    #[error("Audit not found: {0}")]
    NotFound(String),

    #[error("Audit {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: AuditStatus,
        to: AuditStatus,
    },

    #[error("Deferred audit queue is full")]
    QueueFull,

    #[error("Report rendering failed: {0}")]
    Render(String),
}

impl AuditError {
    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        AuditError::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// Stable label used in logs and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::ExternalService { .. } => "external_service",
            AuditError::Validation(_) => "validation",
            AuditError::Persistence(_) => "persistence",
            AuditError::NotFound(_) => "not_found",
            AuditError::InvalidTransition { .. } => "invalid_transition",
            AuditError::QueueFull => "queue_full",
            AuditError::Render(_) => "render",
        }
    }
}

pub type AuditResult<T> = Result<T, AuditError>;

// Helper functions for common error scenarios
pub mod helpers {
    use super::*;

    pub fn require_found<T>(value: Option<T>, id: &str) -> AuditResult<T> {
        value.ok_or_else(|| AuditError::NotFound(id.to_string()))
    }

    pub fn check_transition(id: &str, from: AuditStatus, to: AuditStatus) -> AuditResult<()> {
        if !from.can_transition_to(to) {
            return Err(AuditError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }
        Ok(())
    }
}
