pub mod error;
pub mod hash;
pub mod record;
pub mod tier;
pub mod types;

pub use error::{AuditError, AuditResult};
pub use hash::ContentHash;
pub use record::{AnchorReference, AuditOutcome, AuditRecord, AuditStatus, NewAudit};
pub use tier::Tier;
pub use types::{AnalysisReport, Finding, GasOptimization, GasSuggestion, Severity};
