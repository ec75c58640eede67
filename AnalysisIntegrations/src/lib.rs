use async_trait::async_trait;
use audit_models::{AnalysisReport, AuditResult};

pub mod analyzer;
pub mod content_store;

pub use analyzer::{parse_analysis, strip_code_fences, ModelTable, OpenRouterAnalyzer, OpenRouterConfig};
pub use content_store::{MemoryContentStore, PinataConfig, PinataStore};

/// The external static-analysis capability.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Runs one analysis. Unparseable output is always an error, never an empty report.
    async fn analyze(&self, source: &str) -> AuditResult<AnalysisReport>;
}

/// Content-addressed storage for serialized audit results.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Pins a JSON document and returns its content identifier.
    async fn pin_json(&self, name: &str, content: &serde_json::Value) -> AuditResult<String>;
}
