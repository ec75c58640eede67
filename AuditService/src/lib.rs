use analysis_integrations::{Analyzer, ContentStore, MemoryContentStore, OpenRouterAnalyzer, PinataStore};
use audit_models::{AnalysisReport, AuditError, AuditRecord, AuditResult, AuditStatus};
use provenance_ledger::utils::parse_address;
use provenance_ledger::{AuditLedger, EthersLedger, InMemoryLedger};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod anchor;
pub mod config;
pub mod http;
pub mod notifier;
pub mod renderer;
pub mod scheduler;
pub mod store;
pub mod supabase;
pub mod timeouts;

pub use anchor::{AnchorReceipt, AnchorRequest, ProvenanceAnchor};
pub use config::{AnchorPolicy, ConfigError, PipelineConfig, ServiceConfig};
pub use notifier::{Notifier, ReportDispatcher, SmtpNotifier};
pub use renderer::{RenderedReport, ReportRenderer};
pub use scheduler::{AuditScheduler, Pipeline, Submission, SubmitRequest};
pub use store::{InMemoryRecordStore, RecordStore};
pub use supabase::SupabaseRecordStore;

/// Account the in-process ledger binds writes to when no chain is configured.
pub const LOCAL_LEDGER_ACCOUNT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

/// Externally provided capabilities the service is assembled from.
pub struct ServiceParts {
    pub records: Arc<dyn RecordStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub content_store: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn AuditLedger>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl ServiceParts {
    /// Builds every service handle once. Unconfigured services fall back to
    /// in-process implementations; notification is simply disabled.
    pub async fn from_config(config: &ServiceConfig) -> AuditResult<Self> {
        let records: Arc<dyn RecordStore> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "using Supabase record store");
                Arc::new(SupabaseRecordStore::new(supabase))
            }
            None => {
                warn!("no database configured, records are kept in memory");
                Arc::new(InMemoryRecordStore::new())
            }
        };

        let content_store: Arc<dyn ContentStore> = if config.ipfs.has_credentials() {
            Arc::new(PinataStore::new(config.ipfs.clone()))
        } else {
            warn!("no pinning credentials, audit documents are kept in memory");
            Arc::new(MemoryContentStore::new())
        };

        let ledger: Arc<dyn AuditLedger> = match &config.ledger {
            Some(ledger) => Arc::new(EthersLedger::connect(ledger).await?),
            None => {
                let account = parse_address(LOCAL_LEDGER_ACCOUNT)?;
                warn!(?account, "no chain configured, using an in-process ledger");
                Arc::new(InMemoryLedger::deploy().connect(account))
            }
        };

        let notifier: Option<Arc<dyn Notifier>> = match config.smtp_enabled() {
            Some(smtp) => Some(Arc::new(SmtpNotifier::new(smtp)?)),
            None => None,
        };

        Ok(Self {
            records,
            analyzer: Arc::new(OpenRouterAnalyzer::new(config.analysis.clone())),
            content_store,
            ledger,
            notifier,
        })
    }
}

/// The audit pipeline with every entry point the HTTP surface and CLI use.
pub struct AuditService {
    scheduler: AuditScheduler,
    anchor: Arc<ProvenanceAnchor>,
    records: Arc<dyn RecordStore>,
    renderer: ReportRenderer,
    call_timeout: Duration,
}

impl AuditService {
    pub async fn from_config(config: &ServiceConfig) -> AuditResult<Self> {
        let parts = ServiceParts::from_config(config).await?;
        Ok(Self::new(parts, &config.pipeline))
    }

    /// Must be called inside a Tokio runtime.
    pub fn new(parts: ServiceParts, pipeline_config: &PipelineConfig) -> Self {
        let call_timeout = pipeline_config.external_timeout();
        let renderer = ReportRenderer::new(pipeline_config.report_dir());

        let anchor = Arc::new(ProvenanceAnchor::new(
            parts.records.clone(),
            parts.content_store,
            parts.ledger,
            call_timeout,
        ));

        let mut pipeline = Pipeline::new(parts.records.clone(), parts.analyzer, call_timeout);
        if pipeline_config.notify_on_completion {
            if let Some(notifier) = parts.notifier {
                pipeline = pipeline.with_dispatcher(Arc::new(ReportDispatcher::new(
                    renderer.clone(),
                    Some(notifier),
                    call_timeout,
                )));
            }
        }
        if pipeline_config.anchor_policy == AnchorPolicy::AfterCompletion {
            pipeline = pipeline.with_anchor(anchor.clone());
        }

        info!(
            concurrency = pipeline_config.deferred_concurrency,
            queue_depth = pipeline_config.deferred_queue_depth,
            anchor_policy = ?pipeline_config.anchor_policy,
            "audit service ready"
        );

        Self {
            scheduler: AuditScheduler::start(pipeline, pipeline_config),
            anchor,
            records: parts.records,
            renderer,
            call_timeout,
        }
    }

    pub async fn submit(&self, request: &SubmitRequest) -> AuditResult<Submission> {
        if request.code.trim().is_empty() {
            return Err(AuditError::Validation("code must not be empty".to_string()));
        }
        self.scheduler.submit(request).await
    }

    /// Stateless analysis. Nothing is persisted.
    pub async fn analyze(&self, source: &str) -> AuditResult<AnalysisReport> {
        if source.trim().is_empty() {
            return Err(AuditError::Validation("code must not be empty".to_string()));
        }
        self.scheduler.analyze_stateless(source).await
    }

    pub async fn anchor(&self, request: AnchorRequest) -> AuditResult<AnchorReceipt> {
        self.anchor.anchor(request).await
    }

    pub async fn record(&self, id: &str) -> AuditResult<AuditRecord> {
        timeouts::store_call(self.call_timeout, self.records.get(id)).await
    }

    pub async fn status(&self, id: &str) -> AuditResult<AuditStatus> {
        Ok(self.record(id).await?.status)
    }

    pub async fn user_audits(&self, email: &str) -> AuditResult<Vec<AuditRecord>> {
        timeouts::store_call(self.call_timeout, self.records.list_by_email(email)).await
    }

    /// Renders the PDF for a completed audit. The caller owns the returned file.
    pub async fn render_report(&self, id: &str) -> AuditResult<RenderedReport> {
        let record = self.record(id).await?;
        let report = record
            .report()
            .ok_or_else(|| AuditError::NotFound(format!("no completed report for audit {}", id)))?;
        self.renderer.render_async(&record.id, &report).await
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
