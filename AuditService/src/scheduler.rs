//! Execution scheduler.
//!
//! Every submission is persisted as `pending` before any analysis runs.
//! Non-long tiers execute inline and the caller sees the terminal status.
//! Long tiers go through a bounded queue drained by one dispatcher task,
//! with a semaphore capping how many deferred pipelines run at once. Each
//! pipeline runs in its own task so a panic only fails that audit.

use analysis_integrations::Analyzer;
use audit_models::{AnalysisReport, AuditError, AuditOutcome, AuditRecord, AuditResult, AuditStatus, NewAudit, Tier};
use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::anchor::{AnchorRequest, ProvenanceAnchor};
use crate::config::PipelineConfig;
use crate::notifier::ReportDispatcher;
use crate::store::RecordStore;
use crate::timeouts::{external_call, store_call};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub wallet: String,
    pub code: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// What the submitter is told. Inline runs report their terminal status,
/// deferred runs report `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub status: AuditStatus,
    pub audit_id: String,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Submission {
    fn from_record(record: &AuditRecord) -> Self {
        Self {
            status: record.status,
            audit_id: record.id.clone(),
            tier: record.tier,
            error: record.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    audit_id: String,
    source: String,
}

/// The work shared by both execution modes: analyze, record the outcome,
/// then hand completed audits to the side channel.
pub struct Pipeline {
    records: Arc<dyn RecordStore>,
    analyzer: Arc<dyn Analyzer>,
    dispatcher: Option<Arc<ReportDispatcher>>,
    anchor: Option<Arc<ProvenanceAnchor>>,
    call_timeout: Duration,
}

impl Pipeline {
    pub fn new(records: Arc<dyn RecordStore>, analyzer: Arc<dyn Analyzer>, call_timeout: Duration) -> Self {
        Self {
            records,
            analyzer,
            dispatcher: None,
            anchor: None,
            call_timeout,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<ReportDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Anchors every successful analysis once it completes.
    pub fn with_anchor(mut self, anchor: Arc<ProvenanceAnchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    async fn analyze(&self, source: &str) -> AuditResult<AnalysisReport> {
        external_call("analysis", self.call_timeout, self.analyzer.analyze(source)).await
    }

    async fn execute(&self, job: &Job) -> AuditResult<AuditRecord> {
        let outcome = match self.analyze(&job.source).await {
            Ok(report) => AuditOutcome::Completed(report),
            Err(e) => {
                warn!(audit_id = %job.audit_id, error = %e, "analysis failed");
                AuditOutcome::Failed(e.to_string())
            }
        };
        self.finish(&job.audit_id, outcome).await
    }

    async fn finish(&self, audit_id: &str, outcome: AuditOutcome) -> AuditResult<AuditRecord> {
        let record = store_call(
            self.call_timeout,
            self.records.transition(audit_id, outcome, Utc::now()),
        )
        .await?;

        match record.status {
            AuditStatus::Completed => counter!("audit_completed_total").increment(1),
            _ => counter!("audit_failed_total").increment(1),
        }
        info!(audit_id, status = %record.status, tier = %record.tier, "audit finished");
        Ok(record)
    }
}

/// Runs the whole guarded pipeline as a tracked task, so recording the
/// outcome and the side channel finish even if the caller stops waiting.
fn launch(pipeline: Arc<Pipeline>, tracker: &TaskTracker, job: Job) -> JoinHandle<AuditResult<AuditRecord>> {
    tracker.spawn(run_guarded(pipeline, tracker.clone(), job))
}

/// Runs one job in its own task and turns a panic into an `error` record.
async fn run_guarded(pipeline: Arc<Pipeline>, tracker: TaskTracker, job: Job) -> AuditResult<AuditRecord> {
    let audit_id = job.audit_id.clone();
    let source = job.source.clone();
    let inner = pipeline.clone();
    let joined = tokio::spawn(async move { inner.execute(&job).await }).await;

    let record = match joined {
        Ok(result) => result?,
        Err(join_error) => {
            error!(audit_id = %audit_id, error = %join_error, "audit task aborted");
            pipeline
                .finish(&audit_id, AuditOutcome::Failed(format!("audit task aborted: {}", join_error)))
                .await?
        }
    };

    if record.status == AuditStatus::Completed {
        spawn_side_channel(&pipeline, &tracker, record.clone(), source);
    }
    Ok(record)
}

fn spawn_side_channel(pipeline: &Pipeline, tracker: &TaskTracker, record: AuditRecord, source: String) {
    let dispatcher = pipeline.dispatcher.clone();
    let anchor = pipeline.anchor.clone();
    if dispatcher.is_none() && anchor.is_none() {
        return;
    }

    tracker.spawn(async move {
        if let Some(dispatcher) = dispatcher {
            dispatcher.dispatch(&record).await;
        }

        let Some(anchor) = anchor else { return };
        let Some(report) = record.report() else { return };
        let audit_text = match serde_json::to_string(&report) {
            Ok(text) => text,
            Err(e) => {
                warn!(audit_id = %record.id, error = %e, "cannot serialize report for anchoring");
                return;
            }
        };
        let request = AnchorRequest {
            id: record.id.clone(),
            submitter: record.submitter_wallet.clone(),
            source,
            audit_text,
        };
        if let Err(e) = anchor.anchor(request).await {
            warn!(audit_id = %record.id, error = %e, "automatic anchoring failed");
            counter!("audit_side_channel_failures_total", "stage" => "anchor").increment(1);
        }
    });
}

async fn run_dispatcher(
    mut queue: mpsc::Receiver<Job>,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
) {
    while let Some(job) = queue.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        debug!(audit_id = %job.audit_id, "deferred audit started");

        let pipeline = pipeline.clone();
        let job_tracker = tracker.clone();
        tracker.spawn(async move {
            let audit_id = job.audit_id.clone();
            if let Err(e) = run_guarded(pipeline, job_tracker, job).await {
                error!(audit_id = %audit_id, error = %e, "deferred audit could not be recorded");
            }
            gauge!("audit_deferred_inflight").decrement(1.0);
            drop(permit);
        });
    }
    debug!("deferred queue closed");
}

pub struct AuditScheduler {
    pipeline: Arc<Pipeline>,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    tracker: TaskTracker,
}

impl AuditScheduler {
    /// Starts the deferred dispatcher. Must be called inside a Tokio runtime.
    pub fn start(pipeline: Pipeline, config: &PipelineConfig) -> Self {
        let pipeline = Arc::new(pipeline);
        let (sender, receiver) = mpsc::channel(config.deferred_queue_depth.max(1));
        let permits = Arc::new(Semaphore::new(config.deferred_concurrency.max(1)));
        let tracker = TaskTracker::new();

        tracker.spawn(run_dispatcher(receiver, pipeline.clone(), permits, tracker.clone()));

        Self {
            pipeline,
            queue: Mutex::new(Some(sender)),
            tracker,
        }
    }

    /// Persists a new audit and runs or enqueues it according to its tier.
    ///
    /// Fails without doing any work if the pending record cannot be stored.
    pub async fn submit(&self, request: &SubmitRequest) -> AuditResult<Submission> {
        let new = NewAudit::from_source(&request.code, &request.wallet, request.email.as_deref());
        let tier = new.tier;
        let record = AuditRecord::pending(new, Utc::now());
        let audit_id = record.id.clone();

        store_call(self.pipeline.call_timeout, self.pipeline.records.create(record.clone())).await?;
        counter!("audit_submitted_total", "tier" => tier.as_str()).increment(1);
        info!(audit_id = %audit_id, %tier, deferred = tier.is_deferred(), "audit submitted");

        let job = Job {
            audit_id,
            source: request.code.clone(),
        };

        if !tier.is_deferred() {
            let finished = launch(self.pipeline.clone(), &self.tracker, job)
                .await
                .map_err(|e| AuditError::Persistence(format!("audit task aborted: {}", e)))??;
            return Ok(Submission::from_record(&finished));
        }

        self.enqueue(job).await?;
        Ok(Submission::from_record(&record))
    }

    async fn enqueue(&self, job: Job) -> AuditResult<()> {
        let audit_id = job.audit_id.clone();
        let sender = self.queue.lock().clone();
        let reason = match sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => {
                    gauge!("audit_deferred_inflight").increment(1.0);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => "deferred queue is full",
                Err(mpsc::error::TrySendError::Closed(_)) => "scheduler is shutting down",
            },
            None => "scheduler is shutting down",
        };

        warn!(audit_id = %audit_id, reason, "deferred audit rejected");
        self.pipeline
            .finish(&audit_id, AuditOutcome::Failed(reason.to_string()))
            .await?;
        Err(AuditError::QueueFull)
    }

    /// Analysis without persistence.
    pub async fn analyze_stateless(&self, source: &str) -> AuditResult<AnalysisReport> {
        self.pipeline.analyze(source).await
    }

    /// Stops accepting deferred work and waits for queued, running and
    /// side-channel tasks to finish.
    pub async fn shutdown(&self) {
        self.queue.lock().take();
        self.tracker.close();
        self.tracker.wait().await;
        info!("scheduler drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::mock::RecordingNotifier;
    use crate::renderer::ReportRenderer;
    use crate::store::InMemoryRecordStore;
    use analysis_integrations::{parse_analysis, MemoryContentStore};
    use async_trait::async_trait;
    use audit_models::ContentHash;
    use ethers::types::Address;
    use provenance_ledger::{AuditLedger, InMemoryLedger};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPLY: &str = r#"{"vulnerabilities":[{"severity":"low","line":2,"issue":"Floating pragma","recommendation":"Pin the compiler"}],"gasOptimizations":{"estimatedGas":50000,"suggestions":[]}}"#;

    enum Behaviour {
        Reply(&'static str),
        Hang,
        Panic,
        Gate(Arc<Semaphore>),
    }

    struct FakeAnalyzer {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeAnalyzer {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze(&self, _source: &str) -> AuditResult<AnalysisReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Reply(raw) => parse_analysis(raw),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Behaviour::Panic => panic!("analyzer exploded"),
                Behaviour::Gate(gate) => {
                    let _open = gate.acquire().await;
                    parse_analysis(REPLY)
                }
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn create(&self, _record: AuditRecord) -> AuditResult<()> {
            Err(AuditError::Persistence("connection refused".into()))
        }
        async fn get(&self, id: &str) -> AuditResult<AuditRecord> {
            Err(AuditError::NotFound(id.to_string()))
        }
        async fn transition(
            &self,
            id: &str,
            _outcome: AuditOutcome,
            _at: chrono::DateTime<Utc>,
        ) -> AuditResult<AuditRecord> {
            Err(AuditError::NotFound(id.to_string()))
        }
        async fn attach_anchor(&self, id: &str, _anchor: audit_models::AnchorReference) -> AuditResult<AuditRecord> {
            Err(AuditError::NotFound(id.to_string()))
        }
        async fn list_by_email(&self, _email: &str) -> AuditResult<Vec<AuditRecord>> {
            Ok(vec![])
        }
    }

    fn source(lines: usize) -> String {
        vec!["uint256 value;"; lines].join("\n")
    }

    fn request(lines: usize) -> SubmitRequest {
        SubmitRequest {
            wallet: "0xabc".to_string(),
            code: source(lines),
            email: Some("dev@example.com".to_string()),
        }
    }

    fn scheduler(records: Arc<InMemoryRecordStore>, analyzer: Arc<FakeAnalyzer>) -> AuditScheduler {
        let pipeline = Pipeline::new(records, analyzer, Duration::from_secs(5));
        AuditScheduler::start(pipeline, &PipelineConfig::default())
    }

    async fn wait_for_terminal(records: &InMemoryRecordStore, id: &str) -> AuditRecord {
        for _ in 0..200 {
            let record = records.get(id).await.unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("audit {} never finished", id);
    }

    #[tokio::test]
    async fn test_small_source_completes_inline() {
        let records = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(records.clone(), FakeAnalyzer::new(Behaviour::Reply(REPLY)));

        let submission = scheduler.submit(&request(50)).await.unwrap();
        assert_eq!(submission.tier, Tier::Light);
        assert_eq!(submission.status, AuditStatus::Completed);
        assert!(submission.error.is_none());

        let record = records.get(&submission.audit_id).await.unwrap();
        assert_eq!(record.status, AuditStatus::Completed);
        assert_eq!(record.findings.as_ref().map(Vec::len), Some(1));
        assert!(record.completed_at.is_some());
        assert_eq!(record.source_hash, ContentHash::of(&source(50)));
    }

    #[tokio::test]
    async fn test_abandoned_inline_submit_still_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(InMemoryRecordStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = ReportDispatcher::new(
            ReportRenderer::new(dir.path()),
            Some(notifier.clone()),
            Duration::from_secs(5),
        );
        let pipeline = Pipeline::new(
            records.clone(),
            FakeAnalyzer::new(Behaviour::Gate(gate.clone())),
            Duration::from_secs(5),
        )
        .with_dispatcher(Arc::new(dispatcher));
        let scheduler = AuditScheduler::start(pipeline, &PipelineConfig::default());

        let abandoned = tokio::time::timeout(Duration::from_millis(50), scheduler.submit(&request(20))).await;
        assert!(abandoned.is_err());
        let pending = records.list_by_email("dev@example.com").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, AuditStatus::Pending);

        gate.add_permits(1);
        scheduler.shutdown().await;

        let record = records.get(&pending[0].id).await.unwrap();
        assert_eq!(record.status, AuditStatus::Completed);
        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, record.id);
    }

    #[tokio::test]
    async fn test_long_source_is_deferred() {
        let records = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(records.clone(), FakeAnalyzer::new(Behaviour::Reply(REPLY)));

        let submission = scheduler.submit(&request(900)).await.unwrap();
        assert_eq!(submission.tier, Tier::Long);
        assert_eq!(submission.status, AuditStatus::Pending);

        let record = wait_for_terminal(&records, &submission.audit_id).await;
        assert_eq!(record.status, AuditStatus::Completed);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_malformed_output_marks_error() {
        let records = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(records.clone(), FakeAnalyzer::new(Behaviour::Reply("no json here")));

        let submission = scheduler.submit(&request(10)).await.unwrap();
        assert_eq!(submission.status, AuditStatus::Error);
        assert!(submission.error.is_some());

        let record = records.get(&submission.audit_id).await.unwrap();
        assert_eq!(record.status, AuditStatus::Error);
        assert!(record.findings.is_none());
        assert!(record.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_persistence_failure_fails_fast() {
        let analyzer = FakeAnalyzer::new(Behaviour::Reply(REPLY));
        let pipeline = Pipeline::new(Arc::new(BrokenStore), analyzer.clone(), Duration::from_secs(5));
        let scheduler = AuditScheduler::start(pipeline, &PipelineConfig::default());

        let result = scheduler.submit(&request(10)).await;
        assert!(matches!(result, Err(AuditError::Persistence(_))));
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_timeout_marks_error() {
        let records = Arc::new(InMemoryRecordStore::new());
        let pipeline = Pipeline::new(
            records.clone(),
            FakeAnalyzer::new(Behaviour::Hang),
            Duration::from_secs(30),
        );
        let scheduler = AuditScheduler::start(pipeline, &PipelineConfig::default());

        let submission = scheduler.submit(&request(10)).await.unwrap();
        assert_eq!(submission.status, AuditStatus::Error);
        assert!(submission.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let records = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(records.clone(), FakeAnalyzer::new(Behaviour::Panic));

        let inline = scheduler.submit(&request(10)).await.unwrap();
        assert_eq!(inline.status, AuditStatus::Error);

        let deferred = scheduler.submit(&request(900)).await.unwrap();
        let record = wait_for_terminal(&records, &deferred.audit_id).await;
        assert_eq!(record.status, AuditStatus::Error);
        assert!(record.error_message.unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn test_full_queue_rejects_and_marks_error() {
        let records = Arc::new(InMemoryRecordStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let pipeline = Pipeline::new(
            records.clone(),
            FakeAnalyzer::new(Behaviour::Gate(gate.clone())),
            Duration::from_secs(60),
        );
        let config = PipelineConfig {
            deferred_concurrency: 1,
            deferred_queue_depth: 1,
            ..PipelineConfig::default()
        };
        let scheduler = AuditScheduler::start(pipeline, &config);

        let mut accepted = Vec::new();
        let mut rejected = false;
        for _ in 0..10 {
            match scheduler.submit(&request(900)).await {
                Ok(submission) => accepted.push(submission.audit_id),
                Err(AuditError::QueueFull) => {
                    rejected = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert!(rejected);

        let still_pending = records
            .list_by_email("dev@example.com")
            .await
            .unwrap()
            .len();
        assert_eq!(still_pending, accepted.len());

        gate.add_permits(100);
        for id in &accepted {
            assert_eq!(wait_for_terminal(&records, id).await.status, AuditStatus::Completed);
        }
        assert_eq!(records.len(), accepted.len() + 1);
    }

    #[tokio::test]
    async fn test_side_channel_failure_keeps_completed() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(InMemoryRecordStore::new());
        let notifier = Arc::new(RecordingNotifier::failing());
        let dispatcher = ReportDispatcher::new(
            ReportRenderer::new(dir.path()),
            Some(notifier.clone()),
            Duration::from_secs(5),
        );
        let pipeline = Pipeline::new(
            records.clone(),
            FakeAnalyzer::new(Behaviour::Reply(REPLY)),
            Duration::from_secs(5),
        )
        .with_dispatcher(Arc::new(dispatcher));
        let scheduler = AuditScheduler::start(pipeline, &PipelineConfig::default());

        let submission = scheduler.submit(&request(20)).await.unwrap();
        scheduler.shutdown().await;

        assert_eq!(submission.status, AuditStatus::Completed);
        assert_eq!(notifier.sent.lock().len(), 1);
        let record = records.get(&submission.audit_id).await.unwrap();
        assert_eq!(record.status, AuditStatus::Completed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_after_completion_anchoring() {
        let records = Arc::new(InMemoryRecordStore::new());
        let ledger = InMemoryLedger::deploy();
        let signer = Address::repeat_byte(0x07);
        let anchor = ProvenanceAnchor::new(
            records.clone(),
            Arc::new(MemoryContentStore::new()),
            Arc::new(ledger.connect(signer)),
            Duration::from_secs(5),
        );
        let pipeline = Pipeline::new(
            records.clone(),
            FakeAnalyzer::new(Behaviour::Reply(REPLY)),
            Duration::from_secs(5),
        )
        .with_anchor(Arc::new(anchor));
        let scheduler = AuditScheduler::start(pipeline, &PipelineConfig::default());

        let submission = scheduler.submit(&request(20)).await.unwrap();
        scheduler.shutdown().await;

        let record = records.get(&submission.audit_id).await.unwrap();
        assert_eq!(record.status, AuditStatus::Completed);
        assert!(record.is_anchored());

        let entry = ledger
            .connect(signer)
            .get_audit(signer, record.source_hash)
            .await
            .unwrap();
        assert_eq!(Some(entry.locator), record.content_locator);
    }

    #[tokio::test]
    async fn test_deferred_submit_after_shutdown_is_rejected() {
        let records = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(records.clone(), FakeAnalyzer::new(Behaviour::Reply(REPLY)));
        scheduler.shutdown().await;

        let result = scheduler.submit(&request(900)).await;
        assert!(matches!(result, Err(AuditError::QueueFull)));
        assert!(records.list_by_email("dev@example.com").await.unwrap().is_empty());
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_stateless_analysis_persists_nothing() {
        let records = Arc::new(InMemoryRecordStore::new());
        let scheduler = scheduler(records.clone(), FakeAnalyzer::new(Behaviour::Reply(REPLY)));

        let report = scheduler.analyze_stateless(&source(5)).await.unwrap();
        assert_eq!(report.vulnerabilities.len(), 1);
        assert!(records.is_empty());
    }
}
