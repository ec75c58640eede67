use async_trait::async_trait;
use audit_models::{AuditError, AuditRecord, AuditResult};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use metrics::counter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SmtpConfig;
use crate::renderer::ReportRenderer;
use crate::timeouts::external_call;

const SERVICE: &str = "email";

/// Delivery of a rendered report to the submitter.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_report(&self, recipient: &str, audit_id: &str, document: &Path) -> AuditResult<()>;
}

pub fn subject(audit_id: &str) -> String {
    format!("Audit Report - {}", audit_id)
}

pub fn attachment_name(audit_id: &str) -> String {
    format!("audit-{}.pdf", audit_id)
}

fn parse_mailbox(address: &str) -> AuditResult<Mailbox> {
    address
        .parse::<Mailbox>()
        .map_err(|e| AuditError::external(SERVICE, format!("invalid address '{}': {}", address, e)))
}

/// Builds the report email: plain-text body plus the PDF attachment.
pub fn build_message(from: &str, recipient: &str, audit_id: &str, pdf: Vec<u8>) -> AuditResult<Message> {
    let content_type = ContentType::parse("application/pdf")
        .map_err(|e| AuditError::external(SERVICE, e.to_string()))?;
    let body = format!(
        "Hello,\n\nThe audit {} has completed. The full report is attached.\n",
        audit_id
    );

    Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(recipient)?)
        .subject(subject(audit_id))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(body))
                .singlepart(Attachment::new(attachment_name(audit_id)).body(pdf, content_type)),
        )
        .map_err(|e| AuditError::external(SERVICE, e.to_string()))
}

/// Sends reports over authenticated SMTP.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> AuditResult<Self> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| AuditError::external(SERVICE, e.to_string()))?
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from: config.from.clone().unwrap_or_else(|| config.username.clone()),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_report(&self, recipient: &str, audit_id: &str, document: &Path) -> AuditResult<()> {
        let pdf = tokio::fs::read(document)
            .await
            .map_err(|e| AuditError::Render(format!("cannot read rendered report: {}", e)))?;
        let message = build_message(&self.from, recipient, audit_id, pdf)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AuditError::external(SERVICE, e.to_string()))?;

        info!(audit_id, recipient, "report emailed");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Skipped,
    Failed,
}

/// Best-effort side channel: render the report, send it, remove the file.
///
/// Never returns an error. Failures are logged and counted, and the record
/// is not touched.
pub struct ReportDispatcher {
    renderer: ReportRenderer,
    notifier: Option<Arc<dyn Notifier>>,
    call_timeout: Duration,
}

impl ReportDispatcher {
    pub fn new(renderer: ReportRenderer, notifier: Option<Arc<dyn Notifier>>, call_timeout: Duration) -> Self {
        Self {
            renderer,
            notifier,
            call_timeout,
        }
    }

    pub async fn dispatch(&self, record: &AuditRecord) -> DispatchOutcome {
        let (Some(notifier), Some(recipient), Some(report)) =
            (&self.notifier, record.submitter_email.as_deref(), record.report())
        else {
            debug!(audit_id = %record.id, "no notification to send");
            return DispatchOutcome::Skipped;
        };

        let rendered = match self.renderer.render_async(&record.id, &report).await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(audit_id = %record.id, error = %e, "report rendering failed");
                counter!("audit_side_channel_failures_total", "stage" => "render").increment(1);
                return DispatchOutcome::Failed;
            }
        };

        let sent = external_call(
            SERVICE,
            self.call_timeout,
            notifier.send_report(recipient, &record.id, rendered.path()),
        )
        .await;

        if let Err(e) = rendered.cleanup() {
            warn!(audit_id = %record.id, error = %e, "report file left behind");
        }

        match sent {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                warn!(audit_id = %record.id, error = %e, "report delivery failed");
                counter!("audit_side_channel_failures_total", "stage" => "notify").increment(1);
                DispatchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// Records every delivery attempt, including whether the document existed at send time.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub fail: bool,
        pub sent: Mutex<Vec<(String, String, PathBuf, bool)>>,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_report(&self, recipient: &str, audit_id: &str, document: &Path) -> AuditResult<()> {
            self.sent.lock().push((
                recipient.to_string(),
                audit_id.to_string(),
                document.to_path_buf(),
                document.exists(),
            ));
            if self.fail {
                return Err(AuditError::external(SERVICE, "smtp connection refused"));
            }
            Ok(())
        }
    }
}
