//! Collaborators the notifier calls out to.

use tattle_core::ExceptionEvent;

use crate::error::CaptureError;

/// Delivers a rendered notification to a set of recipients.
#[async_trait::async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), CaptureError>;

    /// Human-readable name for this transport (e.g. "smtp").
    fn channel_name(&self) -> &str;
}

/// Turns an exception into a mail subject and an HTML body.
pub trait Formatter: Send + Sync {
    fn to_subject(&self, event: &ExceptionEvent) -> Result<String, CaptureError>;

    fn to_body(&self, event: &ExceptionEvent) -> Result<String, CaptureError>;
}

/// Sink for failures of the notifier itself. Never used for business events.
pub trait ErrorLogger: Send + Sync {
    fn error(&self, message: &str);
}

/// Forwards to `tracing::error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ErrorLogger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "tattle", "{message}");
    }
}
