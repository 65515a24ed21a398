//! The capture pipeline.
//!
//! Each captured exception passes four gates in order, and the first one
//! that rejects it ends processing:
//!
//! 1. silent mode
//! 2. crawler user agent
//! 3. same-day duplicate (recorded in the ledger on first sight)
//! 4. capture list
//!
//! Survivors are formatted and handed to the mail transport. Failures of the
//! pipeline itself are logged through the [`ErrorLogger`] and, unless the
//! caller asks for them, swallowed.

use std::sync::{Arc, OnceLock};

use tattle_core::config::keys;
use tattle_core::{
    Clock, ConfigError, ConfigProvider, ExceptionEvent, NotifierConfig, SystemClock, TypeRegistry,
};
use tattle_ledger::{day_key, DuplicateLedger, Fingerprint, LedgerError, Occurrence};
use tracing::{debug, info};

use crate::bot::is_from_bot;
use crate::capture::matches_capture_list;
use crate::error::CaptureError;
use crate::formatter::HtmlFormatter;
use crate::traits::{ErrorLogger, Formatter, MailTransport, TracingLogger};

/// What happened to a captured exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Silent,
    Bot,
    Duplicate,
    NotCaptured,
    Sent,
    /// The pipeline failed; the error was logged and swallowed.
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Silent => "silent",
            Outcome::Bot => "bot",
            Outcome::Duplicate => "duplicate",
            Outcome::NotCaptured => "not_captured",
            Outcome::Sent => "sent",
            Outcome::Failed => "failed",
        }
    }
}

pub struct Notifier {
    config: Arc<dyn ConfigProvider>,
    ledger: Arc<DuplicateLedger>,
    transport: Arc<dyn MailTransport>,
    formatter: Arc<dyn Formatter>,
    logger: Arc<dyn ErrorLogger>,
    clock: Arc<dyn Clock>,
    /// Resolved when built; if that failed, on the first capture that
    /// gets past the silent check.
    types: OnceLock<TypeRegistry>,
}

impl Notifier {
    /// Start building a notifier from its required collaborators.
    pub fn builder(
        config: Arc<dyn ConfigProvider>,
        ledger: Arc<DuplicateLedger>,
        transport: Arc<dyn MailTransport>,
    ) -> NotifierBuilder {
        NotifierBuilder {
            config,
            ledger,
            transport,
            formatter: None,
            logger: None,
            clock: None,
        }
    }

    /// Run an exception through the pipeline.
    ///
    /// Internal failures are always logged once. With `propagate` they are
    /// then returned; otherwise the call reports [`Outcome::Failed`].
    pub async fn capture_exception(
        &self,
        event: &ExceptionEvent,
        propagate: bool,
    ) -> Result<Outcome, CaptureError> {
        match self.run(event).await {
            Ok(outcome) => {
                debug!(kind = %event.kind, outcome = outcome.as_str(), "exception processed");
                Ok(outcome)
            }
            Err(err) => {
                self.logger.error(&format!(
                    "Failed to capture {} exception ({}: {})",
                    event.kind,
                    err.kind(),
                    err
                ));
                if propagate {
                    Err(err)
                } else {
                    Ok(Outcome::Failed)
                }
            }
        }
    }

    /// [`capture_exception`](Self::capture_exception) without propagation.
    pub async fn capture(&self, event: &ExceptionEvent) -> Outcome {
        self.capture_exception(event, false)
            .await
            .unwrap_or(Outcome::Failed)
    }

    /// Send a fixed test report to the configured recipients, bypassing
    /// every gate. Errors are returned, not logged.
    pub async fn send_test(&self) -> Result<(), CaptureError> {
        let config = NotifierConfig::from_provider(&*self.config)?;
        let event = ExceptionEvent::new(
            "TattleTest",
            "This is a test notification from tattle.",
            file!(),
            line!(),
        );
        self.send(&event, &config.recipients).await
    }

    async fn run(&self, event: &ExceptionEvent) -> Result<Outcome, CaptureError> {
        // Only the flag is read here: a silent notifier has no side effects,
        // even when the rest of the config is broken.
        if NotifierConfig::is_silent(&*self.config)? {
            return Ok(Outcome::Silent);
        }

        let config = NotifierConfig::from_provider(&*self.config)?;

        if is_from_bot(event.user_agent(), &config.ignored_bots) {
            return Ok(Outcome::Bot);
        }

        // Duplicate suppression wins over the capture list, wildcard included.
        if self.is_duplicate(event, &config).await? {
            return Ok(Outcome::Duplicate);
        }

        if !matches_capture_list(&event.kind, &config.capture, self.types()?) {
            return Ok(Outcome::NotCaptured);
        }

        self.send(event, &config.recipients).await?;
        Ok(Outcome::Sent)
    }

    /// Whether `event` was already seen today.
    ///
    /// A first occurrence is recorded in the same atomic step, so exactly
    /// one caller per fingerprint and day gets `false`. Always `false` when
    /// deduplication is disabled.
    pub async fn is_duplicate(
        &self,
        event: &ExceptionEvent,
        config: &NotifierConfig,
    ) -> Result<bool, CaptureError> {
        if !config.ignore_duplicates {
            return Ok(false);
        }

        let fingerprint = Fingerprint::of(event);
        let day = day_key(self.clock.today());
        let ledger = Arc::clone(&self.ledger);

        // Ledger I/O and lock polling block.
        let occurrence = tokio::task::spawn_blocking(move || ledger.check_and_insert(&day, &fingerprint))
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))??;

        Ok(occurrence == Occurrence::Repeat)
    }

    fn types(&self) -> Result<&TypeRegistry, ConfigError> {
        if let Some(types) = self.types.get() {
            return Ok(types);
        }
        let resolved = TypeRegistry::from_provider(&*self.config)?;
        Ok(self.types.get_or_init(|| resolved))
    }

    async fn send(&self, event: &ExceptionEvent, recipients: &[String]) -> Result<(), CaptureError> {
        if recipients.is_empty() {
            return Err(ConfigError::Missing(keys::RECIPIENTS.to_string()).into());
        }

        let subject = self.formatter.to_subject(event)?;
        let body = self.formatter.to_body(event)?;
        self.transport.deliver(recipients, &subject, &body).await?;

        info!(
            kind = %event.kind,
            location = %event.location(),
            channel = self.transport.channel_name(),
            recipients = recipients.len(),
            "exception notification sent"
        );
        Ok(())
    }
}

/// Builder for [`Notifier`]; optional collaborators fall back to
/// [`HtmlFormatter`], [`TracingLogger`] and [`SystemClock`]. The default
/// formatter shares the notifier's clock.
pub struct NotifierBuilder {
    config: Arc<dyn ConfigProvider>,
    ledger: Arc<DuplicateLedger>,
    transport: Arc<dyn MailTransport>,
    formatter: Option<Arc<dyn Formatter>>,
    logger: Option<Arc<dyn ErrorLogger>>,
    clock: Option<Arc<dyn Clock>>,
}

impl NotifierBuilder {
    pub fn formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Notifier {
        // A bad [notifier.types] section is reported through the normal
        // capture error path, not here.
        let types = OnceLock::new();
        match TypeRegistry::from_provider(&*self.config) {
            Ok(registry) => {
                debug!(kinds = registry.len(), "exception type registry resolved");
                let _ = types.set(registry);
            }
            Err(e) => debug!(error = %e, "exception type registry not resolved"),
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let formatter = self.formatter.unwrap_or_else(|| {
            Arc::new(HtmlFormatter::new().with_clock(Arc::clone(&clock)))
        });

        Notifier {
            config: self.config,
            ledger: self.ledger,
            transport: self.transport,
            formatter,
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            clock,
            types,
        }
    }
}
