use tattle_core::ConfigError;
use tattle_ledger::LedgerError;

/// Failures inside the notification pipeline itself.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Mail delivery failed: {0}")]
    Transport(String),

    #[error("Template rendering failed: {0}")]
    Format(String),
}

impl CaptureError {
    /// Short name of the failure class, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Config(_) => "ConfigurationError",
            CaptureError::Ledger(_) => "LedgerIOError",
            CaptureError::Transport(_) => "TransportError",
            CaptureError::Format(_) => "FormatterError",
        }
    }
}
