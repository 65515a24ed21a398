//! Exception notification pipeline.
//!
//! This crate provides:
//! - `Notifier`, which gates a captured exception through silent mode,
//!   crawler filtering, same-day deduplication and the capture list
//! - `MailTransport`, `Formatter` and `ErrorLogger` collaborator traits
//! - An SMTP transport via `lettre` and a minijinja HTML formatter

pub mod bot;
pub mod capture;
pub mod email;
pub mod error;
pub mod formatter;
pub mod notifier;
pub mod traits;

pub use error::CaptureError;
pub use notifier::{Notifier, NotifierBuilder, Outcome};
pub use traits::{ErrorLogger, Formatter, MailTransport, TracingLogger};
