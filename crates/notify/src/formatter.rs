//! Minijinja rendering of exception mails.
//!
//! Templates are plain strings (built-in defaults or `[template]` overrides),
//! so a fresh [`minijinja::Environment`] is created per render call. The body
//! is HTML-escaped; the subject is not, and is folded onto one line.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use minijinja::AutoEscape;
use serde::Serialize;
use tattle_core::config::TemplateConfig;
use tattle_core::{Clock, ExceptionEvent, RequestInfo, SystemClock};

use crate::error::CaptureError;
use crate::traits::Formatter;

const MAX_SUBJECT_CHARS: usize = 200;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_SUBJECT: &str = "{{ kind }}: {{ message }} ({{ file | basename }}:{{ line }})";

pub const DEFAULT_BODY: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ kind }}</title></head>
<body style="font-family: sans-serif; color: #222;">
  <h2 style="color: #b00020;">{{ kind }}</h2>
  <p style="font-size: 1.1em;">{{ message }}</p>
  <table cellpadding="4">
    <tr><th align="left">Location</th><td><code>{{ file }}:{{ line }}</code></td></tr>
    <tr><th align="left">Time</th><td>{{ now }}</td></tr>
    {%- if request %}
    {%- if request.url %}
    <tr><th align="left">Request</th><td>{% if request.method %}{{ request.method }} {% endif %}{{ request.url }}</td></tr>
    {%- endif %}
    {%- if request.user_agent %}
    <tr><th align="left">User agent</th><td>{{ request.user_agent }}</td></tr>
    {%- endif %}
    {%- endif %}
  </table>
  {%- if trace %}
  <h3>Trace</h3>
  <ol>
    {%- for frame in trace %}
    <li><code>{{ frame }}</code></li>
    {%- endfor %}
  </ol>
  {%- endif %}
</body>
</html>
"#;

/// Values exposed to templates.
#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    kind: &'a str,
    message: &'a str,
    file: &'a str,
    line: u32,
    trace: &'a [String],
    request: Option<&'a RequestInfo>,
    /// Render time, local wall clock.
    now: String,
}

impl<'a> TemplateContext<'a> {
    fn new(event: &'a ExceptionEvent, now: NaiveDateTime) -> Self {
        Self {
            kind: &event.kind,
            message: &event.message,
            file: &event.file,
            line: event.line,
            trace: &event.trace,
            request: event.request.as_ref(),
            now: now.format(TIME_FORMAT).to_string(),
        }
    }
}

/// Default [`Formatter`]: subject line plus an HTML report.
#[derive(Clone)]
pub struct HtmlFormatter {
    subject: String,
    body: String,
    clock: Arc<dyn Clock>,
}

impl HtmlFormatter {
    /// Formatter with the built-in templates.
    pub fn new() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Take the report time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Formatter with custom templates, checked for syntax errors up front.
    pub fn with_templates(
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, CaptureError> {
        let formatter = Self {
            subject: subject.into(),
            body: body.into(),
            clock: Arc::new(SystemClock),
        };
        Self::validate(&formatter.subject)?;
        Self::validate(&formatter.body)?;
        Ok(formatter)
    }

    /// Apply `[template]` overrides on top of the defaults.
    pub fn from_config(config: &TemplateConfig) -> Result<Self, CaptureError> {
        Self::with_templates(
            config.subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
            config.body.as_deref().unwrap_or(DEFAULT_BODY),
        )
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(template_str: &str) -> Result<(), CaptureError> {
        let env = Self::build_env(AutoEscape::None);
        env.template_from_str(template_str)
            .map_err(|e| CaptureError::Format(e.to_string()))?;
        Ok(())
    }

    fn build_env(escape: AutoEscape) -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.set_auto_escape_callback(move |_name: &str| escape.clone());
        env.add_filter("basename", basename_filter);
        env
    }

    fn render(
        &self,
        template_str: &str,
        event: &ExceptionEvent,
        escape: AutoEscape,
    ) -> Result<String, CaptureError> {
        let env = Self::build_env(escape);
        env.render_str(template_str, TemplateContext::new(event, self.clock.now()))
            .map_err(|e| CaptureError::Format(e.to_string()))
    }
}

impl fmt::Debug for HtmlFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlFormatter")
            .field("subject", &self.subject)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Default for HtmlFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for HtmlFormatter {
    fn to_subject(&self, event: &ExceptionEvent) -> Result<String, CaptureError> {
        let rendered = self.render(&self.subject, event, AutoEscape::None)?;
        Ok(fold_subject(&rendered))
    }

    fn to_body(&self, event: &ExceptionEvent) -> Result<String, CaptureError> {
        self.render(&self.body, event, AutoEscape::Html)
    }
}

/// Collapse whitespace runs (including newlines) and cap the length.
fn fold_subject(raw: &str) -> String {
    let folded = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if folded.chars().count() <= MAX_SUBJECT_CHARS {
        return folded;
    }
    let mut cut: String = folded.chars().take(MAX_SUBJECT_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Custom filter: last path component, for either separator.
fn basename_filter(value: String) -> String {
    value
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(value.as_str())
        .to_string()
}
