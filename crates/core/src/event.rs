//! The captured exception record handed to the notifier.

use std::panic::Location;

use serde::{Deserialize, Serialize};

/// Request metadata attached to an exception raised while serving HTTP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Raw `User-Agent` header, used for crawler filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// A captured application error.
///
/// `kind` plays the role of a class name: it is matched against the capture
/// list and looked up in the [`TypeRegistry`](crate::TypeRegistry) for
/// subtype checks. Once built, an event is only ever borrowed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEvent {
    pub kind: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    /// Rendered stack frames or error-chain entries, outermost first.
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
}

impl ExceptionEvent {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            file: file.into(),
            line,
            trace: Vec::new(),
            request: None,
        }
    }

    /// Build an event from a Rust error value, locating it at the call site.
    ///
    /// The kind is the unqualified type name of `E`; the error's `source()`
    /// chain becomes the trace.
    #[track_caller]
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let caller = Location::caller();
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        Self {
            kind: short_type_name::<E>().to_string(),
            message: err.to_string(),
            file: caller.file().to_string(),
            line: caller.line(),
            trace,
            request: None,
        }
    }

    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.request
            .get_or_insert_with(RequestInfo::default)
            .user_agent = Some(user_agent.into());
        self
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    /// User agent of the originating request, if there was one.
    pub fn user_agent(&self) -> Option<&str> {
        self.request.as_ref()?.user_agent.as_deref()
    }

    /// `file:line` of the throw site.
    pub fn location(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

/// `std::any::type_name` without the module path or generic arguments.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
