//! Where handler failures go.
//!
//! The dispatcher never lets a handler failure reach the transport. It turns
//! the failure into a `500` or `504` and hands a [`DispatchFailure`] to the
//! configured [`FailureReporter`]. The default reporter emits a
//! `tracing::error!` event.

use std::fmt;
use std::time::Duration;

use tracing::error;

use crate::http::Method;

/// Why a dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The handler returned `Err`.
    Error(String),
    /// The handler panicked.
    Panic(String),
    /// The handler exceeded the configured deadline.
    Timeout(Duration),
    /// The handler task was cancelled before it completed.
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(detail) => write!(f, "handler returned an error: {detail}"),
            Self::Panic(detail) => write!(f, "handler panicked: {detail}"),
            Self::Timeout(limit) => write!(f, "handler exceeded its deadline of {limit:?}"),
            Self::Aborted => f.write_str("handler task was aborted"),
        }
    }
}

/// Diagnostic record of one failed dispatch.
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub method: Method,
    pub path: String,
    /// Canonical pattern of the matched route; `None` for the fallback handler.
    pub pattern: Option<String>,
    pub kind: FailureKind,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if let Some(pattern) = &self.pattern {
            write!(f, " (route {pattern})")?;
        }
        write!(f, ": {}", self.kind)
    }
}

/// Receives every handler failure caught at the dispatch boundary.
///
/// Implementations must be cheap and must not block; they run on the
/// dispatching task.
pub trait FailureReporter: Send + Sync + 'static {
    fn report(&self, failure: &DispatchFailure);
}

/// Logs failures as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, failure: &DispatchFailure) {
        error!(
            method = %failure.method,
            path = %failure.path,
            pattern = failure.pattern.as_deref().unwrap_or("-"),
            failure = %failure.kind,
            "handler failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_includes_route() {
        let failure = DispatchFailure {
            method: Method::Get,
            path: "/users/7".to_owned(),
            pattern: Some("/users/{id}".to_owned()),
            kind: FailureKind::Panic("boom".to_owned()),
        };
        assert_eq!(
            failure.to_string(),
            "GET /users/7 (route /users/{id}): handler panicked: boom"
        );
    }

    #[test]
    fn fallback_failure_omits_route() {
        let failure = DispatchFailure {
            method: Method::Post,
            path: "/nowhere".to_owned(),
            pattern: None,
            kind: FailureKind::Error("nope".to_owned()),
        };
        assert_eq!(
            failure.to_string(),
            "POST /nowhere: handler returned an error: nope"
        );
    }
}
