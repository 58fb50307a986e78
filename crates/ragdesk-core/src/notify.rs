//! Presentation-free results of session actions.
//!
//! Session operations never display anything themselves. They return an
//! `Outcome` carrying the `Notice` a front end should show, and the front end
//! hands it to whatever `Notifier` it owns.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

/// A transient user-facing message: `{title, message, type}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NoticeKind,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            title: "Success".to_string(),
            message: message.into(),
            kind: NoticeKind::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            title: "Error".to_string(),
            message: message.into(),
            kind: NoticeKind::Error,
        }
    }
}

/// Why a session action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The server refused the credentials or the payload
    Rejected,
    /// The server could not be reached or did not answer in time
    Unreachable,
    /// The server answered with a 5xx or throttled the request
    Server,
    /// The server answered 2xx with a body we could not use
    InvalidResponse,
    /// The token could not be written to durable storage
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded(Notice),
    Failed { reason: FailureReason, notice: Notice },
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Outcome::Succeeded(Notice::success(message))
    }

    pub fn failure(reason: FailureReason, message: impl Into<String>) -> Self {
        Outcome::Failed {
            reason,
            notice: Notice::error(message),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn notice(&self) -> &Notice {
        match self {
            Outcome::Succeeded(notice) | Outcome::Failed { notice, .. } => notice,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Outcome::Succeeded(_) => None,
            Outcome::Failed { reason, .. } => Some(*reason),
        }
    }
}

/// Fire-and-forget notification surface.
pub trait Notifier {
    fn notify(&self, notice: &Notice);
}
