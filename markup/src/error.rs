//! Failure kinds the conversation layer branches on.

use std::time::Duration;

use thiserror::Error;

use crate::core::content_scan::ContentFinding;
use crate::core::guard::GuardFailure;

/// Phase of a run bounded by a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Patching,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Patching => "patching",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Guard(#[from] GuardFailure),

    #[error("edit content rejected: {}", render_findings(.0))]
    UnsafeContent(Vec<ContentFinding>),

    #[error("{} timed out after {}s", .phase.as_str(), .after.as_secs())]
    Timeout { phase: Phase, after: Duration },

    #[error("generation agent error: {0}")]
    Agent(String),

    #[error("generation agent produced no edits, even with a wider context")]
    NoEdits,

    #[error("creating new files is not supported: {}", .0.join(", "))]
    NewFileNotAllowed(Vec<String>),

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }
}

fn render_findings(findings: &[ContentFinding]) -> String {
    findings
        .iter()
        .map(|f| format!("{} ({})", f.path, f.description))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
