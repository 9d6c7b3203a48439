//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between core components and the
//! collaborator adapters. They carry no I/O and serialize to the persisted run
//! shape unchanged.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Planning,
    AwaitingClarification,
    AwaitingApproval,
    AwaitingRevision,
    Patching,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Planning => "PLANNING",
            RunStatus::AwaitingClarification => "AWAITING_CLARIFICATION",
            RunStatus::AwaitingApproval => "AWAITING_APPROVAL",
            RunStatus::AwaitingRevision => "AWAITING_REVISION",
            RunStatus::Patching => "PATCHING",
            RunStatus::Done => "DONE",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Parse the persisted status string.
    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw {
            "PLANNING" => RunStatus::Planning,
            "AWAITING_CLARIFICATION" => RunStatus::AwaitingClarification,
            "AWAITING_APPROVAL" => RunStatus::AwaitingApproval,
            "AWAITING_REVISION" => RunStatus::AwaitingRevision,
            "PATCHING" => RunStatus::Patching,
            "DONE" => RunStatus::Done,
            "FAILED" => RunStatus::Failed,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured plan returned by the generation agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    pub summary: String,
    pub target_paths: Vec<String>,
    pub target_url_path: Option<String>,
    pub open_questions: Vec<String>,
    pub risks: Vec<String>,
    /// Agent-reported confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Full-content replacement of one existing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

impl FileEdit {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Edits proposed by the generation agent for an approved plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchResult {
    pub summary: String,
    pub edits: Vec<FileEdit>,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub branch: String,
    pub merge_request_url: String,
    pub preview_url: Option<String>,
    pub summary: String,
    pub files_changed: Vec<String>,
}

/// One tracked conversation, from first mention to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub thread_key: String,
    pub channel: String,
    /// Original request plus appended clarification and revision lines.
    pub request: String,
    pub status: RunStatus,
    pub plan: Option<Plan>,
    pub outcome: Option<RunOutcome>,
    pub error: Option<String>,
    /// Bumped on every mutation; used to discard superseded phase results.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update merged onto a run. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub request: Option<String>,
    pub plan: Option<Plan>,
    pub outcome: Option<RunOutcome>,
    pub error: Option<String>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_request(mut self, request: String) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_outcome(mut self, outcome: RunOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl Run {
    pub fn new(run_id: &str, thread_key: &str, channel: &str, request: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            thread_key: thread_key.to_string(),
            channel: channel.to_string(),
            request: request.to_string(),
            status: RunStatus::Planning,
            plan: None,
            outcome: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `patch` onto the run, refreshing `updated_at` and `version`.
    pub fn apply(&mut self, patch: RunPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(request) = patch.request {
            self.request = request;
        }
        if let Some(plan) = patch.plan {
            self.plan = Some(plan);
        }
        if let Some(outcome) = patch.outcome {
            self.outcome = Some(outcome);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Convert to the persisted row shape.
    pub fn to_record(&self) -> serde_json::Result<RunRecord> {
        Ok(RunRecord {
            id: self.run_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            state: serde_json::to_value(self)?,
            status: self.status.as_str().to_string(),
        })
    }

    pub fn from_record(record: &RunRecord) -> serde_json::Result<Self> {
        serde_json::from_value(record.state.clone())
    }
}

/// Row shape of the `runs` table used by durable deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: serde_json::Value,
    pub status: String,
}
