//! User-facing chat text, rendered from embedded templates.

use std::time::Duration;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::{Plan, RunOutcome, RunStatus};
use crate::error::Phase;

const PLAN_TEMPLATE: &str = include_str!("templates/plan.md");
const CLARIFICATION_TEMPLATE: &str = include_str!("templates/clarification.md");
const REVISION_TEMPLATE: &str = include_str!("templates/revision.md");
const DONE_TEMPLATE: &str = include_str!("templates/done.md");
const FAILURE_TEMPLATE: &str = include_str!("templates/failure.md");
const TIMEOUT_TEMPLATE: &str = include_str!("templates/timeout.md");
const NOTICE_TEMPLATE: &str = include_str!("templates/notice.md");

/// Short status reply that never changes run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Planning,
    Patching,
    StillWorking(RunStatus),
    UseButtons,
    Finished(RunStatus),
    NotAwaitingApproval(RunStatus),
    EmptyRequest,
    RunNotFound,
}

impl Notice {
    fn kind(self) -> &'static str {
        match self {
            Notice::Planning => "planning",
            Notice::Patching => "patching",
            Notice::StillWorking(_) => "still_working",
            Notice::UseButtons => "use_buttons",
            Notice::Finished(_) => "finished",
            Notice::NotAwaitingApproval(_) => "not_awaiting_approval",
            Notice::EmptyRequest => "empty_request",
            Notice::RunNotFound => "not_found",
        }
    }

    fn status(self) -> Option<RunStatus> {
        match self {
            Notice::StillWorking(s)
            | Notice::Finished(s)
            | Notice::NotAwaitingApproval(s) => Some(s),
            _ => None,
        }
    }
}

/// Human form of a status: `AWAITING_APPROVAL` -> `awaiting approval`.
pub fn status_label(status: RunStatus) -> String {
    status.as_str().to_ascii_lowercase().replace('_', " ")
}

pub struct Messages {
    env: Environment<'static>,
}

impl Default for Messages {
    fn default() -> Self {
        Self::new()
    }
}

impl Messages {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in [
            ("plan", PLAN_TEMPLATE),
            ("clarification", CLARIFICATION_TEMPLATE),
            ("revision", REVISION_TEMPLATE),
            ("done", DONE_TEMPLATE),
            ("failure", FAILURE_TEMPLATE),
            ("timeout", TIMEOUT_TEMPLATE),
            ("notice", NOTICE_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("message template should be valid");
        }
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        Ok(rendered.trim().to_string())
    }

    pub fn plan_proposal(&self, plan: &Plan) -> Result<String> {
        let confidence = (plan.confidence.clamp(0.0, 1.0) * 100.0).round() as u32;
        self.render(
            "plan",
            context! {
                summary => plan.summary.trim(),
                target_paths => &plan.target_paths,
                target_url_path => plan.target_url_path.as_deref().filter(|p| !p.trim().is_empty()),
                risks => &plan.risks,
                confidence => confidence,
            },
        )
    }

    pub fn clarification(&self, plan: &Plan) -> Result<String> {
        let summary = plan.summary.trim();
        self.render(
            "clarification",
            context! {
                summary => (!summary.is_empty()).then_some(summary),
                questions => &plan.open_questions,
            },
        )
    }

    pub fn revision_prompt(&self) -> Result<String> {
        self.render("revision", context! {})
    }

    pub fn done(&self, outcome: &RunOutcome) -> Result<String> {
        self.render(
            "done",
            context! {
                summary => outcome.summary.trim(),
                merge_request_url => &outcome.merge_request_url,
                preview_url => outcome.preview_url.as_deref(),
                files => &outcome.files_changed,
            },
        )
    }

    pub fn failure(&self, error: &str, hint: Option<&str>) -> Result<String> {
        self.render("failure", context! { error => error.trim(), hint => hint })
    }

    /// `branch` names a commit that landed before the deadline fired.
    pub fn timeout(&self, phase: Phase, after: Duration, branch: Option<&str>) -> Result<String> {
        self.render(
            "timeout",
            context! { phase => phase.as_str(), secs => after.as_secs(), branch => branch },
        )
    }

    pub fn notice(&self, notice: Notice) -> Result<String> {
        self.render(
            "notice",
            context! {
                kind => notice.kind(),
                status => notice.status().map(status_label),
            },
        )
    }
}
