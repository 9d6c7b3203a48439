//! Legal run status transitions.
//!
//! Handlers consult [`next_status`] before mutating a run so that an action
//! arriving in the wrong state is rejected instead of force-applied.

use std::fmt;

use thiserror::Error;

use crate::core::types::RunStatus;

/// Something that happened to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// Planning finished; `has_questions` when the plan carries open questions.
    PlanReady { has_questions: bool },
    /// The user answered the agent's questions in the thread.
    ClarificationReceived,
    /// The user pressed approve.
    Approved,
    /// The user pressed revise.
    RevisionRequested,
    /// The user described the revision in the thread.
    RevisionReceived,
    /// Edits were committed and a merge request opened.
    PatchCommitted,
    /// The current phase failed or timed out.
    PhaseFailed,
}

impl RunEvent {
    pub fn label(self) -> &'static str {
        match self {
            RunEvent::PlanReady { .. } => "plan_ready",
            RunEvent::ClarificationReceived => "clarification_received",
            RunEvent::Approved => "approved",
            RunEvent::RevisionRequested => "revision_requested",
            RunEvent::RevisionReceived => "revision_received",
            RunEvent::PatchCommitted => "patch_committed",
            RunEvent::PhaseFailed => "phase_failed",
        }
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("event '{event}' is not allowed while run is {from}")]
    NotAllowed { from: RunStatus, event: RunEvent },
}

/// Status a run moves to when `event` happens in `current`.
pub fn next_status(current: RunStatus, event: RunEvent) -> Result<RunStatus, TransitionError> {
    use RunStatus as S;

    let next = match (current, event) {
        (S::Planning, RunEvent::PlanReady { has_questions: true }) => S::AwaitingClarification,
        (S::Planning, RunEvent::PlanReady { has_questions: false }) => S::AwaitingApproval,
        (S::Planning, RunEvent::PhaseFailed) => S::Failed,
        (S::AwaitingClarification, RunEvent::ClarificationReceived) => S::Planning,
        (S::AwaitingApproval, RunEvent::Approved) => S::Patching,
        (S::AwaitingApproval, RunEvent::RevisionRequested) => S::AwaitingRevision,
        (S::AwaitingRevision, RunEvent::RevisionReceived) => S::Planning,
        (S::Patching, RunEvent::PatchCommitted) => S::Done,
        (S::Patching, RunEvent::PhaseFailed) => S::Failed,
        (from, event) => return Err(TransitionError::NotAllowed { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [RunStatus; 7] = [
        RunStatus::Planning,
        RunStatus::AwaitingClarification,
        RunStatus::AwaitingApproval,
        RunStatus::AwaitingRevision,
        RunStatus::Patching,
        RunStatus::Done,
        RunStatus::Failed,
    ];

    const ALL_EVENTS: [RunEvent; 8] = [
        RunEvent::PlanReady { has_questions: true },
        RunEvent::PlanReady { has_questions: false },
        RunEvent::ClarificationReceived,
        RunEvent::Approved,
        RunEvent::RevisionRequested,
        RunEvent::RevisionReceived,
        RunEvent::PatchCommitted,
        RunEvent::PhaseFailed,
    ];

    #[test]
    fn plan_with_questions_awaits_clarification() {
        assert_eq!(
            next_status(RunStatus::Planning, RunEvent::PlanReady { has_questions: true }),
            Ok(RunStatus::AwaitingClarification)
        );
    }

    #[test]
    fn approval_only_accepted_while_awaiting_approval() {
        for status in ALL_STATUSES {
            let result = next_status(status, RunEvent::Approved);
            if status == RunStatus::AwaitingApproval {
                assert_eq!(result, Ok(RunStatus::Patching));
            } else {
                assert_eq!(
                    result,
                    Err(TransitionError::NotAllowed {
                        from: status,
                        event: RunEvent::Approved
                    })
                );
            }
        }
    }

    #[test]
    fn revision_loop_returns_to_planning() {
        let status = next_status(RunStatus::AwaitingApproval, RunEvent::RevisionRequested)
            .expect("revise");
        assert_eq!(status, RunStatus::AwaitingRevision);
        assert_eq!(
            next_status(status, RunEvent::RevisionReceived),
            Ok(RunStatus::Planning)
        );
    }

    #[test]
    fn terminal_statuses_reject_every_event() {
        for status in [RunStatus::Done, RunStatus::Failed] {
            for event in ALL_EVENTS {
                assert!(next_status(status, event).is_err(), "{status} {event}");
            }
        }
    }

    #[test]
    fn patching_ends_done_or_failed() {
        assert_eq!(
            next_status(RunStatus::Patching, RunEvent::PatchCommitted),
            Ok(RunStatus::Done)
        );
        assert_eq!(
            next_status(RunStatus::Patching, RunEvent::PhaseFailed),
            Ok(RunStatus::Failed)
        );
    }

    #[test]
    fn error_message_names_status_and_event() {
        let err = next_status(RunStatus::Done, RunEvent::Approved).unwrap_err();
        assert_eq!(err.to_string(), "event 'approved' is not allowed while run is DONE");
    }
}
