//! Chat platform collaborator and inbound event types.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Button attached to a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Revise,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Approve => "approve",
            ActionKind::Revise => "revise",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approve" => Some(ActionKind::Approve),
            "revise" => Some(ActionKind::Revise),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyAction {
    pub kind: ActionKind,
    pub label: String,
    pub run_id: String,
}

/// Threaded reply posted back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub channel: String,
    pub thread_ts: String,
    pub text: String,
    pub actions: Vec<ReplyAction>,
}

impl ChatReply {
    pub fn text(channel: &str, thread_ts: &str, text: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
            text: text.into(),
            actions: Vec::new(),
        }
    }

    /// Attach the approve / revise pair for `run_id`.
    pub fn with_approval_buttons(mut self, run_id: &str) -> Self {
        self.actions = vec![
            ReplyAction {
                kind: ActionKind::Approve,
                label: "Approve".to_string(),
                run_id: run_id.to_string(),
            },
            ReplyAction {
                kind: ActionKind::Revise,
                label: "Request changes".to_string(),
                run_id: run_id.to_string(),
            },
        ];
        self
    }
}

/// Inbound event, already parsed from the platform payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The bot was mentioned. `thread_ts` is the thread root (the message
    /// itself when it starts a thread).
    Mention {
        channel: String,
        thread_ts: String,
        user: String,
        text: String,
    },
    /// A reply button was pressed.
    Action {
        kind: ActionKind,
        run_id: String,
        channel: String,
        thread_ts: String,
        user: String,
    },
}

impl ChatEvent {
    pub fn thread_key(&self) -> String {
        match self {
            ChatEvent::Mention {
                channel, thread_ts, ..
            }
            | ChatEvent::Action {
                channel, thread_ts, ..
            } => thread_key(channel, thread_ts),
        }
    }
}

/// Correlation key for one conversation thread.
pub fn thread_key(channel: &str, thread_ts: &str) -> String {
    format!("{channel}:{thread_ts}")
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post(&self, reply: &ChatReply) -> Result<()>;
}
