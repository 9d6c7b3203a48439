//! Slack Web API implementation of [`ChatClient`], plus inbound payload types.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::io::chat::{ActionKind, ChatClient, ChatEvent, ChatReply};

const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone)]
pub struct SlackClient {
    api_base: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, token)
    }

    pub fn with_api_base(api_base: &str, token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    #[instrument(skip_all, fields(channel = %reply.channel, thread_ts = %reply.thread_ts))]
    async fn post(&self, reply: &ChatReply) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.token)
            .json(&post_message_body(reply))
            .send()
            .await
            .context("slack chat.postMessage")?;
        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .context("decode slack chat.postMessage response")?;
        if !status.is_success() || !body.ok {
            bail!(
                "slack chat.postMessage failed ({status}): {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
        }
        debug!(actions = reply.actions.len(), "posted slack reply");
        Ok(())
    }
}

/// `chat.postMessage` payload; buttons carry the run id as their value.
pub fn post_message_body(reply: &ChatReply) -> Value {
    let mut body = json!({
        "channel": reply.channel,
        "thread_ts": reply.thread_ts,
        "text": reply.text,
    });
    if !reply.actions.is_empty() {
        let buttons: Vec<Value> = reply
            .actions
            .iter()
            .map(|action| {
                let mut button = json!({
                    "type": "button",
                    "action_id": action.kind.as_str(),
                    "text": {"type": "plain_text", "text": action.label},
                    "value": action.run_id,
                });
                if action.kind == ActionKind::Approve {
                    button["style"] = json!("primary");
                }
                button
            })
            .collect();
        body["blocks"] = json!([
            {"type": "section", "text": {"type": "mrkdwn", "text": reply.text}},
            {"type": "actions", "elements": buttons},
        ]);
    }
    body
}

/// Body of `POST /slack/events`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification { challenge: String },
    EventCallback { event: SlackEvent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Set when the message came from a bot (including ourselves).
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl SlackEvent {
    /// Mention event, or `None` for anything the engine does not handle.
    pub fn into_chat_event(self) -> Option<ChatEvent> {
        if self.kind != "app_mention" || self.bot_id.is_some() || self.channel.is_empty() {
            return None;
        }
        let thread_ts = self.thread_ts.unwrap_or_else(|| self.ts.clone());
        Some(ChatEvent::Mention {
            channel: self.channel,
            thread_ts,
            user: self.user,
            text: strip_mentions(&self.text),
        })
    }
}

/// Drop `<@U123>` mention tokens and collapse whitespace.
pub fn strip_mentions(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !(word.starts_with("<@") && word.ends_with('>')))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decoded `payload` field of `POST /slack/actions` (block actions only).
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: Option<IdRef>,
    #[serde(default)]
    pub channel: Option<IdRef>,
    #[serde(default)]
    pub container: Option<Container>,
    #[serde(default)]
    pub message: Option<MessageRef>,
    #[serde(default)]
    pub actions: Vec<BlockAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub message_ts: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockAction {
    pub action_id: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl InteractionPayload {
    /// One event per recognised button press.
    pub fn into_chat_events(self) -> Vec<ChatEvent> {
        if self.kind != "block_actions" {
            return Vec::new();
        }
        let Some(channel) = self.channel.map(|c| c.id) else {
            return Vec::new();
        };
        let thread_ts = self
            .container
            .and_then(|c| c.thread_ts.or(c.message_ts))
            .or_else(|| self.message.and_then(|m| m.thread_ts.or(Some(m.ts))));
        let Some(thread_ts) = thread_ts else {
            return Vec::new();
        };
        let user = self.user.map(|u| u.id).unwrap_or_default();
        self.actions
            .into_iter()
            .filter_map(|action| {
                let kind = ActionKind::parse(&action.action_id)?;
                let run_id = action.value.filter(|v| !v.is_empty())?;
                Some(ChatEvent::Action {
                    kind,
                    run_id,
                    channel: channel.clone(),
                    thread_ts: thread_ts.clone(),
                    user: user.clone(),
                })
            })
            .collect()
    }
}
