//! Generation agent abstraction.
//!
//! The [`GenerationAgent`] trait decouples the conversation flow from the
//! agent backend. [`HttpAgent`] talks to a plan/patch HTTP service; tests use
//! scripted agents that return predetermined plans and edits.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use jsonschema::Validator;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::{PatchResult, Plan};

const PLAN_SCHEMA: &str = include_str!("schemas/plan.schema.json");
const PATCH_SCHEMA: &str = include_str!("schemas/patch.schema.json");

static PLAN_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(PLAN_SCHEMA));
static PATCH_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile_schema(PATCH_SCHEMA));

fn compile_schema(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema should be valid json");
    jsonschema::validator_for(&schema).expect("embedded schema should compile")
}

/// Source of one file shown to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub request: String,
    pub frontend_root: String,
    pub available_files: Vec<String>,
    pub file_contents: Vec<FileContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRequest {
    pub request: String,
    pub frontend_root: String,
    pub available_files: Vec<String>,
    pub file_contents: Vec<FileContent>,
    pub plan: Plan,
    /// Set on the retry after an empty edit set: an edit is mandatory.
    pub force_edit: bool,
}

#[async_trait]
pub trait GenerationAgent: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan>;
    async fn patch(&self, request: &PatchRequest) -> Result<PatchResult>;
}

/// Agent reached over HTTP (`POST {base}/plan`, `POST {base}/patch`).
#[derive(Debug, Clone)]
pub struct HttpAgent {
    base_url: String,
    client: reqwest::Client,
    attempts: u32,
    backoff: Duration,
}

impl HttpAgent {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("build agent http client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            attempts: 3,
            backoff: Duration::from_secs(2),
        })
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    #[instrument(skip_all, fields(endpoint = %endpoint))]
    async fn call<B, T>(&self, endpoint: &str, body: &B, validator: &Validator) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut last_error = anyhow!("agent {endpoint} was not attempted");
        for attempt in 1..=self.attempts {
            debug!(attempt, attempts = self.attempts, %url, "calling generation agent");
            match self.send_once(&url, body).await {
                Ok(text) => match strip_fences_and_parse(&text) {
                    Ok(value) => return validate_response(value, validator, endpoint),
                    Err(err) => {
                        warn!(attempt, error = %err, "unparseable agent response");
                        last_error = err;
                    }
                },
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(err)) => {
                    warn!(attempt, error = %err, "agent call failed");
                    last_error = err;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }
        Err(last_error.context(format!(
            "agent {endpoint} failed after {} attempt(s)",
            self.attempts
        )))
    }

    async fn send_once<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> std::result::Result<String, AttemptError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| AttemptError::Retryable(anyhow!(err).context("send agent request")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| AttemptError::Retryable(anyhow!(err).context("read agent response")))?;
        if status.is_success() {
            return Ok(text);
        }
        let err = anyhow!("agent returned {status}: {}", text.trim());
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(AttemptError::Retryable(err))
        } else {
            Err(AttemptError::Fatal(err))
        }
    }
}

enum AttemptError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

#[async_trait]
impl GenerationAgent for HttpAgent {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        self.call("plan", request, &PLAN_VALIDATOR).await
    }

    async fn patch(&self, request: &PatchRequest) -> Result<PatchResult> {
        self.call("patch", request, &PATCH_VALIDATOR).await
    }
}

/// Parse an agent body, tolerating a surrounding markdown code fence.
pub fn strip_fences_and_parse(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };
    serde_json::from_str(body).context("agent response is not valid json")
}

fn validate_response<T: DeserializeOwned>(
    value: Value,
    validator: &Validator,
    endpoint: &str,
) -> Result<T> {
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!(
            "agent {endpoint} response failed schema validation: {}",
            messages.join("; ")
        );
    }
    serde_json::from_value(value).with_context(|| format!("deserialize agent {endpoint} response"))
}

/// Validate and decode a raw plan body.
pub fn parse_plan(text: &str) -> Result<Plan> {
    validate_response(strip_fences_and_parse(text)?, &PLAN_VALIDATOR, "plan")
}

/// Validate and decode a raw patch body.
pub fn parse_patch(text: &str) -> Result<PatchResult> {
    validate_response(strip_fences_and_parse(text)?, &PATCH_VALIDATOR, "patch")
}
