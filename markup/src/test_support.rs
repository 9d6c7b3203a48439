//! Scripted collaborators for exercising the engine without a network.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use crate::core::guard::is_under;
use crate::core::types::{FileEdit, PatchResult, Plan};
use crate::io::agent::{GenerationAgent, PatchRequest, PlanRequest};
use crate::io::chat::{ChatClient, ChatReply};
use crate::io::git_host::{GitHost, MergeRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plan with no open questions targeting `paths`.
pub fn plan(summary: &str, paths: &[&str]) -> Plan {
    Plan {
        summary: summary.to_string(),
        target_paths: paths.iter().map(|p| p.to_string()).collect(),
        confidence: 0.8,
        ..Plan::default()
    }
}

/// Plan that asks the user `questions` before proceeding.
pub fn plan_with_questions(summary: &str, questions: &[&str]) -> Plan {
    Plan {
        open_questions: questions.iter().map(|q| q.to_string()).collect(),
        ..plan(summary, &[])
    }
}

pub fn patch(summary: &str, edits: Vec<FileEdit>) -> PatchResult {
    PatchResult {
        summary: summary.to_string(),
        edits,
    }
}

enum Step<T> {
    Ready(T),
    Delayed(Duration, T),
    Fail(String),
}

impl<T> Step<T> {
    async fn play(self) -> Result<T> {
        match self {
            Step::Ready(value) => Ok(value),
            Step::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Step::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Agent that replays queued plan and patch responses in order.
#[derive(Default)]
pub struct ScriptedAgent {
    plans: Mutex<VecDeque<Step<Plan>>>,
    patches: Mutex<VecDeque<Step<PatchResult>>>,
    plan_requests: Mutex<Vec<PlanRequest>>,
    patch_requests: Mutex<Vec<PatchRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        lock(&self.plans).push_back(Step::Ready(plan));
        self
    }

    pub fn with_plan_after(self, delay: Duration, plan: Plan) -> Self {
        lock(&self.plans).push_back(Step::Delayed(delay, plan));
        self
    }

    pub fn with_plan_error(self, message: &str) -> Self {
        lock(&self.plans).push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn with_patch(self, result: PatchResult) -> Self {
        lock(&self.patches).push_back(Step::Ready(result));
        self
    }

    pub fn with_patch_after(self, delay: Duration, result: PatchResult) -> Self {
        lock(&self.patches).push_back(Step::Delayed(delay, result));
        self
    }

    pub fn with_patch_error(self, message: &str) -> Self {
        lock(&self.patches).push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn plan_requests(&self) -> Vec<PlanRequest> {
        lock(&self.plan_requests).clone()
    }

    pub fn patch_requests(&self) -> Vec<PatchRequest> {
        lock(&self.patch_requests).clone()
    }
}

#[async_trait]
impl GenerationAgent for ScriptedAgent {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        lock(&self.plan_requests).push(request.clone());
        let step = lock(&self.plans).pop_front();
        match step {
            Some(step) => step.play().await,
            None => bail!("no scripted plan left"),
        }
    }

    async fn patch(&self, request: &PatchRequest) -> Result<PatchResult> {
        lock(&self.patch_requests).push(request.clone());
        let step = lock(&self.patches).pop_front();
        match step {
            Some(step) => step.play().await,
            None => bail!("no scripted patch left"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommit {
    pub branch: String,
    pub message: String,
    pub edits: Vec<FileEdit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMergeRequest {
    pub source: String,
    pub target: String,
    pub title: String,
}

#[derive(Debug, Default)]
struct GitState {
    branches: Vec<(String, String)>,
    commits: Vec<RecordedCommit>,
    merge_requests: Vec<RecordedMergeRequest>,
    preview_lookups: usize,
    fetched: Vec<String>,
}

/// In-memory repository with recorded writes.
#[derive(Debug, Default)]
pub struct FakeGitHost {
    files: BTreeMap<String, String>,
    search: HashMap<String, Vec<String>>,
    preview: Option<(usize, String)>,
    fail_commit: bool,
    merge_request_delay: Option<Duration>,
    state: Mutex<GitState>,
}

impl FakeGitHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: impl Into<String>) -> Self {
        self.files.insert(path.to_string(), content.into());
        self
    }

    pub fn with_search_hit(mut self, query: &str, path: &str) -> Self {
        self.search
            .entry(query.to_string())
            .or_default()
            .push(path.to_string());
        self
    }

    /// Preview URL becomes visible on the `lookups`-th lookup.
    pub fn with_preview_after(mut self, lookups: usize, url: &str) -> Self {
        self.preview = Some((lookups, url.to_string()));
        self
    }

    pub fn failing_commits(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Every merge request call sleeps `delay` before answering.
    pub fn stalling_merge_requests(mut self, delay: Duration) -> Self {
        self.merge_request_delay = Some(delay);
        self
    }

    pub fn branches(&self) -> Vec<(String, String)> {
        lock(&self.state).branches.clone()
    }

    pub fn commits(&self) -> Vec<RecordedCommit> {
        lock(&self.state).commits.clone()
    }

    pub fn merge_requests(&self) -> Vec<RecordedMergeRequest> {
        lock(&self.state).merge_requests.clone()
    }

    pub fn preview_lookups(&self) -> usize {
        lock(&self.state).preview_lookups
    }

    pub fn fetched(&self) -> Vec<String> {
        lock(&self.state).fetched.clone()
    }
}

#[async_trait]
impl GitHost for FakeGitHost {
    async fn list_paths(&self, root: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .keys()
            .filter(|path| root.is_empty() || is_under(path, root))
            .cloned()
            .collect())
    }

    async fn search_code(&self, query: &str, scope: &str) -> Result<Vec<String>> {
        Ok(self
            .search
            .get(query)
            .map(|hits| {
                hits.iter()
                    .filter(|path| is_under(path, scope))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_file(&self, path: &str) -> Result<String> {
        lock(&self.state).fetched.push(path.to_string());
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("404 file not found: {path}"))
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<()> {
        lock(&self.state)
            .branches
            .push((name.to_string(), base.to_string()));
        Ok(())
    }

    async fn commit_files(&self, branch: &str, message: &str, edits: &[FileEdit]) -> Result<()> {
        if self.fail_commit {
            bail!("commit rejected by remote");
        }
        lock(&self.state).commits.push(RecordedCommit {
            branch: branch.to_string(),
            message: message.to_string(),
            edits: edits.to_vec(),
        });
        Ok(())
    }

    async fn open_merge_request(
        &self,
        source: &str,
        target: &str,
        title: &str,
        _description: &str,
    ) -> Result<MergeRequest> {
        if let Some(delay) = self.merge_request_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = lock(&self.state);
        state.merge_requests.push(RecordedMergeRequest {
            source: source.to_string(),
            target: target.to_string(),
            title: title.to_string(),
        });
        let iid = state.merge_requests.len() as u64;
        Ok(MergeRequest {
            url: format!("https://git.example/web/merge_requests/{iid}"),
            iid,
        })
    }

    async fn find_preview_url(&self, _branch: &str) -> Result<Option<String>> {
        let mut state = lock(&self.state);
        state.preview_lookups += 1;
        Ok(match &self.preview {
            Some((after, url)) if state.preview_lookups >= *after => Some(url.clone()),
            _ => None,
        })
    }
}

/// Chat client that records every reply.
#[derive(Debug, Default)]
pub struct RecordingChat {
    replies: Mutex<Vec<ChatReply>>,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(&self) -> Vec<ChatReply> {
        lock(&self.replies).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        lock(&self.replies).iter().map(|r| r.text.clone()).collect()
    }

    pub fn last(&self) -> Option<ChatReply> {
        lock(&self.replies).last().cloned()
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn post(&self, reply: &ChatReply) -> Result<()> {
        lock(&self.replies).push(reply.clone());
        Ok(())
    }
}
