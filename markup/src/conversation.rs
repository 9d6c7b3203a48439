//! Chat event handling.
//!
//! [`Engine`] owns nothing but shared handles: the run store, the loaded
//! configuration and the three collaborators. Each inbound event is checked
//! against the run's status through [`next_status`] before anything is
//! mutated; a wrong-state event gets a reply and leaves the run untouched.
//!
//! Planning and patching run under [`with_deadline`]. Their results are
//! applied with [`RunStore::update_run_if`] against the version captured when
//! the phase started, so a result that lost a race is dropped.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::context::{ContextLimits, FileContext, resolve_context};
use crate::core::guard::{GuardConfig, GuardOverrides, normalize_path};
use crate::core::transitions::{RunEvent, next_status};
use crate::core::types::{PatchResult, Plan, Run, RunOutcome, RunPatch, RunStatus};
use crate::deadline::with_deadline;
use crate::error::{EngineError, EngineResult, Phase};
use crate::io::agent::{GenerationAgent, PatchRequest, PlanRequest};
use crate::io::chat::{ActionKind, ChatClient, ChatEvent, ChatReply, thread_key};
use crate::io::config::EngineConfig;
use crate::io::git_host::{GitHost, poll_preview_url};
use crate::io::messages::{Messages, Notice};
use crate::io::run_store::{RunStore, StoreError, new_run_id};
use crate::orchestrator::{CommitMarker, CommitSpec, commit_edits};

const NO_EDITS_HINT: &str =
    "Try naming the page or component you want changed, for example \"the header on the pricing page\".";
const GUARD_HINT: &str = "Only files under the frontend app can be changed.";

/// Thread a reply goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplyTarget {
    channel: String,
    thread_ts: String,
}

impl ReplyTarget {
    fn new(channel: &str, thread_ts: &str) -> Self {
        Self {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
        }
    }
}

/// Result of a committed patch phase, before the preview lookup.
struct Committed {
    summary: String,
    branch: String,
    merge_request_url: String,
    files_changed: Vec<String>,
}

pub struct Engine<A, G, C> {
    agent: Arc<A>,
    git: Arc<G>,
    chat: Arc<C>,
    store: Arc<RunStore>,
    config: Arc<EngineConfig>,
    messages: Arc<Messages>,
    guard_overrides: GuardOverrides,
}

impl<A, G, C> Clone for Engine<A, G, C> {
    fn clone(&self) -> Self {
        Self {
            agent: Arc::clone(&self.agent),
            git: Arc::clone(&self.git),
            chat: Arc::clone(&self.chat),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            messages: Arc::clone(&self.messages),
            guard_overrides: self.guard_overrides.clone(),
        }
    }
}

impl<A, G, C> Engine<A, G, C>
where
    A: GenerationAgent + 'static,
    G: GitHost + 'static,
    C: ChatClient + 'static,
{
    pub fn new(
        agent: Arc<A>,
        git: Arc<G>,
        chat: Arc<C>,
        store: Arc<RunStore>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            agent,
            git,
            chat,
            store,
            config,
            messages: Arc::new(Messages::new()),
            guard_overrides: GuardOverrides::default(),
        }
    }

    /// Guard overrides applied to every commit made by this engine.
    pub fn with_guard_overrides(mut self, overrides: GuardOverrides) -> Self {
        self.guard_overrides = overrides;
        self
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Handle `event` on its own task.
    pub fn spawn_event(&self, event: ChatEvent) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.handle_event(event).await;
        })
    }

    /// Handle one event to completion, including any phase it starts.
    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Mention {
                channel,
                thread_ts,
                user,
                text,
            } => self.handle_mention(&channel, &thread_ts, &user, &text).await,
            ChatEvent::Action {
                kind,
                run_id,
                channel,
                thread_ts,
                ..
            } => self.handle_action(kind, &run_id, &channel, &thread_ts).await,
        }
    }

    /// A mention either starts a run for the thread or resumes the existing one.
    #[instrument(skip_all, fields(channel = %channel, thread_ts = %thread_ts))]
    pub async fn handle_mention(&self, channel: &str, thread_ts: &str, user: &str, text: &str) {
        let target = ReplyTarget::new(channel, thread_ts);
        let key = thread_key(channel, thread_ts);
        let text = text.trim();

        let Some(run) = self.store.get_run_by_thread(&key) else {
            self.start_run(&target, &key, user, text).await;
            return;
        };

        let resume = match run.status {
            RunStatus::AwaitingClarification => {
                Some((RunEvent::ClarificationReceived, "Clarification"))
            }
            RunStatus::AwaitingRevision => Some((RunEvent::RevisionReceived, "Revision")),
            _ => None,
        };
        let Some((event, label)) = resume else {
            let notice = if run.status.is_terminal() {
                Notice::Finished(run.status)
            } else if run.status == RunStatus::AwaitingApproval {
                Notice::UseButtons
            } else {
                Notice::StillWorking(run.status)
            };
            debug!(run_id = %run.run_id, status = %run.status, "mention answered without changes");
            self.notify(&target, notice).await;
            return;
        };
        if text.is_empty() {
            self.notify(&target, Notice::EmptyRequest).await;
            return;
        }

        let Some(status) = self.transition(&run, event) else {
            return;
        };
        let request = format!("{}\n{label}: {text}", run.request);
        match self.store.update_run_if(
            &run.run_id,
            run.version,
            RunPatch::status(status).with_request(request),
        ) {
            Ok(updated) => {
                info!(run_id = %updated.run_id, event = event.label(), "run resumed");
                self.notify(&target, Notice::Planning).await;
                self.run_planning(updated, &target).await;
            }
            Err(err) => {
                warn!(run_id = %run.run_id, error = %err, "reply lost a race with another update");
                self.notify(&target, Notice::StillWorking(RunStatus::Planning)).await;
            }
        }
    }

    async fn start_run(&self, target: &ReplyTarget, key: &str, user: &str, text: &str) {
        if text.is_empty() {
            self.notify(target, Notice::EmptyRequest).await;
            return;
        }
        let run = match self
            .store
            .create_run(&new_run_id(), key, &target.channel, text)
        {
            Ok(run) => run,
            Err(StoreError::ThreadExists(_)) => {
                debug!(thread_key = key, "thread claimed by a concurrent mention");
                self.notify(target, Notice::StillWorking(RunStatus::Planning)).await;
                return;
            }
            Err(err) => {
                warn!(thread_key = key, error = %err, "could not create run");
                self.post(target, self.messages.failure(&err.to_string(), None), None)
                    .await;
                return;
            }
        };
        info!(run_id = %run.run_id, thread_key = key, user, "run created");
        self.notify(target, Notice::Planning).await;
        self.run_planning(run, target).await;
    }

    /// Approve and revise buttons. The run id comes from the button value.
    #[instrument(skip_all, fields(run_id = %run_id, action = kind.as_str()))]
    pub async fn handle_action(
        &self,
        kind: ActionKind,
        run_id: &str,
        channel: &str,
        thread_ts: &str,
    ) {
        let target = ReplyTarget::new(channel, thread_ts);
        let Some(run) = self.store.get_run_by_id(run_id) else {
            warn!("action for unknown run");
            self.notify(&target, Notice::RunNotFound).await;
            return;
        };
        let event = match kind {
            ActionKind::Approve => RunEvent::Approved,
            ActionKind::Revise => RunEvent::RevisionRequested,
        };
        let Ok(status) = next_status(run.status, event) else {
            debug!(status = %run.status, "action rejected in current state");
            self.notify(&target, Notice::NotAwaitingApproval(run.status)).await;
            return;
        };
        let updated = match self
            .store
            .update_run_if(run_id, run.version, RunPatch::status(status))
        {
            Ok(updated) => updated,
            Err(err) => {
                warn!(error = %err, "action lost a race with another update");
                let current = self
                    .store
                    .get_run_by_id(run_id)
                    .map(|r| r.status)
                    .unwrap_or(run.status);
                self.notify(&target, Notice::NotAwaitingApproval(current)).await;
                return;
            }
        };
        info!(event = event.label(), status = %updated.status, "action applied");
        match kind {
            ActionKind::Approve => {
                self.notify(&target, Notice::Patching).await;
                self.run_patching(updated, &target).await;
            }
            ActionKind::Revise => {
                self.post(&target, self.messages.revision_prompt(), None).await;
            }
        }
    }

    #[instrument(skip_all, fields(run_id = %run.run_id))]
    async fn run_planning(&self, run: Run, target: &ReplyTarget) {
        let started = run.version;
        let result = with_deadline(
            Phase::Planning,
            self.config.phase_timeout(),
            self.plan_phase(&run),
        )
        .await;

        let plan = match result {
            Ok(plan) => plan,
            Err(err) => {
                self.fail_run(&run, started, Phase::Planning, err, None, target)
                    .await;
                return;
            }
        };
        let has_questions = !plan.open_questions.is_empty();
        let Some(status) = self.transition(&run, RunEvent::PlanReady { has_questions }) else {
            return;
        };
        let text = if has_questions {
            self.messages.clarification(&plan)
        } else {
            self.messages.plan_proposal(&plan)
        };
        match self
            .store
            .update_run_if(&run.run_id, started, RunPatch::status(status).with_plan(plan))
        {
            Ok(updated) => {
                info!(status = %updated.status, "plan ready");
                let buttons = (!has_questions).then_some(updated.run_id.as_str());
                self.post(target, text, buttons).await;
            }
            Err(err) => warn!(error = %err, "discarding superseded plan"),
        }
    }

    async fn plan_phase(&self, run: &Run) -> EngineResult<Plan> {
        let root = self.guard_config().frontend_root().to_string();
        let context = self
            .resolve(&run.request, &root, &[], ContextLimits::initial(&self.config.resolver))
            .await?;
        let request = PlanRequest {
            request: run.request.clone(),
            frontend_root: root,
            available_files: context.available_files,
            file_contents: context.files,
        };
        self.agent
            .plan(&request)
            .await
            .map_err(|err| EngineError::Agent(format!("{err:#}")))
    }

    #[instrument(skip_all, fields(run_id = %run.run_id))]
    async fn run_patching(&self, run: Run, target: &ReplyTarget) {
        let started = run.version;
        let landed = CommitMarker::new();
        let result = with_deadline(
            Phase::Patching,
            self.config.phase_timeout(),
            self.patch_phase(&run, &landed),
        )
        .await;

        let committed = match result {
            Ok(committed) => committed,
            Err(err) => {
                self.fail_run(&run, started, Phase::Patching, err, landed.branch(), target)
                    .await;
                return;
            }
        };

        let preview_url = poll_preview_url(
            self.git.as_ref(),
            &committed.branch,
            self.config.preview.attempts,
            self.config.preview_delay(),
        )
        .await;
        let outcome = RunOutcome {
            branch: committed.branch,
            merge_request_url: committed.merge_request_url,
            preview_url,
            summary: committed.summary,
            files_changed: committed.files_changed,
        };
        let Some(status) = self.transition(&run, RunEvent::PatchCommitted) else {
            return;
        };
        let text = self.messages.done(&outcome);
        match self.store.update_run_if(
            &run.run_id,
            started,
            RunPatch::status(status).with_outcome(outcome),
        ) {
            Ok(_) => {
                info!("run done");
                self.post(target, text, None).await;
            }
            Err(err) => warn!(error = %err, "discarding superseded patch result"),
        }
    }

    async fn patch_phase(&self, run: &Run, landed: &CommitMarker) -> EngineResult<Committed> {
        let plan = run.plan.clone().unwrap_or_default();
        let guard_config = self.guard_config();
        let root = guard_config.frontend_root().to_string();
        let priority: Vec<String> = plan.target_paths.iter().map(|p| normalize_path(p)).collect();

        let context = self
            .resolve(&run.request, &root, &priority, ContextLimits::initial(&self.config.resolver))
            .await?;
        let mut result = self.request_patch(run, &plan, &root, &context, false).await?;
        let mut known = context.known_paths;

        if result.edits.is_empty() {
            info!("no edits on first attempt, retrying with wider context");
            let wide = self
                .resolve(&run.request, &root, &priority, ContextLimits::wide(&self.config.resolver))
                .await?;
            result = self.request_patch(run, &plan, &root, &wide, true).await?;
            known = wide.known_paths;
            if result.edits.is_empty() {
                return Err(EngineError::NoEdits);
            }
        }

        let branch = format!("{}{}", self.config.git.branch_prefix, run.run_id);
        let summary = first_non_empty(&[&result.summary, &plan.summary])
            .unwrap_or("Frontend change")
            .to_string();
        let title = format!("MarkUp: {}", first_line(&summary));
        let description = format!(
            "{summary}\n\nRequested in chat (run `{}`):\n\n> {}",
            run.run_id,
            run.request.replace('\n', "\n> ")
        );
        let spec = CommitSpec {
            branch: &branch,
            base_branch: &self.config.git.base_branch,
            message: &title,
            title: &title,
            description: &description,
            existing_paths: &known,
            content_scan: self.config.guard.content_scan,
        };
        let merge_request =
            commit_edits(self.git.as_ref(), &result.edits, &guard_config, &spec, landed).await?;

        let mut files_changed: Vec<String> = Vec::new();
        for edit in &result.edits {
            let path = normalize_path(&edit.path);
            if !files_changed.contains(&path) {
                files_changed.push(path);
            }
        }
        Ok(Committed {
            summary,
            branch,
            merge_request_url: merge_request.url,
            files_changed,
        })
    }

    async fn request_patch(
        &self,
        run: &Run,
        plan: &Plan,
        root: &str,
        context: &FileContext,
        force_edit: bool,
    ) -> EngineResult<PatchResult> {
        let request = PatchRequest {
            request: run.request.clone(),
            frontend_root: root.to_string(),
            available_files: context.available_files.clone(),
            file_contents: context.files.clone(),
            plan: plan.clone(),
            force_edit,
        };
        self.agent
            .patch(&request)
            .await
            .map_err(|err| EngineError::Agent(format!("{err:#}")))
    }

    async fn resolve(
        &self,
        request: &str,
        root: &str,
        priority: &[String],
        limits: ContextLimits,
    ) -> EngineResult<FileContext> {
        Ok(resolve_context(self.git.as_ref(), request, root, priority, &limits).await?)
    }

    /// Move the run to `FAILED` (if it has not moved on) and tell the user.
    ///
    /// `committed_branch` is set when the edits reached the Git host before the
    /// phase failed; the reply then names the branch left behind.
    async fn fail_run(
        &self,
        run: &Run,
        started: u64,
        phase: Phase,
        err: EngineError,
        committed_branch: Option<&str>,
        target: &ReplyTarget,
    ) {
        warn!(
            run_id = %run.run_id,
            phase = phase.as_str(),
            timed_out = err.is_timeout(),
            committed_branch,
            error = %err,
            "phase failed"
        );
        let Some(status) = self.transition(run, RunEvent::PhaseFailed) else {
            return;
        };
        let text = match (&err, committed_branch) {
            (EngineError::Timeout { phase, after }, branch) => {
                self.messages.timeout(*phase, *after, branch)
            }
            (_, Some(branch)) => {
                let hint = format!(
                    "The edits were committed to branch `{branch}`, but no merge request was opened."
                );
                self.messages.failure(&format!("{err:#}"), Some(&hint))
            }
            (EngineError::NoEdits, None) => {
                self.messages.failure(&err.to_string(), Some(NO_EDITS_HINT))
            }
            (EngineError::Guard(_) | EngineError::NewFileNotAllowed(_), None) => {
                self.messages.failure(&err.to_string(), Some(GUARD_HINT))
            }
            (_, None) => self.messages.failure(&format!("{err:#}"), None),
        };
        match self.store.update_run_if(
            &run.run_id,
            started,
            RunPatch::status(status).with_error(err.to_string()),
        ) {
            Ok(_) => self.post(target, text, None).await,
            Err(stale) => warn!(error = %stale, "discarding failure of superseded phase"),
        }
    }

    /// Process guard policy with this engine's overrides applied. Context is
    /// resolved under the same root the guard enforces.
    fn guard_config(&self) -> GuardConfig {
        self.config.guard_config(&self.guard_overrides)
    }

    /// Status after `event`, or `None` (logged) when the move is illegal.
    fn transition(&self, run: &Run, event: RunEvent) -> Option<RunStatus> {
        match next_status(run.status, event) {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(run_id = %run.run_id, error = %err, "illegal transition");
                None
            }
        }
    }

    async fn notify(&self, target: &ReplyTarget, notice: Notice) {
        self.post(target, self.messages.notice(notice), None).await;
    }

    /// Post a rendered reply. Delivery failures are logged, never fatal.
    async fn post(&self, target: &ReplyTarget, text: Result<String>, buttons_for: Option<&str>) {
        let text = match text {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "could not render reply");
                return;
            }
        };
        let mut reply = ChatReply::text(&target.channel, &target.thread_ts, text);
        if let Some(run_id) = buttons_for {
            reply = reply.with_approval_buttons(run_id);
        }
        if let Err(err) = self.chat.post(&reply).await {
            warn!(channel = %target.channel, error = %err, "could not post reply");
        }
    }
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .map(|s| s.as_str().trim())
        .find(|s| !s.is_empty())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text).trim()
}
