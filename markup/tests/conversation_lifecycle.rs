//! Conversation-level tests: whole threads driven through `Engine`.
//!
//! Every test uses scripted collaborators and paused time, so deadlines and
//! preview polling resolve instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use markup::conversation::Engine;
use markup::core::guard::GuardOverrides;
use markup::core::types::{FileEdit, RunPatch, RunStatus};
use markup::io::chat::{ActionKind, ChatEvent};
use markup::io::config::EngineConfig;
use markup::io::run_store::RunStore;
use markup::test_support::{
    FakeGitHost, RecordingChat, ScriptedAgent, patch, plan, plan_with_questions,
};

const CHANNEL: &str = "C1";
const THREAD: &str = "1700000000.0001";
const THREAD_KEY: &str = "C1:1700000000.0001";
const HEADER: &str = "frontend/components/Header.tsx";

struct Harness {
    engine: Engine<ScriptedAgent, FakeGitHost, RecordingChat>,
    agent: Arc<ScriptedAgent>,
    git: Arc<FakeGitHost>,
    chat: Arc<RecordingChat>,
    store: Arc<RunStore>,
}

impl Harness {
    fn new(agent: ScriptedAgent, git: FakeGitHost) -> Self {
        Self::with_overrides(agent, git, GuardOverrides::default())
    }

    fn with_overrides(agent: ScriptedAgent, git: FakeGitHost, overrides: GuardOverrides) -> Self {
        let mut config = EngineConfig::default();
        config.preview.attempts = 2;
        config.preview.delay_secs = 5;
        let agent = Arc::new(agent);
        let git = Arc::new(git);
        let chat = Arc::new(RecordingChat::new());
        let store = Arc::new(RunStore::new());
        let engine = Engine::new(
            Arc::clone(&agent),
            Arc::clone(&git),
            Arc::clone(&chat),
            Arc::clone(&store),
            Arc::new(config),
        )
        .with_guard_overrides(overrides);
        Self {
            engine,
            agent,
            git,
            chat,
            store,
        }
    }

    fn mention_event(&self, text: &str) -> ChatEvent {
        ChatEvent::Mention {
            channel: CHANNEL.to_string(),
            thread_ts: THREAD.to_string(),
            user: "U1".to_string(),
            text: text.to_string(),
        }
    }

    fn action_event(&self, kind: ActionKind) -> ChatEvent {
        ChatEvent::Action {
            kind,
            run_id: self.run_id(),
            channel: CHANNEL.to_string(),
            thread_ts: THREAD.to_string(),
            user: "U1".to_string(),
        }
    }

    async fn mention(&self, text: &str) {
        self.engine.handle_event(self.mention_event(text)).await;
    }

    async fn press(&self, kind: ActionKind) {
        self.engine.handle_event(self.action_event(kind)).await;
    }

    fn run_id(&self) -> String {
        self.store
            .get_run_by_thread(THREAD_KEY)
            .map(|run| run.run_id)
            .expect("run for thread")
    }

    fn status(&self) -> RunStatus {
        self.store
            .get_run_by_thread(THREAD_KEY)
            .map(|run| run.status)
            .expect("run for thread")
    }

    fn last_text(&self) -> String {
        self.chat.last().map(|reply| reply.text).expect("a reply")
    }
}

fn shop() -> FakeGitHost {
    FakeGitHost::new()
        .with_file(HEADER, "export const Header = () => <nav className=\"bg-gray\" />;\n")
        .with_file(
            "frontend/components/Footer.tsx",
            "export const Footer = () => <footer />;\n",
        )
        .with_file(
            "frontend/pages/Pricing.tsx",
            "import { Header } from \"../components/Header\";\n",
        )
        .with_file("frontend/styles/app.css", "nav { color: gray; }\n")
        .with_file("backend/server.ts", "listen(8080);\n")
}

fn header_edit() -> FileEdit {
    FileEdit::new(HEADER, "export const Header = () => <nav className=\"bg-blue\" />;\n")
}

#[tokio::test(start_paused = true)]
async fn approved_plan_is_committed_and_reported() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch("Navbar is now blue", vec![header_edit()]));
    let git = shop().with_preview_after(1, "https://preview.example/markup");
    let h = Harness::new(agent, git);

    h.mention("make the navbar blue").await;
    assert_eq!(h.status(), RunStatus::AwaitingApproval);
    let proposal = h.chat.last().expect("proposal");
    assert!(proposal.text.contains("Make the navbar blue"));
    assert_eq!(proposal.actions.len(), 2);
    assert!(proposal.actions.iter().all(|a| a.run_id == h.run_id()));

    let plan_request = &h.agent.plan_requests()[0];
    assert!(
        plan_request.file_contents.iter().any(|f| f.path == HEADER),
        "header should be in the planning context"
    );

    h.press(ActionKind::Approve).await;
    assert_eq!(h.status(), RunStatus::Done);

    let commits = h.git.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].branch, format!("markup/{}", h.run_id()));
    assert_eq!(commits[0].edits, vec![header_edit()]);
    assert_eq!(h.git.merge_requests()[0].target, "main");

    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    let outcome = run.outcome.expect("outcome");
    assert_eq!(outcome.preview_url.as_deref(), Some("https://preview.example/markup"));
    assert_eq!(outcome.files_changed, vec![HEADER.to_string()]);
    let done = h.last_text();
    assert!(done.contains(&outcome.merge_request_url));
    assert!(done.contains("https://preview.example/markup"));
}

#[tokio::test(start_paused = true)]
async fn open_questions_wait_for_clarification_and_block_approval() {
    let agent = ScriptedAgent::new()
        .with_plan(plan_with_questions("Recolor a header", &["Which page?"]))
        .with_plan(plan("Recolor the pricing header", &[HEADER]));
    let h = Harness::new(agent, shop());

    h.mention("change the header color").await;
    assert_eq!(h.status(), RunStatus::AwaitingClarification);
    assert!(h.last_text().contains("1. Which page?"));
    assert!(h.chat.last().expect("reply").actions.is_empty());

    h.press(ActionKind::Approve).await;
    assert_eq!(h.status(), RunStatus::AwaitingClarification);
    assert_eq!(
        h.last_text(),
        "This run is not awaiting approval (it is awaiting clarification)."
    );

    h.mention("the pricing page").await;
    assert_eq!(h.status(), RunStatus::AwaitingApproval);
    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert_eq!(
        run.request,
        "change the header color\nClarification: the pricing page"
    );
    assert_eq!(
        h.agent.plan_requests()[1].request,
        "change the header color\nClarification: the pricing page"
    );
    assert!(h.git.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn patch_timeout_fails_run_and_rejects_second_approval() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch_after(
            Duration::from_secs(600),
            patch("too late", vec![header_edit()]),
        );
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Failed);
    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert_eq!(run.error.as_deref(), Some("patching timed out after 180s"));
    assert!(h.last_text().starts_with("Patching took longer than 180s"));
    assert!(h.git.commits().is_empty());

    let replies_before = h.chat.replies().len();
    h.press(ActionKind::Approve).await;
    assert_eq!(h.status(), RunStatus::Failed);
    assert_eq!(h.chat.replies().len(), replies_before + 1);
    assert_eq!(
        h.last_text(),
        "This run is not awaiting approval (it is failed)."
    );
    assert_eq!(h.agent.patch_requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn planning_timeout_fails_run() {
    let agent = ScriptedAgent::new().with_plan_after(
        Duration::from_secs(1_000),
        plan("late", &[HEADER]),
    );
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    assert_eq!(h.status(), RunStatus::Failed);
    assert!(h.last_text().starts_with("Planning took longer than 180s"));
}

#[tokio::test(start_paused = true)]
async fn revision_loop_replans_with_the_requested_change() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_plan(plan("Make the navbar dark blue", &[HEADER]));
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Revise).await;
    assert_eq!(h.status(), RunStatus::AwaitingRevision);
    assert!(h.last_text().contains("What should be different?"));

    h.mention("darker please").await;
    assert_eq!(h.status(), RunStatus::AwaitingApproval);
    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert!(run.request.ends_with("\nRevision: darker please"));
    assert_eq!(
        run.plan.map(|p| p.summary).as_deref(),
        Some("Make the navbar dark blue")
    );
}

#[tokio::test(start_paused = true)]
async fn empty_patch_is_retried_with_wider_context_and_forced_edit() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch("nothing", Vec::new()))
        .with_patch(patch("Navbar is now blue", vec![header_edit()]));
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Done);
    let forced: Vec<bool> = h
        .agent
        .patch_requests()
        .iter()
        .map(|r| r.force_edit)
        .collect();
    assert_eq!(forced, vec![false, true]);
    assert_eq!(h.git.commits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_empty_patch_fails_with_naming_hint() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch("nothing", Vec::new()))
        .with_patch(patch("still nothing", Vec::new()));
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Failed);
    assert!(h.last_text().contains("naming the page or component"));
    assert!(h.git.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn out_of_scope_edit_is_never_committed() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch(
            "sneaky",
            vec![header_edit(), FileEdit::new("backend/server.ts", "listen(9090);")],
        ));
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Failed);
    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    let error = run.error.expect("error");
    assert!(error.contains("PATH_OUTSIDE_FRONTEND backend/server.ts"), "{error}");
    assert!(h.git.commits().is_empty());
    assert!(h.git.branches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn mentions_outside_reply_states_do_not_mutate() {
    let agent = ScriptedAgent::new().with_plan(plan("Make the navbar blue", &[HEADER]));
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    let before = h.store.get_run_by_thread(THREAD_KEY).expect("run");

    h.mention("any news?").await;
    let after = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert_eq!(after.version, before.version);
    assert_eq!(after.request, before.request);
    assert!(h.last_text().contains("Use the Approve or Request changes buttons"));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn planning_agent_error_fails_run() {
    let agent = ScriptedAgent::new().with_plan_error("agent returned 400 Bad Request");
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    assert_eq!(h.status(), RunStatus::Failed);
    assert!(h.last_text().contains("agent returned 400 Bad Request"));

    h.mention("try again").await;
    assert_eq!(
        h.last_text(),
        "This request is already failed. Start a new thread for another change."
    );
}

#[tokio::test(start_paused = true)]
async fn action_for_unknown_run_is_reported() {
    let h = Harness::new(ScriptedAgent::new(), shop());
    h.engine
        .handle_event(ChatEvent::Action {
            kind: ActionKind::Approve,
            run_id: "deadbeef".to_string(),
            channel: CHANNEL.to_string(),
            thread_ts: THREAD.to_string(),
            user: "U1".to_string(),
        })
        .await;
    assert_eq!(h.last_text(), "I could not find that request any more.");
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_mention_does_not_create_a_run() {
    let h = Harness::new(ScriptedAgent::new(), shop());
    h.mention("   ").await;
    assert!(h.store.is_empty());
    assert!(h.last_text().starts_with("Tell me what you would like to change"));
}

#[tokio::test(start_paused = true)]
async fn patch_timeout_after_commit_names_the_committed_branch() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch("Navbar is now blue", vec![header_edit()]));
    let git = shop().stalling_merge_requests(Duration::from_secs(600));
    let h = Harness::new(agent, git);

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Failed);
    assert_eq!(h.git.commits().len(), 1);
    assert!(h.git.merge_requests().is_empty());
    let branch = format!("markup/{}", h.run_id());
    let text = h.last_text();
    assert!(text.starts_with("Patching took longer than 180s"), "{text}");
    assert!(text.contains(&format!("branch `{branch}`")), "{text}");
    assert!(!text.contains("Nothing was committed"), "{text}");
}

#[tokio::test(start_paused = true)]
async fn rejected_commit_fails_run_with_remote_error() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch("Navbar is now blue", vec![header_edit()]));
    let h = Harness::new(agent, shop().failing_commits());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Failed);
    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert_eq!(run.error.as_deref(), Some("commit rejected by remote"));
    assert!(run.outcome.is_none());
    assert_eq!(
        h.last_text(),
        "I could not finish this request: commit rejected by remote"
    );
    assert!(h.git.merge_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn patching_agent_error_fails_run_before_any_git_write() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch_error("agent returned 502 Bad Gateway");
    let h = Harness::new(agent, shop());

    h.mention("make the navbar blue").await;
    h.press(ActionKind::Approve).await;

    assert_eq!(h.status(), RunStatus::Failed);
    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert_eq!(
        run.error.as_deref(),
        Some("generation agent error: agent returned 502 Bad Gateway")
    );
    assert!(h.last_text().contains("agent returned 502 Bad Gateway"));
    assert!(h.git.branches().is_empty());
    assert!(h.git.commits().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_approvals_patch_and_commit_once() {
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch("Navbar is now blue", vec![header_edit()]))
        .with_patch(patch("Navbar is now blue", vec![header_edit()]));
    let git = shop().with_preview_after(1, "https://preview.example/markup");
    let h = Harness::new(agent, git);
    h.mention("make the navbar blue").await;

    let first = h.engine.spawn_event(h.action_event(ActionKind::Approve));
    let second = h.engine.spawn_event(h.action_event(ActionKind::Approve));
    first.await.expect("first approval task");
    second.await.expect("second approval task");

    assert_eq!(h.status(), RunStatus::Done);
    assert_eq!(h.agent.patch_requests().len(), 1);
    assert_eq!(h.git.commits().len(), 1);
    assert_eq!(h.git.merge_requests().len(), 1);
    let rejected = h
        .chat
        .texts()
        .into_iter()
        .filter(|t| t.starts_with("This run is not awaiting approval"))
        .count();
    assert_eq!(rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn plan_for_a_run_that_moved_on_is_discarded() {
    let agent = ScriptedAgent::new().with_plan_after(
        Duration::from_secs(60),
        plan("Make the navbar blue", &[HEADER]),
    );
    let h = Harness::new(agent, shop());

    let planning = h.engine.spawn_event(h.mention_event("make the navbar blue"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.store
        .update_run(
            &h.run_id(),
            RunPatch::status(RunStatus::Failed).with_error("cancelled by operator"),
        )
        .expect("run");
    planning.await.expect("planning task");

    let run = h.store.get_run_by_thread(THREAD_KEY).expect("run");
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("cancelled by operator"));
    assert!(run.plan.is_none());
    assert_eq!(h.chat.texts(), vec!["Got it. Working on a plan...".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn guard_override_narrows_context_and_commit_scope() {
    let overrides = GuardOverrides {
        frontend_root: Some("frontend/components".to_string()),
        ..GuardOverrides::default()
    };
    let agent = ScriptedAgent::new()
        .with_plan(plan("Make the navbar blue", &[HEADER]))
        .with_patch(patch(
            "Navbar is now blue",
            vec![FileEdit::new("frontend/pages/Pricing.tsx", "export default 1;")],
        ));
    let h = Harness::with_overrides(agent, shop(), overrides);

    h.mention("make the navbar blue").await;
    let request = &h.agent.plan_requests()[0];
    assert_eq!(request.frontend_root, "frontend/components");
    assert!(
        request
            .available_files
            .iter()
            .all(|p| p.starts_with("frontend/components/")),
        "{:?}",
        request.available_files
    );
    let fetched = h.git.fetched();
    assert!(!fetched.is_empty());
    assert!(fetched.iter().all(|p| p.starts_with("frontend/components/")), "{fetched:?}");

    h.press(ActionKind::Approve).await;
    assert_eq!(h.status(), RunStatus::Failed);
    let error = h
        .store
        .get_run_by_thread(THREAD_KEY)
        .and_then(|run| run.error)
        .expect("error");
    assert!(
        error.contains("PATH_OUTSIDE_FRONTEND frontend/pages/Pricing.tsx"),
        "{error}"
    );
    assert!(h.git.commits().is_empty());
}
