//! MarkUp server: receives chat events and drives runs through the engine.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use markup::conversation::Engine;
use markup::io::agent::HttpAgent;
use markup::io::config::load_config;
use markup::io::gitlab::GitLabClient;
use markup::io::run_store::RunStore;
use markup::io::slack::SlackClient;
use tokio::sync::broadcast;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "markup-server")]
#[command(about = "Chat-driven frontend change requests, planned and committed by an agent")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Engine configuration file (TOML); defaults apply when missing
    #[arg(long, default_value = "markup.toml")]
    config: PathBuf,
}

/// Secrets and endpoints read from the environment.
struct Secrets {
    slack_token: String,
    gitlab_url: String,
    gitlab_project: String,
    gitlab_token: String,
    agent_url: String,
}

impl Secrets {
    fn from_env() -> Result<Self> {
        Ok(Self {
            slack_token: required_env("SLACK_BOT_TOKEN")?,
            gitlab_url: std::env::var("GITLAB_URL")
                .unwrap_or_else(|_| "https://gitlab.com".to_string()),
            gitlab_project: required_env("GITLAB_PROJECT")?,
            gitlab_token: required_env("GITLAB_TOKEN")?,
            agent_url: required_env("MARKUP_AGENT_URL")?,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("environment variable {name} must be set"))
}

#[tokio::main]
async fn main() -> Result<()> {
    markup::logging::init();

    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    let secrets = Secrets::from_env()?;
    info!(
        config = %args.config.display(),
        frontend_root = %config.frontend_root(),
        "starting markup-server"
    );

    let agent = HttpAgent::new(&secrets.agent_url, config.agent_request_timeout())?;
    let git = GitLabClient::new(
        &secrets.gitlab_url,
        secrets.gitlab_project,
        secrets.gitlab_token,
        config.git.base_branch.clone(),
    )?;
    let chat = SlackClient::new(secrets.slack_token);

    let (changes, _) = broadcast::channel(64);
    let store = Arc::new(RunStore::with_changes(changes.clone()));
    let engine = Engine::new(
        Arc::new(agent),
        Arc::new(git),
        Arc::new(chat),
        Arc::clone(&store),
        Arc::new(config),
    );

    let state = AppState::new(store, Arc::new(engine), changes);
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
