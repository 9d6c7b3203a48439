//! File context resolution for the generation agent.
//!
//! Lists the frontend tree, picks candidate files with the heuristics in
//! [`crate::core::candidates`], fetches them, follows their imports one level,
//! and fetches the newly referenced files in a second round.

use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::candidates::{CandidateInputs, select_candidates, source_paths};
use crate::core::guard::normalize_path;
use crate::core::imports::expand_imports;
use crate::core::tokens::signal_tokens;
use crate::io::agent::FileContent;
use crate::io::config::ResolverSettings;
use crate::io::git_host::GitHost;

/// Bounds for one resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub max_files: usize,
    pub max_file_bytes: usize,
    pub search_token_cap: usize,
    pub entry_file_cap: usize,
    pub expansion_cap: usize,
    pub max_listed_paths: usize,
}

impl ContextLimits {
    /// Limits for the first attempt.
    pub fn initial(settings: &ResolverSettings) -> Self {
        Self::with_cap(settings, settings.initial_file_cap)
    }

    /// Limits for the forced-edit retry.
    pub fn wide(settings: &ResolverSettings) -> Self {
        Self::with_cap(settings, settings.wide_file_cap)
    }

    fn with_cap(settings: &ResolverSettings, max_files: usize) -> Self {
        Self {
            max_files,
            max_file_bytes: settings.max_file_bytes,
            search_token_cap: settings.search_token_cap,
            entry_file_cap: settings.entry_file_cap,
            expansion_cap: settings.expansion_cap,
            max_listed_paths: settings.max_listed_paths,
        }
    }
}

/// What the agent gets to see for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContext {
    pub frontend_root: String,
    /// Source listing offered to the agent, fetched files first.
    pub available_files: Vec<String>,
    pub files: Vec<FileContent>,
    /// Candidates left out because they exceed the size limit.
    pub skipped: Vec<String>,
    /// Every path under the frontend root, source or not.
    pub known_paths: BTreeSet<String>,
}

impl FileContext {
    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

#[instrument(skip_all, fields(root = %frontend_root, max_files = limits.max_files))]
pub async fn resolve_context<G>(
    git: &G,
    request: &str,
    frontend_root: &str,
    priority: &[String],
    limits: &ContextLimits,
) -> Result<FileContext>
where
    G: GitHost + ?Sized,
{
    let listing = git
        .list_paths(frontend_root)
        .await
        .context("list repository paths")?;
    let known_paths: BTreeSet<String> = listing.iter().map(|p| normalize_path(p)).collect();
    let sources = source_paths(&known_paths.iter().cloned().collect::<Vec<_>>(), frontend_root);
    if sources.is_empty() {
        bail!("no frontend source files found under '{frontend_root}'");
    }

    let signal = signal_tokens(request, limits.search_token_cap);
    let mut search_hits: Vec<String> = Vec::new();
    for token in signal.iter().take(limits.search_token_cap) {
        let hits = git
            .search_code(token, frontend_root)
            .await
            .with_context(|| format!("search repository for '{token}'"))?;
        for hit in hits {
            let hit = normalize_path(&hit);
            if !search_hits.contains(&hit) {
                search_hits.push(hit);
            }
        }
    }

    let priority: Vec<String> = priority.iter().map(|p| normalize_path(p)).collect();
    let candidates = select_candidates(&CandidateInputs {
        signal: &signal,
        paths: &sources,
        priority: &priority,
        search_hits: &search_hits,
        max_files: limits.max_files,
        entry_file_cap: limits.entry_file_cap,
    });
    debug!(?signal, candidates = candidates.len(), "selected candidates");

    let mut context = FileContext {
        frontend_root: frontend_root.to_string(),
        known_paths,
        ..FileContext::default()
    };
    fetch_into(git, &candidates, limits.max_file_bytes, &mut context).await?;

    let source_set: BTreeSet<String> = sources.iter().cloned().collect();
    let expanded: Vec<String> = expand_imports(
        context
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.content.as_str())),
        frontend_root,
        &source_set,
    )
    .into_iter()
    .filter(|path| !context.skipped.contains(path))
    .take(limits.expansion_cap)
    .collect();
    if !expanded.is_empty() {
        debug!(count = expanded.len(), "following imports");
        fetch_into(git, &expanded, limits.max_file_bytes, &mut context).await?;
    }

    context.available_files = listed_paths(&context.files, &sources, limits.max_listed_paths);
    info!(
        files = context.files.len(),
        skipped = context.skipped.len(),
        "resolved file context"
    );
    Ok(context)
}

async fn fetch_into<G>(
    git: &G,
    paths: &[String],
    max_file_bytes: usize,
    context: &mut FileContext,
) -> Result<()>
where
    G: GitHost + ?Sized,
{
    for path in paths {
        let content = git
            .fetch_file(path)
            .await
            .with_context(|| format!("fetch {path}"))?;
        if content.len() > max_file_bytes {
            debug!(%path, bytes = content.len(), "file over size limit, excluded");
            context.skipped.push(path.clone());
            continue;
        }
        context.files.push(FileContent {
            path: path.clone(),
            content,
        });
    }
    Ok(())
}

/// Fetched files first, then the rest of the listing, capped (fetched files
/// are always listed).
fn listed_paths(files: &[FileContent], sources: &[String], cap: usize) -> Vec<String> {
    let mut listed: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
    for path in sources {
        if listed.len() >= cap.max(files.len()) {
            break;
        }
        if !listed.contains(path) {
            listed.push(path.clone());
        }
    }
    listed
}
