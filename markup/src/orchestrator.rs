//! The commit gate.
//!
//! [`commit_edits`] is the only path from agent output to the Git host. An
//! edit set is committed whole or not at all.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use tracing::{info, instrument, warn};

use crate::core::content_scan;
use crate::core::guard::{self, GuardConfig, normalize_path};
use crate::core::types::FileEdit;
use crate::error::{EngineError, EngineResult};
use crate::io::git_host::{GitHost, MergeRequest};

/// Where and how an approved edit set is committed.
#[derive(Debug, Clone, Copy)]
pub struct CommitSpec<'a> {
    pub branch: &'a str,
    pub base_branch: &'a str,
    pub message: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    /// Existing repository paths; edits may only replace these.
    pub existing_paths: &'a BTreeSet<String>,
    /// Run the content scan after the path guard.
    pub content_scan: bool,
}

/// Records the branch once its commit has landed.
///
/// Outlives the commit future, so a caller whose deadline cut the merge request
/// short can still tell that the branch exists.
#[derive(Debug, Default)]
pub struct CommitMarker(OnceLock<String>);

impl CommitMarker {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&self, branch: &str) {
        // First commit wins; a run commits at most once.
        let _ = self.0.set(branch.to_string());
    }

    /// Branch holding the committed edits, if the commit landed.
    pub fn branch(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

/// Validate `edits`, then branch, commit once, and open a merge request.
///
/// Order: path guard, content scan, existing-file check. The first gate that
/// rejects the set reports every offending edit it found. `landed` is marked
/// as soon as the commit returns, before the merge request is requested.
#[instrument(skip_all, fields(branch = %spec.branch, edits = edits.len()))]
pub async fn commit_edits<G>(
    git: &G,
    edits: &[FileEdit],
    guard_config: &GuardConfig,
    spec: &CommitSpec<'_>,
    landed: &CommitMarker,
) -> EngineResult<MergeRequest>
where
    G: GitHost + ?Sized,
{
    let edits = prepare_edits(edits, guard_config, spec)?;
    git.create_branch(spec.branch, spec.base_branch).await?;
    git.commit_files(spec.branch, spec.message, &edits).await?;
    landed.mark(spec.branch);
    let merge_request = git
        .open_merge_request(spec.branch, spec.base_branch, spec.title, spec.description)
        .await?;
    info!(url = %merge_request.url, files = edits.len(), "merge request opened");
    Ok(merge_request)
}

/// Run every gate and return the edits in commit form (normalized paths,
/// one edit per path with the last one winning).
pub fn prepare_edits(
    edits: &[FileEdit],
    guard_config: &GuardConfig,
    spec: &CommitSpec<'_>,
) -> EngineResult<Vec<FileEdit>> {
    if let Err(failure) = guard::assert_valid(edits, guard_config) {
        warn!(violations = failure.violations.len(), "guard rejected edit set");
        return Err(failure.into());
    }

    let mut normalized: Vec<FileEdit> = Vec::with_capacity(edits.len());
    for edit in edits {
        let path = normalize_path(&edit.path);
        normalized.retain(|e| e.path != path);
        normalized.push(FileEdit::new(path, edit.content.clone()));
    }

    if spec.content_scan {
        let findings = content_scan::scan(&normalized);
        if !findings.is_empty() {
            warn!(findings = findings.len(), "content scan rejected edit set");
            return Err(EngineError::UnsafeContent(findings));
        }
    }

    let missing: Vec<String> = normalized
        .iter()
        .filter(|e| !spec.existing_paths.contains(&e.path))
        .map(|e| e.path.clone())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::NewFileNotAllowed(missing));
    }
    Ok(normalized)
}
