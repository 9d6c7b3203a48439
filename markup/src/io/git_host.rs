//! Git hosting collaborator.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::core::types::FileEdit;

/// Merge request created for a committed edit set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub url: String,
    pub iid: u64,
}

#[async_trait]
pub trait GitHost: Send + Sync {
    /// Every blob path under `root` on the base branch.
    async fn list_paths(&self, root: &str) -> Result<Vec<String>>;

    /// Paths whose content matches `query`, restricted to `scope`.
    async fn search_code(&self, query: &str, scope: &str) -> Result<Vec<String>>;

    async fn fetch_file(&self, path: &str) -> Result<String>;

    async fn create_branch(&self, name: &str, base: &str) -> Result<()>;

    /// One commit replacing the content of every edited (existing) file.
    async fn commit_files(&self, branch: &str, message: &str, edits: &[FileEdit]) -> Result<()>;

    async fn open_merge_request(
        &self,
        source: &str,
        target: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest>;

    /// Preview deployment URL for `branch`, if one exists yet.
    async fn find_preview_url(&self, branch: &str) -> Result<Option<String>>;
}

/// Poll for a preview URL a fixed number of times.
///
/// Lookup errors are logged and count as a miss. Returns `None` once the
/// attempts are exhausted.
#[instrument(skip_all, fields(branch = %branch, attempts = attempts))]
pub async fn poll_preview_url<G>(
    git: &G,
    branch: &str,
    attempts: u32,
    delay: Duration,
) -> Option<String>
where
    G: GitHost + ?Sized,
{
    for attempt in 1..=attempts {
        match git.find_preview_url(branch).await {
            Ok(Some(url)) => {
                info!(attempt, %url, "preview url found");
                return Some(url);
            }
            Ok(None) => debug!(attempt, "preview not ready"),
            Err(err) => warn!(attempt, error = %err, "preview lookup failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeGitHost;

    #[tokio::test(start_paused = true)]
    async fn poll_returns_url_once_available() {
        let git = FakeGitHost::new().with_preview_after(3, "https://preview.example/markup-1");
        let url = poll_preview_url(&git, "markup/1", 5, Duration::from_secs(15)).await;
        assert_eq!(url.as_deref(), Some("https://preview.example/markup-1"));
        assert_eq!(git.preview_lookups(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_after_attempts() {
        let git = FakeGitHost::new();
        let url = poll_preview_url(&git, "markup/1", 4, Duration::from_secs(15)).await;
        assert_eq!(url, None);
        assert_eq!(git.preview_lookups(), 4);
    }
}
