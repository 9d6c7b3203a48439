//! GitLab REST (v4) implementation of [`GitHost`].

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::guard::is_under;
use crate::core::types::FileEdit;
use crate::io::git_host::{GitHost, MergeRequest};

const PER_PAGE: &str = "100";
const MAX_TREE_PAGES: u32 = 50;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    api_base: Url,
    project: String,
    token: String,
    default_ref: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct BlobHit {
    path: String,
}

#[derive(Debug, Serialize)]
struct CommitAction<'a> {
    action: &'static str,
    file_path: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CommitBody<'a> {
    branch: &'a str,
    commit_message: &'a str,
    actions: Vec<CommitAction<'a>>,
}

#[derive(Debug, Serialize)]
struct MergeRequestBody<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
    remove_source_branch: bool,
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    iid: u64,
    web_url: String,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    status: String,
    #[serde(default)]
    environment: Option<Environment>,
}

#[derive(Debug, Deserialize)]
struct Environment {
    #[serde(default)]
    external_url: Option<String>,
}

impl GitLabClient {
    /// `base_url` is the instance root (e.g. `https://gitlab.com`); `project`
    /// is a numeric id or a `group/name` path.
    pub fn new(
        base_url: &str,
        project: impl Into<String>,
        token: impl Into<String>,
        default_ref: impl Into<String>,
    ) -> Result<Self> {
        let api_base = Url::parse(&format!("{}/api/v4/", base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid gitlab url '{base_url}'"))?;
        Ok(Self {
            api_base,
            project: project.into(),
            token: token.into(),
            default_ref: default_ref.into(),
            client: reqwest::Client::new(),
        })
    }

    /// Project-scoped endpoint; each segment is percent-encoded as a whole.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| anyhow!("gitlab url cannot be a base"))?;
            path.pop_if_empty().push("projects").push(&self.project);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("PRIVATE-TOKEN", &self.token)
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .with_context(|| format!("gitlab {what}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("gitlab {what} failed ({status}): {}", body.trim());
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        self.send(builder, what)
            .await?
            .json()
            .await
            .with_context(|| format!("decode gitlab {what} response"))
    }
}

#[async_trait]
impl GitHost for GitLabClient {
    #[instrument(skip_all, fields(root = %root))]
    async fn list_paths(&self, root: &str) -> Result<Vec<String>> {
        let url = self.endpoint(&["repository", "tree"])?;
        let mut paths = Vec::new();
        let mut page = 1;
        loop {
            let page_param = page.to_string();
            let request = self.client.get(url.clone()).query(&[
                ("path", root),
                ("ref", self.default_ref.as_str()),
                ("recursive", "true"),
                ("per_page", PER_PAGE),
                ("page", page_param.as_str()),
            ]);
            let response = self.send(request, "repository tree").await?;
            let next = response
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());
            let entries: Vec<TreeEntry> = response
                .json()
                .await
                .context("decode gitlab repository tree response")?;
            paths.extend(
                entries
                    .into_iter()
                    .filter(|e| e.kind == "blob")
                    .map(|e| e.path),
            );
            match next {
                Some(n) if n > page && n <= MAX_TREE_PAGES => page = n,
                _ => break,
            }
        }
        debug!(count = paths.len(), "listed repository paths");
        Ok(paths)
    }

    #[instrument(skip_all, fields(query = %query))]
    async fn search_code(&self, query: &str, scope: &str) -> Result<Vec<String>> {
        let url = self.endpoint(&["search"])?;
        let request = self
            .client
            .get(url)
            .query(&blob_search_query(query, &self.default_ref));
        let hits: Vec<BlobHit> = self.send_json(request, "blob search").await?;
        Ok(scoped_hits(hits.into_iter().map(|h| h.path), scope))
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn fetch_file(&self, path: &str) -> Result<String> {
        let url = self.endpoint(&["repository", "files", path, "raw"])?;
        let request = self
            .client
            .get(url)
            .query(&[("ref", self.default_ref.as_str())]);
        self.send(request, "raw file")
            .await?
            .text()
            .await
            .with_context(|| format!("read {path}"))
    }

    #[instrument(skip_all, fields(branch = %name))]
    async fn create_branch(&self, name: &str, base: &str) -> Result<()> {
        let url = self.endpoint(&["repository", "branches"])?;
        let request = self
            .client
            .post(url)
            .query(&[("branch", name), ("ref", base)]);
        self.send(request, "create branch").await?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch, files = edits.len()))]
    async fn commit_files(&self, branch: &str, message: &str, edits: &[FileEdit]) -> Result<()> {
        let url = self.endpoint(&["repository", "commits"])?;
        let body = commit_body(branch, message, edits);
        self.send(self.client.post(url).json(&body), "commit").await?;
        Ok(())
    }

    #[instrument(skip_all, fields(source = %source))]
    async fn open_merge_request(
        &self,
        source: &str,
        target: &str,
        title: &str,
        description: &str,
    ) -> Result<MergeRequest> {
        let url = self.endpoint(&["merge_requests"])?;
        let body = MergeRequestBody {
            source_branch: source,
            target_branch: target,
            title,
            description,
            remove_source_branch: true,
        };
        let created: MergeRequestResponse = self
            .send_json(self.client.post(url).json(&body), "merge request")
            .await?;
        Ok(MergeRequest {
            url: created.web_url,
            iid: created.iid,
        })
    }

    #[instrument(skip_all, fields(branch = %branch))]
    async fn find_preview_url(&self, branch: &str) -> Result<Option<String>> {
        let url = self.endpoint(&["deployments"])?;
        let request = self.client.get(url).query(&[
            ("ref", branch),
            ("order_by", "created_at"),
            ("sort", "desc"),
        ]);
        let deployments: Vec<Deployment> = self.send_json(request, "deployments").await?;
        Ok(preview_from_deployments(deployments))
    }
}

/// Blob search parameters. Hits are scoped to the frontend root client-side,
/// so the page is requested at the API maximum to leave room for the
/// out-of-scope hits that get dropped.
fn blob_search_query<'a>(query: &'a str, git_ref: &'a str) -> [(&'static str, &'a str); 4] {
    [
        ("scope", "blobs"),
        ("search", query),
        ("ref", git_ref),
        ("per_page", PER_PAGE),
    ]
}

fn scoped_hits(paths: impl Iterator<Item = String>, scope: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for path in paths {
        if is_under(&path, scope) && !out.contains(&path) {
            out.push(path);
        }
    }
    out
}

fn commit_body<'a>(branch: &'a str, message: &'a str, edits: &'a [FileEdit]) -> CommitBody<'a> {
    CommitBody {
        branch,
        commit_message: message,
        actions: edits
            .iter()
            .map(|edit| CommitAction {
                action: "update",
                file_path: &edit.path,
                content: &edit.content,
            })
            .collect(),
    }
}

/// Newest successful deployment with an external URL.
fn preview_from_deployments(deployments: Vec<Deployment>) -> Option<String> {
    deployments
        .into_iter()
        .filter(|d| d.status == "success")
        .filter_map(|d| d.environment.and_then(|e| e.external_url))
        .find(|url| !url.trim().is_empty())
}
