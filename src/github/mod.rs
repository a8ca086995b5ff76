//! Thin typed client for the GitHub REST API.
//!
//! Only the endpoints the daemon needs: workflow-run artifacts, commits,
//! workflow-run listings, and issue comments. Responses are deserialized
//! into the minimal structs below; fields we never read are omitted.

pub mod events;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.github.com";

/// How many levels of redirect to follow when fetching artifact downloads.
/// GitHub answers the artifact endpoint with a redirect to blob storage.
const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    pub workflow_id: i64,
    pub head_sha: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunList {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub committer: CommitSignature,
}

#[derive(Debug, Deserialize)]
pub struct CommitSignature {
    pub date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct IssueComment {
    pub id: i64,
    #[serde(default)]
    pub body: String,
    pub user: Account,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

#[derive(Clone)]
pub struct GitHub {
    client: reqwest::Client,
    api_base: String,
}

impl GitHub {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_api_base(token, API_BASE)
    }

    /// Client against a non-default API host. Tests point this at a local
    /// mock server.
    pub fn with_api_base(token: &str, api_base: impl Into<String>) -> Result<Self> {
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .context("invalid github token")?;
        auth.set_sensitive(true);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        let client = reqwest::Client::builder()
            .user_agent(concat!("decompd/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, api_base: api_base.into() })
    }

    pub async fn list_run_artifacts(
        &self,
        owner: &str,
        repo: &str,
        run_id: i64,
    ) -> Result<Vec<Artifact>> {
        let url = format!("{}/repos/{owner}/{repo}/actions/runs/{run_id}/artifacts", self.api_base);
        let list: ArtifactList = self
            .client
            .get(&url)
            .query(&[("per_page", "100")])
            .send()
            .await?
            .error_for_status()
            .context("failed to list workflow run artifacts")?
            .json()
            .await?;
        Ok(list.artifacts)
    }

    /// Start downloading an artifact's ZIP. The response body streams; the
    /// redirect to blob storage is followed internally.
    pub async fn download_artifact(
        &self,
        owner: &str,
        repo: &str,
        artifact_id: i64,
    ) -> Result<reqwest::Response> {
        let url =
            format!("{}/repos/{owner}/{repo}/actions/artifacts/{artifact_id}/zip", self.api_base);
        self.client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .context("failed to download artifact")
    }

    pub async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<CommitInfo>> {
        let url = format!("{}/repos/{owner}/{repo}/commits/{sha}", self.api_base);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let commit =
            resp.error_for_status().context("failed to get commit")?.json().await?;
        Ok(Some(commit))
    }

    /// Completed workflow runs for a head commit, excluding PR-triggered
    /// duplicates.
    pub async fn list_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        head_sha: &str,
    ) -> Result<Vec<WorkflowRun>> {
        let url = format!("{}/repos/{owner}/{repo}/actions/runs", self.api_base);
        let list: WorkflowRunList = self
            .client
            .get(&url)
            .query(&[
                ("status", "completed"),
                ("head_sha", head_sha),
                ("exclude_pull_requests", "true"),
            ])
            .send()
            .await?
            .error_for_status()
            .context("failed to list workflow runs")?
            .json()
            .await?;
        Ok(list.workflow_runs)
    }

    pub async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<IssueComment>> {
        let url = format!("{}/repos/{owner}/{repo}/issues/{number}/comments", self.api_base);
        let comments = self
            .client
            .get(&url)
            .query(&[("sort", "created"), ("direction", "asc"), ("per_page", "100")])
            .send()
            .await?
            .error_for_status()
            .context("failed to list issue comments")?
            .json()
            .await?;
        Ok(comments)
    }

    pub async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        body: &str,
    ) -> Result<()> {
        let url = format!("{}/repos/{owner}/{repo}/issues/{number}/comments", self.api_base);
        self.client
            .post(&url)
            .json(&CommentBody { body })
            .send()
            .await?
            .error_for_status()
            .context("failed to create comment")?;
        Ok(())
    }

    pub async fn edit_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: i64,
        body: &str,
    ) -> Result<()> {
        let url = format!("{}/repos/{owner}/{repo}/issues/comments/{comment_id}", self.api_base);
        self.client
            .patch(&url)
            .json(&CommentBody { body })
            .send()
            .await?
            .error_for_status()
            .context("failed to edit comment")?;
        Ok(())
    }
}
