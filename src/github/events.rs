//! Webhook payload types and signature verification.
//!
//! Only the fields the handlers actually consume are modeled; the payloads
//! carry far more.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook body against the `X-Hub-Signature-256` header
/// (`sha256=<hex>`). Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<()> {
    let Some(hex_digest) = signature_header.strip_prefix("sha256=") else {
        bail!("missing sha256= prefix on webhook signature");
    };
    let expected = hex::decode(hex_digest).map_err(|_| {
        anyhow::anyhow!("webhook signature is not valid hex")
    })?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    if mac.verify_slice(&expected).is_err() {
        bail!("webhook signature mismatch");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub owner: Account,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

/// `workflow_run` event payload.
#[derive(Debug, Deserialize)]
pub struct WorkflowRunEvent {
    pub action: String,
    pub workflow_run: WorkflowRunDetail,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRunDetail {
    pub id: i64,
    pub workflow_id: i64,
    pub status: String,
    pub head_sha: String,
    pub head_commit: Option<HeadCommit>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
pub struct HeadCommit {
    /// Commit SHA.
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// `pull_request` event payload.
#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestRef,
    pub repository: Repository,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    pub number: i64,
    pub head: BranchRef,
    pub base: BranchRef,
}

#[derive(Debug, Deserialize)]
pub struct BranchRef {
    pub sha: String,
}
