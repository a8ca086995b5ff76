//! HTTP surface and webhook event handling.
//!
//! `POST /webhook` verifies the delivery signature, dispatches to the
//! matching event flow, and answers 200 as soon as the real work is handed
//! to a background task. Failures after that point only appear in the logs.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use anyhow::{Context, Result};

use crate::{
    comment, diff,
    github::events::{self, PullRequestEvent, PullRequestRef, WorkflowRunEvent},
    ingest,
    models::{Commit, Project, ReportFile},
    AppContext,
};

/// Login the daemon's comments appear under; used to find the previous
/// comment when updating.
const BOT_LOGIN: &str = "decompd[bot]";

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .with_state(ctx)
}

async fn health() -> &'static str {
    "ok"
}

async fn webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if let Err(error) =
        events::verify_signature(&ctx.config.github.webhook_secret, &body, signature)
    {
        tracing::warn!(error = %error, "rejected webhook delivery");
        return StatusCode::UNAUTHORIZED;
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let delivery_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let parsed = match event_type.as_str() {
        "workflow_run" => serde_json::from_slice::<WorkflowRunEvent>(&body)
            .map(|event| handle_workflow_run(ctx, delivery_id, event)),
        "pull_request" => serde_json::from_slice::<PullRequestEvent>(&body)
            .map(|event| handle_pull_request(ctx, delivery_id, event)),
        _ => {
            tracing::debug!(event_type = %event_type, "ignoring event");
            return StatusCode::OK;
        }
    };
    match parsed {
        Ok(()) => StatusCode::OK,
        Err(error) => {
            tracing::warn!(
                event_type = %event_type,
                error = %error,
                "failed to parse event payload"
            );
            StatusCode::BAD_REQUEST
        }
    }
}

/// A completed workflow run may carry fresh report artifacts; ingest them,
/// then refresh any PRs attached to the run.
fn handle_workflow_run(ctx: Arc<AppContext>, delivery_id: String, event: WorkflowRunEvent) {
    if event.workflow_run.status != "completed" {
        tracing::debug!(status = %event.workflow_run.status, "workflow run not completed");
        return;
    }
    let tasks = ctx.tasks.clone();
    tasks.spawn("workflow_run", &delivery_id, async move {
        let project = project_from(&event.repository);
        let run = &event.workflow_run;
        let Some(head) = &run.head_commit else {
            tracing::debug!(run_id = run.id, "workflow run has no head commit");
            return Ok(());
        };
        let commit = Commit { sha: head.id.clone(), timestamp: head.timestamp };

        let files =
            ingest::fetch_report_files(&ctx.github, &ctx.storage, &project, &commit, run.id)
                .await?;
        if files.is_empty() {
            tracing::info!(
                repo = %project.url(),
                run_id = run.id,
                "no report files found"
            );
            return Ok(());
        }

        for pr in &run.pull_requests {
            process_pull_request(&ctx, &project, pr, &commit, run.workflow_id, &files).await?;
        }
        Ok(())
    });
}

/// A newly opened PR may already have a completed run on its head commit;
/// find it and post the comparison.
fn handle_pull_request(ctx: Arc<AppContext>, delivery_id: String, event: PullRequestEvent) {
    if event.action != "opened" {
        return;
    }
    let tasks = ctx.tasks.clone();
    tasks.spawn("pull_request", &delivery_id, async move {
        let project = project_from(&event.repository);
        let pr = &event.pull_request;

        let head = ctx
            .github
            .get_commit(&project.owner, &project.name, &pr.head.sha)
            .await?
            .context("pull request head commit not found")?;
        let head_commit =
            Commit { sha: head.sha, timestamp: head.commit.committer.date };

        let runs = ctx
            .github
            .list_workflow_runs(&project.owner, &project.name, &head_commit.sha)
            .await?;
        if runs.is_empty() {
            tracing::debug!(pr = pr.number, "no workflow runs found");
            return Ok(());
        }

        // Find report files in any completed workflow run for the head.
        let mut found = None;
        for run in &runs {
            let files = ingest::fetch_report_files(
                &ctx.github,
                &ctx.storage,
                &project,
                &head_commit,
                run.id,
            )
            .await?;
            if !files.is_empty() {
                found = Some((run, files));
                break;
            }
        }
        let Some((run, files)) = found else {
            tracing::info!(pr = pr.number, "no report files found");
            return Ok(());
        };

        process_pull_request(&ctx, &project, pr, &head_commit, run.workflow_id, &files).await
    });
}

fn project_from(repo: &events::Repository) -> Project {
    Project { id: repo.id, owner: repo.owner.login.clone(), name: repo.name.clone() }
}

/// Compare the PR's head reports against its base and upsert the comment.
async fn process_pull_request(
    ctx: &AppContext,
    project: &Project,
    pr: &PullRequestRef,
    head_commit: &Commit,
    workflow_id: i64,
    head_files: &[ReportFile],
) -> Result<()> {
    if pr.head.sha != head_commit.sha {
        tracing::debug!(
            pr = pr.number,
            pr_head = %pr.head.sha,
            run_head = %head_commit.sha,
            "head SHA does not match workflow run SHA"
        );
        return Ok(());
    }

    let Some(base) =
        ctx.github.get_commit(&project.owner, &project.name, &pr.base.sha).await?
    else {
        tracing::debug!(pr = pr.number, base = %pr.base.sha, "base commit not found");
        return Ok(());
    };
    let base_commit = Commit { sha: base.sha, timestamp: base.commit.committer.date };

    // Only runs of the same workflow are comparable.
    let runs = ctx
        .github
        .list_workflow_runs(&project.owner, &project.name, &base_commit.sha)
        .await?;
    let Some(base_run) = runs.iter().find(|run| run.workflow_id == workflow_id) else {
        tracing::debug!(
            pr = pr.number,
            base = %base_commit.sha,
            "no base workflow runs found"
        );
        return Ok(());
    };

    let base_files = ingest::fetch_report_files(
        &ctx.github,
        &ctx.storage,
        project,
        &base_commit,
        base_run.id,
    )
    .await?;
    if base_files.is_empty() {
        tracing::info!(pr = pr.number, base = %base_commit.sha, "no base report files found");
        return Ok(());
    }

    let mut sections = Vec::new();
    for base_file in &base_files {
        for file in head_files {
            if base_file.version != file.version {
                continue;
            }
            tracing::info!(
                version = %file.version,
                from = %base_file.commit.sha,
                to = %file.commit.sha,
                "generating changes"
            );
            let changes = diff::generate_changes(
                &ctx.config.app.objdiff_path,
                &base_file.report,
                &file.report,
            )
            .await?;
            if let Some(body) = comment::render_changes(&changes) {
                sections.push((file.version.clone(), body));
            }
        }
    }
    if sections.is_empty() {
        tracing::info!(pr = pr.number, "no changes found");
        return Ok(());
    }

    let body = comment::render_comment(&sections);
    upsert_comment(ctx, project, pr.number, &body).await
}

/// Create the PR comment, or edit the daemon's previous one. Posting the
/// identical body again is skipped.
async fn upsert_comment(
    ctx: &AppContext,
    project: &Project,
    pr_number: i64,
    body: &str,
) -> Result<()> {
    let existing = ctx
        .github
        .list_issue_comments(&project.owner, &project.name, pr_number)
        .await?;
    let previous = existing.iter().find(|c| c.user.login == BOT_LOGIN);
    match previous {
        Some(comment) if comment.body == body => Ok(()),
        Some(comment) => {
            ctx.github
                .edit_issue_comment(&project.owner, &project.name, comment.id, body)
                .await
        }
        None => {
            ctx.github
                .create_issue_comment(&project.owner, &project.name, pr_number, body)
                .await
        }
    }
}
