//! Driver for the external differ (objdiff-cli).
//!
//! The differ consumes a binary `ChangesInput` on stdin and answers with a
//! binary `Changes` on stdout. It prints nothing on stderr when successful,
//! so any stderr output is folded into the error on failure.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use prost::Message;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::report::{
    changes::{Changes, ChangesInput},
    Report,
};

/// Compare two reports by invoking the differ executable.
pub async fn generate_changes(
    objdiff_path: &Path,
    prev: &Report,
    curr: &Report,
) -> Result<Changes> {
    let input =
        ChangesInput { from: Some(prev.clone()), to: Some(curr.clone()) }.encode_to_vec();

    // `--` ends flag parsing; the two `-` positionals select stdin/stdout.
    let mut child = Command::new(objdiff_path)
        .args(["report", "changes", "-f", "proto", "--", "-", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn differ {}", objdiff_path.display()))?;

    let mut stdin = child.stdin.take().context("differ stdin not piped")?;
    // Feed stdin concurrently with draining output, or a large report could
    // deadlock both processes on full pipes.
    let writer = tokio::spawn(async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    });

    let output = child.wait_with_output().await.context("failed to run differ")?;
    if let Ok(Err(e)) = writer.await {
        // The differ may exit before consuming all input; only worth noting.
        tracing::debug!(error = %e, "failed to write full differ input");
    }

    if !output.status.success() {
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        bail!(
            "differ exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&combined).trim()
        );
    }

    Changes::decode(output.stdout.as_slice()).context("failed to decode differ output")
}
