//! Artifact ingestion: from a CI run's artifact list to stored reports.
//!
//! For each artifact whose name matches the report pattern, the store is
//! consulted first; a hit short-circuits the download entirely. Otherwise
//! the artifact ZIP is streamed through the archive reader on a blocking
//! task while the HTTP body is still arriving, the first report entry is
//! parsed, and the result is inserted.

use std::io::Read;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use regex::Regex;
use tokio::sync::mpsc;

use crate::{
    github::GitHub,
    models::{Commit, Project, ReportFile},
    report::{codec, Report},
    storage::Storage,
    zipstream::ZipStream,
};

/// Artifacts named `<version>_report` (with an optional trailing qualifier)
/// carry progress reports; everything else a workflow uploads is ignored.
fn artifact_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<version>[A-Za-z0-9_\-]+)[_-]report(?:[_-].*)?$").unwrap()
    })
}

/// Number of in-flight download chunks between the HTTP task and the
/// blocking archive reader.
const CHUNK_CHANNEL_DEPTH: usize = 8;

/// Collect every report attached to a workflow run, sorted by version.
///
/// Artifacts without a report entry are skipped; download and parse failures
/// abort the whole ingest.
pub async fn fetch_report_files(
    github: &GitHub,
    storage: &Storage,
    project: &Project,
    commit: &Commit,
    run_id: i64,
) -> Result<Vec<ReportFile>> {
    let artifacts = github
        .list_run_artifacts(&project.owner, &project.name, run_id)
        .await
        .with_context(|| format!("failed to list artifacts for run {run_id}"))?;

    let mut files = Vec::new();
    for artifact in &artifacts {
        let Some(version) = artifact_name_regex()
            .captures(&artifact.name)
            .and_then(|c| c.name("version"))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };
        if storage.report_exists(project.id, &version, &commit.sha).await? {
            tracing::debug!(
                artifact = %artifact.name,
                version = %version,
                "report already stored, skipping download"
            );
            if let Some(file) = storage.get_report(project.id, &version, &commit.sha).await? {
                files.push(file);
            }
            continue;
        }

        // Expiry only matters when a download is actually needed; reports
        // already in the store outlive the CI retention window.
        if artifact.expired {
            tracing::debug!(artifact = %artifact.name, "skipping expired artifact");
            continue;
        }

        let report = download_and_parse(github, project, artifact.id)
            .await
            .with_context(|| format!("failed to ingest artifact {}", artifact.name))?;
        let Some(report) = report else {
            tracing::warn!(artifact = %artifact.name, "no report file found in artifact");
            continue;
        };

        let file = ReportFile {
            project: project.clone(),
            commit: commit.clone(),
            version,
            report,
        };
        storage.insert_report(&file).await?;
        tracing::info!(
            artifact = %artifact.name,
            version = %file.version,
            commit = %file.commit.sha,
            "stored report"
        );
        files.push(file);
    }

    files.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(files)
}

/// Stream an artifact ZIP and parse the first report entry out of it.
/// Returns `None` when the archive contains no report file.
async fn download_and_parse(
    github: &GitHub,
    project: &Project,
    artifact_id: i64,
) -> Result<Option<Report>> {
    let response = github
        .download_artifact(&project.owner, &project.name, artifact_id)
        .await?;

    let (tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(CHUNK_CHANNEL_DEPTH);
    let parser =
        tokio::task::spawn_blocking(move || find_report_entry(ChannelReader::new(rx)));

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let message = chunk
            .map(|bytes| bytes.to_vec())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let failed = message.is_err();
        // A closed channel means the parser is done (it found a report or
        // gave up); stop pulling the body either way.
        if tx.send(message).await.is_err() || failed {
            break;
        }
    }
    drop(tx);

    parser.await.context("archive parse task panicked")?
}

/// Walk the archive and decode the first entry that looks like a report.
fn find_report_entry(reader: impl Read) -> Result<Option<Report>> {
    let mut archive = ZipStream::new(reader);
    while let Some(mut entry) = archive.next_entry()? {
        let name = entry.header().name().into_owned();
        if entry.header().is_dir() || !codec::is_report_name(&name) {
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read archive entry {name}"))?;
        let report = codec::parse_report(&name, &data)?;
        tracing::debug!(entry = %name, bytes = data.len(), "parsed report entry");
        return Ok(Some(report));
    }
    Ok(None)
}

/// Blocking `Read` over a channel of download chunks.
struct ChannelReader {
    rx: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    buf: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<std::io::Result<Vec<u8>>>) -> Self {
        Self { rx, buf: Vec::new(), pos: 0 }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Some(Err(e)) => return Err(e),
                // sender dropped: end of body
                None => return Ok(0),
            }
        }
        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        let re = artifact_name_regex();
        let version = |name: &str| {
            re.captures(name).and_then(|c| c.name("version")).map(|m| m.as_str().to_string())
        };
        assert_eq!(version("GALE01_report"), Some("GALE01".into()));
        assert_eq!(version("v1-2_report_extra"), Some("v1-2".into()));
        assert_eq!(version("GALE01-report"), Some("GALE01".into()));
        assert_eq!(version("report"), None);
        assert_eq!(version("GALE01_maps"), None);
        assert_eq!(version("GALE01_reporting"), None);
    }
}
