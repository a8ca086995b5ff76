//! Core domain types shared across the daemon.

use chrono::{DateTime, Utc};

use crate::report::Report;

/// A tracked repository. The id is the upstream host's repository id and is
/// stable across renames; owner and name track the current coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub owner: String,
    pub name: String,
}

impl Project {
    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

/// A specific commit a report was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub timestamp: DateTime<Utc>,
}

/// A fully resolved report: which project, which commit, which version.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportFile {
    pub project: Project,
    pub commit: Commit,
    pub version: String,
    pub report: Report,
}
