pub mod comment;
pub mod config;
pub mod diff;
pub mod github;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod report;
pub mod storage;
pub mod tasks;
pub mod zipstream;

use config::Config;
use github::GitHub;
use storage::Storage;
use tasks::TaskRunner;

/// Shared application state passed to every request handler and background
/// task.
pub struct AppContext {
    pub config: Config,
    pub storage: Storage,
    pub github: GitHub,
    pub tasks: TaskRunner,
}
