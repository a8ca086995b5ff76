//! Detached background tasks for webhook work.
//!
//! Webhook handlers must answer quickly, so the real work runs on spawned
//! tasks. Every task gets a one-minute wall-clock budget and races the
//! process-wide shutdown signal; failures land in the log with the event
//! coordinates, never in the webhook response.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;

/// Wall-clock budget per background task.
const TASK_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct TaskRunner {
    shutdown: watch::Sender<bool>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { shutdown }
    }

    /// Signal all running tasks to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Run `work` on a detached task with the standard deadline. The caller
    /// returns immediately.
    pub fn spawn<F>(&self, event_type: &str, delivery_id: &str, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let event_type = event_type.to_string();
        let delivery_id = delivery_id.to_string();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let result = tokio::select! {
                outcome = tokio::time::timeout(TASK_DEADLINE, work) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("deadline exceeded after {}s", TASK_DEADLINE.as_secs())),
                },
                _ = shutdown.changed() => Err(anyhow!("cancelled by shutdown")),
            };
            if let Err(error) = result {
                tracing::error!(
                    event_type = %event_type,
                    delivery_id = %delivery_id,
                    error = format!("{error:#}"),
                    "background task failed"
                );
            }
        });
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}
