//! Work queue for detached workflow runs
//!
//! Task creation submits a run here and returns at once. A dispatcher loop
//! drains the bounded channel and spawns each run; outcomes are logged and
//! never reach the submitter.

use crate::conductor::Orchestrator;
use sdk::EngineError;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// A queued workflow run
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub task_id: i64,
    pub input: Value,
}

pub struct WorkQueue {
    sender: Mutex<Option<mpsc::Sender<WorkItem>>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Start the dispatcher; must be called inside a tokio runtime
    pub fn start(orchestrator: Arc<Orchestrator>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(dispatch(orchestrator, rx));

        Self {
            sender: Mutex::new(Some(tx)),
            dispatcher: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// Queue a run without waiting for it
    pub fn submit(&self, task_id: i64, input: Value) -> Result<(), EngineError> {
        let sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        let sender = sender.as_ref().ok_or(EngineError::QueueClosed)?;

        sender
            .try_send(WorkItem { task_id, input })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EngineError::QueueFull(task_id),
                mpsc::error::TrySendError::Closed(_) => EngineError::QueueClosed,
            })?;

        debug!("Queued workflow run for task {}", task_id);
        Ok(())
    }

    /// Stop accepting work and wait for every queued and running run
    pub async fn drain(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Work queue dispatcher panicked: {}", e);
            }
        }
    }
}

async fn dispatch(orchestrator: Arc<Orchestrator>, mut rx: mpsc::Receiver<WorkItem>) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            item = rx.recv() => {
                let Some(item) = item else { break };
                let orchestrator = Arc::clone(&orchestrator);
                running.spawn(async move {
                    let outcome = orchestrator.run_with_input(item.task_id, item.input).await;
                    info!(
                        "Run for task {} ended: {:?} ({})",
                        outcome.task_id, outcome.status, outcome.message
                    );
                });
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!("Workflow run panicked: {}", e);
                }
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!("Workflow run panicked: {}", e);
        }
    }
    debug!("Work queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::CapabilityRegistry;
    use crate::config::WorkflowConfig;
    use crate::db::Database;
    use sdk::{Priority, TaskStatus};
    use serde_json::json;
    use tempfile::TempDir;

    async fn orchestrator() -> (TempDir, Database, Arc<Orchestrator>) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let config = WorkflowConfig {
            step_pause_ms: 0,
            ..WorkflowConfig::default()
        };
        let registry = Arc::new(CapabilityRegistry::builtin(db.clone(), None, &config));
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), registry, config));
        (temp_dir, db, orchestrator)
    }

    #[tokio::test]
    async fn test_submit_and_drain_runs_to_terminal() {
        let (_dir, db, orchestrator) = orchestrator().await;
        let user = db.users().create_user("ada", "ada@example.com", &json!({})).await.unwrap();
        let task = db
            .tasks()
            .create_task(user.id, "Plan a launch", "", Priority::Medium)
            .await
            .unwrap();

        let queue = WorkQueue::start(orchestrator, 4);
        queue.submit(task.id, json!({})).unwrap();
        queue.drain().await;

        let task = db.tasks().get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_submit_after_drain_is_rejected() {
        let (_dir, _db, orchestrator) = orchestrator().await;
        let queue = WorkQueue::start(orchestrator, 1);
        queue.drain().await;

        assert!(matches!(
            queue.submit(1, json!({})),
            Err(EngineError::QueueClosed)
        ));
    }
}
