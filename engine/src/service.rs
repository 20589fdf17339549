//! Task service
//!
//! The surface transports and the CLI talk to. Creating a task persists it
//! and queues its workflow run; everything else reads the store.

use crate::conductor::progress::{current_step, percent_complete};
use crate::conductor::{CapabilityRegistry, Orchestrator, ProgressProjector};
use crate::config::Config;
use crate::db::{Database, ExecutionRecord, MemoryRecord, Subtask, Task, User};
use crate::llm::structured::GenerativeClient;
use crate::queue::WorkQueue;
use anyhow::{Context, Result};
use sdk::{EngineError, MemoryKind, Priority, ProgressSnapshot, SubtaskStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Advisory duration, in seconds, reported when a task is accepted
pub const ESTIMATED_RUN_SECS: i64 = 300;

/// Returned as soon as a task is persisted and queued
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAck {
    pub task_id: i64,
    pub status: String,
    pub message: String,
    pub estimated_duration: i64,
}

/// Full view of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task: Task,
    /// In index order
    pub subtasks: Vec<Subtask>,
    /// In start order
    pub executions: Vec<ExecutionRecord>,
    pub progress: f64,
    pub current_step: String,
}

/// One row of a user's task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub subtask_count: usize,
    pub completed_subtasks: usize,
    pub progress: f64,
}

pub struct TaskService {
    db: Database,
    queue: WorkQueue,
    projector: ProgressProjector,
    retention_days: i64,
}

impl TaskService {
    /// Open the configured store and wire up the built-in handlers
    ///
    /// Must be called inside a tokio runtime.
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Database::new(&config.database_path())
            .await
            .context("Failed to open database")?;

        let client = GenerativeClient::from_config(&config.llm).map(Arc::new);
        match &client {
            Some(client) => info!("Generative provider: {}", client.provider_name()),
            None => info!("No generative provider, handlers run in fallback mode"),
        }

        let registry = CapabilityRegistry::builtin(db.clone(), client, &config.workflow);
        Ok(Self::with_registry(db, registry, config))
    }

    /// Build a service around an existing store and registry
    pub fn with_registry(db: Database, registry: CapabilityRegistry, config: &Config) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            Arc::new(registry),
            config.workflow.clone(),
        ));
        let queue = WorkQueue::start(orchestrator, config.workflow.queue_capacity);
        let projector = ProgressProjector::new(db.clone(), config.progress.recent_activity_limit);

        Self {
            db,
            queue,
            projector,
            retention_days: config.workflow.retention_days,
        }
    }

    pub fn projector(&self) -> ProgressProjector {
        self.projector.clone()
    }

    /// Persist a task and queue its workflow run
    pub async fn create_and_run_task(
        &self,
        user_id: i64,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<TaskAck> {
        self.require_user(user_id).await?;

        let task = self
            .db
            .tasks()
            .create_task(user_id, title, description, priority)
            .await?;

        let submitted = self.queue.submit(
            task.id,
            json!({
                "request": title,
                "description": description,
            }),
        );
        if let Err(e) = submitted {
            warn!("Task {} could not be queued: {}", task.id, e);
            self.db
                .tasks()
                .update_status(task.id, TaskStatus::Failed)
                .await
                .context("Failed to mark unqueued task as failed")?;
            return Err(e.into());
        }
        info!("Task {} created and queued for user {}", task.id, user_id);

        Ok(TaskAck {
            task_id: task.id,
            status: "started".to_string(),
            message: "Task created and workflow started".to_string(),
            estimated_duration: ESTIMATED_RUN_SECS,
        })
    }

    pub async fn get_progress(&self, task_id: i64) -> Result<ProgressSnapshot> {
        self.projector.project(task_id).await
    }

    pub async fn get_status(&self, task_id: i64) -> Result<TaskStatusReport> {
        let task = self.require_task(task_id).await?;
        let subtasks = self.db.tasks().get_subtasks(task_id).await?;
        let executions = self.db.executions().list_for_task(task_id).await?;

        let completed = count_completed(&subtasks);
        Ok(TaskStatusReport {
            progress: percent_complete(completed, subtasks.len()),
            current_step: current_step(&subtasks),
            task,
            subtasks,
            executions,
        })
    }

    /// A user's tasks, newest first
    pub async fn list_user_tasks(&self, user_id: i64, limit: i64) -> Result<Vec<TaskSummary>> {
        self.require_user(user_id).await?;

        let tasks = self.db.tasks().list_user_tasks(user_id, limit).await?;
        let mut summaries = Vec::with_capacity(tasks.len());
        for task in tasks {
            let subtasks = self.db.tasks().get_subtasks(task.id).await?;
            let completed = count_completed(&subtasks);
            summaries.push(TaskSummary {
                id: task.id,
                title: task.title,
                description: task.description,
                status: task.status,
                priority: task.priority,
                created_at: task.created_at,
                updated_at: task.updated_at,
                completed_at: task.completed_at,
                subtask_count: subtasks.len(),
                completed_subtasks: completed,
                progress: percent_complete(completed, subtasks.len()),
            });
        }
        Ok(summaries)
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        preferences: &Value,
    ) -> Result<User> {
        self.db.users().create_user(username, email, preferences).await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        self.require_user(user_id).await
    }

    pub async fn update_user_preferences(&self, user_id: i64, preferences: &Value) -> Result<User> {
        if !self
            .db
            .users()
            .update_preferences(user_id, preferences)
            .await?
        {
            return Err(EngineError::user_not_found(user_id).into());
        }
        self.require_user(user_id).await
    }

    pub async fn store_memory(
        &self,
        user_id: i64,
        kind: &MemoryKind,
        key: &str,
        value: &Value,
        importance: i64,
    ) -> Result<MemoryRecord> {
        self.require_user(user_id).await?;
        self.db
            .memories()
            .store(user_id, kind, key, value, importance)
            .await
    }

    /// Memories by importance, then recency
    pub async fn list_user_memories(
        &self,
        user_id: i64,
        kind: Option<&MemoryKind>,
    ) -> Result<Vec<MemoryRecord>> {
        self.require_user(user_id).await?;
        self.db.memories().list_for_user(user_id, kind).await
    }

    /// Delete terminal tasks older than `days`, or the configured retention
    pub async fn cleanup_old_tasks(&self, days: Option<i64>) -> Result<u64> {
        let days = days.unwrap_or(self.retention_days);
        let deleted = self.db.tasks().delete_old_tasks(days).await?;
        info!("Removed {} tasks older than {} days", deleted, days);
        Ok(deleted)
    }

    /// Stop accepting tasks and wait for queued runs to finish
    pub async fn shutdown(&self) {
        self.queue.drain().await;
        if let Err(e) = self.db.flush_wal().await {
            warn!("Failed to flush WAL on shutdown: {:#}", e);
        }
    }

    async fn require_user(&self, user_id: i64) -> Result<User> {
        self.db
            .users()
            .get_user(user_id)
            .await?
            .ok_or_else(|| EngineError::user_not_found(user_id).into())
    }

    async fn require_task(&self, task_id: i64) -> Result<Task> {
        self.db
            .tasks()
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_id).into())
    }
}

fn count_completed(subtasks: &[Subtask]) -> usize {
    subtasks
        .iter()
        .filter(|s| s.status == SubtaskStatus::Completed)
        .count()
}
