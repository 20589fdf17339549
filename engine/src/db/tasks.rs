//! Task and subtask persistence
//!
//! Tasks follow a monotonic lifecycle (see [`TaskStatus::can_transition_to`]);
//! every status write here is checked against the stored status so a stale
//! writer can never move a task backwards. Subtasks are only ever created in
//! bulk by [`TaskRepository::commit_plan`].

use anyhow::{bail, Context, Result};
use sdk::{EngineError, Priority, SubtaskStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::now_millis;

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// Subtask record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: i64,
    pub task_id: i64,
    pub title: String,
    pub description: String,
    /// Declared capability, stored verbatim and resolved at dispatch time
    pub capability: String,
    pub order_index: i64,
    pub status: SubtaskStatus,
    pub estimated_duration: Option<i64>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// One planned step, before it is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub title: String,
    pub description: String,
    pub capability: String,
    /// Advisory duration in seconds
    pub estimated_duration: Option<i64>,
}

const TASK_COLUMNS: &str =
    "id, user_id, title, description, status, priority, created_at, updated_at, completed_at";

const SUBTASK_COLUMNS: &str = "id, task_id, title, description, capability, order_index, status, estimated_duration, created_at, completed_at";

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    Ok(Task {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: status.parse().map_err(anyhow::Error::msg)?,
        priority: priority.parse().map_err(anyhow::Error::msg)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn subtask_from_row(row: &SqliteRow) -> Result<Subtask> {
    let status: String = row.try_get("status")?;
    Ok(Subtask {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        capability: row.try_get("capability")?,
        order_index: row.try_get("order_index")?,
        status: status.parse().map_err(anyhow::Error::msg)?,
        estimated_duration: row.try_get("estimated_duration")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Task repository for database operations
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new pending task
    pub async fn create_task(
        &self,
        user_id: i64,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<Task> {
        let now = now_millis();

        let result = sqlx::query(
            "INSERT INTO tasks (user_id, title, description, status, priority, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(title)
        .bind(description)
        .bind(TaskStatus::Pending.as_str())
        .bind(priority.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create task")?;

        let id = result.last_insert_rowid();
        debug!("Created task {} for user {}", id, user_id);

        Ok(Task {
            id,
            user_id,
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;

        row.as_ref().map(task_from_row).transpose()
    }

    /// Tasks owned by a user, newest first
    pub async fn list_user_tasks(&self, user_id: i64, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user tasks")?;

        rows.iter().map(task_from_row).collect()
    }

    /// Most recently completed tasks of a user
    pub async fn recent_completed_tasks(&self, user_id: i64, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE user_id = ? AND status = 'completed' ORDER BY completed_at DESC, id DESC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch task history")?;

        rows.iter().map(task_from_row).collect()
    }

    /// Move a task to `status`
    ///
    /// Always stamps `updated_at`; stamps `completed_at` when the new status
    /// is completed. Fails with [`EngineError::InvalidTransition`] when the
    /// move would go backwards or leave a terminal status.
    pub async fn update_status(&self, task_id: i64, status: TaskStatus) -> Result<()> {
        let current = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_id))?
            .status;

        if !current.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        let now = now_millis();
        let completed_at = (status == TaskStatus::Completed).then_some(now);

        // Guard on the observed status so a concurrent writer cannot be overwritten
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at) WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(task_id)
        .bind(current.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to update task status")?;

        if result.rows_affected() == 0 {
            bail!(
                "Task {} changed status concurrently while moving to {}",
                task_id,
                status
            );
        }

        debug!("Task {} status {} -> {}", task_id, current, status);
        Ok(())
    }

    /// Persist a plan: insert every subtask with contiguous order indices and
    /// move the task to planning, all in one transaction
    ///
    /// Fails without writing anything when the plan is empty or the task
    /// already has subtasks.
    pub async fn commit_plan(&self, task_id: i64, specs: &[SubtaskSpec]) -> Result<Vec<Subtask>> {
        if specs.is_empty() {
            return Err(EngineError::Planning("plan contains no subtasks".to_string()).into());
        }

        let now = now_millis();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin plan transaction")?;

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to fetch task for planning")?;
        let current: TaskStatus = status
            .ok_or_else(|| EngineError::task_not_found(task_id))?
            .parse()
            .map_err(anyhow::Error::msg)?;

        if !current.can_transition_to(TaskStatus::Planning) {
            return Err(EngineError::InvalidTransition {
                from: current.to_string(),
                to: TaskStatus::Planning.to_string(),
            }
            .into());
        }

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to count existing subtasks")?;
        if existing > 0 {
            bail!("Task {} already has {} subtasks", task_id, existing);
        }

        let mut created = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let order_index = index as i64;
            let result = sqlx::query(
                "INSERT INTO subtasks (task_id, title, description, capability, order_index, status, estimated_duration, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(task_id)
            .bind(&spec.title)
            .bind(&spec.description)
            .bind(&spec.capability)
            .bind(order_index)
            .bind(SubtaskStatus::Pending.as_str())
            .bind(spec.estimated_duration)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert subtask")?;

            created.push(Subtask {
                id: result.last_insert_rowid(),
                task_id,
                title: spec.title.clone(),
                description: spec.description.clone(),
                capability: spec.capability.clone(),
                order_index,
                status: SubtaskStatus::Pending,
                estimated_duration: spec.estimated_duration,
                created_at: now,
                completed_at: None,
            });
        }

        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(TaskStatus::Planning.as_str())
            .bind(now)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .context("Failed to mark task as planning")?;

        tx.commit().await.context("Failed to commit plan")?;

        debug!("Committed plan with {} subtasks for task {}", created.len(), task_id);
        Ok(created)
    }

    /// Subtasks of a task in execution order
    pub async fn get_subtasks(&self, task_id: i64) -> Result<Vec<Subtask>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subtasks WHERE task_id = ? ORDER BY order_index ASC",
            SUBTASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch subtasks")?;

        rows.iter().map(subtask_from_row).collect()
    }

    /// Set a subtask's status, stamping `completed_at` on completion
    pub async fn update_subtask_status(
        &self,
        subtask_id: i64,
        status: SubtaskStatus,
    ) -> Result<()> {
        let completed_at = (status == SubtaskStatus::Completed).then(now_millis);

        sqlx::query(
            "UPDATE subtasks SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(subtask_id)
        .execute(&self.pool)
        .await
        .context("Failed to update subtask status")?;

        Ok(())
    }

    /// Delete terminal tasks created more than `older_than_days` days ago
    ///
    /// Subtasks and execution records go with them.
    pub async fn delete_old_tasks(&self, older_than_days: i64) -> Result<u64> {
        let cutoff = now_millis() - older_than_days * 24 * 60 * 60 * 1000;

        let result = sqlx::query(
            "DELETE FROM tasks WHERE created_at < ? AND status IN ('completed', 'partial', 'failed')",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to delete old tasks")?;

        Ok(result.rows_affected())
    }
}
