//! Execution ledger
//!
//! One record per handler invocation, including failures, plus the
//! controller summaries. A record is written either as `running` and later
//! finished exactly once, or appended already terminal. Terminal records are
//! never updated again.

use anyhow::{Context, Result};
use sdk::ExecutionStatus;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{decode_json, now_millis};

/// Execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub task_id: i64,
    pub subtask_id: Option<i64>,
    /// Capability name, or `controller` for run summaries
    pub agent_type: String,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

const EXECUTION_COLUMNS: &str = "id, task_id, subtask_id, agent_type, input_data, output_data, status, error_message, started_at, completed_at";

fn execution_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
    let input: String = row.try_get("input_data")?;
    let output: Option<String> = row.try_get("output_data")?;
    let status: String = row.try_get("status")?;
    Ok(ExecutionRecord {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        subtask_id: row.try_get("subtask_id")?,
        agent_type: row.try_get("agent_type")?,
        input_data: decode_json(&input),
        output_data: output.as_deref().map(decode_json),
        status: status.parse().map_err(anyhow::Error::msg)?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Execution ledger repository
pub struct ExecutionRepository {
    pool: SqlitePool,
}

impl ExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a running record for an invocation that is about to start
    pub async fn start(
        &self,
        task_id: i64,
        subtask_id: Option<i64>,
        agent_type: &str,
        input: &serde_json::Value,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO executions (task_id, subtask_id, agent_type, input_data, status, started_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(subtask_id)
        .bind(agent_type)
        .bind(serde_json::to_string(input)?)
        .bind(ExecutionStatus::Running.as_str())
        .bind(now_millis())
        .execute(&self.pool)
        .await
        .context("Failed to start execution record")?;

        Ok(result.last_insert_rowid())
    }

    /// Close a running record
    ///
    /// Records that are already terminal are left untouched.
    pub async fn finish(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        output: &serde_json::Value,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE executions SET status = ?, output_data = ?, error_message = ?, completed_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(serde_json::to_string(output)?)
        .bind(error)
        .bind(now_millis())
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .context("Failed to finish execution record")?;

        Ok(())
    }

    /// Append a record that is already terminal
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        task_id: i64,
        subtask_id: Option<i64>,
        agent_type: &str,
        input: &serde_json::Value,
        output: &serde_json::Value,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<i64> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO executions (task_id, subtask_id, agent_type, input_data, output_data, status, error_message, started_at, completed_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(subtask_id)
        .bind(agent_type)
        .bind(serde_json::to_string(input)?)
        .bind(serde_json::to_string(output)?)
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to append execution record")?;

        Ok(result.last_insert_rowid())
    }

    /// Every record of a task in start order
    pub async fn list_for_task(&self, task_id: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE task_id = ? ORDER BY started_at ASC, id ASC",
            EXECUTION_COLUMNS
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch execution records")?;

        rows.iter().map(execution_from_row).collect()
    }

    /// Most recently started records of a task, newest first
    pub async fn recent_for_task(&self, task_id: i64, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE task_id = ? ORDER BY started_at DESC, id DESC LIMIT ?",
            EXECUTION_COLUMNS
        ))
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent execution records")?;

        rows.iter().map(execution_from_row).collect()
    }

    /// Most recent completed records of a task, newest first
    pub async fn recent_completed(&self, task_id: i64, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE task_id = ? AND status = 'completed' ORDER BY started_at DESC, id DESC LIMIT ?",
            EXECUTION_COLUMNS
        ))
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch completed execution records")?;

        rows.iter().map(execution_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use sdk::Priority;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database, i64) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let user = db
            .users()
            .create_user("tester", "t@example.com", &json!({}))
            .await
            .unwrap();
        let task = db
            .tasks()
            .create_task(user.id, "Ledger", "", Priority::Medium)
            .await
            .unwrap();
        (temp_dir, db, task.id)
    }

    #[tokio::test]
    async fn test_start_then_finish() {
        let (_dir, db, task_id) = setup().await;
        let ledger = db.executions();

        let id = ledger
            .start(task_id, None, "research", &json!({"q": 1}))
            .await
            .unwrap();
        let records = ledger.list_for_task(task_id).await.unwrap();
        assert_eq!(records[0].status, ExecutionStatus::Running);
        assert!(records[0].output_data.is_none());

        ledger
            .finish(id, ExecutionStatus::Completed, &json!({"findings": []}), None)
            .await
            .unwrap();
        let records = ledger.list_for_task(task_id).await.unwrap();
        assert_eq!(records[0].status, ExecutionStatus::Completed);
        assert!(records[0].completed_at.is_some());
        assert_eq!(records[0].input_data["q"], 1);
    }

    #[tokio::test]
    async fn test_terminal_records_are_immutable() {
        let (_dir, db, task_id) = setup().await;
        let ledger = db.executions();

        let id = ledger.start(task_id, None, "act", &json!({})).await.unwrap();
        ledger
            .finish(id, ExecutionStatus::Failed, &json!({}), Some("boom"))
            .await
            .unwrap();
        ledger
            .finish(id, ExecutionStatus::Completed, &json!({"late": true}), None)
            .await
            .unwrap();

        let record = &ledger.list_for_task(task_id).await.unwrap()[0];
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_recent_completed_newest_first() {
        let (_dir, db, task_id) = setup().await;
        let ledger = db.executions();

        for agent in ["recall", "research", "act"] {
            ledger
                .append(
                    task_id,
                    None,
                    agent,
                    &json!({}),
                    &json!({"agent": agent}),
                    ExecutionStatus::Completed,
                    None,
                )
                .await
                .unwrap();
        }
        ledger
            .append(
                task_id,
                None,
                "act",
                &json!({}),
                &json!({}),
                ExecutionStatus::Failed,
                Some("nope"),
            )
            .await
            .unwrap();

        let recent = ledger.recent_completed(task_id, 2).await.unwrap();
        let agents: Vec<&str> = recent.iter().map(|r| r.agent_type.as_str()).collect();
        assert_eq!(agents, vec!["act", "research"]);

        let all_recent = ledger.recent_for_task(task_id, 5).await.unwrap();
        assert_eq!(all_recent.len(), 4);
        assert_eq!(all_recent[0].status, ExecutionStatus::Failed);
    }
}
