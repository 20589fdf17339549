//! Step context
//!
//! Gathers what a research or act step needs to know before it runs: the
//! owning task, the step's focus, and a digest of what earlier steps of the
//! same task produced. The execution ledger is the only channel through which
//! a step sees prior steps.

use crate::db::{Database, Task};
use anyhow::Result;
use serde_json::Value;

/// Completed records included in the previous-steps digest
pub const PREVIOUS_STEP_LIMIT: i64 = 5;

const NO_PREVIOUS_CONTEXT: &str = "No previous context available";

/// Inputs shared by the generative step handlers
#[derive(Debug, Clone)]
pub struct StepContext {
    pub task: Task,
    /// What this step concentrates on
    pub focus: String,
    /// One line per recent completed step, newest first
    pub previous_steps: String,
    /// Recall payload forwarded by the orchestrator, if any
    pub memory_context: Value,
}

impl StepContext {
    /// Load the context for a step, or `None` when the task does not exist
    ///
    /// The focus is `input[focus_key]`, then the subtask title, then `default_focus`.
    pub async fn load(
        db: &Database,
        task_id: i64,
        input: &Value,
        focus_key: &str,
        default_focus: &str,
    ) -> Result<Option<Self>> {
        let task = match db.tasks().get_task(task_id).await? {
            Some(task) => task,
            None => return Ok(None),
        };

        let focus = [focus_key, "subtask_title"]
            .iter()
            .find_map(|key| {
                input
                    .get(*key)
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
            })
            .unwrap_or(default_focus)
            .to_string();

        Ok(Some(Self {
            task,
            focus,
            previous_steps: previous_steps(db, task_id).await?,
            memory_context: input.get("memory_context").cloned().unwrap_or(Value::Null),
        }))
    }

    /// Memory context as prompt text
    pub fn memory_text(&self) -> String {
        match &self.memory_context {
            Value::Null => "None".to_string(),
            other => other.to_string(),
        }
    }
}

/// Digest of the most recent completed steps of a task
///
/// Each line reads `<capability>: <output>`.
pub async fn previous_steps(db: &Database, task_id: i64) -> Result<String> {
    let records = db
        .executions()
        .recent_completed(task_id, PREVIOUS_STEP_LIMIT)
        .await?;

    let lines: Vec<String> = records
        .iter()
        .filter_map(|record| {
            record
                .output_data
                .as_ref()
                .filter(|output| !output.is_null())
                .map(|output| format!("{}: {}", record.agent_type, output))
        })
        .collect();

    if lines.is_empty() {
        Ok(NO_PREVIOUS_CONTEXT.to_string())
    } else {
        Ok(lines.join("\n"))
    }
}
