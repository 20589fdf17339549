//! Conductor types
//!
//! The handler seam and the values that flow between the orchestrator, the
//! context assembler, and the transport layer.

use crate::db::MemoryRecord;
use async_trait::async_trait;
use sdk::{Capability, ExecutionResult, TaskStatus};
use serde::{Deserialize, Serialize};

/// A step handler for one capability
///
/// `Ok(ExecutionResult)` with an error status is an ordinary failed step.
/// `Err` is a fault; the orchestrator records it as a failed step too, so the
/// difference only shows in logs. Handlers never write task or subtask status
/// and never write execution records.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// The capability this handler serves
    fn capability(&self) -> Capability;

    async fn execute(
        &self,
        task_id: i64,
        input: &serde_json::Value,
        subtask_id: Option<i64>,
    ) -> anyhow::Result<ExecutionResult>;
}

/// A completed task summarized for context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskHistoryEntry {
    pub task_id: i64,
    pub title: String,
    pub description: String,
    pub completed_at: Option<i64>,
    pub category: String,
}

/// Everything the recall step knows about a user
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextBundle {
    /// Stored preferences object plus `recentPreferences`
    pub preferences: serde_json::Value,
    pub recent_task_history: Vec<TaskHistoryEntry>,
    pub relevant_memories: Vec<MemoryRecord>,
}

/// How a workflow run ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The run reached aggregation
    Success,
    /// Planning failed, the task was missing, or an unexpected fault occurred
    Error,
    /// Nothing was done: the task was already terminal or already running
    Skipped,
}

/// Result of one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowOutcome {
    pub task_id: i64,
    pub status: OutcomeStatus,
    /// Task status after the run, when it is known
    pub task_status: Option<TaskStatus>,
    pub total_subtasks: usize,
    pub completed_subtasks: usize,
    pub failed_subtasks: usize,
    pub success_rate: f64,
    pub message: String,
}

impl WorkflowOutcome {
    pub(crate) fn error(
        task_id: i64,
        task_status: Option<TaskStatus>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            status: OutcomeStatus::Error,
            task_status,
            total_subtasks: 0,
            completed_subtasks: 0,
            failed_subtasks: 0,
            success_rate: 0.0,
            message: message.into(),
        }
    }

    pub(crate) fn skipped(
        task_id: i64,
        task_status: Option<TaskStatus>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            ..Self::error(task_id, task_status, message)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
