//! Progress projection
//!
//! Builds a point-in-time snapshot of a task from its subtasks and the
//! execution ledger. Reads only; a run in progress may be observed halfway.

use crate::db::{Database, Subtask};
use anyhow::Result;
use sdk::{ActivityEntry, EngineError, ProgressSnapshot, SubtaskStatus};

/// Describe where a task currently is
///
/// The first executing subtask wins, then the first pending one. A task
/// with no subtasks counts as completed.
pub fn current_step(subtasks: &[Subtask]) -> String {
    if let Some(executing) = subtasks
        .iter()
        .find(|s| s.status == SubtaskStatus::Executing)
    {
        return executing.title.clone();
    }

    if let Some(pending) = subtasks.iter().find(|s| s.status == SubtaskStatus::Pending) {
        return format!("Next: {}", pending.title);
    }

    if subtasks.iter().all(|s| s.status == SubtaskStatus::Completed) {
        return "Completed".to_string();
    }

    "Unknown".to_string()
}

/// Completed share of all subtasks, as a percentage
pub fn percent_complete(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64 * 100.0
}

#[derive(Clone)]
pub struct ProgressProjector {
    db: Database,
    recent_activity_limit: i64,
}

impl ProgressProjector {
    pub fn new(db: Database, recent_activity_limit: i64) -> Self {
        Self {
            db,
            recent_activity_limit,
        }
    }

    /// Snapshot the progress of a task
    ///
    /// Fails with [`EngineError::NotFound`] when the task does not exist.
    pub async fn project(&self, task_id: i64) -> Result<ProgressSnapshot> {
        let task = self
            .db
            .tasks()
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::task_not_found(task_id))?;

        let subtasks = self.db.tasks().get_subtasks(task_id).await?;
        let total_steps = subtasks.len();
        let completed_steps = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count();

        let recent_activity = self
            .db
            .executions()
            .recent_for_task(task_id, self.recent_activity_limit)
            .await?
            .into_iter()
            .map(|record| ActivityEntry {
                capability: record.agent_type,
                status: record.status,
                started_at: record.started_at,
                completed_at: record.completed_at,
            })
            .collect();

        Ok(ProgressSnapshot {
            task_id,
            status: task.status,
            total_steps,
            completed_steps,
            percent_complete: percent_complete(completed_steps, total_steps),
            current_step: current_step(&subtasks),
            recent_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(index: i64, title: &str, status: SubtaskStatus) -> Subtask {
        Subtask {
            id: index + 1,
            task_id: 1,
            title: title.to_string(),
            description: String::new(),
            capability: "act".to_string(),
            order_index: index,
            status,
            estimated_duration: None,
            created_at: 0,
            completed_at: None,
        }
    }

    #[test]
    fn test_current_step_prefers_executing() {
        let subtasks = vec![
            subtask(0, "Gather", SubtaskStatus::Completed),
            subtask(1, "Draft", SubtaskStatus::Executing),
            subtask(2, "Review", SubtaskStatus::Pending),
        ];
        assert_eq!(current_step(&subtasks), "Draft");
    }

    #[test]
    fn test_current_step_next_pending() {
        let subtasks = vec![
            subtask(0, "Gather", SubtaskStatus::Completed),
            subtask(1, "Draft", SubtaskStatus::Pending),
        ];
        assert_eq!(current_step(&subtasks), "Next: Draft");
    }

    #[test]
    fn test_current_step_terminal_states() {
        let done = vec![
            subtask(0, "Gather", SubtaskStatus::Completed),
            subtask(1, "Draft", SubtaskStatus::Completed),
        ];
        assert_eq!(current_step(&done), "Completed");

        let mixed = vec![
            subtask(0, "Gather", SubtaskStatus::Completed),
            subtask(1, "Draft", SubtaskStatus::Failed),
        ];
        assert_eq!(current_step(&mixed), "Unknown");
        assert_eq!(current_step(&[]), "Completed");
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(0, 0), 0.0);
        assert_eq!(percent_complete(1, 4), 25.0);
        assert_eq!(percent_complete(3, 3), 100.0);
    }
}
