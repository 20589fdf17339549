//! Workflow orchestrator
//!
//! Drives one task through its lifecycle:
//!
//! 1. Recall: load user context. A failure here is recorded and the run goes on.
//! 2. Plan: only when the task has no subtasks. A failure marks the task failed.
//! 3. Execute: subtasks in index order, one at a time, each isolated from the
//!    others' failures.
//! 4. Aggregate: derive the final task status from the completion rate.
//! 5. Summarize: append a `controller` record describing the run.
//!
//! Every handler invocation gets exactly one execution record, written here
//! and never by the handler. Faults that escape steps 1-4 end the run with an
//! error outcome and a failed `controller` record; nothing is retried.

use crate::conductor::registry::CapabilityRegistry;
use crate::conductor::types::{CapabilityHandler, OutcomeStatus, WorkflowOutcome};
use crate::config::WorkflowConfig;
use crate::db::{Database, Subtask, SubtaskSpec, Task};
use crate::secrets::scrub_secrets;
use anyhow::{Context, Result};
use sdk::{
    Capability, EngineError, ExecutionResult, ExecutionStatus, SubtaskStatus, TaskStatus,
    CONTROLLER_AGENT,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Completion rate at or above which a task is completed
pub const COMPLETED_THRESHOLD: f64 = 0.8;

/// Completion rate at or above which a task is partial
pub const PARTIAL_THRESHOLD: f64 = 0.5;

/// Final task status for `completed` successful subtasks out of `total`
///
/// A task with no subtasks has a rate of zero and fails.
pub fn aggregate_status(completed: usize, total: usize) -> (TaskStatus, f64) {
    let rate = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    };

    let status = if rate >= COMPLETED_THRESHOLD {
        TaskStatus::Completed
    } else if rate >= PARTIAL_THRESHOLD {
        TaskStatus::Partial
    } else {
        TaskStatus::Failed
    };

    (status, rate)
}

/// Removes its task id from the in-flight set when dropped
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<i64>>>,
    task_id: i64,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<i64>>>, task_id: i64) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(task_id) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            task_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.task_id);
    }
}

/// Per-run bookkeeping that ends up in the controller summary
#[derive(Default)]
struct RunSummary {
    memory: Value,
    planning: Value,
    total: usize,
    completed: usize,
    failed: usize,
}

impl RunSummary {
    fn to_json(&self, final_status: TaskStatus, success_rate: f64) -> Value {
        json!({
            "memory": self.memory,
            "planning": self.planning,
            "execution": {
                "total_subtasks": self.total,
                "completed_subtasks": self.completed,
                "failed_subtasks": self.failed,
                "success_rate": success_rate,
            },
            "final_status": final_status,
        })
    }
}

pub struct Orchestrator {
    db: Database,
    registry: Arc<CapabilityRegistry>,
    config: WorkflowConfig,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl Orchestrator {
    pub fn new(db: Database, registry: Arc<CapabilityRegistry>, config: WorkflowConfig) -> Self {
        Self {
            db,
            registry,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run the workflow for a task using the task's own title and description
    pub async fn run(&self, task_id: i64) -> WorkflowOutcome {
        self.run_with_input(task_id, json!({})).await
    }

    /// Run the workflow for a task
    ///
    /// `input` may carry `request`, `description`, and `context_data`; missing
    /// fields default to the stored task. Never returns an error: every
    /// failure is reported through the outcome.
    pub async fn run_with_input(&self, task_id: i64, input: Value) -> WorkflowOutcome {
        let _guard = match InFlightGuard::acquire(&self.in_flight, task_id) {
            Some(guard) => guard,
            None => {
                info!("Task {} already has a run in flight, skipping", task_id);
                return WorkflowOutcome::skipped(task_id, None, "A run is already in flight");
            }
        };

        let task = match self.db.tasks().get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("Workflow requested for missing task {}", task_id);
                return WorkflowOutcome::error(task_id, None, format!("task {} not found", task_id));
            }
            Err(e) => {
                error!("Failed to load task {}: {:#}", task_id, e);
                return WorkflowOutcome::error(task_id, None, scrub_secrets(&format!("{:#}", e)));
            }
        };

        if task.status.is_terminal() {
            info!("Task {} is already {}, skipping", task_id, task.status);
            return WorkflowOutcome::skipped(
                task_id,
                Some(task.status),
                format!("Task is already {}", task.status),
            );
        }

        info!("Starting workflow for task {}", task_id);
        let mut summary = RunSummary::default();

        match self.drive(&task, &input, &mut summary).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = scrub_secrets(&format!("Workflow failed: {:#}", e));
                error!("Task {}: {}", task_id, message);

                if let Err(record_err) = self
                    .db
                    .executions()
                    .append(
                        task_id,
                        None,
                        CONTROLLER_AGENT,
                        &input,
                        &summary.to_json(task.status, 0.0),
                        ExecutionStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    error!(
                        "Failed to record workflow fault for task {}: {:#}",
                        task_id, record_err
                    );
                }

                let current = self
                    .db
                    .tasks()
                    .get_task(task_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|t| t.status);
                WorkflowOutcome::error(task_id, current, message)
            }
        }
    }

    async fn drive(
        &self,
        task: &Task,
        input: &Value,
        summary: &mut RunSummary,
    ) -> Result<WorkflowOutcome> {
        let request = input
            .get("request")
            .and_then(Value::as_str)
            .unwrap_or(&task.title)
            .to_string();
        let description = input
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or(&task.description)
            .to_string();

        // 1. Recall
        let mut recall_input = json!({
            "user_id": task.user_id,
            "context_key": self.config.context_key,
        });
        if let Some(context_data) = input.get("context_data").filter(|v| v.is_object()) {
            recall_input["context_data"] = context_data.clone();
        }
        let recall = self
            .invoke(
                task.id,
                None,
                Capability::Recall,
                self.registry.get(Capability::Recall),
                &recall_input,
            )
            .await?;
        let memory_context = if recall.is_success() {
            recall.payload.get("context_summary").cloned().unwrap_or(Value::Null)
        } else {
            warn!("Context load failed for task {}: {}", task.id, recall.message);
            Value::Null
        };
        let recall_status = if recall.is_success() { "success" } else { "error" };
        summary.memory = json!({
            "status": recall_status,
            "message": recall.message,
        });

        // 2. Plan
        let mut subtasks = self.db.tasks().get_subtasks(task.id).await?;
        if subtasks.is_empty() {
            match self.plan(task, &request, &description, summary).await? {
                Some(planned) => subtasks = planned,
                None => return self.fail_planning(task, input, summary).await,
            }
        } else {
            summary.planning = json!({"status": "skipped", "existing_subtasks": subtasks.len()});
        }

        // 3. Execute
        self.db
            .tasks()
            .update_status(task.id, TaskStatus::Executing)
            .await?;
        info!("Task {} executing {} subtasks", task.id, subtasks.len());

        summary.total = subtasks.len();
        for (position, subtask) in subtasks.iter().enumerate() {
            let succeeded = self
                .execute_subtask(task, subtask, &request, &memory_context)
                .await?;
            if succeeded {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }

            if position + 1 < subtasks.len() && self.config.step_pause_ms > 0 {
                tokio::time::sleep(self.config.step_pause()).await;
            }
        }

        // 4. Aggregate
        let (final_status, success_rate) = aggregate_status(summary.completed, summary.total);
        self.db.tasks().update_status(task.id, final_status).await?;
        info!(
            "Task {} finished {} ({}/{} subtasks)",
            task.id, final_status, summary.completed, summary.total
        );

        // 5. Summarize
        self.db
            .executions()
            .append(
                task.id,
                None,
                CONTROLLER_AGENT,
                input,
                &summary.to_json(final_status, success_rate),
                ExecutionStatus::Completed,
                None,
            )
            .await?;

        Ok(WorkflowOutcome {
            task_id: task.id,
            status: OutcomeStatus::Success,
            task_status: Some(final_status),
            total_subtasks: summary.total,
            completed_subtasks: summary.completed,
            failed_subtasks: summary.failed,
            success_rate,
            message: format!(
                "Workflow finished: {} of {} subtasks completed",
                summary.completed, summary.total
            ),
        })
    }

    /// Ask the planner for subtasks and persist them
    ///
    /// Returns `None` when the planner failed or proposed nothing.
    async fn plan(
        &self,
        task: &Task,
        request: &str,
        description: &str,
        summary: &mut RunSummary,
    ) -> Result<Option<Vec<Subtask>>> {
        let plan_input = json!({
            "request": request,
            "description": description,
        });
        let result = self
            .invoke(
                task.id,
                None,
                Capability::Plan,
                self.registry.get(Capability::Plan),
                &plan_input,
            )
            .await?;

        if !result.is_success() {
            summary.planning = json!({"status": "error", "message": result.message});
            return Ok(None);
        }

        let specs: Vec<SubtaskSpec> = match result.payload.get("subtasks") {
            Some(value) => serde_json::from_value(value.clone())
                .context("Planner returned malformed subtasks")?,
            None => Vec::new(),
        };
        if specs.is_empty() {
            summary.planning = json!({"status": "error", "message": "plan contains no subtasks"});
            return Ok(None);
        }

        let created = self.db.tasks().commit_plan(task.id, &specs).await?;
        summary.planning = json!({
            "status": "success",
            "subtasks_created": created.len(),
            "fallback": result.is_fallback(),
            "message": result.message,
        });
        Ok(Some(created))
    }

    async fn fail_planning(
        &self,
        task: &Task,
        input: &Value,
        summary: &RunSummary,
    ) -> Result<WorkflowOutcome> {
        self.db
            .tasks()
            .update_status(task.id, TaskStatus::Failed)
            .await?;

        let message = summary
            .planning
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Planning failed")
            .to_string();
        warn!("Planning failed for task {}: {}", task.id, message);

        self.db
            .executions()
            .append(
                task.id,
                None,
                CONTROLLER_AGENT,
                input,
                &summary.to_json(TaskStatus::Failed, 0.0),
                ExecutionStatus::Failed,
                Some(&message),
            )
            .await?;

        Ok(WorkflowOutcome::error(
            task.id,
            Some(TaskStatus::Failed),
            format!("Planning failed: {}", message),
        ))
    }

    /// Run one subtask and record its status; returns whether it completed
    async fn execute_subtask(
        &self,
        task: &Task,
        subtask: &Subtask,
        request: &str,
        memory_context: &Value,
    ) -> Result<bool> {
        if subtask.status == SubtaskStatus::Completed {
            debug!("Subtask {} already completed, not re-running", subtask.id);
            return Ok(true);
        }

        let (capability, handler) = self.registry.resolve(&subtask.capability);
        if Capability::from_name(&subtask.capability).is_none() {
            debug!(
                "Subtask {} declares unknown capability '{}', routing to {}",
                subtask.id, subtask.capability, capability
            );
        }

        self.db
            .tasks()
            .update_subtask_status(subtask.id, SubtaskStatus::Executing)
            .await?;

        let step_input = json!({
            "task_id": task.id,
            "user_id": task.user_id,
            "request": request,
            "subtask_title": subtask.title,
            "subtask_description": subtask.description,
            "declared_capability": subtask.capability,
            "order_index": subtask.order_index,
            "memory_context": memory_context,
        });

        let result = self
            .invoke(task.id, Some(subtask.id), capability, handler, &step_input)
            .await?;

        let status = if result.is_success() {
            SubtaskStatus::Completed
        } else {
            warn!(
                "Subtask {} ({}) failed: {}",
                subtask.order_index, subtask.title, result.message
            );
            SubtaskStatus::Failed
        };
        self.db
            .tasks()
            .update_subtask_status(subtask.id, status)
            .await?;

        Ok(result.is_success())
    }

    /// Invoke a handler and write its execution record
    ///
    /// Handler faults become error results; only store failures propagate.
    async fn invoke(
        &self,
        task_id: i64,
        subtask_id: Option<i64>,
        capability: Capability,
        handler: Arc<dyn CapabilityHandler>,
        input: &Value,
    ) -> Result<ExecutionResult> {
        let ledger = self.db.executions();
        let record_id = ledger
            .start(task_id, subtask_id, capability.as_str(), input)
            .await?;

        let result = match handler.execute(task_id, input, subtask_id).await {
            Ok(result) => result,
            Err(e) => {
                let fault = EngineError::Handler {
                    capability: capability.to_string(),
                    message: format!("handler fault: {:#}", e),
                };
                let message = scrub_secrets(&fault.to_string());
                warn!("Task {}: {}", task_id, message);
                ExecutionResult::error(message)
            }
        };

        if result.is_success() {
            ledger
                .finish(record_id, ExecutionStatus::Completed, &result.payload, None)
                .await?;
        } else {
            let error = scrub_secrets(&result.message);
            ledger
                .finish(record_id, ExecutionStatus::Failed, &result.payload, Some(&error))
                .await?;
        }

        Ok(result)
    }
}
