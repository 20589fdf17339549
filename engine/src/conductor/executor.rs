//! Act handler
//!
//! Takes actions and produces deliverables for a subtask, building on what
//! earlier steps recorded. Without a provider it returns a fixed set of
//! standard actions flagged `fallback`.

use crate::conductor::context::StepContext;
use crate::conductor::types::CapabilityHandler;
use crate::db::Database;
use crate::llm::GenerativeClient;
use crate::secrets::scrub_secrets;
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use sdk::{Capability, EngineError, ExecutionResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const ACT_TEMPLATE: &str = "You are an execution expert. Take actions and create content for the requirements below.\n\n\
Task: {task_title}\n\
Task Description: {task_description}\n\
Execution Focus: {execution_focus}\n\
User Context: {memory_context}\n\
Context from Previous Steps:\n{previous_steps}\n\n\
Describe the specific actions taken, the content or deliverables created, the decisions made, \
and the next steps. Keep actions feasible and aligned with the task objectives.";

/// Act output requested from the provider
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ActOutput {
    /// Actions that were executed
    pub actions_taken: Vec<String>,
    /// Content or deliverables created
    #[serde(default)]
    pub content_created: Vec<String>,
    /// Decisions made during execution
    #[serde(default)]
    pub decisions_made: Vec<String>,
    /// Execution status: success, partial, failed
    #[serde(default = "default_execution_status")]
    pub status: String,
    /// Recommended next steps
    #[serde(default)]
    pub next_steps: Vec<String>,
}

fn default_execution_status() -> String {
    "success".to_string()
}

/// Serves the `act` capability, which is also where unknown capabilities land
pub struct Executor {
    db: Database,
    client: Option<Arc<GenerativeClient>>,
}

impl Executor {
    pub fn new(db: Database, client: Option<Arc<GenerativeClient>>) -> Self {
        Self { db, client }
    }

    /// Deterministic output used when no provider can be reached
    pub fn fallback_output(focus: &str) -> ActOutput {
        ActOutput {
            actions_taken: vec![
                format!("Executed task: {}", focus),
                "Applied standard procedures".to_string(),
                "Completed basic requirements".to_string(),
            ],
            content_created: vec![
                format!("Created content for: {}", focus),
                "Generated basic deliverables".to_string(),
            ],
            decisions_made: vec![
                "Used standard approach for task execution".to_string(),
                "Applied best practices".to_string(),
            ],
            status: default_execution_status(),
            next_steps: vec![
                "Review completed work".to_string(),
                "Prepare for next phase if needed".to_string(),
            ],
        }
    }

    fn result(output: ActOutput, fallback: bool) -> ExecutionResult {
        let message = if fallback {
            "Basic execution completed (fallback mode)".to_string()
        } else {
            format!(
                "Execution completed with {} actions",
                output.actions_taken.len()
            )
        };
        ExecutionResult::success(
            json!({
                "actions_taken": output.actions_taken,
                "content_created": output.content_created,
                "decisions_made": output.decisions_made,
                "execution_status": output.status,
                "next_steps": output.next_steps,
                "fallback": fallback,
            }),
            message,
        )
    }
}

#[async_trait]
impl CapabilityHandler for Executor {
    fn capability(&self) -> Capability {
        Capability::Act
    }

    async fn execute(
        &self,
        task_id: i64,
        input: &Value,
        _subtask_id: Option<i64>,
    ) -> Result<ExecutionResult> {
        let loaded =
            StepContext::load(&self.db, task_id, input, "execution_focus", "general execution")
                .await?;
        let ctx = match loaded {
            Some(ctx) => ctx,
            None => {
                return Ok(ExecutionResult::error(
                    EngineError::task_not_found(task_id).to_string(),
                ))
            }
        };

        let client = match &self.client {
            Some(client) if client.is_available() => client,
            _ => return Ok(Self::result(Self::fallback_output(&ctx.focus), true)),
        };

        let memory_context = ctx.memory_text();
        debug!("Executing '{}' for task {}", ctx.focus, task_id);

        match client
            .complete::<ActOutput>(
                ACT_TEMPLATE,
                &[
                    ("task_title", ctx.task.title.as_str()),
                    ("task_description", ctx.task.description.as_str()),
                    ("execution_focus", ctx.focus.as_str()),
                    ("memory_context", memory_context.as_str()),
                    ("previous_steps", ctx.previous_steps.as_str()),
                ],
            )
            .await
        {
            Ok(output) => Ok(Self::result(output, false)),
            Err(e) if e.is_unavailable() => {
                warn!("Provider unavailable during execution, using fallback: {}", e);
                Ok(Self::result(Self::fallback_output(&ctx.focus), true))
            }
            Err(e) => Ok(ExecutionResult::error(scrub_secrets(&format!(
                "Execution failed: {}",
                e
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_output() {
        let output = Executor::fallback_output("Book the hotel");
        assert_eq!(output.actions_taken[0], "Executed task: Book the hotel");
        assert_eq!(output.status, "success");
        assert_eq!(output.next_steps.len(), 2);
    }

    #[test]
    fn test_partial_provider_output_gets_defaults() {
        let output: ActOutput =
            serde_json::from_str(r#"{"actions_taken": ["Drafted itinerary"]}"#).unwrap();
        assert_eq!(output.status, "success");
        assert!(output.content_created.is_empty());

        let result = Executor::result(output, false);
        assert!(!result.is_fallback());
        assert_eq!(result.message, "Execution completed with 1 actions");
    }
}
