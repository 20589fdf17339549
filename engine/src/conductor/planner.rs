//! Conductor Planner
//!
//! Breaks a user request into an ordered list of subtasks. With a provider
//! available the plan comes from the model; otherwise, or when the provider
//! cannot be reached, a fixed recall → research → act plan is used.
//!
//! The planner only proposes subtasks. The orchestrator persists them.

use crate::conductor::types::CapabilityHandler;
use crate::db::SubtaskSpec;
use crate::llm::{GenerativeClient, LLMError};
use crate::secrets::scrub_secrets;
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use sdk::{Capability, ExecutionResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const PLAN_TEMPLATE: &str = "You are a task planning expert. Break the user's request into manageable, sequential subtasks.\n\n\
User Request: {request}\n\
Task Description: {description}\n\n\
Assign each subtask one capability:\n\
- recall: load user preferences, history, and stored context\n\
- research: gather and analyze information\n\
- act: take actions, create content, make decisions\n\
- plan: high-level coordination of further planning\n\n\
List the subtasks in the order they should run and estimate each duration in seconds.";

/// Plan shape requested from the provider
#[derive(Debug, Deserialize, JsonSchema)]
struct RawPlan {
    /// Subtasks in execution order
    subtasks: Vec<RawPlanStep>,
    /// Total estimated duration in seconds
    #[serde(default)]
    estimated_total_duration: Option<i64>,
    /// Complexity level: simple, moderate, complex
    #[serde(default)]
    complexity_level: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawPlanStep {
    /// Clear, concise title for the subtask
    title: String,
    /// What needs to be done
    #[serde(default)]
    description: String,
    /// One of: recall, research, act, plan
    #[serde(alias = "agent_type")]
    capability: String,
    /// Estimated duration in seconds
    #[serde(default)]
    estimated_duration: Option<i64>,
}

/// A proposed plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanProposal {
    pub subtasks: Vec<SubtaskSpec>,
    pub estimated_duration: i64,
    pub complexity_level: String,
    pub fallback: bool,
}

pub struct Planner {
    client: Option<Arc<GenerativeClient>>,
    max_subtasks: usize,
}

impl Planner {
    pub fn new(client: Option<Arc<GenerativeClient>>, max_subtasks: usize) -> Self {
        Self {
            client,
            max_subtasks,
        }
    }

    /// Produce a plan for a request
    ///
    /// Provider outages and blank requests fall back to
    /// [`Planner::default_plan`]. Any other provider error, and a plan with no
    /// subtasks, is returned as an error.
    pub async fn plan(&self, request: &str, description: &str) -> Result<PlanProposal, LLMError> {
        if request.trim().is_empty() {
            warn!("Empty request, using default plan");
            return Ok(Self::default_plan());
        }

        let client = match &self.client {
            Some(client) if client.is_available() => client,
            _ => return Ok(Self::default_plan()),
        };

        let raw: RawPlan = match client
            .complete(
                PLAN_TEMPLATE,
                &[("request", request), ("description", description)],
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_unavailable() => {
                warn!("Provider unavailable while planning, using default plan: {}", e);
                return Ok(Self::default_plan());
            }
            Err(e) => return Err(e),
        };

        let proposal = self.into_proposal(raw);
        if proposal.subtasks.is_empty() {
            return Err(LLMError::ParseError("plan contains no subtasks".to_string()));
        }
        Ok(proposal)
    }

    /// Normalize a provider plan: cap its length and fill missing estimates
    fn into_proposal(&self, raw: RawPlan) -> PlanProposal {
        let subtasks: Vec<SubtaskSpec> = raw
            .subtasks
            .into_iter()
            .take(self.max_subtasks)
            .enumerate()
            .map(|(i, step)| SubtaskSpec {
                title: if step.title.trim().is_empty() {
                    format!("Step {}", i + 1)
                } else {
                    step.title
                },
                description: step.description,
                capability: step.capability,
                estimated_duration: step.estimated_duration,
            })
            .collect();

        let estimated_duration = raw.estimated_total_duration.unwrap_or_else(|| {
            subtasks
                .iter()
                .filter_map(|s| s.estimated_duration)
                .sum()
        });

        PlanProposal {
            subtasks,
            estimated_duration,
            complexity_level: raw
                .complexity_level
                .unwrap_or_else(|| "moderate".to_string()),
            fallback: false,
        }
    }

    /// Fixed three-step plan used without a provider
    pub fn default_plan() -> PlanProposal {
        let step = |title: &str, description: &str, capability: Capability, secs: i64| SubtaskSpec {
            title: title.to_string(),
            description: description.to_string(),
            capability: capability.as_str().to_string(),
            estimated_duration: Some(secs),
        };

        PlanProposal {
            subtasks: vec![
                step(
                    "Load User Context",
                    "Load user preferences and historical context",
                    Capability::Recall,
                    30,
                ),
                step(
                    "Research and Gather Information",
                    "Research relevant information for the task",
                    Capability::Research,
                    120,
                ),
                step(
                    "Execute Task",
                    "Execute the main task based on research",
                    Capability::Act,
                    180,
                ),
            ],
            estimated_duration: 330,
            complexity_level: "simple".to_string(),
            fallback: true,
        }
    }
}

#[async_trait]
impl CapabilityHandler for Planner {
    fn capability(&self) -> Capability {
        Capability::Plan
    }

    async fn execute(
        &self,
        task_id: i64,
        input: &Value,
        _subtask_id: Option<i64>,
    ) -> Result<ExecutionResult> {
        let request = input.get("request").and_then(Value::as_str).unwrap_or("");
        let description = input
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");

        match self.plan(request, description).await {
            Ok(proposal) => {
                info!(
                    "Planned {} subtasks for task {}{}",
                    proposal.subtasks.len(),
                    task_id,
                    if proposal.fallback { " (fallback)" } else { "" }
                );
                let message = if proposal.fallback {
                    format!(
                        "Created {} basic subtasks (fallback mode)",
                        proposal.subtasks.len()
                    )
                } else {
                    format!(
                        "Successfully decomposed task into {} subtasks",
                        proposal.subtasks.len()
                    )
                };
                Ok(ExecutionResult::success(
                    json!({
                        "subtasks": proposal.subtasks,
                        "subtasks_created": proposal.subtasks.len(),
                        "estimated_duration": proposal.estimated_duration,
                        "complexity_level": proposal.complexity_level,
                        "fallback": proposal.fallback,
                    }),
                    message,
                ))
            }
            Err(e) => Ok(ExecutionResult::error(scrub_secrets(&format!(
                "Planner failed: {}",
                e
            )))),
        }
    }
}
