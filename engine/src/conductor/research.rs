//! Research handler
//!
//! Gathers and analyzes information for a subtask. Without a provider it
//! returns a fixed set of basic findings flagged `fallback`.

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

const RESEARCH_TEMPLATE: &str = "You are a research expert. Gather and analyze information for the requirements below.\n\n\
Task: {task_title}\n\
Task Description: {task_description}\n\
Research Focus: {research_focus}\n\
User Context: {memory_context}\n\
Previous Steps:\n{previous_steps}\n\n\
Provide key findings, relevant sources, actionable recommendations, and your confidence level. \
Favor accurate, relevant, practically applicable information.";

/// Research output requested from the provider
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResearchOutput {
    /// Key findings from the research
    pub findings: Vec<String>,
    /// Sources of information
    #[serde(default)]
    pub sources: Vec<String>,
    /// Recommendations based on the findings
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Confidence level: low, medium, high
    #[serde(default = "default_confidence")]
    pub confidence_level: String,
}

fn default_confidence() -> String {
    "medium".to_string()
}

pub struct ResearchHandler {
    db: Database,
    client: Option<Arc<GenerativeClient>>,
}

impl ResearchHandler {
    pub fn new(db: Database, client: Option<Arc<GenerativeClient>>) -> Self {
        Self { db, client }
    }

    /// Deterministic output used when no provider can be reached
    pub fn fallback_output(focus: &str) -> ResearchOutput {
        ResearchOutput {
            findings: vec![
                format!("Basic research completed for: {}", focus),
                "Information gathered from available sources".to_string(),
                "Recommendations based on general knowledge".to_string(),
            ],
            sources: Vec::new(),
            recommendations: vec![
                "Consider user preferences and context".to_string(),
                "Apply best practices for the given task".to_string(),
                "Monitor progress and adjust as needed".to_string(),
            ],
            confidence_level: default_confidence(),
        }
    }

    fn result(output: ResearchOutput, fallback: bool) -> ExecutionResult {
        let message = if fallback {
            "Basic research completed (fallback mode)".to_string()
        } else {
            format!("Research completed with {} findings", output.findings.len())
        };
        ExecutionResult::success(
            json!({
                "findings": output.findings,
                "sources": output.sources,
                "recommendations": output.recommendations,
                "confidence_level": output.confidence_level,
                "fallback": fallback,
            }),
            message,
        )
    }
}

#[async_trait]
impl CapabilityHandler for ResearchHandler {
    fn capability(&self) -> Capability {
        Capability::Research
    }

    async fn execute(
        &self,
        task_id: i64,
        input: &Value,
        _subtask_id: Option<i64>,
    ) -> Result<ExecutionResult> {
        let loaded =
            StepContext::load(&self.db, task_id, input, "research_focus", "general research")
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
        debug!("Researching '{}' for task {}", ctx.focus, task_id);

        match client
            .complete::<ResearchOutput>(
                RESEARCH_TEMPLATE,
                &[
                    ("task_title", ctx.task.title.as_str()),
                    ("task_description", ctx.task.description.as_str()),
                    ("research_focus", ctx.focus.as_str()),
                    ("memory_context", memory_context.as_str()),
                    ("previous_steps", ctx.previous_steps.as_str()),
                ],
            )
            .await
        {
            Ok(output) => Ok(Self::result(output, false)),
            Err(e) if e.is_unavailable() => {
                warn!("Provider unavailable during research, using fallback: {}", e);
                Ok(Self::result(Self::fallback_output(&ctx.focus), true))
            }
            Err(e) => Ok(ExecutionResult::error(scrub_secrets(&format!(
                "Research failed: {}",
                e
            )))),
        }
    }
}
