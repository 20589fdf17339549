//! Context assembly and the recall handler
//!
//! Pulls together what the workflow knows about a user before planning:
//! stored preferences, recently completed tasks, and memories whose key
//! matches the run's context key. Surfacing a memory refreshes its
//! `last_accessed` stamp so frequently useful memories stay near the top.

use crate::conductor::types::{CapabilityHandler, ContextBundle, TaskHistoryEntry};
use crate::config::WorkflowConfig;
use crate::db::Database;
use anyhow::Result;
use async_trait::async_trait;
use sdk::{Capability, EngineError, ExecutionResult, MemoryKind};
use serde_json::{json, Value};
use tracing::debug;

/// Preference memories surfaced as `recentPreferences`
const RECENT_PREFERENCE_LIMIT: i64 = 10;

/// Title keywords per task category, checked in order; first match wins
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("travel", &["trip", "travel", "vacation", "flight", "hotel"]),
    ("meeting", &["meeting", "agenda", "presentation"]),
    ("learning", &["learn", "study", "course", "education"]),
    ("event", &["event", "party", "celebration"]),
    ("research", &["research", "analysis", "report"]),
];

/// Categorize a task by keywords in its title
pub fn categorize_task(title: &str) -> &'static str {
    let title = title.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| title.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or("general")
}

/// Loads and stores user context; serves the `recall` capability
pub struct MemoryAssembler {
    db: Database,
    history_limit: i64,
    relevant_memory_limit: i64,
    default_importance: i64,
    default_context_key: String,
}

impl MemoryAssembler {
    pub fn new(db: Database, config: &WorkflowConfig) -> Self {
        Self {
            db,
            history_limit: config.history_limit,
            relevant_memory_limit: config.relevant_memory_limit,
            default_importance: config.default_importance,
            default_context_key: config.context_key.clone(),
        }
    }

    /// Assemble the context bundle for `user_id`
    ///
    /// Only the relevant memories returned here have their access time
    /// refreshed; preference memories read for `recentPreferences` do not.
    pub async fn load_context(&self, user_id: i64, context_key: &str) -> Result<ContextBundle> {
        let memories = self.db.memories();

        let mut preferences = match self.db.users().get_user(user_id).await? {
            Some(user) if user.preferences.is_object() => user.preferences,
            _ => json!({}),
        };
        let recent_preferences: Vec<Value> = memories
            .recent_by_kind(user_id, &MemoryKind::Preference, RECENT_PREFERENCE_LIMIT)
            .await?
            .into_iter()
            .map(|m| m.value)
            .collect();
        if let Some(map) = preferences.as_object_mut() {
            map.insert("recentPreferences".to_string(), Value::Array(recent_preferences));
        }

        let recent_task_history = self
            .db
            .tasks()
            .recent_completed_tasks(user_id, self.history_limit)
            .await?
            .into_iter()
            .map(|task| TaskHistoryEntry {
                category: categorize_task(&task.title).to_string(),
                task_id: task.id,
                title: task.title,
                description: task.description,
                completed_at: task.completed_at,
            })
            .collect();

        let mut relevant_memories = memories
            .find_relevant(user_id, context_key, self.relevant_memory_limit)
            .await?;
        let ids: Vec<i64> = relevant_memories.iter().map(|m| m.id).collect();
        let touched_at = memories.touch(&ids).await?;
        for memory in &mut relevant_memories {
            memory.last_accessed = touched_at;
        }

        debug!(
            "Loaded context for user {}: {} relevant memories",
            user_id,
            relevant_memories.len()
        );

        Ok(ContextBundle {
            preferences,
            recent_task_history,
            relevant_memories,
        })
    }

    /// Store each entry as a `context` memory, all or nothing
    pub async fn store_context(
        &self,
        user_id: i64,
        entries: &serde_json::Map<String, Value>,
    ) -> Result<usize> {
        self.db
            .memories()
            .store_many(user_id, &MemoryKind::Context, entries, self.default_importance)
            .await
    }
}

#[async_trait]
impl CapabilityHandler for MemoryAssembler {
    fn capability(&self) -> Capability {
        Capability::Recall
    }

    async fn execute(
        &self,
        task_id: i64,
        input: &Value,
        _subtask_id: Option<i64>,
    ) -> Result<ExecutionResult> {
        let task = match self.db.tasks().get_task(task_id).await? {
            Some(task) => task,
            None => {
                return Ok(ExecutionResult::error(
                    EngineError::task_not_found(task_id).to_string(),
                ))
            }
        };

        let context_key = input
            .get("context_key")
            .and_then(Value::as_str)
            .unwrap_or(self.default_context_key.as_str());

        let bundle = self.load_context(task.user_id, context_key).await?;

        let mut stored = 0;
        if let Some(entries) = input.get("context_data").and_then(Value::as_object) {
            stored = self.store_context(task.user_id, entries).await?;
        }

        let accessed = bundle.relevant_memories.len();
        Ok(ExecutionResult::success(
            json!({
                "context_summary": bundle,
                "memories_accessed": accessed,
                "memories_stored": stored,
                "current_task_context": {
                    "task_id": task.id,
                    "task_type": categorize_task(&task.title),
                    "user_id": task.user_id,
                },
            }),
            format!("Memory context loaded with {} relevant memories", accessed),
        ))
    }
}
