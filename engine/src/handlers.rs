//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Create a task and queue its workflow
//! - status / progress / tasks / watch: Inspect tasks
//! - user / memory: Manage users and long-term memories
//! - cleanup: Remove old finished tasks
//! - key: Store or remove the provider API key
//! - doctor: Validate configuration and check dependencies

use anyhow::{Context, Result};
use sdk::{MemoryKind, Priority, ProgressSnapshot};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::feed::ProgressFeed;
use crate::llm::structured::API_KEY_ENTRY;
use crate::secrets::SecretManager;
use crate::service::TaskService;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json_object(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("Preferences must be valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("Preferences must be a JSON object");
    }
    Ok(value)
}

fn print_snapshot(snapshot: &ProgressSnapshot) {
    println!(
        "Task {} [{}] {:.0}% ({}/{} steps) - {}",
        snapshot.task_id,
        snapshot.status,
        snapshot.percent_complete,
        snapshot.completed_steps,
        snapshot.total_steps,
        snapshot.current_step
    );
}

/// Create a task and queue its workflow
///
/// With `wait`, follows the run's progress until the task finishes.
#[allow(clippy::too_many_arguments)]
pub async fn handle_run(
    service: &TaskService,
    config: &Config,
    request: String,
    user_id: i64,
    description: String,
    priority: String,
    wait: bool,
    format: OutputFormat,
) -> Result<()> {
    let priority: Priority = priority.parse().map_err(anyhow::Error::msg)?;
    let ack = service
        .create_and_run_task(user_id, &request, &description, priority)
        .await?;

    match format {
        OutputFormat::Text => {
            println!("Task {} {}: {}", ack.task_id, ack.status, ack.message);
            println!("  Estimated duration: {}s", ack.estimated_duration);
        }
        OutputFormat::Json => print_json(&ack)?,
    }

    if wait {
        follow(service, config, ack.task_id, format).await?;
    }
    Ok(())
}

/// Show a task with its subtasks and execution history
pub async fn handle_status(
    service: &TaskService,
    task_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let report = service.get_status(task_id).await?;

    match format {
        OutputFormat::Text => {
            println!("Task {}: {}", report.task.id, report.task.title);
            if !report.task.description.is_empty() {
                println!("  {}", report.task.description);
            }
            println!("Status:   {}", report.task.status);
            println!("Priority: {}", report.task.priority.as_str());
            println!("Progress: {:.0}%", report.progress);
            println!("Current:  {}", report.current_step);
            println!();

            println!("Subtasks ({} total):", report.subtasks.len());
            for subtask in &report.subtasks {
                println!(
                    "  {}. [{}] {} ({})",
                    subtask.order_index + 1,
                    subtask.status,
                    subtask.title,
                    subtask.capability
                );
            }
            println!();

            println!("Executions ({} total):", report.executions.len());
            for record in &report.executions {
                let target = record
                    .subtask_id
                    .map(|id| format!("subtask {}", id))
                    .unwrap_or_else(|| "task".to_string());
                println!("  {} {} on {}", record.status, record.agent_type, target);
                if let Some(error) = &record.error_message {
                    println!("    error: {}", error);
                }
            }
        }
        OutputFormat::Json => print_json(&report)?,
    }

    Ok(())
}

/// Show one progress snapshot
pub async fn handle_progress(
    service: &TaskService,
    task_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = service.get_progress(task_id).await?;

    match format {
        OutputFormat::Text => {
            print_snapshot(&snapshot);
            if !snapshot.recent_activity.is_empty() {
                println!();
                println!("Recent activity:");
                for entry in &snapshot.recent_activity {
                    println!("  {} {}", entry.status, entry.capability);
                }
            }
        }
        OutputFormat::Json => print_json(&snapshot)?,
    }

    Ok(())
}

/// List a user's tasks
pub async fn handle_tasks(
    service: &TaskService,
    user_id: i64,
    limit: i64,
    format: OutputFormat,
) -> Result<()> {
    let tasks = service.list_user_tasks(user_id, limit).await?;

    match format {
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks found for user {}", user_id);
                return Ok(());
            }

            println!("Tasks for user {}:", user_id);
            println!();
            for task in &tasks {
                println!(
                    "  {:>5}  {:<10} {:>4.0}%  {}/{}  {}",
                    task.id,
                    task.status.as_str(),
                    task.progress,
                    task.completed_subtasks,
                    task.subtask_count,
                    task.title
                );
            }
        }
        OutputFormat::Json => print_json(&json!({ "tasks": tasks, "count": tasks.len() }))?,
    }

    Ok(())
}

/// Follow a task until it finishes
pub async fn handle_watch(
    service: &TaskService,
    config: &Config,
    task_id: i64,
    format: OutputFormat,
) -> Result<()> {
    // Fail fast on a missing task
    service.get_progress(task_id).await?;
    follow(service, config, task_id, format).await
}

async fn follow(
    service: &TaskService,
    config: &Config,
    task_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let feed = Arc::new(ProgressFeed::new(service.projector()));
    let (_id, mut rx) = feed.subscribe(task_id).await;
    let poller = Arc::clone(&feed).spawn(config.progress.poll_interval());

    while let Some(snapshot) = rx.recv().await {
        match format {
            OutputFormat::Text => print_snapshot(&snapshot),
            OutputFormat::Json => println!("{}", serde_json::to_string(&snapshot)?),
        }
        if snapshot.is_finished() {
            break;
        }
    }

    poller.abort();
    Ok(())
}

/// Create a user
pub async fn handle_user_add(
    service: &TaskService,
    username: String,
    email: String,
    preferences: String,
    format: OutputFormat,
) -> Result<()> {
    let preferences = parse_json_object(&preferences)?;
    let user = service.create_user(&username, &email, &preferences).await?;

    match format {
        OutputFormat::Text => println!("Created user {} ({})", user.id, user.username),
        OutputFormat::Json => print_json(&user)?,
    }
    Ok(())
}

/// Replace a user's preferences
pub async fn handle_user_prefs(
    service: &TaskService,
    user_id: i64,
    preferences: String,
    format: OutputFormat,
) -> Result<()> {
    let preferences = parse_json_object(&preferences)?;
    let user = service.update_user_preferences(user_id, &preferences).await?;

    match format {
        OutputFormat::Text => println!("Updated preferences for user {}", user.id),
        OutputFormat::Json => print_json(&user)?,
    }
    Ok(())
}

/// Store a memory
pub async fn handle_memory_add(
    service: &TaskService,
    user_id: i64,
    kind: String,
    key: String,
    value: String,
    importance: i64,
    format: OutputFormat,
) -> Result<()> {
    let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
    let kind = MemoryKind::from(kind);
    let memory = service
        .store_memory(user_id, &kind, &key, &value, importance)
        .await?;

    match format {
        OutputFormat::Text => println!(
            "Stored {} memory '{}' (id {})",
            memory.kind, memory.key, memory.id
        ),
        OutputFormat::Json => print_json(&memory)?,
    }
    Ok(())
}

/// List a user's memories
pub async fn handle_memory_list(
    service: &TaskService,
    user_id: i64,
    kind: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let kind = kind.map(MemoryKind::from);
    let memories = service.list_user_memories(user_id, kind.as_ref()).await?;

    match format {
        OutputFormat::Text => {
            if memories.is_empty() {
                println!("No memories stored for user {}", user_id);
                return Ok(());
            }
            for memory in &memories {
                println!(
                    "  [{}] {} {} = {}",
                    memory.importance, memory.kind, memory.key, memory.value
                );
            }
        }
        OutputFormat::Json => {
            print_json(&json!({ "memories": memories, "count": memories.len() }))?
        }
    }
    Ok(())
}

/// Delete finished tasks older than the retention window
pub async fn handle_cleanup(
    service: &TaskService,
    days: Option<i64>,
    format: OutputFormat,
) -> Result<()> {
    let deleted = service.cleanup_old_tasks(days).await?;

    match format {
        OutputFormat::Text => println!("Deleted {} old tasks", deleted),
        OutputFormat::Json => print_json(&json!({ "deleted": deleted }))?,
    }
    Ok(())
}

/// Store the provider API key, read from one line of stdin
pub fn handle_key_set(config: &Config, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Text = format {
        eprintln!("Paste the API key and press Enter:");
    }

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read API key from stdin")?;

    let secrets = SecretManager::new(&config.llm.keyring_service);
    secrets.set_secret(API_KEY_ENTRY, line.trim())?;

    match format {
        OutputFormat::Text => println!("API key stored in keychain"),
        OutputFormat::Json => print_json(&json!({ "stored": true }))?,
    }
    Ok(())
}

/// Remove the stored provider API key
pub fn handle_key_delete(config: &Config, format: OutputFormat) -> Result<()> {
    let secrets = SecretManager::new(&config.llm.keyring_service);
    secrets.delete_secret(API_KEY_ENTRY)?;

    match format {
        OutputFormat::Text => println!("API key removed from keychain"),
        OutputFormat::Json => print_json(&json!({ "deleted": true }))?,
    }
    Ok(())
}

/// Report whether a provider API key is stored in the keychain
pub fn handle_key_status(config: &Config, format: OutputFormat) -> Result<()> {
    let secrets = SecretManager::new(&config.llm.keyring_service);
    let stored = secrets.has_secret(API_KEY_ENTRY);

    match format {
        OutputFormat::Text => {
            if stored {
                println!("API key is stored in keychain");
            } else {
                println!(
                    "No API key in keychain (${} is checked first)",
                    config.llm.api_key_env
                );
            }
        }
        OutputFormat::Json => print_json(&json!({ "stored": stored }))?,
    }
    Ok(())
}

/// Run system diagnostics
///
/// Checks the data directory, the database, and provider credentials.
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    if config.core.data_dir.exists() {
        checks.push(("Data directory", "Exists".to_string()));
    } else {
        checks.push(("Data directory", "Missing".to_string()));
        issues.push(format!(
            "Data directory does not exist: {}",
            config.core.data_dir.display()
        ));
    }

    let db_path = config.database_path();
    if db_path.exists() {
        match Database::new(&db_path).await {
            Ok(db) => {
                checks.push(("Database", "OK".to_string()));
                if let Err(e) = db.close().await {
                    issues.push(format!("Database did not close cleanly: {}", e));
                }
            }
            Err(e) => {
                checks.push(("Database", "Failed".to_string()));
                issues.push(format!("Cannot open database: {:#}", e));
            }
        }
    } else {
        checks.push(("Database", "Not initialized".to_string()));
    }

    if config.llm.enabled {
        checks.push(("Generative provider", config.llm.model.clone()));
        let secrets = SecretManager::new(&config.llm.keyring_service);
        match secrets.resolve(&config.llm.api_key_env, API_KEY_ENTRY) {
            Ok(Some(_)) => checks.push(("API key", "Configured".to_string())),
            Ok(None) => {
                checks.push(("API key", "Not configured".to_string()));
                issues.push(format!(
                    "No API key in ${} or keychain. Steps will run in fallback mode.",
                    config.llm.api_key_env
                ));
            }
            Err(e) => {
                checks.push(("API key", "Error".to_string()));
                issues.push(format!("Cannot read keychain: {}", e));
            }
        }
    } else {
        checks.push(("Generative provider", "Disabled".to_string()));
    }

    match format {
        OutputFormat::Text => {
            println!("Stepwise System Diagnostics");
            println!("============================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            print_json(&output)?;
        }
    }

    Ok(())
}
