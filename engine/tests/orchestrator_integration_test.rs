//! Integration tests for the workflow orchestrator
//!
//! Drives full runs against a throwaway SQLite store with scripted handlers
//! and checks task status, subtask status, and the execution ledger.

use async_trait::async_trait;
use sdk::{
    Capability, ExecutionResult, ExecutionStatus, Priority, SubtaskStatus, TaskStatus,
    CONTROLLER_AGENT,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stepwise_engine::conductor::{
    CapabilityHandler, CapabilityRegistry, Orchestrator, OutcomeStatus,
};
use stepwise_engine::config::WorkflowConfig;
use stepwise_engine::db::{Database, SubtaskSpec};
use tempfile::TempDir;

/// Plans a fixed list of (title, capability) steps
struct FixedPlan {
    steps: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl CapabilityHandler for FixedPlan {
    fn capability(&self) -> Capability {
        Capability::Plan
    }

    async fn execute(
        &self,
        _task_id: i64,
        _input: &Value,
        _subtask_id: Option<i64>,
    ) -> anyhow::Result<ExecutionResult> {
        let subtasks: Vec<SubtaskSpec> = self
            .steps
            .iter()
            .map(|(title, capability)| SubtaskSpec {
                title: title.to_string(),
                description: format!("Do {}", title),
                capability: capability.to_string(),
                estimated_duration: Some(10),
            })
            .collect();
        Ok(ExecutionResult::success(
            json!({ "subtasks": subtasks, "fallback": false }),
            "planned",
        ))
    }
}

/// Planner that always reports a failure
struct BrokenPlan;

#[async_trait]
impl CapabilityHandler for BrokenPlan {
    fn capability(&self) -> Capability {
        Capability::Plan
    }

    async fn execute(
        &self,
        _task_id: i64,
        _input: &Value,
        _subtask_id: Option<i64>,
    ) -> anyhow::Result<ExecutionResult> {
        Ok(ExecutionResult::error("Planner failed: provider returned no subtasks"))
    }
}

/// Act handler that fails steps whose title starts with "fail" and faults on
/// titles starting with "panic"; records every title it sees
#[derive(Default)]
struct ScriptedAct {
    seen: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedAct {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityHandler for ScriptedAct {
    fn capability(&self) -> Capability {
        Capability::Act
    }

    async fn execute(
        &self,
        _task_id: i64,
        input: &Value,
        _subtask_id: Option<i64>,
    ) -> anyhow::Result<ExecutionResult> {
        let title = input["subtask_title"].as_str().unwrap_or_default().to_string();
        self.seen.lock().unwrap().push(title.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if title.starts_with("fail") {
            return Ok(ExecutionResult::error(format!("could not {}", title)));
        }
        if title.starts_with("panic") {
            anyhow::bail!("backend rejected key sk-abcdefghijklmnopqrstuvwxyz012345");
        }
        Ok(ExecutionResult::success(json!({ "done": title }), "ok"))
    }
}

struct Harness {
    _dir: TempDir,
    db: Database,
    user_id: i64,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("test.db")).await.unwrap();
        let user = db
            .users()
            .create_user("tester", "tester@example.com", &json!({}))
            .await
            .unwrap();
        Self {
            _dir: dir,
            db,
            user_id: user.id,
        }
    }

    fn config() -> WorkflowConfig {
        WorkflowConfig {
            step_pause_ms: 0,
            ..WorkflowConfig::default()
        }
    }

    fn orchestrator(
        &self,
        plan: Arc<dyn CapabilityHandler>,
        act: Arc<ScriptedAct>,
    ) -> Orchestrator {
        let config = Self::config();
        let registry = CapabilityRegistry::builtin(self.db.clone(), None, &config)
            .with_handler(plan)
            .with_handler(act);
        Orchestrator::new(self.db.clone(), Arc::new(registry), config)
    }

    async fn task(&self, title: &str) -> i64 {
        self.db
            .tasks()
            .create_task(self.user_id, title, "integration test", Priority::Medium)
            .await
            .unwrap()
            .id
    }
}

fn plan(steps: Vec<(&'static str, &'static str)>) -> Arc<dyn CapabilityHandler> {
    Arc::new(FixedPlan { steps })
}

#[tokio::test]
async fn test_all_steps_succeed_completes_task() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(
        plan(vec![("a", "act"), ("b", "act"), ("c", "act"), ("d", "act")]),
        Arc::clone(&act),
    );
    let task_id = h.task("Four steps").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.task_status, Some(TaskStatus::Completed));
    assert_eq!(outcome.completed_subtasks, 4);
    assert_eq!(outcome.success_rate, 1.0);

    let task = h.db.tasks().get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_three_of_four_is_partial() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(
        plan(vec![("a", "act"), ("fail b", "act"), ("c", "act"), ("d", "act")]),
        act,
    );
    let task_id = h.task("Mostly fine").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.task_status, Some(TaskStatus::Partial));
    assert_eq!(outcome.failed_subtasks, 1);

    let task = h.db.tasks().get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Partial);
    assert!(task.completed_at.is_none());
}

#[tokio::test]
async fn test_one_of_four_fails_task() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(
        plan(vec![("a", "act"), ("fail b", "act"), ("fail c", "act"), ("fail d", "act")]),
        act,
    );
    let task_id = h.task("Mostly broken").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.task_status, Some(TaskStatus::Failed));
    assert_eq!(outcome.completed_subtasks, 1);
    assert_eq!(outcome.failed_subtasks, 3);
}

#[tokio::test]
async fn test_failed_step_does_not_stop_later_steps() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(
        plan(vec![("first", "act"), ("fail second", "act"), ("third", "act")]),
        Arc::clone(&act),
    );
    let task_id = h.task("Isolation").await;

    orchestrator.run(task_id).await;
    assert_eq!(act.seen(), vec!["first", "fail second", "third"]);

    let subtasks = h.db.tasks().get_subtasks(task_id).await.unwrap();
    let statuses: Vec<SubtaskStatus> = subtasks.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![SubtaskStatus::Completed, SubtaskStatus::Failed, SubtaskStatus::Completed]
    );

    let ledger = h.db.executions().list_for_task(task_id).await.unwrap();
    let third = ledger
        .iter()
        .find(|r| r.subtask_id == Some(subtasks[2].id))
        .expect("third subtask recorded");
    assert_eq!(third.status, ExecutionStatus::Completed);

    let second = ledger
        .iter()
        .find(|r| r.subtask_id == Some(subtasks[1].id))
        .expect("second subtask recorded");
    assert_eq!(second.status, ExecutionStatus::Failed);
    assert_eq!(second.error_message.as_deref(), Some("could not fail second"));
}

#[tokio::test]
async fn test_handler_fault_is_a_scrubbed_failed_step() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(plan(vec![("panic now", "act"), ("b", "act")]), act);
    let task_id = h.task("Faulting handler").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.task_status, Some(TaskStatus::Partial));

    let subtasks = h.db.tasks().get_subtasks(task_id).await.unwrap();
    let ledger = h.db.executions().list_for_task(task_id).await.unwrap();
    let faulted = ledger
        .iter()
        .find(|r| r.subtask_id == Some(subtasks[0].id))
        .unwrap();
    let error = faulted.error_message.as_deref().unwrap();
    assert!(error.starts_with("Handler 'act' failed: handler fault"));
    assert!(!error.contains("sk-abcdefghijklmnopqrstuvwxyz012345"));
}

#[tokio::test]
async fn test_ledger_follows_index_order() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(
        plan(vec![("one", "act"), ("two", "research"), ("three", "act"), ("four", "recall")]),
        act,
    );
    let task_id = h.task("Ordering").await;

    orchestrator.run(task_id).await;

    let subtasks = h.db.tasks().get_subtasks(task_id).await.unwrap();
    let indices: Vec<i64> = subtasks.iter().map(|s| s.order_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    let ledger = h.db.executions().list_for_task(task_id).await.unwrap();
    let step_order: Vec<i64> = ledger.iter().filter_map(|r| r.subtask_id).collect();
    let subtask_ids: Vec<i64> = subtasks.iter().map(|s| s.id).collect();
    assert_eq!(step_order, subtask_ids);

    let agents: Vec<&str> = ledger.iter().map(|r| r.agent_type.as_str()).collect();
    assert_eq!(agents.first(), Some(&"recall"));
    assert_eq!(agents.get(1), Some(&"plan"));
    assert_eq!(agents.last(), Some(&CONTROLLER_AGENT));
    assert_eq!(agents[2..6], ["act", "research", "act", "recall"]);
}

#[tokio::test]
async fn test_unknown_capability_routes_to_act() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(plan(vec![("mystery", "teleport")]), Arc::clone(&act));
    let task_id = h.task("Unknown capability").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.task_status, Some(TaskStatus::Completed));
    assert_eq!(act.seen(), vec!["mystery"]);

    let subtasks = h.db.tasks().get_subtasks(task_id).await.unwrap();
    assert_eq!(subtasks[0].capability, "teleport");
}

#[tokio::test]
async fn test_planning_failure_leaves_no_subtasks() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(Arc::new(BrokenPlan), Arc::clone(&act));
    let task_id = h.task("Unplannable").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.task_status, Some(TaskStatus::Failed));
    assert!(act.seen().is_empty());

    assert!(h.db.tasks().get_subtasks(task_id).await.unwrap().is_empty());
    let task = h.db.tasks().get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    let ledger = h.db.executions().list_for_task(task_id).await.unwrap();
    let summary = ledger.last().unwrap();
    assert_eq!(summary.agent_type, CONTROLLER_AGENT);
    assert_eq!(summary.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_empty_plan_is_planning_failure() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(plan(vec![]), act);
    let task_id = h.task("Nothing to do").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.task_status, Some(TaskStatus::Failed));
    assert!(h.db.tasks().get_subtasks(task_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_task_rerun_is_noop() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(plan(vec![("a", "act")]), Arc::clone(&act));
    let task_id = h.task("Once").await;

    orchestrator.run(task_id).await;
    let records_before = h.db.executions().list_for_task(task_id).await.unwrap().len();

    let second = orchestrator.run(task_id).await;
    assert_eq!(second.status, OutcomeStatus::Skipped);
    assert_eq!(second.task_status, Some(TaskStatus::Completed));
    assert_eq!(act.seen().len(), 1);

    let records_after = h.db.executions().list_for_task(task_id).await.unwrap().len();
    assert_eq!(records_before, records_after);
}

#[tokio::test]
async fn test_concurrent_runs_are_single_flight() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct {
        delay: Some(Duration::from_millis(100)),
        ..ScriptedAct::default()
    });
    let orchestrator = h.orchestrator(plan(vec![("a", "act"), ("b", "act")]), Arc::clone(&act));
    let task_id = h.task("Contended").await;

    let (first, second) = tokio::join!(orchestrator.run(task_id), orchestrator.run(task_id));
    let statuses = [first.status, second.status];
    assert!(statuses.contains(&OutcomeStatus::Success));
    assert!(statuses.contains(&OutcomeStatus::Skipped));

    assert_eq!(act.seen().len(), 2);
    assert_eq!(h.db.tasks().get_subtasks(task_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_task_is_error_outcome() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(plan(vec![("a", "act")]), act);

    let outcome = orchestrator.run(9999).await;
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.task_status.is_none());
}

#[tokio::test]
async fn test_resume_skips_completed_subtasks() {
    let h = Harness::new().await;
    let act = Arc::new(ScriptedAct::default());
    let orchestrator = h.orchestrator(plan(vec![]), Arc::clone(&act));
    let task_id = h.task("Interrupted").await;

    let specs: Vec<SubtaskSpec> = ["a", "b", "c"]
        .iter()
        .map(|title| SubtaskSpec {
            title: title.to_string(),
            description: String::new(),
            capability: "act".to_string(),
            estimated_duration: None,
        })
        .collect();
    let subtasks = h.db.tasks().commit_plan(task_id, &specs).await.unwrap();
    h.db
        .tasks()
        .update_subtask_status(subtasks[0].id, SubtaskStatus::Completed)
        .await
        .unwrap();

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.task_status, Some(TaskStatus::Completed));
    assert_eq!(outcome.completed_subtasks, 3);
    assert_eq!(act.seen(), vec!["b", "c"]);
}

#[tokio::test]
async fn test_degraded_mode_runs_fallback_plan() {
    let h = Harness::new().await;
    let config = Harness::config();
    let registry = CapabilityRegistry::builtin(h.db.clone(), None, &config);
    let orchestrator = Orchestrator::new(h.db.clone(), Arc::new(registry), config);
    let task_id = h.task("Plan a birthday party").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.task_status, Some(TaskStatus::Completed));
    assert_eq!(outcome.total_subtasks, 3);

    let subtasks = h.db.tasks().get_subtasks(task_id).await.unwrap();
    let capabilities: Vec<&str> = subtasks.iter().map(|s| s.capability.as_str()).collect();
    assert_eq!(capabilities, vec!["recall", "research", "act"]);

    let ledger = h.db.executions().list_for_task(task_id).await.unwrap();
    let research = ledger
        .iter()
        .find(|r| r.agent_type == "research")
        .unwrap();
    let output = research.output_data.as_ref().unwrap();
    assert_eq!(output["fallback"], json!(true));
    assert!(!output["findings"].as_array().unwrap().is_empty());

    let act = ledger.iter().find(|r| r.agent_type == "act").unwrap();
    let output = act.output_data.as_ref().unwrap();
    assert_eq!(output["fallback"], json!(true));
    assert!(!output["actions_taken"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_degraded_mode_plans_untitled_task() {
    let h = Harness::new().await;
    let config = Harness::config();
    let registry = CapabilityRegistry::builtin(h.db.clone(), None, &config);
    let orchestrator = Orchestrator::new(h.db.clone(), Arc::new(registry), config);
    let task_id = h.task("").await;

    let outcome = orchestrator.run(task_id).await;
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.task_status, Some(TaskStatus::Completed));
    assert_eq!(outcome.total_subtasks, 3);

    let stored = h.db.tasks().get_task(task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}
