//! Task, step, and progress types
//!
//! Status vocabularies are persisted as lowercase strings; `as_str` and
//! `FromStr` are the only conversions the engine uses for them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent type recorded on the summary entry written at the end of each workflow run
pub const CONTROLLER_AGENT: &str = "controller";

/// Task lifecycle status
///
/// The lifecycle is monotonic:
/// pending → planning → executing → {completed | partial | failed}.
/// Stages may be skipped (an already-planned task goes straight to executing, a
/// planning failure goes straight to failed) but never revisited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    Partial,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Partial => "partial",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Partial | TaskStatus::Failed
        )
    }

    fn stage(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Planning => 1,
            TaskStatus::Executing => 2,
            TaskStatus::Completed | TaskStatus::Partial | TaskStatus::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle order
    ///
    /// Re-entering the current non-terminal stage is allowed so an interrupted
    /// run can be resumed.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.stage() >= self.stage()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "planning" => Ok(TaskStatus::Planning),
            "executing" => Ok(TaskStatus::Executing),
            "completed" => Ok(TaskStatus::Completed),
            "partial" => Ok(TaskStatus::Partial),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Subtask status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::Executing => "executing",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubtaskStatus::Pending),
            "executing" => Ok(SubtaskStatus::Executing),
            "completed" => Ok(SubtaskStatus::Completed),
            "failed" => Ok(SubtaskStatus::Failed),
            other => Err(format!("unknown subtask status '{}'", other)),
        }
    }
}

/// Execution record status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// Advisory task priority. Not used for scheduling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// Category of work a step handler performs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Decompose a request into ordered steps
    Plan,
    /// Load user context and long-term memory
    Recall,
    /// Gather and analyze information
    Research,
    /// Take actions and produce deliverables
    Act,
}

impl Capability {
    /// Every built-in capability
    pub const ALL: [Capability; 4] = [
        Capability::Plan,
        Capability::Recall,
        Capability::Research,
        Capability::Act,
    ];

    /// Capability used for names the dispatcher does not recognize
    pub const DEFAULT: Capability = Capability::Act;

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Plan => "plan",
            Capability::Recall => "recall",
            Capability::Research => "research",
            Capability::Act => "act",
        }
    }

    /// Look up a capability by name, case-insensitively.
    ///
    /// Accepts the older agent names (`planner`, `memory`, `executor`) that
    /// generative plans still tend to produce.
    pub fn from_name(name: &str) -> Option<Capability> {
        match name.trim().to_ascii_lowercase().as_str() {
            "plan" | "planner" => Some(Capability::Plan),
            "recall" | "memory" => Some(Capability::Recall),
            "research" => Some(Capability::Research),
            "act" | "executor" => Some(Capability::Act),
            _ => None,
        }
    }

    /// Resolve a declared capability, routing unknown names to [`Capability::DEFAULT`]
    pub fn resolve(name: &str) -> Capability {
        Self::from_name(name).unwrap_or(Self::DEFAULT)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a memory record. The vocabulary is open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemoryKind {
    Preference,
    Interaction,
    Context,
    Other(String),
}

impl MemoryKind {
    pub fn as_str(&self) -> &str {
        match self {
            MemoryKind::Preference => "preference",
            MemoryKind::Interaction => "interaction",
            MemoryKind::Context => "context",
            MemoryKind::Other(kind) => kind,
        }
    }
}

impl From<String> for MemoryKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "preference" => MemoryKind::Preference,
            "interaction" => MemoryKind::Interaction,
            "context" => MemoryKind::Context,
            _ => MemoryKind::Other(s),
        }
    }
}

impl From<&str> for MemoryKind {
    fn from(s: &str) -> Self {
        MemoryKind::from(s.to_string())
    }
}

impl From<MemoryKind> for String {
    fn from(kind: MemoryKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome flag of a handler invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Result returned by every capability handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: ResultStatus,
    pub payload: serde_json::Value,
    pub message: String,
}

impl ExecutionResult {
    /// Create a success result
    pub fn success(payload: serde_json::Value, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            payload,
            message: message.into(),
        }
    }

    /// Create an error result with an empty payload
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            payload: serde_json::Value::Object(Default::default()),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Whether the handler produced its deterministic degraded payload
    pub fn is_fallback(&self) -> bool {
        self.payload
            .get("fallback")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// One entry of a progress snapshot's recent activity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub capability: String,
    pub status: ExecutionStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

/// Point-in-time progress of a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub task_id: i64,
    pub status: TaskStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub percent_complete: f64,
    pub current_step: String,
    pub recent_activity: Vec<ActivityEntry>,
}

impl ProgressSnapshot {
    /// Whether the task has reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
