//! Conductor System
//!
//! Orchestrates context recall, planning, and step execution for a task, and
//! projects its progress for readers.

pub mod context;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod research;
pub mod types;

pub use executor::Executor;
pub use memory::MemoryAssembler;
pub use orchestrator::{aggregate_status, Orchestrator};
pub use planner::{PlanProposal, Planner};
pub use progress::ProgressProjector;
pub use registry::CapabilityRegistry;
pub use research::ResearchHandler;
pub use types::{CapabilityHandler, ContextBundle, OutcomeStatus, TaskHistoryEntry, WorkflowOutcome};
