//! Stepwise SDK
//!
//! Shared types and error taxonomy for Stepwise components.
//! The engine produces these shapes and transport layers consume them verbatim.

/// Error types and handling
pub mod errors;

/// Task, step, and progress types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, StepwiseErrorExt};
pub use types::{
    ActivityEntry, Capability, ExecutionResult, ExecutionStatus, MemoryKind, Priority,
    ProgressSnapshot, ResultStatus, SubtaskStatus, TaskStatus, CONTROLLER_AGENT,
};
