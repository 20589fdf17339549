//! Error types and handling
//!
//! This module provides the error types used throughout the Stepwise engine.
//! All errors implement the `StepwiseErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Error Categories
//!
//! - **Not found**: a referenced task, subtask, or user does not exist
//! - **Planning**: a task could not be decomposed into subtasks
//! - **Handler**: a single capability invocation failed
//! - **Lifecycle**: an illegal task status transition was attempted
//! - **Background execution**: the work queue is full or closed
//! - **Infrastructure**: configuration, keyring, IO
//!
//! # Examples
//!
//! ```
//! use sdk::errors::{EngineError, StepwiseErrorExt};
//!
//! let error = EngineError::NotFound { entity: "task", id: 42 };
//! assert_eq!(error.to_string(), "task 42 not found");
//! assert!(!error.is_recoverable());
//!
//! let busy = EngineError::QueueFull(42);
//! assert!(busy.is_recoverable());
//! ```

use thiserror::Error;

/// Trait for Stepwise error extensions
///
/// Hints are static strings so they are safe to show to end users without
/// leaking provider responses or credentials.
pub trait StepwiseErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors require the caller to change its request or configuration.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Lookup errors
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    // Workflow errors
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Handler '{capability}' failed: {message}")]
    Handler { capability: String, message: String },

    #[error("Invalid task status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Background execution errors
    #[error("Work queue is full, task {0} was not scheduled")]
    QueueFull(i64),

    #[error("Work queue is closed")]
    QueueClosed,

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a missing task
    pub fn task_not_found(id: i64) -> Self {
        Self::NotFound { entity: "task", id }
    }

    /// Shorthand for a missing user
    pub fn user_not_found(id: i64) -> Self {
        Self::NotFound { entity: "user", id }
    }

    /// Whether this error means the referenced entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl StepwiseErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::NotFound { .. } => "The requested item does not exist",
            Self::Planning(_) => "The task could not be broken into steps. Try rephrasing it",
            Self::Handler { .. } => "A step failed. See the task history for details",
            Self::InvalidTransition { .. } => "The task is not in a state that allows this",
            Self::QueueFull(_) => "Too many tasks are running. Please try again shortly",
            Self::QueueClosed => "The engine is shutting down",
            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::NotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::QueueClosed => false,

            _ => true,
        }
    }
}
