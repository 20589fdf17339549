//! CLI interface for Stepwise
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stepwise task orchestration engine
///
/// Breaks a request into ordered steps, runs each step through a capability
/// handler, and reports progress as it goes.
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a task and run its workflow
    Run {
        /// The request to break into steps
        request: String,

        /// Owning user id
        #[arg(short, long)]
        user: i64,

        /// Longer description of the request
        #[arg(short, long, default_value = "")]
        description: String,

        /// Task priority (low, medium, high)
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Wait for the workflow to finish before exiting
        #[arg(long)]
        wait: bool,
    },

    /// Show a task with its subtasks and execution history
    Status {
        /// Task ID
        task_id: i64,
    },

    /// Show a progress snapshot for a task
    Progress {
        /// Task ID
        task_id: i64,
    },

    /// List a user's tasks, newest first
    Tasks {
        /// User id
        #[arg(short, long)]
        user: i64,

        /// Number of tasks to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Follow a task's progress until it finishes
    Watch {
        /// Task ID
        task_id: i64,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage long-term memories
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Delete finished tasks older than the retention window
    Cleanup {
        /// Age in days (defaults to workflow.retention_days)
        #[arg(long)]
        days: Option<i64>,
    },

    /// Manage the provider API key in the OS keychain
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Run system diagnostics
    Doctor,
}

/// Keychain actions
#[derive(Subcommand, Debug)]
pub enum KeyAction {
    /// Store the API key, read from stdin
    Set,

    /// Remove the stored API key
    Delete,

    /// Report whether an API key is stored
    Status,
}

/// User management actions
#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Create a user
    Add {
        /// Unique username
        username: String,

        /// Contact email
        #[arg(short, long)]
        email: String,

        /// Preferences as a JSON object
        #[arg(long, default_value = "{}")]
        preferences: String,
    },

    /// Replace a user's preferences
    Prefs {
        /// User id
        user_id: i64,

        /// Preferences as a JSON object
        preferences: String,
    },
}

/// Memory management actions
#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Store a memory
    Add {
        /// Owning user id
        #[arg(short, long)]
        user: i64,

        /// Memory kind (preference, interaction, context, or any other label)
        #[arg(short, long, default_value = "context")]
        kind: String,

        /// Memory key
        key: String,

        /// Memory value; parsed as JSON when possible, stored as a string otherwise
        value: String,

        /// Importance from 1 to 10
        #[arg(short, long, default_value = "5")]
        importance: i64,
    },

    /// List a user's memories
    List {
        /// Owning user id
        #[arg(short, long)]
        user: i64,

        /// Only show memories of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },
}
