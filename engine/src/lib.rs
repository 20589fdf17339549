//! Stepwise Engine Library
//!
//! This library provides the core functionality of the Stepwise engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Database persistence module
pub mod db;

/// Generative provider abstraction layer
pub mod llm;

/// Conductor orchestration module
pub mod conductor;

/// Background work queue for workflow runs
pub mod queue;

/// Progress feed for task watchers
pub mod feed;

/// Task service facade
pub mod service;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
