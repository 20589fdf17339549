// Stepwise Engine
// Main entry point for the stepwise binary

use clap::Parser;
use sdk::{EngineError, StepwiseErrorExt};
use stepwise_engine::cli::{Cli, Command, KeyAction, MemoryAction, UserAction};
use stepwise_engine::config::Config;
use stepwise_engine::handlers::{
    handle_cleanup, handle_doctor, handle_key_delete, handle_key_set, handle_key_status,
    handle_memory_add, handle_memory_list, handle_progress,
    handle_run, handle_status, handle_tasks, handle_user_add, handle_user_prefs, handle_watch,
    OutputFormat,
};
use stepwise_engine::service::TaskService;
use stepwise_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = &result {
        if let Some(engine_err) = e.downcast_ref::<EngineError>() {
            eprintln!("Hint: {}", engine_err.user_hint());
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_or_create_at(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::info!("Stepwise Engine v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Commands that do not need the task store
    match &cli.command {
        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            return handle_doctor(&config, format).await;
        }
        Command::Key { action } => {
            return match action {
                KeyAction::Set => handle_key_set(&config, format),
                KeyAction::Delete => handle_key_delete(&config, format),
                KeyAction::Status => handle_key_status(&config, format),
            };
        }
        _ => {}
    }

    let service = TaskService::open(&config).await?;

    let result = match cli.command {
        Command::Run {
            request,
            user,
            description,
            priority,
            wait,
        } => {
            tracing::info!("Creating task for user {}: {}", user, request);
            handle_run(&service, &config, request, user, description, priority, wait, format).await
        }

        Command::Status { task_id } => handle_status(&service, task_id, format).await,

        Command::Progress { task_id } => handle_progress(&service, task_id, format).await,

        Command::Tasks { user, limit } => handle_tasks(&service, user, limit, format).await,

        Command::Watch { task_id } => handle_watch(&service, &config, task_id, format).await,

        Command::User { action } => match action {
            UserAction::Add {
                username,
                email,
                preferences,
            } => handle_user_add(&service, username, email, preferences, format).await,
            UserAction::Prefs {
                user_id,
                preferences,
            } => handle_user_prefs(&service, user_id, preferences, format).await,
        },

        Command::Memory { action } => match action {
            MemoryAction::Add {
                user,
                kind,
                key,
                value,
                importance,
            } => handle_memory_add(&service, user, kind, key, value, importance, format).await,
            MemoryAction::List { user, kind } => {
                handle_memory_list(&service, user, kind, format).await
            }
        },

        Command::Cleanup { days } => handle_cleanup(&service, days, format).await,

        Command::Doctor | Command::Key { .. } => Ok(()),
    };

    // Queued runs finish before the process exits
    service.shutdown().await;
    result
}
