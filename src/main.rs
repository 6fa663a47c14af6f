//! Foreman CLI entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use foreman::cli::{
    commands::{config_cmd, project, report, start, status, stop, task},
    Cli, Commands, ConfigCommands, ProjectCommands, TaskCommands,
};
use foreman::domain::errors::OrchestratorError;
use foreman::domain::models::OrchestratorConfig;
use foreman::domain::ports::{ProjectRepository, TaskRepository};
use foreman::infrastructure::config::{ConfigError, ConfigLoader};
use foreman::infrastructure::database::{
    DatabaseConnection, SqliteProjectRepository, SqliteTaskRepository,
};
use foreman::infrastructure::logging;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    }
}

/// 2 for configuration problems, 1 for everything else.
fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    let config_error = error.downcast_ref::<ConfigError>().is_some()
        || matches!(
            error.downcast_ref::<OrchestratorError>(),
            Some(OrchestratorError::Configuration(_))
        );
    if config_error {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Stop only touches the pid file; no config or database needed.
    if matches!(cli.command, Commands::Stop) {
        return stop::handle_stop();
    }

    let config = load_config(&cli)?;

    // Config commands should work even when the database is unreachable.
    if let Commands::Config(config_cmd) = &cli.command {
        return match config_cmd {
            ConfigCommands::Show => config_cmd::handle_show(&config, cli.format),
            ConfigCommands::Validate => config_cmd::handle_validate(&config, cli.format),
        };
    }

    let _log_guard = logging::init(&config.logging)?;

    let db = open_database(&config).await?;
    let task_repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(db.pool().clone()));
    let project_repo: Arc<dyn ProjectRepository> =
        Arc::new(SqliteProjectRepository::new(db.pool().clone()));

    match cli.command {
        Commands::Stop | Commands::Config(_) => unreachable!("handled above"),
        Commands::Start {
            mock_agent_delay_ms,
        } => start::handle_start(config, task_repo, project_repo, mock_agent_delay_ms).await,
        Commands::Status => status::handle_status(&task_repo, &config, cli.format).await,
        Commands::Report => report::handle_report(&task_repo, cli.format).await,
        Commands::Task(task_cmd) => match task_cmd {
            TaskCommands::Add {
                project: project_name,
                summary,
                priority,
                complexity,
                opus_sessions,
                sonnet_sessions,
                tag,
            } => {
                task::handle_add(
                    &task_repo,
                    &project_repo,
                    project_name,
                    summary,
                    priority,
                    complexity,
                    opus_sessions,
                    sonnet_sessions,
                    tag,
                    cli.format,
                )
                .await
            }
            TaskCommands::List { status } => {
                task::handle_list(&task_repo, status, cli.format).await
            }
            TaskCommands::Cancel { task_id } => {
                task::handle_cancel(&task_repo, task_id, cli.format).await
            }
        },
        Commands::Project(project_cmd) => match project_cmd {
            ProjectCommands::List => project::handle_list(&project_repo, cli.format).await,
            ProjectCommands::Pause { project_id } => {
                project::handle_pause(&project_repo, project_id, cli.format).await
            }
            ProjectCommands::Resume { project_id } => {
                project::handle_resume(&project_repo, project_id, cli.format).await
            }
        },
    }
}

fn load_config(cli: &Cli) -> Result<OrchestratorConfig> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

async fn open_database(config: &OrchestratorConfig) -> Result<DatabaseConnection> {
    let database_url = format!("sqlite:{}", config.database.path);
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
    }
    let db = DatabaseConnection::new(&database_url, config.database.max_connections)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to run migrations")?;
    Ok(db)
}
