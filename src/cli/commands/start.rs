//! `foreman start` handler: run the loop in the foreground until signaled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::commands::PID_FILE;
use crate::domain::models::OrchestratorConfig;
use crate::domain::ports::{
    AgentRuntime, Notifier, ProjectRepository, SafetyNotifier, TaskRepository,
};
use crate::infrastructure::notify::{LogNotifier, LogSafetyNotifier};
use crate::infrastructure::runtime::MockAgentRuntime;
use crate::services::MainLoop;

/// Run the orchestrator until SIGTERM / ctrl-c.
///
/// Drives the mock agent runtime; deployments embedding a real runtime use
/// the library API and wire their own `AgentRuntime` into `MainLoop::new`.
pub async fn handle_start(
    config: OrchestratorConfig,
    task_repo: Arc<dyn TaskRepository>,
    project_repo: Arc<dyn ProjectRepository>,
    mock_agent_delay_ms: u64,
) -> Result<()> {
    write_pid_file().context("failed to write pid file")?;

    let runtime: Arc<dyn AgentRuntime> = Arc::new(MockAgentRuntime::new(Duration::from_millis(
        mock_agent_delay_ms,
    )));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let safety: Arc<dyn SafetyNotifier> = Arc::new(LogSafetyNotifier);

    let main_loop = MainLoop::new(
        config,
        task_repo,
        runtime,
        Some(notifier),
        Some(safety),
        Some(project_repo),
    );

    let started = main_loop.start().await;
    if let Err(e) = started {
        remove_pid_file();
        return Err(e.into());
    }

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");

    main_loop.stop().await?;
    remove_pid_file();
    Ok(())
}

fn write_pid_file() -> Result<()> {
    if let Some(parent) = std::path::Path::new(PID_FILE).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(PID_FILE, std::process::id().to_string())?;
    Ok(())
}

fn remove_pid_file() {
    let _ = std::fs::remove_file(PID_FILE);
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
