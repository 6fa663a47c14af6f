//! `foreman status` handler.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::cli::{output, OutputFormat};
use crate::domain::models::{OrchestratorConfig, TaskStatus};
use crate::domain::ports::TaskRepository;
use crate::services::StateManager;

pub async fn handle_status(
    tasks: &Arc<dyn TaskRepository>,
    config: &OrchestratorConfig,
    format: OutputFormat,
) -> Result<()> {
    let mut counts = Vec::new();
    for status in [
        TaskStatus::Queued,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Blocked,
        TaskStatus::Complete,
    ] {
        counts.push((status, tasks.list_by_status(status).await?.len()));
    }

    // Last persisted active-agent set, if the loop has written one.
    let state = StateManager::new();
    let restored = config
        .state_file_path
        .as_ref()
        .map_or(0, |path| state.load(path));

    match format {
        OutputFormat::Json => {
            let counts: serde_json::Map<String, serde_json::Value> = counts
                .iter()
                .map(|(s, n)| (s.as_str().to_string(), json!(n)))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "tasks": counts,
                    "capacity": {
                        "opus_session_limit": config.capacity.opus_session_limit,
                        "sonnet_session_limit": config.capacity.sonnet_session_limit,
                    },
                    "persisted_active_agents": state.snapshot(),
                }))?
            );
        }
        OutputFormat::Text => {
            let mut table = output::table(&["status", "tasks"]);
            for (status, count) in &counts {
                table.add_row(vec![status.as_str().to_string(), count.to_string()]);
            }
            println!("{table}");
            println!(
                "Capacity limits: opus={} sonnet={}",
                config.capacity.opus_session_limit, config.capacity.sonnet_session_limit
            );
            if restored > 0 {
                println!("Persisted active agents: {restored}");
                for agent in state.snapshot() {
                    println!(
                        "  {} -> task {} ({})",
                        agent.session_id,
                        output::short_id(&agent.task_id.to_string()),
                        agent.model
                    );
                }
            }
        }
    }
    Ok(())
}
