//! `foreman report` handler.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::cli::{output, OutputFormat};
use crate::domain::models::TaskStatus;
use crate::domain::ports::TaskRepository;

pub async fn handle_report(tasks: &Arc<dyn TaskRepository>, format: OutputFormat) -> Result<()> {
    let mut counts = Vec::new();
    let mut tokens_opus: u64 = 0;
    let mut tokens_sonnet: u64 = 0;
    let mut sessions_opus: u64 = 0;
    let mut sessions_sonnet: u64 = 0;

    for status in [
        TaskStatus::Queued,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Blocked,
        TaskStatus::Complete,
    ] {
        let listed = tasks.list_by_status(status).await?;
        counts.push((status, listed.len()));
        for task in &listed {
            tokens_opus += task.actual_tokens_opus;
            tokens_sonnet += task.actual_tokens_sonnet;
            sessions_opus += u64::from(task.actual_sessions_opus);
            sessions_sonnet += u64::from(task.actual_sessions_sonnet);
        }
    }

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
                    "usage": {
                        "tokens_opus": tokens_opus,
                        "tokens_sonnet": tokens_sonnet,
                        "sessions_opus": sessions_opus,
                        "sessions_sonnet": sessions_sonnet,
                    }
                }))?
            );
        }
        OutputFormat::Text => {
            let mut table = output::table(&["status", "tasks"]);
            for (status, count) in &counts {
                table.add_row(vec![status.as_str().to_string(), count.to_string()]);
            }
            println!("{table}");
            println!("Usage:");
            println!("  opus:   {sessions_opus} sessions, {tokens_opus} tokens");
            println!("  sonnet: {sessions_sonnet} sessions, {tokens_sonnet} tokens");
        }
    }
    Ok(())
}
