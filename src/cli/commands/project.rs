//! `foreman project` handlers.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::cli::{output, OutputFormat};
use crate::domain::models::ProjectStatus;
use crate::domain::ports::ProjectRepository;

pub async fn handle_list(
    projects: &Arc<dyn ProjectRepository>,
    format: OutputFormat,
) -> Result<()> {
    let listed = projects.list_all().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listed)?),
        OutputFormat::Text => {
            if listed.is_empty() {
                println!("No projects");
            } else {
                println!("{}", output::project_table(&listed));
            }
        }
    }
    Ok(())
}

pub async fn handle_pause(
    projects: &Arc<dyn ProjectRepository>,
    project_id: Uuid,
    format: OutputFormat,
) -> Result<()> {
    projects.set_status(project_id, ProjectStatus::Paused).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "paused": project_id })),
        OutputFormat::Text => println!("Paused project {project_id}"),
    }
    Ok(())
}

pub async fn handle_resume(
    projects: &Arc<dyn ProjectRepository>,
    project_id: Uuid,
    format: OutputFormat,
) -> Result<()> {
    projects.set_status(project_id, ProjectStatus::Active).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "resumed": project_id })),
        OutputFormat::Text => println!("Resumed project {project_id}"),
    }
    Ok(())
}
