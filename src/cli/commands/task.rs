//! `foreman task` handlers.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use crate::cli::{output, OutputFormat};
use crate::domain::models::{Complexity, Project, Task, TaskStatus};
use crate::domain::ports::{ProjectRepository, TaskRepository};

#[allow(clippy::too_many_arguments)]
pub async fn handle_add(
    tasks: &Arc<dyn TaskRepository>,
    projects: &Arc<dyn ProjectRepository>,
    project_name: String,
    summary: String,
    priority: i64,
    complexity: String,
    opus_sessions: u32,
    sonnet_sessions: u32,
    tags: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let complexity = Complexity::from_str(&complexity)
        .with_context(|| format!("unknown complexity '{complexity}'"))?;

    let project = find_or_create_project(projects, &project_name).await?;

    let mut task = Task::new(project.id, summary)
        .with_priority(priority)
        .with_complexity(complexity)
        .with_estimates(opus_sessions, sonnet_sessions);
    task.tags = tags;
    task.validate_summary().map_err(anyhow::Error::msg)?;

    tasks.insert(&task).await.context("failed to insert task")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&task)?),
        OutputFormat::Text => println!("Queued task {} in project '{}'", task.id, project.name),
    }
    Ok(())
}

pub async fn handle_list(
    tasks: &Arc<dyn TaskRepository>,
    status: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let listed = match status {
        Some(raw) => {
            let status =
                TaskStatus::from_str(&raw).with_context(|| format!("unknown status '{raw}'"))?;
            tasks.list_by_status(status).await?
        }
        None => {
            let mut all = Vec::new();
            for status in [
                TaskStatus::Queued,
                TaskStatus::Assigned,
                TaskStatus::InProgress,
                TaskStatus::Review,
                TaskStatus::Blocked,
                TaskStatus::Complete,
            ] {
                all.extend(tasks.list_by_status(status).await?);
            }
            all
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listed)?),
        OutputFormat::Text => {
            if listed.is_empty() {
                println!("No tasks");
            } else {
                println!("{}", output::task_table(&listed));
            }
        }
    }
    Ok(())
}

pub async fn handle_cancel(
    tasks: &Arc<dyn TaskRepository>,
    task_id: Uuid,
    format: OutputFormat,
) -> Result<()> {
    let task = tasks
        .get(task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    // A task with a live agent must finish or error out first; canceling
    // under it would leak the session's capacity slot.
    if !matches!(task.status, TaskStatus::Queued | TaskStatus::Blocked) {
        bail!(
            "task {} is {}; only queued or blocked tasks can be canceled",
            task_id,
            task.status.as_str()
        );
    }

    tasks.delete(task_id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "canceled": task_id })),
        OutputFormat::Text => println!("Canceled task {task_id}"),
    }
    Ok(())
}

async fn find_or_create_project(
    projects: &Arc<dyn ProjectRepository>,
    name: &str,
) -> Result<Project> {
    if let Some(existing) = projects
        .list_all()
        .await?
        .into_iter()
        .find(|p| p.name == name)
    {
        return Ok(existing);
    }
    let project = Project::new(name);
    projects
        .insert(&project)
        .await
        .context("failed to create project")?;
    Ok(project)
}
