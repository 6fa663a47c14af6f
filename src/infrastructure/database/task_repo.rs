//! SQLite implementation of the task repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Complexity, Task, TaskSource, TaskStatus};
use crate::domain::ports::{TaskRepository, UsageDelta};

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("bad uuid in {column}: {e}")))
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp in {column}: {e}")))
}

fn optional_uuid(raw: Option<String>, column: &str) -> Result<Option<Uuid>, DatabaseError> {
    raw.map(|s| parse_uuid(&s, column)).transpose()
}

fn optional_timestamp(
    raw: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.map(|s| parse_timestamp(&s, column)).transpose()
}

fn task_from_row(row: &SqliteRow) -> Result<Task, DatabaseError> {
    let status_raw: String = row.try_get("status")?;
    let source_raw: String = row.try_get("source")?;
    let complexity_raw: String = row.try_get("complexity")?;
    let tags_raw: String = row.try_get("tags")?;
    let id_raw: String = row.try_get("id")?;
    let project_raw: String = row.try_get("project_id")?;
    let created_raw: String = row.try_get("created_at")?;
    let updated_raw: String = row.try_get("updated_at")?;

    Ok(Task {
        id: parse_uuid(&id_raw, "id")?,
        project_id: parse_uuid(&project_raw, "project_id")?,
        summary: row.try_get("summary")?,
        priority: row.try_get("priority")?,
        status: TaskStatus::from_str(&status_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown task status '{status_raw}'"))
        })?,
        source: TaskSource::from_str(&source_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown task source '{source_raw}'"))
        })?,
        complexity: Complexity::from_str(&complexity_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown complexity '{complexity_raw}'"))
        })?,
        tags: serde_json::from_str(&tags_raw)?,
        blocked_by_task_id: optional_uuid(row.try_get("blocked_by_task_id")?, "blocked_by_task_id")?,
        parent_task_id: optional_uuid(row.try_get("parent_task_id")?, "parent_task_id")?,
        assigned_agent_id: row.try_get("assigned_agent_id")?,
        estimated_sessions_opus: row.try_get::<i64, _>("estimated_sessions_opus")? as u32,
        estimated_sessions_sonnet: row.try_get::<i64, _>("estimated_sessions_sonnet")? as u32,
        actual_tokens_opus: row.try_get::<i64, _>("actual_tokens_opus")? as u64,
        actual_tokens_sonnet: row.try_get::<i64, _>("actual_tokens_sonnet")? as u64,
        actual_sessions_opus: row.try_get::<i64, _>("actual_sessions_opus")? as u32,
        actual_sessions_sonnet: row.try_get::<i64, _>("actual_sessions_sonnet")? as u32,
        created_at: parse_timestamp(&created_raw, "created_at")?,
        updated_at: parse_timestamp(&updated_raw, "updated_at")?,
        started_at: optional_timestamp(row.try_get("started_at")?, "started_at")?,
        completed_at: optional_timestamp(row.try_get("completed_at")?, "completed_at")?,
    })
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError> {
        sqlx::query(
            r"INSERT INTO tasks (
                id, project_id, summary, priority, status, source, complexity,
                tags, blocked_by_task_id, parent_task_id, assigned_agent_id,
                estimated_sessions_opus, estimated_sessions_sonnet,
                actual_tokens_opus, actual_tokens_sonnet,
                actual_sessions_opus, actual_sessions_sonnet,
                created_at, updated_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.project_id.to_string())
        .bind(&task.summary)
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(task.source.as_str())
        .bind(task.complexity.as_str())
        .bind(serde_json::to_string(&task.tags)?)
        .bind(task.blocked_by_task_id.map(|id| id.to_string()))
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(task.assigned_agent_id.as_deref())
        .bind(i64::from(task.estimated_sessions_opus))
        .bind(i64::from(task.estimated_sessions_sonnet))
        .bind(task.actual_tokens_opus as i64)
        .bind(task.actual_tokens_sonnet as i64)
        .bind(i64::from(task.actual_sessions_opus))
        .bind(i64::from(task.actual_sessions_sonnet))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn get_queued_tasks(&self) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            r"SELECT t.* FROM tasks t
              JOIN projects p ON p.id = t.project_id
              WHERE t.status = 'queued' AND p.status = 'active'
              ORDER BY t.priority DESC, t.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = ? ORDER BY priority DESC, created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let result = match status {
            TaskStatus::InProgress => {
                sqlx::query(
                    "UPDATE tasks SET status = ?, updated_at = ?, started_at = COALESCE(started_at, ?) WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(&now)
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            TaskStatus::Complete => {
                sqlx::query(
                    "UPDATE tasks SET status = ?, updated_at = ?, completed_at = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(&now)
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            _ => {
                sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(&now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_blocked_by(
        &self,
        id: Uuid,
        blocked_by: Option<Uuid>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE tasks SET blocked_by_task_id = ?, updated_at = ? WHERE id = ?")
            .bind(blocked_by.map(|b| b.to_string()))
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_usage(&self, id: Uuid, usage: UsageDelta) -> Result<(), DatabaseError> {
        sqlx::query(
            r"UPDATE tasks SET
                actual_tokens_opus = actual_tokens_opus + ?,
                actual_tokens_sonnet = actual_tokens_sonnet + ?,
                actual_sessions_opus = actual_sessions_opus + ?,
                actual_sessions_sonnet = actual_sessions_sonnet + ?,
                updated_at = ?
              WHERE id = ?",
        )
        .bind(usage.tokens_opus as i64)
        .bind(usage.tokens_sonnet as i64)
        .bind(i64::from(usage.sessions_opus))
        .bind(i64::from(usage.sessions_sonnet))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_agent(&self, id: Uuid, session_id: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE tasks SET assigned_agent_id = ?, updated_at = ? WHERE id = ?")
            .bind(session_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unassign_agent(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE tasks SET assigned_agent_id = NULL, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Project;
    use crate::domain::ports::ProjectRepository;
    use crate::infrastructure::database::{DatabaseConnection, SqliteProjectRepository};

    async fn repo_with_project() -> (SqliteTaskRepository, SqliteProjectRepository, Project) {
        let db = DatabaseConnection::new("sqlite::memory:", 1).await.unwrap();
        db.migrate().await.unwrap();
        let task_repo = SqliteTaskRepository::new(db.pool().clone());
        let project_repo = SqliteProjectRepository::new(db.pool().clone());
        let project = Project::new("demo");
        project_repo.insert(&project).await.unwrap();
        (task_repo, project_repo, project)
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let (repo, _, project) = repo_with_project().await;
        let task = Task::new(project.id, "round trip")
            .with_priority(4)
            .with_estimates(1, 2)
            .with_complexity(Complexity::High);
        repo.insert(&task).await.unwrap();

        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.summary, "round trip");
        assert_eq!(loaded.priority, 4);
        assert_eq!(loaded.status, TaskStatus::Queued);
        assert_eq!(loaded.complexity, Complexity::High);
        assert_eq!(loaded.estimated_sessions_opus, 1);
        assert_eq!(loaded.estimated_sessions_sonnet, 2);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (repo, _, _) = repo_with_project().await;
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queued_tasks_ordered_by_priority_then_age() {
        let (repo, _, project) = repo_with_project().await;
        let low = Task::new(project.id, "low").with_priority(1);
        let high = Task::new(project.id, "high").with_priority(9);
        repo.insert(&low).await.unwrap();
        repo.insert(&high).await.unwrap();

        let queued = repo.get_queued_tasks().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].id, high.id);
        assert_eq!(queued[1].id, low.id);
    }

    #[tokio::test]
    async fn paused_project_tasks_are_not_queued() {
        let (repo, projects, project) = repo_with_project().await;
        let task = Task::new(project.id, "paused work");
        repo.insert(&task).await.unwrap();

        projects
            .set_status(project.id, crate::domain::models::ProjectStatus::Paused)
            .await
            .unwrap();
        assert!(repo.get_queued_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_update_stamps_completed_at() {
        let (repo, _, project) = repo_with_project().await;
        let task = Task::new(project.id, "finishes");
        repo.insert(&task).await.unwrap();

        repo.update_task_status(task.id, TaskStatus::Complete)
            .await
            .unwrap();
        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Complete);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn status_update_for_missing_task_is_not_found() {
        let (repo, _, _) = repo_with_project().await;
        let result = repo
            .update_task_status(Uuid::new_v4(), TaskStatus::Complete)
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn usage_deltas_accumulate() {
        let (repo, _, project) = repo_with_project().await;
        let task = Task::new(project.id, "counts tokens");
        repo.insert(&task).await.unwrap();

        let delta = UsageDelta {
            tokens_sonnet: 500,
            sessions_sonnet: 1,
            ..UsageDelta::default()
        };
        repo.record_usage(task.id, delta).await.unwrap();
        repo.record_usage(task.id, delta).await.unwrap();

        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.actual_tokens_sonnet, 1000);
        assert_eq!(loaded.actual_sessions_sonnet, 2);
        assert_eq!(loaded.actual_tokens_opus, 0);
    }

    #[tokio::test]
    async fn assign_and_unassign_agent() {
        let (repo, _, project) = repo_with_project().await;
        let task = Task::new(project.id, "assigned");
        repo.insert(&task).await.unwrap();

        repo.assign_agent(task.id, "sess-42").await.unwrap();
        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.assigned_agent_id.as_deref(), Some("sess-42"));

        repo.unassign_agent(task.id).await.unwrap();
        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert!(loaded.assigned_agent_id.is_none());
    }

    #[tokio::test]
    async fn blocker_column_round_trips() {
        let (repo, _, project) = repo_with_project().await;
        let task = Task::new(project.id, "blocked");
        let blocker = Task::new(project.id, "the blocker");
        repo.insert(&task).await.unwrap();
        repo.insert(&blocker).await.unwrap();

        repo.set_blocked_by(task.id, Some(blocker.id)).await.unwrap();
        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.blocked_by_task_id, Some(blocker.id));

        repo.set_blocked_by(task.id, None).await.unwrap();
        let loaded = repo.get(task.id).await.unwrap().unwrap();
        assert!(loaded.blocked_by_task_id.is_none());
    }

    #[tokio::test]
    async fn health_check_succeeds_on_live_pool() {
        let (repo, _, _) = repo_with_project().await;
        repo.health_check().await.unwrap();
    }
}
