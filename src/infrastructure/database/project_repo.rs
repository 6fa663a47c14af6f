//! SQLite implementation of the project repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Project, ProjectStatus};
use crate::domain::ports::ProjectRepository;

pub struct SqliteProjectRepository {
    pool: SqlitePool,
}

impl SqliteProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn project_from_row(row: &SqliteRow) -> Result<Project, DatabaseError> {
    let id_raw: String = row.try_get("id")?;
    let status_raw: String = row.try_get("status")?;
    let created_raw: String = row.try_get("created_at")?;
    let updated_raw: String = row.try_get("updated_at")?;

    let parse_ts = |raw: &str| -> Result<DateTime<Utc>, DatabaseError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DatabaseError::Serialization(format!("bad project timestamp: {e}")))
    };

    Ok(Project {
        id: Uuid::parse_str(&id_raw)
            .map_err(|e| DatabaseError::Serialization(format!("bad project id: {e}")))?,
        name: row.try_get("name")?,
        status: ProjectStatus::from_str(&status_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown project status '{status_raw}'"))
        })?,
        created_at: parse_ts(&created_raw)?,
        updated_at: parse_ts(&updated_raw)?,
    })
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn insert(&self, project: &Project) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO projects (id, name, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(project.status.as_str())
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Project>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn list_active_projects(&self) -> Result<Vec<Project>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM projects WHERE status = 'active' ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<Project>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn set_status(&self, id: Uuid, status: ProjectStatus) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                entity: "project",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::DatabaseConnection;

    async fn repo() -> SqliteProjectRepository {
        let db = DatabaseConnection::new("sqlite::memory:", 1).await.unwrap();
        db.migrate().await.unwrap();
        SqliteProjectRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn insert_and_list_round_trip() {
        let repo = repo().await;
        let project = Project::new("alpha");
        repo.insert(&project).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "alpha");
        assert_eq!(all[0].status, ProjectStatus::Active);
    }

    #[tokio::test]
    async fn pause_removes_from_active_listing() {
        let repo = repo().await;
        let project = Project::new("beta");
        repo.insert(&project).await.unwrap();

        repo.set_status(project.id, ProjectStatus::Paused)
            .await
            .unwrap();
        assert!(repo.list_active_projects().await.unwrap().is_empty());
        assert_eq!(repo.list_all().await.unwrap().len(), 1);

        repo.set_status(project.id, ProjectStatus::Active)
            .await
            .unwrap();
        assert_eq!(repo.list_active_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_status_for_missing_project_is_not_found() {
        let repo = repo().await;
        let result = repo.set_status(Uuid::new_v4(), ProjectStatus::Paused).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }
}
