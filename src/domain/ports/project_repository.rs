//! Project repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Project, ProjectStatus};

/// Repository interface for Project persistence.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn insert(&self, project: &Project) -> Result<(), DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Project>, DatabaseError>;

    /// Projects whose tasks are eligible for scheduling.
    async fn list_active_projects(&self) -> Result<Vec<Project>, DatabaseError>;

    async fn list_all(&self) -> Result<Vec<Project>, DatabaseError>;

    async fn set_status(&self, id: Uuid, status: ProjectStatus) -> Result<(), DatabaseError>;
}
