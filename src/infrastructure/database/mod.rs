//! SQLite persistence: connection pool and repository implementations.

pub mod connection;
pub mod project_repo;
pub mod task_repo;

pub use connection::DatabaseConnection;
pub use project_repo::SqliteProjectRepository;
pub use task_repo::SqliteTaskRepository;
