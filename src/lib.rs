//! Foreman - autonomous agent orchestrator.
//!
//! A long-running control plane that pulls tasks from a persisted queue,
//! launches bounded pools of external agent sessions under per-tier
//! capacity limits, tracks their lifecycle through an event stream, and
//! latches a safety stop when agents misbehave. The orchestrator does no
//! task work itself; it decides what runs, where capacity exists, when to
//! stop, and how to react to agent events.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::OrchestratorConfig;
pub use infrastructure::database::DatabaseConnection;
pub use services::MainLoop;
