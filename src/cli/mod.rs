//! Command-line interface.
//!
//! Exit codes: 0 success, 1 user/runtime error, 2 configuration error.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

/// Output format for read commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "foreman", version, about = "Autonomous agent orchestrator")]
pub struct Cli {
    /// Path to a configuration file (defaults to .foreman/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the orchestrator loop in the foreground
    Start {
        /// Simulated task duration for the mock agent runtime, in milliseconds
        #[arg(long, default_value_t = 2000)]
        mock_agent_delay_ms: u64,
    },
    /// Signal a running orchestrator to shut down gracefully
    Stop,
    /// Show queue depth, task counts, and configured capacity
    Status,
    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),
    /// Project management
    #[command(subcommand)]
    Project(ProjectCommands),
    /// Configuration inspection
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Summarize task outcomes and usage
    Report,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    /// Add a task to the queue
    Add {
        /// Project name (created if it does not exist yet)
        #[arg(long)]
        project: String,

        /// One-line task summary
        #[arg(long)]
        summary: String,

        /// Scheduling priority; higher runs sooner
        #[arg(long, default_value_t = 0)]
        priority: i64,

        /// Complexity estimate: low, medium, high, complex
        #[arg(long, default_value = "medium")]
        complexity: String,

        /// Estimated opus sessions
        #[arg(long, default_value_t = 0)]
        opus_sessions: u32,

        /// Estimated sonnet sessions
        #[arg(long, default_value_t = 0)]
        sonnet_sessions: u32,

        /// Tags (repeatable)
        #[arg(long)]
        tag: Vec<String>,
    },
    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// Cancel a queued or blocked task
    Cancel {
        /// Task id
        task_id: Uuid,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommands {
    /// List projects
    List,
    /// Pause a project; its tasks stop being scheduled
    Pause {
        /// Project id
        project_id: Uuid,
    },
    /// Resume a paused project
    Resume {
        /// Project id
        project_id: Uuid,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the configuration and exit
    Validate,
}
