//! Agent runtime adapters.
//!
//! The real runtime is an external system reached through the
//! `AgentRuntime` port. This module ships the mock adapter used by local
//! runs and tests; deployments embed the library and wire their own.

pub mod mock;

pub use mock::MockAgentRuntime;
