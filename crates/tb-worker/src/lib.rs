//! Worker process internals: argument handling, the agent that pulls and
//! runs its assignment, and the channel-backed report plumbing.

pub mod agent;
pub mod args;
pub mod transfer;

pub use agent::{run_agent, AgentOutcome};
pub use args::WorkerArgs;
