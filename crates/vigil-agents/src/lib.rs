//! Agent providers, execution strategies, the executor and the live
//! execution tracker.

pub mod claude;
pub mod codex;
pub mod executor;
pub mod provider;
pub mod registry;
pub mod strategy;
pub mod tracker;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use executor::Executor;
pub use provider::*;
pub use registry::{AgentRegistry, DEFAULT_PROVIDER};
pub use strategy::{ExecutionContext, Strategy};
pub use tracker::{ExecutionEntry, ExecutionHandle, ExecutionTracker};
