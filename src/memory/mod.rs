//! Agent Memory System
//!
//! Namespaced, append-only notes the analyzers leave for later queries.

pub mod store;

pub use store::{MemoryEntry, MemoryLog};

pub const STAT_NAMESPACE: &str = "stat_agent";
pub const FIN_NAMESPACE: &str = "fin_agent";
pub const QUERY_NAMESPACE: &str = "orchestrator";
