//! Cash Position Orchestrator
//!
//! Answers natural-language questions about company bank balances and cash
//! movements:
//! - Normalizes a tabular snapshot and drops payables (CXP) accounts
//! - Condenses it into bounded, deterministic context blocks
//! - Routes the question to a statistical or financial specialist
//! - Optionally coordinates model-backed agents with bounded tool use
//! - Condenses model-written answers into short, actionable text
//!
//! FLOW:
//! NORMALIZE → SUMMARIZE → BUILD CAPABILITIES → DISPATCH → SYNTHESIZE

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod summarizer;
pub mod synthesizer;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::Result;

// Re-export common types
pub use classifier::IntentClassifier;
pub use config::OrchestratorConfig;
pub use llm::{LanguageModel, OpenAiChatClient, ScriptedModel};
pub use models::*;
pub use orchestrator::Orchestrator;
