//! Query dispatcher
//!
//! Turns one classified question into a [`DispatchOutcome`]. Three modes:
//! deterministic single dispatch (default), the coordinated team and the
//! grounded chat completion.

use crate::agent::team::TEAM_LABEL;
use crate::agent::{AnalysisInput, FinAnalyzer, StatAnalyzer, TeamCoordinator, TeamOutcome};
use crate::classifier::IntentClassifier;
use crate::error::OrchestrationError;
use crate::ledger::Ledger;
use crate::llm::{GenerationSettings, LanguageModel, TokenUsage};
use crate::memory::MemoryLog;
use crate::models::{ChatMessage, ChatRole, ContextKind, DiagnosticCategory, DispatchMode, Specialist};
use crate::summarizer::ContextSet;
use crate::tools::ToolRegistry;
use tracing::{info, warn};

/// Conversation turns forwarded to the chat completion.
pub const CHAT_HISTORY_TURNS: usize = 8;

pub const CHAT_LABEL: &str = "chat";

const CHAT_SYSTEM_PROMPT: &str = "You are an expert financial analyst. Use the bank balance and movement \
data by company and period. Answer with clear explanations, explicit assumptions and, where relevant, \
summarized numerical calculations. If asked for segmentations (by company, bank, period), aggregate and \
explain the method. Mark estimated values as estimates. Return numbers with thousands separators and \
2 decimals. For monthly series, aggregate by YYYY-MM period.";

/// What the dispatcher produced, tagged by path.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Specialist {
        specialist: Specialist,
        text: String,
        category: Option<DiagnosticCategory>,
    },
    Team(TeamOutcome),
    Chat {
        text: String,
        usage: TokenUsage,
    },
    Diagnostic {
        label: String,
        category: DiagnosticCategory,
        text: String,
    },
}

impl DispatchOutcome {
    pub fn label(&self) -> String {
        match self {
            DispatchOutcome::Specialist { specialist, .. } => specialist.label().to_string(),
            DispatchOutcome::Team(outcome) => outcome.label(),
            DispatchOutcome::Chat { .. } => CHAT_LABEL.to_string(),
            DispatchOutcome::Diagnostic { label, .. } => label.clone(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            DispatchOutcome::Specialist { text, .. } => text,
            DispatchOutcome::Team(outcome) => &outcome.merged_text,
            DispatchOutcome::Chat { text, .. } => text,
            DispatchOutcome::Diagnostic { text, .. } => text,
        }
    }

    pub fn category(&self) -> Option<DiagnosticCategory> {
        match self {
            DispatchOutcome::Specialist { category, .. } => *category,
            DispatchOutcome::Diagnostic { category, .. } => Some(*category),
            DispatchOutcome::Team(_) | DispatchOutcome::Chat { .. } => None,
        }
    }

    /// Model-written text is condensed by the synthesizer.
    pub fn is_model_generated(&self) -> bool {
        matches!(self, DispatchOutcome::Team(_) | DispatchOutcome::Chat { .. })
    }
}

/// Everything one query's dispatch reads.
pub struct DispatchContext<'a> {
    pub user_text: &'a str,
    pub history: &'a [ChatMessage],
    pub ledger: &'a Ledger,
    pub contexts: &'a ContextSet,
    pub registry: &'a ToolRegistry,
}

pub struct Dispatcher<'a> {
    model: &'a dyn LanguageModel,
    memory: &'a MemoryLog,
    settings: &'a GenerationSettings,
}

impl<'a> Dispatcher<'a> {
    pub fn new(model: &'a dyn LanguageModel, memory: &'a MemoryLog, settings: &'a GenerationSettings) -> Self {
        Self {
            model,
            memory,
            settings,
        }
    }

    pub async fn dispatch(&self, mode: DispatchMode, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        match mode {
            DispatchMode::Single => self.single(ctx).await,
            DispatchMode::Team => self.team(ctx).await,
            DispatchMode::Chat => self.chat(ctx).await,
        }
    }

    async fn single(&self, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        let (specialist, reason) = IntentClassifier::classify_with_reason(ctx.user_text);
        info!(agent = %specialist, reason = ?reason, "Routed to specialist");

        let input = AnalysisInput {
            user_text: ctx.user_text,
            ledger: ctx.ledger,
            contexts: ctx.contexts,
        };
        let result = match specialist {
            Specialist::Statistical => StatAnalyzer::new(self.memory.clone()).analyze(&input).await,
            Specialist::Financial => FinAnalyzer::new(self.memory.clone()).analyze(&input).await,
        };

        match result {
            Ok(output) => DispatchOutcome::Specialist {
                specialist,
                text: output.text,
                category: output.category,
            },
            Err(e) => {
                warn!(agent = %specialist, error = %e, "Specialist analysis failed");
                DispatchOutcome::Diagnostic {
                    label: specialist.label().to_string(),
                    category: DiagnosticCategory::AnalysisFailure,
                    text: format!("[Orchestrator] analysis could not be completed: {}", e),
                }
            }
        }
    }

    async fn team(&self, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        let coordinator = TeamCoordinator::new(self.model, ctx.registry, ctx.contexts, self.settings);
        match coordinator.run(ctx.user_text).await {
            Ok(outcome) => DispatchOutcome::Team(outcome),
            Err(e) => generation_diagnostic(TEAM_LABEL, e),
        }
    }

    async fn chat(&self, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        let messages = chat_messages(ctx.user_text, ctx.history, ctx.contexts);
        match self.settings.complete(self.model, messages).await {
            Ok(completion) => DispatchOutcome::Chat {
                text: completion.text,
                usage: completion.usage,
            },
            Err(e) => generation_diagnostic(CHAT_LABEL, e),
        }
    }
}

fn generation_diagnostic(label: &str, error: OrchestrationError) -> DispatchOutcome {
    warn!(agent = label, error = %error, retryable = error.is_retryable(), "Model-backed dispatch failed");
    let category = match &error {
        OrchestrationError::GenerationFailed { .. } => DiagnosticCategory::GenerationFailure,
        _ => DiagnosticCategory::AnalysisFailure,
    };
    DispatchOutcome::Diagnostic {
        label: label.to_string(),
        category,
        text: format!("[Orchestrator] the language model could not answer: {}", error),
    }
}

/// System prompt, the three context blocks, the latest history turns, then the question.
pub fn chat_messages(user_text: &str, history: &[ChatMessage], contexts: &ContextSet) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::system(CHAT_SYSTEM_PROMPT),
        ChatMessage::system(format!(
            "Data context (aggregate):\n{}",
            contexts.get(ContextKind::BasicPeriod)
        )),
        ChatMessage::system(format!(
            "Data context (advanced aggregate):\n{}",
            contexts.get(ContextKind::RichAdvanced)
        )),
        ChatMessage::system(format!(
            "Detailed bank context (by bank, company and period):\n{}",
            contexts.get(ContextKind::BankDetail)
        )),
    ];

    // System turns from callers are not replayed.
    let turns: Vec<&ChatMessage> = history.iter().filter(|m| m.role != ChatRole::System).collect();
    let skip = turns.len().saturating_sub(CHAT_HISTORY_TURNS);
    messages.extend(turns.into_iter().skip(skip).cloned());

    messages.push(ChatMessage::user(user_text));
    messages
}
