//! Specialist agents
//!
//! Agents are plain descriptors (name, role, instructions, grounding context,
//! tool budget) consumed by the dispatcher. Nothing here holds state between
//! queries: descriptors are rebuilt from each query's contexts.

pub mod analyzers;
pub mod team;

use crate::models::{ContextKind, Specialist};
use crate::summarizer::ContextSet;

pub use analyzers::{AnalysisInput, FinAnalyzer, StatAnalyzer};
pub use team::{MemberOutput, TeamCoordinator, TeamOutcome};

/// Tool calls allowed per member run.
pub const TOOL_CALL_LIMIT: usize = 4;

/// Shared answer style for every model-backed specialist.
pub const STYLE_GUIDE: &str = "Answer style (mandatory): natural language, clear and brief. \
Include only essential figures: final results and key percentages; avoid long tables and lists. \
At most 2-4 figures per paragraph. Explain cause and effect before the figures, \
and end with 1-2 concrete, prioritized actions.";

/// Declarative definition of a model-backed specialist.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub specialist: Specialist,
    pub name: &'static str,
    pub role: &'static str,
    pub instructions: Vec<&'static str>,
    /// Grounding text appended to the system prompt.
    pub context: String,
    pub tool_call_limit: usize,
}

impl AgentDescriptor {
    /// System prompt with the tool catalog and the tool-call protocol.
    pub fn system_prompt(&self, tool_catalog: &str) -> String {
        let mut prompt = format!("You are {}. Role: {}.\n\nInstructions:\n", self.name, self.role);
        for instruction in &self.instructions {
            prompt.push_str("- ");
            prompt.push_str(instruction);
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "\nAvailable tools:\n{}\n\nTo call a tool, reply with only a fenced block:\n```tool\n{{\"tool\": \"<name>\", \"args\": {{...}}}}\n```\nYou may call at most {} tools. When you have enough information, reply with the final answer and no tool block.",
            tool_catalog, self.tool_call_limit
        ));

        if !self.context.trim().is_empty() {
            prompt.push_str("\n\nAdditional context:\n");
            prompt.push_str(self.context.trim());
        }
        prompt
    }
}

fn join_context(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Statistician: exact calculations grounded on the period and rich contexts.
pub fn build_stat_agent(contexts: &ContextSet) -> AgentDescriptor {
    AgentDescriptor {
        specialist: Specialist::Statistical,
        name: "Statistician-Calculator",
        role: "Statistical analyst with numerical precision",
        instructions: vec![
            "Answer with exact calculations, using tools when needed.",
            "Filter by bank, company and period; rows from payables accounts (CXP) are already excluded.",
            "Report figures with thousands separators and 2 decimals.",
        ],
        context: join_context(&[
            STYLE_GUIDE,
            contexts.get(ContextKind::BasicPeriod),
            contexts.get(ContextKind::RichAdvanced),
        ]),
        tool_call_limit: TOOL_CALL_LIMIT,
    }
}

/// Financial analyst: risks, drivers, simple projections and actions.
pub fn build_fin_agent(contexts: &ContextSet) -> AgentDescriptor {
    AgentDescriptor {
        specialist: Specialist::Financial,
        name: "Financial Agent (Descriptive & Predictive)",
        role: "Owns financial analysis, critique and recommendations: identifies risks and \
opportunities, explains drivers and proposes actions. May estimate trends and simple \
projections, stating assumptions",
        instructions: vec![
            "Prefer clear natural language; include only 2-4 key figures (result, % change, relevant magnitudes). Do not list full series.",
            "Emphasize implications (liquidity, bank concentration, dependence on flows) and actionable recommendations.",
            "State assumptions when projecting (e.g. linear trend, seasonality ignored).",
            "Do not return tables or long numeric lists; summarize and cite only the key periods or banks.",
            "Finish with 1-2 concrete, prioritized actions (brief).",
        ],
        context: join_context(&[
            STYLE_GUIDE,
            contexts.get(ContextKind::BankDetail),
            contexts.get(ContextKind::RichAdvanced),
        ]),
        tool_call_limit: TOOL_CALL_LIMIT,
    }
}

/// Descriptor for a specialist.
pub fn build_agent(specialist: Specialist, contexts: &ContextSet) -> AgentDescriptor {
    match specialist {
        Specialist::Statistical => build_stat_agent(contexts),
        Specialist::Financial => build_fin_agent(contexts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::summarizer::{SummaryCaps, NO_DATA_BANKS, NO_DATA_BASIC};

    fn contexts() -> ContextSet {
        ContextSet::build(&Ledger::empty(), &SummaryCaps::default())
    }

    #[test]
    fn test_agents_bind_their_contexts() {
        let ctx = contexts();
        let stat = build_stat_agent(&ctx);
        assert!(stat.context.starts_with(STYLE_GUIDE));
        assert!(stat.context.contains(NO_DATA_BASIC));
        assert!(!stat.context.contains(NO_DATA_BANKS));

        let fin = build_fin_agent(&ctx);
        assert!(fin.context.starts_with(STYLE_GUIDE));
        assert!(fin.context.contains(NO_DATA_BANKS));
        assert_eq!(fin.tool_call_limit, TOOL_CALL_LIMIT);
    }

    #[test]
    fn test_both_specialists_share_the_style_guide() {
        let ctx = contexts();
        for specialist in [Specialist::Statistical, Specialist::Financial] {
            let prompt = build_agent(specialist, &ctx).system_prompt("");
            assert!(prompt.contains(STYLE_GUIDE), "{}", specialist);
        }
    }

    #[test]
    fn test_system_prompt_lists_tools_and_protocol() {
        let agent = build_fin_agent(&contexts());
        let prompt = agent.system_prompt("- bank_slice({}): slice");
        assert!(prompt.contains("Financial Agent (Descriptive & Predictive)"));
        assert!(prompt.contains("- bank_slice({}): slice"));
        assert!(prompt.contains("```tool"));
        assert!(prompt.contains("at most 4 tools"));
    }
}
