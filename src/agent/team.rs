//! Coordinated multi-agent mode
//!
//! The coordinator asks the model which specialists to involve, runs each
//! one in a bounded tool loop, hands earlier members' notes to later ones
//! and merges the answers with a final model call.

use super::{build_agent, AgentDescriptor, STYLE_GUIDE};
use crate::classifier::IntentClassifier;
use crate::llm::{GenerationSettings, LanguageModel, TokenUsage};
use crate::models::{ChatMessage, Specialist, ToolInput};
use crate::summarizer::ContextSet;
use crate::tools::ToolRegistry;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Label when the team could not run; a finished run names its members.
pub const TEAM_LABEL: &str = "team(stat+fin)";

lazy_static! {
    static ref TOOL_BLOCK: Regex = Regex::new(r"(?s)```tool\s*(.*?)```").unwrap();
}

/// One member's final answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberOutput {
    pub specialist: Specialist,
    pub agent_name: String,
    pub text: String,
    pub tool_calls: usize,
}

/// Explicit result of a coordinated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamOutcome {
    pub members: Vec<MemberOutput>,
    pub merged_text: String,
    /// The merge call failed and member answers were concatenated.
    pub merge_fallback: bool,
    pub usage: TokenUsage,
}

impl TeamOutcome {
    /// `team(stat)`, `team(fin)` or `team(stat+fin)`, from the members that answered.
    pub fn label(&self) -> String {
        let answered: Vec<&str> = [Specialist::Statistical, Specialist::Financial]
            .into_iter()
            .filter(|s| self.members.iter().any(|m| m.specialist == *s))
            .map(Specialist::label)
            .collect();
        format!("team({})", answered.join("+"))
    }
}

#[derive(Debug, Deserialize)]
struct MemberSelection {
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ToolRequest {
    tool: String,
    #[serde(default)]
    args: Value,
}

pub struct TeamCoordinator<'a> {
    model: &'a dyn LanguageModel,
    registry: &'a ToolRegistry,
    contexts: &'a ContextSet,
    settings: &'a GenerationSettings,
}

impl<'a> TeamCoordinator<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        registry: &'a ToolRegistry,
        contexts: &'a ContextSet,
        settings: &'a GenerationSettings,
    ) -> Self {
        Self {
            model,
            registry,
            contexts,
            settings,
        }
    }

    pub async fn run(&self, user_text: &str) -> Result<TeamOutcome> {
        let mut usage = TokenUsage::default();

        let selected = self.select_members(user_text, &mut usage).await?;
        info!(members = ?selected, "Team members selected");

        let mut members: Vec<MemberOutput> = Vec::with_capacity(selected.len());
        for specialist in selected {
            let agent = build_agent(specialist, self.contexts);
            let output = self.run_member(&agent, user_text, &members, &mut usage).await?;
            members.push(output);
        }

        let (merged_text, merge_fallback) = if members.len() == 1 {
            (members[0].text.clone(), false)
        } else {
            self.merge(user_text, &members, &mut usage).await
        };

        Ok(TeamOutcome {
            members,
            merged_text,
            merge_fallback,
            usage,
        })
    }

    /// Ask the model for `{"members": [...]}`; anything unusable falls back to the classifier.
    async fn select_members(&self, user_text: &str, usage: &mut TokenUsage) -> Result<Vec<Specialist>> {
        let messages = vec![
            ChatMessage::system(
                "You coordinate a team of cash-position analysts:\n\
- stat: statistical analyst (exact figures, percentiles, averages, dispersion)\n\
- fin: financial analyst (risk, liquidity, trends, projections, recommendations)\n\
Decide which members should work on the question, in order. \
Reply with JSON only, e.g. {\"members\": [\"stat\", \"fin\"]}.",
            ),
            ChatMessage::user(user_text),
        ];
        let completion = self.settings.complete(self.model, messages).await?;
        usage.add(completion.usage);

        let selected = parse_selection(&completion.text);
        if selected.is_empty() {
            let fallback = IntentClassifier::classify(user_text);
            debug!(reply = %completion.text, fallback = %fallback, "Unusable member selection");
            Ok(vec![fallback])
        } else {
            Ok(selected)
        }
    }

    async fn run_member(
        &self,
        agent: &AgentDescriptor,
        user_text: &str,
        earlier: &[MemberOutput],
        usage: &mut TokenUsage,
    ) -> Result<MemberOutput> {
        let mut messages = vec![ChatMessage::system(agent.system_prompt(&self.registry.catalog()))];
        if !earlier.is_empty() {
            let notes = earlier
                .iter()
                .map(|m| format!("[{}]\n{}", m.agent_name, m.text))
                .collect::<Vec<_>>()
                .join("\n\n");
            messages.push(ChatMessage::system(format!("Notes from earlier team members:\n{}", notes)));
        }
        messages.push(ChatMessage::user(user_text));

        let mut tool_calls = 0usize;
        loop {
            let completion = self.settings.complete(self.model, messages.clone()).await?;
            usage.add(completion.usage);
            let reply = completion.text;

            let Some(raw_request) = extract_tool_block(&reply) else {
                return Ok(self.member_output(agent, reply, tool_calls));
            };

            if tool_calls >= agent.tool_call_limit {
                debug!(agent = agent.name, "Tool limit reached, forcing final answer");
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(
                    "Tool limit reached. Give your final answer now, without tool blocks.",
                ));
                let completion = self.settings.complete(self.model, messages).await?;
                usage.add(completion.usage);
                let text = strip_tool_blocks(&completion.text);
                return Ok(self.member_output(agent, text, tool_calls));
            }

            tool_calls += 1;
            let result = match serde_json::from_str::<ToolRequest>(raw_request.trim()) {
                Ok(request) => {
                    debug!(agent = agent.name, tool = %request.tool, "Member tool call");
                    let output = self
                        .registry
                        .invoke(&ToolInput {
                            tool_name: request.tool.clone(),
                            parameters: request.args,
                        })
                        .await;
                    format!("Tool result ({}):\n{}", request.tool, output.text)
                }
                Err(e) => format!("Tool request could not be parsed: {}", e),
            };

            messages.push(ChatMessage::assistant(reply));
            messages.push(ChatMessage::user(result));
        }
    }

    fn member_output(&self, agent: &AgentDescriptor, text: String, tool_calls: usize) -> MemberOutput {
        MemberOutput {
            specialist: agent.specialist,
            agent_name: agent.name.to_string(),
            text: text.trim().to_string(),
            tool_calls,
        }
    }

    /// One merge call; on failure the answers are concatenated in member order.
    async fn merge(&self, user_text: &str, members: &[MemberOutput], usage: &mut TokenUsage) -> (String, bool) {
        let answers = members
            .iter()
            .map(|m| format!("[{}]\n{}", m.agent_name, m.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages = vec![
            ChatMessage::system(format!(
                "You merge the answers of specialist analysts into one final answer to the user's question. \
Resolve overlaps, keep the figures consistent and do not invent data.\n\n{}",
                STYLE_GUIDE
            )),
            ChatMessage::user(format!("Question: {}\n\nSpecialist answers:\n{}", user_text, answers)),
        ];

        match self.settings.complete(self.model, messages).await {
            Ok(completion) => {
                usage.add(completion.usage);
                (completion.text.trim().to_string(), false)
            }
            Err(e) => {
                warn!(error = %e, "Merge call failed, concatenating member answers");
                let joined = members
                    .iter()
                    .map(|m| m.text.as_str())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (joined, true)
            }
        }
    }
}

fn parse_selection(reply: &str) -> Vec<Specialist> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return vec![];
    };
    if end < start {
        return vec![];
    }
    let Ok(selection) = serde_json::from_str::<MemberSelection>(&reply[start..=end]) else {
        return vec![];
    };

    let mut out = Vec::new();
    for label in selection.members {
        if let Some(specialist) = Specialist::from_label(&label) {
            if !out.contains(&specialist) {
                out.push(specialist);
            }
        }
    }
    out
}

fn extract_tool_block(reply: &str) -> Option<&str> {
    TOOL_BLOCK
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn strip_tool_blocks(reply: &str) -> String {
    TOOL_BLOCK.replace_all(reply, "").trim().to_string()
}
