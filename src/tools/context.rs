//! Context blocks exposed as tools, so agents can pull them on demand.

use super::Tool;
use crate::models::{ContextKind, ToolInput, ToolOutput};
use crate::summarizer::ContextSet;
use crate::Result;
use std::sync::Arc;

pub struct ContextTool {
    kind: ContextKind,
    contexts: Arc<ContextSet>,
}

impl ContextTool {
    pub fn new(kind: ContextKind, contexts: Arc<ContextSet>) -> Self {
        Self { kind, contexts }
    }

    pub fn all(contexts: Arc<ContextSet>) -> Vec<Self> {
        ContextKind::ALL
            .iter()
            .map(|kind| Self::new(*kind, contexts.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Tool for ContextTool {
    fn name(&self) -> &'static str {
        match self.kind {
            ContextKind::BasicPeriod => "context_period",
            ContextKind::RichAdvanced => "context_rich",
            ContextKind::BankDetail => "context_bancos",
        }
    }

    fn description(&self) -> &'static str {
        match self.kind {
            ContextKind::BasicPeriod => "Aggregated context by period and company",
            ContextKind::RichAdvanced => {
                "Advanced context with inflows/outflows, variations, totals and bank ranking"
            }
            ContextKind::BankDetail => "Bank context by period, company and bank",
        }
    }

    async fn execute(&self, _input: &ToolInput) -> Result<ToolOutput> {
        Ok(ToolOutput::text(self.contexts.get(self.kind)))
    }
}
