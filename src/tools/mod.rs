//! Tool trait and registry
//!
//! Tools are deterministic, side-effect-free reads over one query's ledger
//! and context blocks. A registry is built per query and dropped with it.

pub mod capabilities;
pub mod context;

use crate::error::OrchestrationError;
use crate::ledger::Ledger;
use crate::models::{DiagnosticCategory, ToolInput, ToolOutput};
use crate::summarizer::ContextSet;
use crate::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub use capabilities::{
    BankSliceTool, FinRiskProjectionTool, LatestPeriodKpisTool, StatSummaryTool,
    TopBanksConcentrationTool,
};
pub use context::ContextTool;

/// Trait for a single tool (deterministic execution)
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Parameter synopsis shown to the model, e.g. `{"bank"?: string}`.
    fn parameters(&self) -> &'static str {
        "{}"
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// One line per tool: `- name(params): description`.
    pub fn catalog(&self) -> String {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| format!("- {}({}): {}", tool.name(), tool.parameters(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run a tool. Unknown names and tool errors come back as diagnostic text.
    pub async fn invoke(&self, input: &ToolInput) -> ToolOutput {
        let Some(tool) = self.get(&input.tool_name) else {
            warn!(tool = %input.tool_name, "Unknown tool requested");
            return ToolOutput::diagnostic(
                DiagnosticCategory::AnalysisFailure,
                format!(
                    "unknown tool '{}'; available: {}",
                    input.tool_name,
                    self.list().join(", ")
                ),
            );
        };

        match tool.execute(input).await {
            Ok(output) => {
                debug!(tool = %input.tool_name, category = ?output.category, "Tool executed");
                output
            }
            Err(e) => {
                warn!(tool = %input.tool_name, error = %e, "Tool failed");
                ToolOutput::diagnostic(
                    DiagnosticCategory::AnalysisFailure,
                    format!("{} could not run: {}", input.tool_name, e),
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode tool parameters. `null` means "no arguments".
pub(crate) fn parse_args<T>(input: &ToolInput) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match &input.parameters {
        Value::Null => Ok(T::default()),
        Value::Object(_) => serde_json::from_value(input.parameters.clone()).map_err(|e| {
            OrchestrationError::InvalidToolInput(format!("bad parameters for {}: {}", input.tool_name, e))
        }),
        _ => Err(OrchestrationError::InvalidToolInput(
            "tool parameters must be a JSON object".to_string(),
        )),
    }
}

/// Registry with every capability and context tool bound to this query's data.
pub fn create_query_registry(ledger: Arc<Ledger>, contexts: Arc<ContextSet>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(StatSummaryTool::new(ledger.clone())));
    registry.register(Arc::new(BankSliceTool::new(ledger.clone())));
    registry.register(Arc::new(LatestPeriodKpisTool::new(ledger.clone())));
    registry.register(Arc::new(TopBanksConcentrationTool::new(ledger.clone())));
    registry.register(Arc::new(FinRiskProjectionTool::new(ledger)));

    for tool in ContextTool::all(contexts) {
        registry.register(Arc::new(tool));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NormalizerConfig;
    use crate::summarizer::SummaryCaps;
    use crate::test_support::sample_snapshot;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let ledger = Ledger::from_snapshot(Some(&sample_snapshot()), &NormalizerConfig::default()).unwrap();
        let contexts = ContextSet::build(&ledger, &SummaryCaps::default());
        create_query_registry(Arc::new(ledger), Arc::new(contexts))
    }

    #[test]
    fn test_registry_lists_all_tools() {
        let registry = registry();
        assert_eq!(
            registry.list(),
            vec![
                "bank_slice",
                "context_bancos",
                "context_period",
                "context_rich",
                "fin_risk_projection",
                "latest_period_kpis",
                "stat_summary",
                "top_banks_concentration",
            ]
        );
        assert!(registry.catalog().contains("- stat_summary("));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_diagnostic() {
        let output = registry()
            .invoke(&ToolInput {
                tool_name: "drop_tables".to_string(),
                parameters: json!({}),
            })
            .await;
        assert_eq!(output.category, Some(DiagnosticCategory::AnalysisFailure));
        assert!(output.text.contains("unknown tool"));
    }

    #[test]
    fn test_spanish_argument_aliases() {
        let output = tokio_test::block_on(registry().invoke(&ToolInput {
            tool_name: "stat_summary".to_string(),
            parameters: json!({"banco": "X", "periodo": "2024-01"}),
        }));
        assert_eq!(output.category, None);
        assert!(output.text.contains("p50=15.00"), "{}", output.text);
    }

    #[tokio::test]
    async fn test_non_object_parameters_are_a_diagnostic() {
        let output = registry()
            .invoke(&ToolInput {
                tool_name: "bank_slice".to_string(),
                parameters: json!([1, 2, 3]),
            })
            .await;
        assert_eq!(output.category, Some(DiagnosticCategory::AnalysisFailure));
        assert!(output.text.contains("must be a JSON object"));
    }
}
