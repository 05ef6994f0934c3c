//! Query orchestrator - one pass per question
//!
//! NORMALIZE → SUMMARIZE → BUILD CAPABILITIES → DISPATCH → SYNTHESIZE → REMEMBER

use crate::config::OrchestratorConfig;
use crate::dispatch::{DispatchContext, DispatchOutcome, Dispatcher};
use crate::ledger::Ledger;
use crate::llm::{GenerationSettings, LanguageModel, OpenAiChatClient};
use crate::memory::{MemoryLog, QUERY_NAMESPACE};
use crate::models::{QueryRequest, QueryResponse};
use crate::summarizer::ContextSet;
use crate::synthesizer::synthesize;
use crate::tools::create_query_registry;
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Orchestrator {
    config: OrchestratorConfig,
    model: Arc<dyn LanguageModel>,
    memory: MemoryLog,
    settings: GenerationSettings,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, model: Arc<dyn LanguageModel>, memory: MemoryLog) -> Self {
        let settings = GenerationSettings::from(&config.llm);
        Self {
            config,
            model,
            memory,
            settings,
        }
    }

    /// Production wiring: OpenAI-compatible client and the configured memory log.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatClient::new(&config.llm)?);
        let memory = MemoryLog::from_path(config.memory_path.as_deref());
        Ok(Self::new(config, model, memory))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryLog {
        &self.memory
    }

    /// Answer one question. Only a malformed snapshot is an `Err`; every
    /// other failure comes back as diagnostic text with its category.
    pub async fn handle_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let start_time = Instant::now();
        let query_id = Uuid::new_v4();
        let mode = request.mode.unwrap_or(self.config.default_mode);

        info!(
            query_id = %query_id,
            mode = ?mode,
            question = %request.user_text,
            "Orchestrator: handling query"
        );

        // === NORMALIZE ===
        let ledger = Arc::new(Ledger::from_snapshot(
            request.data_snapshot.as_ref(),
            &self.config.normalizer,
        )?);

        // === SUMMARIZE ===
        let mut contexts = ContextSet::build(&ledger, &self.config.caps);
        if let Some(overrides) = &request.contexts {
            contexts = contexts.with_overrides(overrides);
        }
        let contexts = Arc::new(contexts);
        debug!(
            query_id = %query_id,
            rows = ledger.len(),
            fingerprint = %contexts.fingerprint(),
            "Contexts ready"
        );

        // === BUILD CAPABILITIES ===
        let registry = create_query_registry(ledger.clone(), contexts.clone());

        // === DISPATCH ===
        let dispatcher = Dispatcher::new(self.model.as_ref(), &self.memory, &self.settings);
        let outcome = dispatcher
            .dispatch(
                mode,
                &DispatchContext {
                    user_text: &request.user_text,
                    history: &request.history,
                    ledger: &ledger,
                    contexts: &contexts,
                    registry: &registry,
                },
            )
            .await;

        // === SYNTHESIZE ===
        let result_text = if self.should_synthesize(&outcome) {
            synthesize(outcome.text(), &self.config.synthesis)
        } else {
            outcome.text().to_string()
        };

        let response = QueryResponse {
            query_id,
            agent_label: outcome.label(),
            result_text,
            diagnostic: outcome.category(),
        };

        // === REMEMBER ===
        self.remember(&request, &response).await;

        info!(
            query_id = %query_id,
            agent = %response.agent_label,
            diagnostic = ?response.diagnostic,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Orchestrator: query complete"
        );

        Ok(response)
    }

    fn should_synthesize(&self, outcome: &DispatchOutcome) -> bool {
        match outcome {
            DispatchOutcome::Team(_) | DispatchOutcome::Chat { .. } => true,
            DispatchOutcome::Specialist { .. } => self.config.synthesis.apply_to_single_dispatch,
            DispatchOutcome::Diagnostic { .. } => false,
        }
    }

    /// Failures are logged and swallowed.
    async fn remember(&self, request: &QueryRequest, response: &QueryResponse) {
        let mut payload = Map::new();
        payload.insert("query_id".into(), json!(response.query_id));
        payload.insert("agent".into(), json!(response.agent_label));
        payload.insert("text".into(), Value::String(request.user_text.clone()));
        payload.insert("answer".into(), Value::String(response.result_text.clone()));

        if let Err(e) = self.memory.append(QUERY_NAMESPACE, payload).await {
            warn!(query_id = %response.query_id, error = %e, "Failed to record query in memory log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::llm::ScriptedModel;
    use crate::memory::STAT_NAMESPACE;
    use crate::models::{DiagnosticCategory, DispatchMode};
    use crate::synthesizer::{count_numbers, split_sentences};
    use crate::test_support::sample_snapshot;
    use std::collections::HashMap;

    fn orchestrator(model: ScriptedModel) -> Orchestrator {
        Orchestrator::new(OrchestratorConfig::default(), Arc::new(model), MemoryLog::in_memory())
    }

    #[tokio::test]
    async fn test_end_to_end_statistical_query() {
        let orch = orchestrator(ScriptedModel::default());
        let request = QueryRequest::new("promedio de movimientos del banco X en 2024-01")
            .with_snapshot(sample_snapshot());

        let response = orch.handle_query(request).await.unwrap();

        assert_eq!(response.agent_label, "stat");
        assert_eq!(response.diagnostic, None);
        assert!(
            response
                .result_text
                .contains("net_movement: p50=15.00, p90=43.00, mean=15.00, std=49.50 (n=2)"),
            "{}",
            response.result_text
        );
        assert!(!response.result_text.contains("999999"));

        let stat_notes = orch.memory().recent(STAT_NAMESPACE, 10).await.unwrap();
        assert_eq!(stat_notes.len(), 1);
        let queries = orch.memory().recent(QUERY_NAMESPACE, 10).await.unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text(), Some("promedio de movimientos del banco X en 2024-01"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_reports_no_data() {
        let orch = orchestrator(ScriptedModel::default());
        let response = orch
            .handle_query(QueryRequest::new("mediana del saldo"))
            .await
            .unwrap();
        assert_eq!(response.agent_label, "stat");
        assert_eq!(response.diagnostic, Some(DiagnosticCategory::NoData));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_an_error() {
        let orch = orchestrator(ScriptedModel::default());
        let request = QueryRequest::new("promedio").with_snapshot(json!(42));
        let err = orch.handle_query(request).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn test_chat_output_is_synthesized() {
        let draft = "1. Banco X sube 12.5% a 1,250.00.\nEl saldo subió 10% en 2024-02 y 15% en 2024-03 con 300 y 400 de entrada. Otra frase. Más texto aquí.";
        let model = Arc::new(ScriptedModel::texts([draft]));
        let orch = Orchestrator::new(OrchestratorConfig::default(), model.clone(), MemoryLog::in_memory());
        let request = QueryRequest::new("¿cómo evolucionó el saldo?")
            .with_snapshot(sample_snapshot())
            .with_mode(DispatchMode::Chat);

        let response = orch.handle_query(request).await.unwrap();
        assert_eq!(response.agent_label, "chat");
        assert!(count_numbers(&response.result_text) <= 4, "{}", response.result_text);
        assert!(split_sentences(&response.result_text).len() <= 6);
        assert!(!response.result_text.contains("1,250.00"));
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_context_overrides_reach_the_model() {
        let model = Arc::new(ScriptedModel::texts(["Se recomienda revisar."]));
        let orch = Orchestrator::new(OrchestratorConfig::default(), model.clone(), MemoryLog::in_memory());
        let mut contexts = HashMap::new();
        contexts.insert("bancos".to_string(), "precomputed bank block".to_string());
        let mut request = QueryRequest::new("hola").with_mode(DispatchMode::Chat);
        request.contexts = Some(contexts);

        orch.handle_query(request).await.unwrap();
        let request = &model.requests()[0];
        assert!(request.messages[3].content.ends_with("precomputed bank block"));
    }
}
