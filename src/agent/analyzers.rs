//! Deterministic specialist analyzers
//!
//! The single-dispatch path answers without a language model: the
//! statistical analyzer describes the numeric columns of the slice the
//! question names, the financial analyzer reports risk flags and a linear
//! projection. Both leave a one-line note in their memory namespace.

use crate::ledger::Ledger;
use crate::memory::{MemoryLog, FIN_NAMESPACE, STAT_NAMESPACE};
use crate::models::{fmt_amount, ContextKind, DiagnosticCategory, NumericColumn, QueryFilters, ToolOutput};
use crate::summarizer::ContextSet;
use crate::tools::capabilities::{no_data, Descriptive, RiskAssessment, NO_PROJECTION};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const RECENT_NOTES: usize = 3;
const CONTEXT_TAIL_LINES: usize = 3;

lazy_static! {
    static ref BANK_CUE: Regex = Regex::new(r"(?i)\b(?:banco|bank)\b\s*:?\s*").unwrap();
    static ref COMPANY_CUE: Regex = Regex::new(r"(?i)\b(?:empresa|company)\b\s*:?\s*").unwrap();
    static ref PERIOD: Regex = Regex::new(r"\b(\d{4})[-/](0[1-9]|1[0-2])\b").unwrap();
    static ref COLUMN_PATTERNS: Vec<(NumericColumn, Regex)> = vec![
        (
            NumericColumn::InitialBalance,
            Regex::new(r"(?i:saldo\s+inicial|initial\s+balance)|\bSI\b").unwrap(),
        ),
        (
            NumericColumn::EndingBalance,
            Regex::new(r"(?i:saldo\s+(?:libros|final)|ending\s+balance)|\bSL\b").unwrap(),
        ),
        (
            NumericColumn::NetMovement,
            Regex::new(r"(?i:movimiento|net\s+movement)|\bMV\b").unwrap(),
        ),
        (
            NumericColumn::Inflow,
            Regex::new(r"(?i:adicion|inflow)|\bAD\b").unwrap(),
        ),
        (
            NumericColumn::Outflow,
            Regex::new(r"(?i:salida|outflow)|\bSAL\b").unwrap(),
        ),
    ];
}

/// Words that end a bank or company name in free text.
const NAME_STOPWORDS: &[&str] = &[
    "en", "de", "del", "para", "por", "y", "o", "con", "durante", "el", "la", "los", "las", "al",
    "in", "of", "for", "and", "or", "with", "during", "the", "on", "at", "from", "to",
];

/// What an analyzer reads for one query.
pub struct AnalysisInput<'a> {
    pub user_text: &'a str,
    pub ledger: &'a Ledger,
    pub contexts: &'a ContextSet,
}

/// Bank, company and `YYYY-MM` filters named in a question.
pub fn extract_filters(text: &str) -> QueryFilters {
    QueryFilters {
        company: extract_name(text, &COMPANY_CUE),
        bank: extract_name(text, &BANK_CUE),
        period: PERIOD
            .captures(text)
            .map(|c| format!("{}-{}", &c[1], &c[2])),
    }
}

fn extract_name(text: &str, cue: &Regex) -> Option<String> {
    let rest = &text[cue.find(text)?.end()..];
    let mut words: Vec<&str> = Vec::new();

    for raw in rest.split_whitespace() {
        let word = raw.trim_end_matches([',', ';', '?', '!', ':', ')']);
        let lower = word.to_lowercase();
        let ends_clause = word.len() != raw.len();

        if words.is_empty() && matches!(lower.as_str(), "de" | "del" | "of" | "the") {
            continue;
        }
        if NAME_STOPWORDS.contains(&lower.as_str()) || PERIOD.is_match(word) {
            break;
        }
        let word = word.trim_end_matches('.');
        if !word.is_empty() {
            words.push(word);
        }
        if ends_clause || raw.ends_with('.') || words.len() >= 4 {
            break;
        }
    }

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Columns the question mentions, in canonical order.
pub fn mentioned_columns(text: &str) -> Vec<NumericColumn> {
    COLUMN_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(column, _)| *column)
        .collect()
}

async fn remember(memory: &MemoryLog, ns: &str, kind: &str, text: String) {
    let mut payload = Map::new();
    payload.insert("type".to_string(), json!(kind));
    payload.insert("text".to_string(), Value::String(text));
    if let Err(e) = memory.append(ns, payload).await {
        warn!(namespace = ns, error = %e, "Failed to append analyzer note");
    }
}

//
// ================= Statistical =================
//

pub struct StatAnalyzer {
    memory: MemoryLog,
}

impl StatAnalyzer {
    pub fn new(memory: MemoryLog) -> Self {
        Self { memory }
    }

    pub async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<ToolOutput> {
        let filters = extract_filters(input.user_text);
        let mentioned = mentioned_columns(input.user_text);
        let present = input.ledger.columns();
        let columns: Vec<NumericColumn> = if mentioned.is_empty() {
            NumericColumn::ALL.iter().copied().filter(|c| present.has(*c)).collect()
        } else {
            mentioned
        };

        debug!(filters = %filters.label(), columns = ?columns, "Statistical analysis");

        let rows: Vec<_> = input.ledger.filtered(&filters).collect();
        let mut lines = Vec::new();
        for column in &columns {
            let values: Vec<f64> = rows.iter().filter_map(|r| column.value(r)).collect();
            if let Some(stats) = Descriptive::from_values(&values) {
                lines.push(format!("{}: {}", column, stats.render()));
            }
        }

        if lines.is_empty() {
            return Ok(no_data("Statistical summary", &filters));
        }

        let label = filters.label();
        let header = if label.is_empty() {
            "Statistical summary (p50, p90, mean, std):".to_string()
        } else {
            format!("Statistical summary (p50, p90, mean, std) {}:", label)
        };

        let previous = match self.memory.recent(STAT_NAMESPACE, RECENT_NOTES).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not read statistical memory");
                Vec::new()
            }
        };

        let note = format!("{} {}", label, lines.join("; ")).trim().to_string();
        remember(&self.memory, STAT_NAMESPACE, "summary", note).await;

        let mut text = format!("{}\n{}", header, lines.join("\n"));
        let recalled: Vec<String> = previous
            .iter()
            .filter_map(|e| e.text())
            .map(|t| format!("[mem] {}", t))
            .collect();
        if !recalled.is_empty() {
            text.push_str("\n\n");
            text.push_str(&recalled.join("\n"));
        }

        Ok(ToolOutput::text(text))
    }
}

//
// ================= Financial =================
//

pub struct FinAnalyzer {
    memory: MemoryLog,
}

impl FinAnalyzer {
    pub fn new(memory: MemoryLog) -> Self {
        Self { memory }
    }

    pub async fn analyze(&self, input: &AnalysisInput<'_>) -> Result<ToolOutput> {
        // projections need the whole series, so a named period is not applied
        let filters = QueryFilters {
            period: None,
            ..extract_filters(input.user_text)
        };
        let label = filters.label();
        let header = if label.is_empty() {
            "Financial analyst:".to_string()
        } else {
            format!("Financial analyst {}:", label)
        };

        let mut lines = vec![header];
        let mut category = None;

        match RiskAssessment::assess(input.ledger, &filters) {
            None => {
                lines.push(no_data("Risk flags", &filters).text);
                lines.push(format!("{} (insufficient data).", NO_PROJECTION));
                category = Some(DiagnosticCategory::NoData);
            }
            Some(risk) => {
                lines.push("Risk flags:".to_string());
                if risk.liquidity_pressure {
                    lines.push("- Net outflows dominate, possible liquidity pressure.".to_string());
                }
                if risk.mom_declines >= 2 {
                    lines.push("- Several consecutive drops in ending balance, review flows.".to_string());
                }
                if !risk.liquidity_pressure && risk.mom_declines < 2 {
                    lines.push("- No relevant flags.".to_string());
                }
                match risk.projection {
                    Some(next) => lines.push(format!(
                        "Projected SL next period (simple linear): {}",
                        fmt_amount(next)
                    )),
                    None => {
                        lines.push(format!("{} (could not fit a trend).", NO_PROJECTION));
                        category = Some(DiagnosticCategory::ProjectionUnavailable);
                    }
                }
            }
        }

        let note = lines[1..].join(" ");
        remember(&self.memory, FIN_NAMESPACE, "analysis", note).await;

        let mut snippets = Vec::new();
        for kind in ContextKind::ALL {
            if let Some(block) = input.contexts.block(kind) {
                let tail = block.tail(CONTEXT_TAIL_LINES);
                if !tail.is_empty() {
                    snippets.push(format!("[{}]\n{}", kind.key(), tail.join("\n")));
                }
            }
        }

        let mut text = lines.join("\n");
        if !snippets.is_empty() {
            text.push_str("\n\nRecent context:\n");
            text.push_str(&snippets.join("\n\n"));
        }

        Ok(ToolOutput { text, category })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NormalizerConfig;
    use crate::summarizer::SummaryCaps;
    use crate::test_support::sample_snapshot;

    fn ledger() -> Ledger {
        Ledger::from_snapshot(Some(&sample_snapshot()), &NormalizerConfig::default()).unwrap()
    }

    #[test]
    fn test_extract_filters_from_question() {
        let f = extract_filters("promedio de movimientos del banco X en 2024-01");
        assert_eq!(f.bank.as_deref(), Some("X"));
        assert_eq!(f.period.as_deref(), Some("2024-01"));
        assert_eq!(f.company, None);

        let f = extract_filters("saldo del banco: Industrial, empresa Acme SA durante 2023/12?");
        assert_eq!(f.bank.as_deref(), Some("Industrial"));
        assert_eq!(f.company.as_deref(), Some("Acme SA"));
        assert_eq!(f.period.as_deref(), Some("2023-12"));
    }

    #[test]
    fn test_extract_filters_ignores_plural_and_bare_cue() {
        let f = extract_filters("ranking de bancos por saldo");
        assert_eq!(f.bank, None);
        let f = extract_filters("which bank?");
        assert_eq!(f.bank, None);
    }

    #[test]
    fn test_mentioned_columns() {
        assert_eq!(mentioned_columns("promedio de movimientos"), vec![NumericColumn::NetMovement]);
        assert_eq!(
            mentioned_columns("saldo inicial y salidas"),
            vec![NumericColumn::InitialBalance, NumericColumn::Outflow]
        );
        assert!(mentioned_columns("si puedes, dime algo").is_empty());
    }

    #[tokio::test]
    async fn test_stat_analyzer_reports_and_recalls() {
        let ledger = ledger();
        let contexts = ContextSet::build(&ledger, &SummaryCaps::default());
        let analyzer = StatAnalyzer::new(MemoryLog::in_memory());
        let input = AnalysisInput {
            user_text: "promedio de movimientos del banco X en 2024-01",
            ledger: &ledger,
            contexts: &contexts,
        };

        let first = analyzer.analyze(&input).await.unwrap();
        assert_eq!(
            first.text,
            "Statistical summary (p50, p90, mean, std) [bank=X | period=2024-01]:\nnet_movement: p50=15.00, p90=43.00, mean=15.00, std=49.50 (n=2)"
        );

        let second = analyzer.analyze(&input).await.unwrap();
        assert!(second.text.contains("\n\n[mem] [bank=X | period=2024-01] net_movement: p50=15.00"));
    }

    #[tokio::test]
    async fn test_stat_analyzer_without_matches_is_no_data() {
        let ledger = ledger();
        let contexts = ContextSet::build(&ledger, &SummaryCaps::default());
        let analyzer = StatAnalyzer::new(MemoryLog::in_memory());
        let out = analyzer
            .analyze(&AnalysisInput {
                user_text: "mediana del banco Z",
                ledger: &ledger,
                contexts: &contexts,
            })
            .await
            .unwrap();
        assert_eq!(out.category, Some(DiagnosticCategory::NoData));
    }

    #[tokio::test]
    async fn test_fin_analyzer_flags_and_context_tail() {
        let ledger = ledger();
        let contexts = ContextSet::build(&ledger, &SummaryCaps::default());
        let memory = MemoryLog::in_memory();
        let analyzer = FinAnalyzer::new(memory.clone());
        let out = analyzer
            .analyze(&AnalysisInput {
                user_text: "riesgo de liquidez de la empresa Beta",
                ledger: &ledger,
                contexts: &contexts,
            })
            .await
            .unwrap();

        assert!(out.text.starts_with("Financial analyst [company=Beta]:"));
        assert!(out.text.contains("- Net outflows dominate"));
        assert!(out.text.contains("Projected SL next period (simple linear):"));
        assert!(out.text.contains("[period_basic]\n"));
        assert!(out.text.contains("[bancos]\n"));
        assert_eq!(memory.recent(FIN_NAMESPACE, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fin_analyzer_on_empty_ledger() {
        let ledger = Ledger::empty();
        let contexts = ContextSet::build(&ledger, &SummaryCaps::default());
        let analyzer = FinAnalyzer::new(MemoryLog::in_memory());
        let out = analyzer
            .analyze(&AnalysisInput {
                user_text: "proyección del saldo",
                ledger: &ledger,
                contexts: &contexts,
            })
            .await
            .unwrap();
        assert_eq!(out.category, Some(DiagnosticCategory::NoData));
        assert!(out.text.contains(NO_PROJECTION));
    }
}
