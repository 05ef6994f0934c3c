//! Context summarization
//!
//! Reduces a cleaned [`Ledger`] into capped text blocks that ground every
//! agent call of a query. Output is a pure function of (ledger, caps): the
//! same input always yields byte-identical text.

use crate::ledger::Ledger;
use crate::models::{fmt_amount, AggregateSlice, ContextKind, Period};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

pub const NO_DATA_BASIC: &str = "No data available.";
pub const NO_DATA_RICH: &str = "Advanced context: no data available.";
pub const NO_DATA_BANKS: &str = "No bank data available.";

/// Hard caps bounding the size of each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryCaps {
    /// Basic and bank-detail reducers keep at most this many groups.
    pub max_rows: usize,
    /// Rich reducer keeps the latest N periods.
    pub max_periods: usize,
    /// Rich reducer ranks and keeps the top N banks.
    pub top_banks: usize,
    /// Rich reducer keeps at most the last N lines.
    pub max_lines: usize,
}

impl Default for SummaryCaps {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            max_periods: 12,
            top_banks: 6,
            max_lines: 1500,
        }
    }
}

/// An immutable summary text tagged with its granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub kind: ContextKind,
    pub text: String,
}

impl ContextBlock {
    pub fn new(kind: ContextKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// SHA-256 of the block text, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.text.as_bytes()))
    }

    /// Last `n` lines, used for short grounding snippets.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let lines: Vec<&str> = self.text.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].to_vec()
    }
}

/// The blocks built for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSet {
    blocks: BTreeMap<ContextKind, ContextBlock>,
}

impl ContextSet {
    pub fn build(ledger: &Ledger, caps: &SummaryCaps) -> Self {
        ContextSummarizer::new(*caps).summarize(ledger)
    }

    /// Replace computed blocks with caller-provided ones (unknown keys are ignored).
    /// When an alias and the canonical key name the same block, the canonical key wins.
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        let mut entries: Vec<(&String, &String)> = overrides.iter().collect();
        entries.sort_by(|a, b| (is_canonical_key(a.0), a.0).cmp(&(is_canonical_key(b.0), b.0)));

        for (key, text) in entries {
            match ContextKind::from_key(key) {
                Some(kind) if !text.trim().is_empty() => {
                    self.blocks.insert(kind, ContextBlock::new(kind, text.clone()));
                }
                Some(_) => {}
                None => debug!(key = %key, "Ignoring unknown context key"),
            }
        }
        self
    }

    pub fn get(&self, kind: ContextKind) -> &str {
        self.blocks.get(&kind).map(|b| b.text.as_str()).unwrap_or("")
    }

    pub fn block(&self, kind: ContextKind) -> Option<&ContextBlock> {
        self.blocks.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextBlock> {
        self.blocks.values()
    }

    /// Combined fingerprint over all blocks in kind order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for block in self.blocks.values() {
            hasher.update(block.kind.key().as_bytes());
            hasher.update([0u8]);
            hasher.update(block.text.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

fn is_canonical_key(key: &str) -> bool {
    ContextKind::from_key(key).is_some_and(|kind| kind.key() == key.trim().to_lowercase())
}

/// Builds the three context reducers under one set of caps.
pub struct ContextSummarizer {
    caps: SummaryCaps,
}

impl ContextSummarizer {
    pub fn new(caps: SummaryCaps) -> Self {
        Self { caps }
    }

    pub fn summarize(&self, ledger: &Ledger) -> ContextSet {
        let mut blocks = BTreeMap::new();
        blocks.insert(
            ContextKind::BasicPeriod,
            ContextBlock::new(ContextKind::BasicPeriod, self.basic(ledger)),
        );
        blocks.insert(
            ContextKind::RichAdvanced,
            ContextBlock::new(ContextKind::RichAdvanced, self.rich(ledger)),
        );
        blocks.insert(
            ContextKind::BankDetail,
            ContextBlock::new(ContextKind::BankDetail, self.bank_detail(ledger)),
        );
        ContextSet { blocks }
    }

    /// Period + company totals: `period | company | SI | SL | MV`.
    pub fn basic(&self, ledger: &Ledger) -> String {
        let mut groups: BTreeMap<(Period, &str), AggregateSlice> = BTreeMap::new();
        for row in ledger.rows() {
            if let (Some(period), Some(company)) = (row.period, row.company.as_deref()) {
                groups.entry((period, company)).or_default().add(row);
            }
        }

        if groups.is_empty() {
            return NO_DATA_BASIC.to_string();
        }

        let skip = groups.len().saturating_sub(self.caps.max_rows);
        let mut lines = vec!["Summary by period and company (latest records):".to_string()];
        for ((period, company), agg) in groups.iter().skip(skip) {
            lines.push(format!(
                "{} | {} | SI={} | SL={} | MV={}",
                period,
                company,
                fmt_amount(agg.initial_balance),
                fmt_amount(agg.ending_balance),
                fmt_amount(agg.net_movement)
            ));
        }
        lines.join("\n")
    }

    /// Global totals, the latest per-period series and a top-bank ranking.
    pub fn rich(&self, ledger: &Ledger) -> String {
        let dated: Vec<_> = ledger.rows().iter().filter(|r| r.period.is_some()).collect();
        if dated.is_empty() {
            return NO_DATA_RICH.to_string();
        }

        let mut series: BTreeMap<Period, AggregateSlice> = BTreeMap::new();
        for row in &dated {
            if let Some(period) = row.period {
                series.entry(period).or_default().add(row);
            }
        }

        let totals = AggregateSlice::from_rows(dated.iter().copied());
        let date_min = dated.iter().filter_map(|r| r.date).min();
        let date_max = dated.iter().filter_map(|r| r.date).max();
        let companies: BTreeSet<&str> = dated.iter().filter_map(|r| r.company.as_deref()).collect();
        let banks_count = if ledger.columns().bank {
            dated
                .iter()
                .filter_map(|r| r.bank.as_deref())
                .collect::<BTreeSet<_>>()
                .len()
                .to_string()
        } else {
            "N/A".to_string()
        };
        let last_sl = series.values().next_back().map(|a| a.ending_balance).unwrap_or(0.0);

        let mut lines: Vec<String> = Vec::new();
        lines.push("Advanced context (additional aggregates):".to_string());
        lines.push(format!(
            "Global | Dates: {} to {} | Companies: {} | Banks: {}",
            date_min.map(|d| d.to_string()).unwrap_or_else(|| "N/A".into()),
            date_max.map(|d| d.to_string()).unwrap_or_else(|| "N/A".into()),
            companies.len(),
            banks_count
        ));
        lines.push(format!(
            "Totals -> SI={} | MV={} (AD={}, SAL={}) | SL_last={}",
            fmt_amount(totals.initial_balance),
            fmt_amount(totals.net_movement),
            fmt_amount(totals.inflow),
            fmt_amount(totals.outflow),
            fmt_amount(last_sl)
        ));

        lines.push("Series by period (latest records):".to_string());
        let mut previous_sl: Option<f64> = None;
        let mut period_lines = Vec::with_capacity(series.len());
        for (period, agg) in &series {
            let mom = previous_sl.map(|prev| agg.ending_balance - prev).unwrap_or(0.0);
            previous_sl = Some(agg.ending_balance);

            let mut line = format!(
                "{} | SI={} | MV={} (AD={}, SAL={}) | SL={} | Var(SI->SL)={}",
                period,
                fmt_amount(agg.initial_balance),
                fmt_amount(agg.net_movement),
                fmt_amount(agg.inflow),
                fmt_amount(agg.outflow),
                fmt_amount(agg.ending_balance),
                fmt_amount(agg.ending_balance - agg.initial_balance)
            );
            if let Some(pct) = agg.variation_pct() {
                line.push_str(&format!(" | Var%={}%", fmt_amount(pct)));
            }
            line.push_str(&format!(" | VarMoM(SL)={}", fmt_amount(mom)));
            period_lines.push(line);
        }
        let skip = period_lines.len().saturating_sub(self.caps.max_periods);
        lines.extend(period_lines.into_iter().skip(skip));

        let bank_lines = self.bank_ranking(ledger);
        if !bank_lines.is_empty() {
            lines.push("Banks (top by latest SL):".to_string());
            lines.extend(bank_lines);
        }

        let skip = lines.len().saturating_sub(self.caps.max_lines);
        lines[skip..].join("\n")
    }

    fn bank_ranking(&self, ledger: &Ledger) -> Vec<String> {
        if !ledger.columns().bank {
            return vec![];
        }

        let mut per_bank: BTreeMap<&str, BTreeMap<Period, AggregateSlice>> = BTreeMap::new();
        for row in ledger.rows() {
            if let (Some(bank), Some(period)) = (row.bank.as_deref(), row.period) {
                per_bank
                    .entry(bank)
                    .or_default()
                    .entry(period)
                    .or_default()
                    .add(row);
            }
        }

        struct BankInfo<'a> {
            bank: &'a str,
            first: Period,
            last: Period,
            sl_first: f64,
            sl_last: f64,
            totals: AggregateSlice,
        }

        let mut infos: Vec<BankInfo> = per_bank
            .iter()
            .filter_map(|(bank, series)| {
                let (first, first_agg) = series.iter().next()?;
                let (last, last_agg) = series.iter().next_back()?;
                let mut totals = AggregateSlice::default();
                for agg in series.values() {
                    totals.initial_balance += agg.initial_balance;
                    totals.net_movement += agg.net_movement;
                    totals.inflow += agg.inflow;
                    totals.outflow += agg.outflow;
                }
                Some(BankInfo {
                    bank,
                    first: *first,
                    last: *last,
                    sl_first: first_agg.ending_balance,
                    sl_last: last_agg.ending_balance,
                    totals,
                })
            })
            .collect();

        // Stable sort keeps bank-name order among equal balances.
        infos.sort_by(|a, b| b.sl_last.total_cmp(&a.sl_last));

        infos
            .iter()
            .take(self.caps.top_banks)
            .map(|info| {
                format!(
                    "{}: SI_total={} | MV_total={} (AD={}, SAL={}) | SL_last={} | Var_SL_total={} [{} -> {}]",
                    info.bank,
                    fmt_amount(info.totals.initial_balance),
                    fmt_amount(info.totals.net_movement),
                    fmt_amount(info.totals.inflow),
                    fmt_amount(info.totals.outflow),
                    fmt_amount(info.sl_last),
                    fmt_amount(info.sl_last - info.sl_first),
                    info.first,
                    info.last
                )
            })
            .collect()
    }

    /// Period + company + bank detail with variation %.
    pub fn bank_detail(&self, ledger: &Ledger) -> String {
        if !ledger.columns().bank {
            return NO_DATA_BANKS.to_string();
        }

        let mut groups: BTreeMap<(Period, &str, &str), AggregateSlice> = BTreeMap::new();
        for row in ledger.rows() {
            if let (Some(period), Some(company), Some(bank)) =
                (row.period, row.company.as_deref(), row.bank.as_deref())
            {
                groups.entry((period, company, bank)).or_default().add(row);
            }
        }

        if groups.is_empty() {
            return NO_DATA_BANKS.to_string();
        }

        let skip = groups.len().saturating_sub(self.caps.max_rows);
        let mut lines =
            vec!["Bank summary by period, company and bank (latest records):".to_string()];
        for ((period, company, bank), agg) in groups.iter().skip(skip) {
            lines.push(render_bank_line(*period, company, bank, agg));
        }
        lines.join("\n")
    }
}

/// `period | company | Bank=.. | SI | AD | SAL | MV | SL [| Var=..%]`
pub fn render_bank_line(period: Period, company: &str, bank: &str, agg: &AggregateSlice) -> String {
    let mut line = format!(
        "{} | {} | Bank={} | SI={} | AD={} | SAL={} | MV={} | SL={}",
        period,
        company,
        bank,
        fmt_amount(agg.initial_balance),
        fmt_amount(agg.inflow),
        fmt_amount(agg.outflow),
        fmt_amount(agg.net_movement),
        fmt_amount(agg.ending_balance)
    );
    if let Some(pct) = agg.variation_pct() {
        line.push_str(&format!(" | Var={}%", fmt_amount(pct)));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NormalizerConfig;
    use crate::test_support::sample_snapshot;

    fn sample_ledger() -> Ledger {
        Ledger::from_snapshot(Some(&sample_snapshot()), &NormalizerConfig::default()).unwrap()
    }

    #[test]
    fn test_excluded_rows_never_reach_contexts() {
        let contexts = ContextSet::build(&sample_ledger(), &SummaryCaps::default());
        for block in contexts.iter() {
            assert!(!block.text.contains("999999"), "{} leaked excluded amount", block.kind);
        }
    }

    #[test]
    fn test_summaries_are_byte_identical_on_replay() {
        let caps = SummaryCaps::default();
        let first = ContextSet::build(&sample_ledger(), &caps);
        let second = ContextSet::build(&sample_ledger(), &caps);
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_basic_lines_are_chronological_and_capped() {
        let caps = SummaryCaps {
            max_rows: 2,
            ..SummaryCaps::default()
        };
        let text = ContextSummarizer::new(caps).basic(&sample_ledger());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("2024-03 | Acme |"));
        assert!(lines[2].starts_with("2024-03 | Beta |"));
    }

    #[test]
    fn test_basic_line_format() {
        let text = ContextSummarizer::new(SummaryCaps::default()).basic(&sample_ledger());
        assert!(text.contains("2024-01 | Acme | SI=1000.00 | SL=1100.00 | MV=100.00"));
    }

    #[test]
    fn test_rich_respects_period_and_bank_caps() {
        let caps = SummaryCaps {
            max_periods: 1,
            top_banks: 1,
            ..SummaryCaps::default()
        };
        let text = ContextSummarizer::new(caps).rich(&sample_ledger());
        assert!(text.contains("2024-03 | SI="));
        assert!(!text.contains("2024-01 | SI="));
        let bank_lines = text.lines().skip_while(|l| !l.starts_with("Banks")).skip(1).count();
        assert_eq!(bank_lines, 1);
    }

    #[test]
    fn test_rich_truncates_to_tail_lines() {
        let caps = SummaryCaps {
            max_lines: 3,
            ..SummaryCaps::default()
        };
        let text = ContextSummarizer::new(caps).rich(&sample_ledger());
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_bank_detail_omits_undefined_variation() {
        let ledger = Ledger::from_snapshot(
            Some(&serde_json::json!({
                "columns": ["Empresa", "Fecha", "Banco", "Saldo Inicial", "Saldo Libros", "Movimientos"],
                "data": [["Acme", "2024-01-05", "Banco X", 0, 50, 50]]
            })),
            &NormalizerConfig::default(),
        )
        .unwrap();
        let text = ContextSummarizer::new(SummaryCaps::default()).bank_detail(&ledger);
        assert!(text.contains("Bank=Banco X"));
        assert!(!text.contains("Var="));
    }

    #[test]
    fn test_empty_ledger_renders_no_data() {
        let contexts = ContextSet::build(&Ledger::empty(), &SummaryCaps::default());
        assert_eq!(contexts.get(ContextKind::BasicPeriod), NO_DATA_BASIC);
        assert_eq!(contexts.get(ContextKind::RichAdvanced), NO_DATA_RICH);
        assert_eq!(contexts.get(ContextKind::BankDetail), NO_DATA_BANKS);
    }

    #[test]
    fn test_overrides_replace_computed_blocks() {
        let mut overrides = HashMap::new();
        overrides.insert("bancos".to_string(), "precomputed".to_string());
        overrides.insert("unknown".to_string(), "ignored".to_string());
        let contexts = ContextSet::build(&sample_ledger(), &SummaryCaps::default()).with_overrides(&overrides);
        assert_eq!(contexts.get(ContextKind::BankDetail), "precomputed");
        assert_ne!(contexts.get(ContextKind::BasicPeriod), "ignored");
    }

    #[test]
    fn test_canonical_override_key_beats_alias() {
        let mut overrides = HashMap::new();
        overrides.insert("basic".to_string(), "from alias".to_string());
        overrides.insert("period_basic".to_string(), "from canonical".to_string());
        overrides.insert("banks".to_string(), "alias only".to_string());
        let contexts = ContextSet::build(&sample_ledger(), &SummaryCaps::default()).with_overrides(&overrides);
        assert_eq!(contexts.get(ContextKind::BasicPeriod), "from canonical");
        assert_eq!(contexts.get(ContextKind::BankDetail), "alias only");
    }
}
