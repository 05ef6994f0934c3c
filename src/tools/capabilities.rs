//! Ledger capabilities: statistics, slices, KPIs, concentration, risk.
//!
//! Each capability is a pure function over a [`Ledger`] returning one
//! formatted line. Empty subsets produce a "no data for this filter"
//! sentinel instead of an error.

use super::{parse_args, Tool};
use crate::error::OrchestrationError;
use crate::ledger::Ledger;
use crate::models::{
    fmt_amount, AggregateSlice, DiagnosticCategory, NumericColumn, Period, QueryFilters, ToolInput,
    ToolOutput,
};
use crate::summarizer::render_bank_line;
use crate::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NO_DATA_MARKER: &str = "no data for this filter";
pub const NO_PROJECTION: &str = "no projection";

/// Sentinel for an empty subset.
pub fn no_data(subject: &str, filters: &QueryFilters) -> ToolOutput {
    let label = filters.label();
    let text = if label.is_empty() {
        format!("{}: {}", subject, NO_DATA_MARKER)
    } else {
        format!("{}: {} {}", subject, NO_DATA_MARKER, label)
    };
    ToolOutput::diagnostic(DiagnosticCategory::NoData, text)
}

fn subject_with_label(subject: &str, filters: &QueryFilters) -> String {
    let label = filters.label();
    if label.is_empty() {
        subject.to_string()
    } else {
        format!("{} {}", subject, label)
    }
}

//
// ================= Statistics =================
//

/// p50/p90 (linear interpolation), mean and sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Descriptive {
    pub p50: f64,
    pub p90: f64,
    pub mean: f64,
    pub std: f64,
    pub n: usize,
}

impl Descriptive {
    /// `None` when there is nothing to describe.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std = if n < 2 {
            0.0
        } else {
            let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        };

        Some(Self {
            p50: quantile(&sorted, 0.5),
            p90: quantile(&sorted, 0.9),
            mean,
            std,
            n,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "p50={}, p90={}, mean={}, std={} (n={})",
            fmt_amount(self.p50),
            fmt_amount(self.p90),
            fmt_amount(self.mean),
            fmt_amount(self.std),
            self.n
        )
    }
}

/// Linear-interpolated quantile of an ascending, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

pub fn stat_summary(ledger: &Ledger, column: NumericColumn, filters: &QueryFilters) -> ToolOutput {
    if !ledger.columns().has(column) {
        return ToolOutput::diagnostic(
            DiagnosticCategory::NoData,
            format!("{}: column not present in the snapshot", column),
        );
    }
    let values: Vec<f64> = ledger.filtered(filters).filter_map(|r| column.value(r)).collect();
    match Descriptive::from_values(&values) {
        Some(stats) => ToolOutput::text(format!(
            "{}: {}",
            subject_with_label(column.name(), filters),
            stats.render()
        )),
        None => no_data(column.name(), filters),
    }
}

//
// ================= Slices & KPIs =================
//

/// Last (period, company, bank) aggregate of the filtered rows.
pub fn bank_slice(ledger: &Ledger, filters: &QueryFilters) -> ToolOutput {
    let mut groups: BTreeMap<(Period, &str, &str), AggregateSlice> = BTreeMap::new();
    for row in ledger.filtered(filters) {
        if let (Some(period), Some(company), Some(bank)) =
            (row.period, row.company.as_deref(), row.bank.as_deref())
        {
            groups.entry((period, company, bank)).or_default().add(row);
        }
    }
    match groups.iter().next_back() {
        Some(((period, company, bank), agg)) => {
            ToolOutput::text(render_bank_line(*period, company, bank, agg))
        }
        None => no_data("bank_slice", filters),
    }
}

fn company_filter(company: Option<&str>) -> QueryFilters {
    QueryFilters {
        company: company.map(str::to_string),
        ..QueryFilters::default()
    }
}

/// Latest-period SL and MV with the SL change against the prior period.
pub fn latest_period_kpis(ledger: &Ledger, company: Option<&str>) -> ToolOutput {
    let filters = company_filter(company);
    let series = ledger.period_series(&filters);
    let mut iter = series.iter().rev();

    let Some((period, latest)) = iter.next() else {
        return no_data("latest_period_kpis", &filters);
    };

    let mut text = format!(
        "{}: SL={} | MV={}",
        subject_with_label(&format!("Latest period {}", period), &filters),
        fmt_amount(latest.ending_balance),
        fmt_amount(latest.net_movement)
    );
    match iter.next() {
        None => text.push_str(" | SL change vs prior=0.00% (no prior period)"),
        Some((prior_period, prior)) if prior.ending_balance != 0.0 => {
            let change = (latest.ending_balance - prior.ending_balance) / prior.ending_balance.abs() * 100.0;
            text.push_str(&format!(" | SL change vs {}={}%", prior_period, fmt_amount(change)));
        }
        Some(_) => {}
    }
    ToolOutput::text(text)
}

/// Share of latest-period SL held by the three largest banks.
pub fn top_banks_concentration(ledger: &Ledger, company: Option<&str>) -> ToolOutput {
    let filters = company_filter(company);
    let latest = ledger
        .filtered(&filters)
        .filter(|r| r.bank.is_some())
        .filter_map(|r| r.period)
        .max();
    let Some(period) = latest else {
        return no_data("top_banks_concentration", &filters);
    };

    let mut per_bank: BTreeMap<&str, f64> = BTreeMap::new();
    for row in ledger.filtered(&filters).filter(|r| r.period == Some(period)) {
        if let Some(bank) = row.bank.as_deref() {
            *per_bank.entry(bank).or_default() += row.ending_balance.unwrap_or(0.0);
        }
    }

    let total: f64 = per_bank.values().sum();
    let mut ranked: Vec<(&str, f64)> = per_bank.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(3);

    let subject = subject_with_label(&format!("Top-3 bank concentration {}", period), &filters);
    if total <= 0.0 {
        return ToolOutput::text(format!(
            "{}: undefined (total SL={} is not positive)",
            subject,
            fmt_amount(total)
        ));
    }

    let top_sum: f64 = ranked.iter().map(|(_, sl)| sl).sum();
    let banks = ranked
        .iter()
        .map(|(bank, sl)| format!("{}={} ({}%)", bank, fmt_amount(*sl), fmt_amount(sl / total * 100.0)))
        .collect::<Vec<_>>()
        .join(", ");
    ToolOutput::text(format!(
        "{}: {}% of SL={} | {}",
        subject,
        fmt_amount(top_sum / total * 100.0),
        fmt_amount(total),
        banks
    ))
}

//
// ================= Risk & projection =================
//

/// Risk flags and the one-step SL projection for a filtered window.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    /// Mean and sum of net movement are both negative.
    pub liquidity_pressure: bool,
    /// Month-over-month SL declines across the period series.
    pub mom_declines: usize,
    pub projection: Option<f64>,
}

impl RiskAssessment {
    /// `None` when the filter matches no rows.
    pub fn assess(ledger: &Ledger, filters: &QueryFilters) -> Option<Self> {
        let rows: Vec<_> = ledger.filtered(filters).collect();
        if rows.is_empty() {
            return None;
        }

        let movements: Vec<f64> = rows.iter().filter_map(|r| r.net_movement).collect();
        let liquidity_pressure = if movements.is_empty() {
            false
        } else {
            let sum: f64 = movements.iter().sum();
            let mean = sum / movements.len() as f64;
            mean < 0.0 && sum < 0.0
        };

        let series = ledger.period_series(filters);
        let balances: Vec<f64> = series.values().map(|a| a.ending_balance).collect();
        let mom_declines = balances.windows(2).filter(|w| w[1] < w[0]).count();

        let mut dated: Vec<_> = rows.iter().filter(|r| r.date.is_some()).collect();
        dated.sort_by_key(|r| r.date);
        let points: Vec<Option<f64>> = dated.iter().map(|r| r.ending_balance).collect();

        Some(Self {
            liquidity_pressure,
            mom_declines,
            projection: linear_projection(&points),
        })
    }
}

/// Least-squares line over `(index, value)` for present values, evaluated one
/// step past the end. Needs at least two points and a finite result.
pub fn linear_projection(points: &[Option<f64>]) -> Option<f64> {
    let valid: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|v| v.is_finite()).map(|v| (i as f64, v)))
        .collect();
    if valid.len() < 2 {
        return None;
    }

    let n = valid.len() as f64;
    let mean_x = valid.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = valid.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = valid.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = valid.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let next = slope * points.len() as f64 + intercept;
    next.is_finite().then_some(next)
}

pub fn fin_risk_projection(ledger: &Ledger, filters: &QueryFilters) -> ToolOutput {
    let Some(risk) = RiskAssessment::assess(ledger, filters) else {
        return no_data("fin_risk_projection", filters);
    };

    let flags = if risk.liquidity_pressure {
        "liquidity pressure (net outflows dominate)"
    } else {
        "no relevant flags"
    };
    match risk.projection {
        Some(next) => ToolOutput::text(format!(
            "Risk: {} | Projected SL next period: {}",
            flags,
            fmt_amount(next)
        )),
        None => ToolOutput::diagnostic(
            DiagnosticCategory::ProjectionUnavailable,
            format!("Risk: {} | {}", flags, NO_PROJECTION),
        ),
    }
}

//
// ================= Tools =================
//

#[derive(Debug, Default, Deserialize)]
struct StatArgs {
    #[serde(default)]
    column: Option<String>,
    #[serde(flatten)]
    filters: QueryFilters,
}

#[derive(Debug, Default, Deserialize)]
struct CompanyArgs {
    #[serde(default, alias = "empresa")]
    company: Option<String>,
}

pub struct StatSummaryTool {
    ledger: Arc<Ledger>,
}

impl StatSummaryTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for StatSummaryTool {
    fn name(&self) -> &'static str {
        "stat_summary"
    }

    fn description(&self) -> &'static str {
        "p50, p90, mean and std of one numeric column (default net_movement), optionally filtered"
    }

    fn parameters(&self) -> &'static str {
        r#"{"column"?: "initial_balance"|"ending_balance"|"net_movement"|"inflow"|"outflow", "company"?, "bank"?, "period"?: "YYYY-MM"}"#
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let args: StatArgs = parse_args(input)?;
        let column = match args.column.as_deref() {
            None => NumericColumn::NetMovement,
            Some(name) => NumericColumn::from_name(name).ok_or_else(|| {
                OrchestrationError::InvalidToolInput(format!("unknown column '{}'", name))
            })?,
        };
        Ok(stat_summary(&self.ledger, column, &args.filters))
    }
}

pub struct BankSliceTool {
    ledger: Arc<Ledger>,
}

impl BankSliceTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for BankSliceTool {
    fn name(&self) -> &'static str {
        "bank_slice"
    }

    fn description(&self) -> &'static str {
        "SI, inflow, outflow, MV and SL of the latest period+company+bank matching the filter"
    }

    fn parameters(&self) -> &'static str {
        r#"{"company"?, "bank"?, "period"?: "YYYY-MM"}"#
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let filters: QueryFilters = parse_args(input)?;
        Ok(bank_slice(&self.ledger, &filters))
    }
}

pub struct LatestPeriodKpisTool {
    ledger: Arc<Ledger>,
}

impl LatestPeriodKpisTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for LatestPeriodKpisTool {
    fn name(&self) -> &'static str {
        "latest_period_kpis"
    }

    fn description(&self) -> &'static str {
        "Ending balance, net movement and % change vs the prior period for the most recent period"
    }

    fn parameters(&self) -> &'static str {
        r#"{"company"?}"#
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let args: CompanyArgs = parse_args(input)?;
        Ok(latest_period_kpis(&self.ledger, args.company.as_deref()))
    }
}

pub struct TopBanksConcentrationTool {
    ledger: Arc<Ledger>,
}

impl TopBanksConcentrationTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for TopBanksConcentrationTool {
    fn name(&self) -> &'static str {
        "top_banks_concentration"
    }

    fn description(&self) -> &'static str {
        "Share of the latest-period ending balance held by the top three banks"
    }

    fn parameters(&self) -> &'static str {
        r#"{"company"?}"#
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let args: CompanyArgs = parse_args(input)?;
        Ok(top_banks_concentration(&self.ledger, args.company.as_deref()))
    }
}

pub struct FinRiskProjectionTool {
    ledger: Arc<Ledger>,
}

impl FinRiskProjectionTool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Tool for FinRiskProjectionTool {
    fn name(&self) -> &'static str {
        "fin_risk_projection"
    }

    fn description(&self) -> &'static str {
        "Liquidity-pressure flag and a linear projection of the ending balance one period ahead"
    }

    fn parameters(&self) -> &'static str {
        r#"{"company"?, "bank"?, "period"?: "YYYY-MM"}"#
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let filters: QueryFilters = parse_args(input)?;
        Ok(fin_risk_projection(&self.ledger, &filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NormalizerConfig;
    use crate::test_support::sample_snapshot;
    use serde_json::json;

    fn ledger() -> Ledger {
        Ledger::from_snapshot(Some(&sample_snapshot()), &NormalizerConfig::default()).unwrap()
    }

    fn filters(bank: Option<&str>, company: Option<&str>, period: Option<&str>) -> QueryFilters {
        QueryFilters {
            company: company.map(str::to_string),
            bank: bank.map(str::to_string),
            period: period.map(str::to_string),
        }
    }

    #[test]
    fn test_descriptive_statistics() {
        let stats = Descriptive::from_values(&[50.0, -20.0]).unwrap();
        assert_eq!(stats.p50, 15.0);
        assert!((stats.p90 - 43.0).abs() < 1e-9);
        assert_eq!(stats.mean, 15.0);
        assert!((stats.std - 49.497_474_683).abs() < 1e-6);

        let single = Descriptive::from_values(&[7.0]).unwrap();
        assert_eq!(single.std, 0.0);
        assert_eq!(single.p90, 7.0);
        assert!(Descriptive::from_values(&[]).is_none());
    }

    #[test]
    fn test_stat_summary_filters_bank_and_period() {
        let out = stat_summary(&ledger(), NumericColumn::NetMovement, &filters(Some("X"), None, Some("2024-01")));
        assert_eq!(
            out.text,
            "net_movement [bank=X | period=2024-01]: p50=15.00, p90=43.00, mean=15.00, std=49.50 (n=2)"
        );
        assert!(out.category.is_none());
    }

    #[test]
    fn test_empty_subset_returns_sentinel() {
        let ledger = ledger();
        let f = filters(Some("Nonexistent"), None, None);
        for out in [
            stat_summary(&ledger, NumericColumn::EndingBalance, &f),
            bank_slice(&ledger, &f),
            fin_risk_projection(&ledger, &f),
        ] {
            assert!(out.text.contains(NO_DATA_MARKER), "{}", out.text);
            assert_eq!(out.category, Some(DiagnosticCategory::NoData));
        }
        let out = latest_period_kpis(&Ledger::empty(), None);
        assert!(out.text.contains(NO_DATA_MARKER));
    }

    #[test]
    fn test_bank_slice_takes_latest_group() {
        let out = bank_slice(&ledger(), &filters(Some("Banco X"), None, None));
        assert_eq!(
            out.text,
            "2024-03 | Acme | Bank=Banco X | SI=700.00 | AD=0.00 | SAL=10.00 | MV=-10.00 | SL=690.00 | Var=-1.43%"
        );
    }

    #[test]
    fn test_latest_period_kpis_change() {
        let out = latest_period_kpis(&ledger(), Some("Beta"));
        assert_eq!(
            out.text,
            "Latest period 2024-03 [company=Beta]: SL=170.00 | MV=20.00 | SL change vs 2024-02=13.33%"
        );
    }

    #[test]
    fn test_latest_period_kpis_single_period_is_zero() {
        let ledger = Ledger::from_snapshot(
            Some(&json!({
                "columns": ["Empresa", "Fecha", "Saldo Libros", "Movimientos"],
                "data": [["Acme", "2024-05-31", 300.0, 25.0]]
            })),
            &NormalizerConfig::default(),
        )
        .unwrap();
        let out = latest_period_kpis(&ledger, None);
        assert!(out.text.contains("SL change vs prior=0.00%"), "{}", out.text);
    }

    #[test]
    fn test_top_banks_concentration() {
        let out = top_banks_concentration(&ledger(), None);
        assert_eq!(
            out.text,
            "Top-3 bank concentration 2024-03: 100.00% of SL=1260.00 | Banco X=690.00 (54.76%), Banco Y=570.00 (45.24%)"
        );
    }

    #[test]
    fn test_concentration_undefined_for_non_positive_total() {
        let ledger = Ledger::from_snapshot(
            Some(&json!({
                "columns": ["Empresa", "Fecha", "Banco", "Saldo Libros"],
                "data": [["Acme", "2024-05-31", "Banco X", -10.0]]
            })),
            &NormalizerConfig::default(),
        )
        .unwrap();
        let out = top_banks_concentration(&ledger, None);
        assert!(out.text.contains("undefined"));
    }

    #[test]
    fn test_projection_fits_line() {
        assert_eq!(linear_projection(&[Some(650.0), Some(700.0), Some(690.0)]), Some(720.0));
        assert_eq!(linear_projection(&[Some(1.0), None, Some(3.0)]), Some(4.0));
    }

    #[test]
    fn test_projection_needs_two_points() {
        assert_eq!(linear_projection(&[]), None);
        assert_eq!(linear_projection(&[Some(5.0)]), None);
        assert_eq!(linear_projection(&[None, Some(5.0)]), None);

        let ledger = Ledger::from_snapshot(
            Some(&json!({
                "columns": ["Empresa", "Fecha", "Saldo Libros", "Movimientos"],
                "data": [["Acme", "2024-05-31", 300.0, 25.0]]
            })),
            &NormalizerConfig::default(),
        )
        .unwrap();
        let out = fin_risk_projection(&ledger, &QueryFilters::default());
        assert!(out.text.ends_with(NO_PROJECTION));
        assert_eq!(out.category, Some(DiagnosticCategory::ProjectionUnavailable));
    }

    #[test]
    fn test_fin_risk_projection_flags_liquidity_pressure() {
        let out = fin_risk_projection(&ledger(), &filters(None, Some("Beta"), None));
        assert!(out.text.starts_with("Risk: liquidity pressure"), "{}", out.text);

        let out = fin_risk_projection(&ledger(), &filters(Some("Banco X"), Some("Acme"), None));
        assert_eq!(out.text, "Risk: no relevant flags | Projected SL next period: 720.00");
    }

    #[tokio::test]
    async fn test_stat_tool_accepts_spanish_parameters() {
        let tool = StatSummaryTool::new(Arc::new(ledger()));
        let out = tool
            .execute(&ToolInput {
                tool_name: "stat_summary".to_string(),
                parameters: json!({"column": "Movimientos", "banco": "X", "periodo": "2024-01"}),
            })
            .await
            .unwrap();
        assert!(out.text.starts_with("net_movement [bank=X | period=2024-01]: p50=15.00"));
    }

    #[tokio::test]
    async fn test_stat_tool_rejects_unknown_column() {
        let tool = StatSummaryTool::new(Arc::new(ledger()));
        let err = tool
            .execute(&ToolInput {
                tool_name: "stat_summary".to_string(),
                parameters: json!({"column": "ebitda"}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidToolInput(_)));
    }
}
