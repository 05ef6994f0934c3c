//! Core data models for the cash position orchestrator

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Period =================
//

/// Calendar-month aggregation key. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed
            .split_once(['-', '/'])
            .ok_or_else(|| format!("invalid period '{}'", trimmed))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid period year '{}'", year))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid period month '{}'", month))?;
        Period::new(year, month).ok_or_else(|| format!("month out of range in '{}'", trimmed))
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

//
// ================= Ledger =================
//

/// One cleaned row of the cash-position table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerRow {
    pub company: Option<String>,
    pub account: Option<String>,
    pub bank: Option<String>,
    pub date: Option<NaiveDate>,
    pub period: Option<Period>,
    pub initial_balance: Option<f64>,
    pub ending_balance: Option<f64>,
    pub net_movement: Option<f64>,
    pub inflow: Option<f64>,
    pub outflow: Option<f64>,
}

/// Numeric ledger columns addressable by capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericColumn {
    InitialBalance,
    EndingBalance,
    NetMovement,
    Inflow,
    Outflow,
}

impl NumericColumn {
    pub const ALL: [NumericColumn; 5] = [
        NumericColumn::InitialBalance,
        NumericColumn::EndingBalance,
        NumericColumn::NetMovement,
        NumericColumn::Inflow,
        NumericColumn::Outflow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NumericColumn::InitialBalance => "initial_balance",
            NumericColumn::EndingBalance => "ending_balance",
            NumericColumn::NetMovement => "net_movement",
            NumericColumn::Inflow => "inflow",
            NumericColumn::Outflow => "outflow",
        }
    }

    /// Accepts canonical names and the source sheet headers.
    pub fn from_name(name: &str) -> Option<Self> {
        let key = name.trim().to_lowercase().replace('_', " ");
        match key.as_str() {
            "initial balance" | "saldo inicial" | "si" => Some(NumericColumn::InitialBalance),
            "ending balance" | "saldo libros" | "saldo final" | "sl" => {
                Some(NumericColumn::EndingBalance)
            }
            "net movement" | "movimientos" | "movimiento" | "mv" => Some(NumericColumn::NetMovement),
            "inflow" | "adiciones" | "ad" => Some(NumericColumn::Inflow),
            "outflow" | "salidas" | "sal" => Some(NumericColumn::Outflow),
            _ => None,
        }
    }

    pub fn value(self, row: &LedgerRow) -> Option<f64> {
        match self {
            NumericColumn::InitialBalance => row.initial_balance,
            NumericColumn::EndingBalance => row.ending_balance,
            NumericColumn::NetMovement => row.net_movement,
            NumericColumn::Inflow => row.inflow,
            NumericColumn::Outflow => row.outflow,
        }
    }
}

impl fmt::Display for NumericColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

//
// ================= Aggregates =================
//

/// Sums over a (period?, company?, bank?) slice. Missing cells add zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSlice {
    pub initial_balance: f64,
    pub inflow: f64,
    pub outflow: f64,
    pub net_movement: f64,
    pub ending_balance: f64,
    pub rows: usize,
}

impl AggregateSlice {
    pub fn add(&mut self, row: &LedgerRow) {
        self.initial_balance += row.initial_balance.unwrap_or(0.0);
        self.ending_balance += row.ending_balance.unwrap_or(0.0);
        self.net_movement += row.net_movement.unwrap_or(0.0);
        self.inflow += row.inflow.unwrap_or(0.0);
        self.outflow += row.outflow.unwrap_or(0.0);
        self.rows += 1;
    }

    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a LedgerRow>) -> Self {
        let mut slice = Self::default();
        for row in rows {
            slice.add(row);
        }
        slice
    }

    /// Net movement over initial balance, in percent. Undefined for a zero base.
    pub fn variation_pct(&self) -> Option<f64> {
        if self.initial_balance == 0.0 || !self.initial_balance.is_finite() {
            None
        } else {
            Some(self.net_movement / self.initial_balance * 100.0)
        }
    }
}

//
// ================= Filters =================
//

/// Optional capability filters: substring on company/bank, exact on period.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFilters {
    #[serde(default, alias = "empresa")]
    pub company: Option<String>,
    #[serde(default, alias = "banco")]
    pub bank: Option<String>,
    #[serde(default, alias = "periodo")]
    pub period: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        non_blank(&self.company).is_none()
            && non_blank(&self.bank).is_none()
            && non_blank(&self.period).is_none()
    }

    pub fn matches(&self, row: &LedgerRow) -> bool {
        if let Some(company) = non_blank(&self.company) {
            if !contains_ci(row.company.as_deref(), company) {
                return false;
            }
        }
        if let Some(bank) = non_blank(&self.bank) {
            if !contains_ci(row.bank.as_deref(), bank) {
                return false;
            }
        }
        if let Some(period) = non_blank(&self.period) {
            match row.period {
                Some(p) if p.to_string() == period.trim() => {}
                _ => return false,
            }
        }
        true
    }

    /// Compact label such as `[bank=X | period=2024-01]`, empty when unfiltered.
    pub fn label(&self) -> String {
        let mut parts = Vec::new();
        if let Some(company) = non_blank(&self.company) {
            parts.push(format!("company={}", company.trim()));
        }
        if let Some(bank) = non_blank(&self.bank) {
            parts.push(format!("bank={}", bank.trim()));
        }
        if let Some(period) = non_blank(&self.period) {
            parts.push(format!("period={}", period.trim()));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("[{}]", parts.join(" | "))
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.trim().to_lowercase()))
        .unwrap_or(false)
}

//
// ================= Context =================
//

/// Granularity of a context block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    BasicPeriod,
    RichAdvanced,
    BankDetail,
}

impl ContextKind {
    pub const ALL: [ContextKind; 3] = [
        ContextKind::BasicPeriod,
        ContextKind::RichAdvanced,
        ContextKind::BankDetail,
    ];

    /// Key used by callers that pass precomputed contexts.
    pub fn key(self) -> &'static str {
        match self {
            ContextKind::BasicPeriod => "period_basic",
            ContextKind::RichAdvanced => "rich",
            ContextKind::BankDetail => "bancos",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "period_basic" | "basic" | "basic_period" => Some(ContextKind::BasicPeriod),
            "rich" | "advanced" | "rich_advanced" => Some(ContextKind::RichAdvanced),
            "bancos" | "banks" | "bank_detail" => Some(ContextKind::BankDetail),
            _ => None,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

//
// ================= Routing =================
//

/// Specialist roles a query can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialist {
    Statistical,
    Financial,
}

impl Specialist {
    pub fn label(self) -> &'static str {
        match self {
            Specialist::Statistical => "stat",
            Specialist::Financial => "fin",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "stat" | "statistical" | "stats" => Some(Specialist::Statistical),
            "fin" | "financial" | "finance" => Some(Specialist::Financial),
            _ => None,
        }
    }
}

impl fmt::Display for Specialist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How a query is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Classifier picks one deterministic specialist analyzer.
    #[default]
    Single,
    /// Coordinator runs both model-backed specialists and merges them.
    Team,
    /// Single grounded chat completion over the context blocks.
    Chat,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" | "deterministic" => Ok(DispatchMode::Single),
            "team" | "coordinate" | "multi" => Ok(DispatchMode::Team),
            "chat" => Ok(DispatchMode::Chat),
            other => Err(format!("unknown dispatch mode '{}'", other)),
        }
    }
}

//
// ================= Diagnostics =================
//

/// Category behind a textual diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    MalformedInput,
    NoData,
    GenerationFailure,
    ProjectionUnavailable,
    AnalysisFailure,
}

//
// ================= Chat =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A role-tagged message for the language model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

/// Capabilities always answer with text; `category` marks sentinel answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub category: Option<DiagnosticCategory>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: None,
        }
    }

    pub fn diagnostic(category: DiagnosticCategory, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: Some(category),
        }
    }
}

//
// ================= Query =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_text: String,
    /// Serialized table (`split` or `records` orientation), possibly as a JSON string.
    #[serde(default)]
    pub data_snapshot: Option<serde_json::Value>,
    /// Precomputed context blocks keyed by `period_basic` / `rich` / `bancos`.
    #[serde(default)]
    pub contexts: Option<HashMap<String, String>>,
    #[serde(default)]
    pub mode: Option<DispatchMode>,
    /// Prior conversation turns, used by the chat mode.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl QueryRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..Self::default()
        }
    }

    pub fn with_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.data_snapshot = Some(snapshot);
        self
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub agent_label: String,
    pub result_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<DiagnosticCategory>,
}

/// Two-decimal rendering shared by every text artifact.
pub fn fmt_amount(value: f64) -> String {
    // -0.0 would render as "-0.00"
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{:.2}", value)
}
