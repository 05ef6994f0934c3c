//! Tabular normalizer
//!
//! Turns a serialized cash-position snapshot into an immutable, cleaned
//! [`Ledger`]. A single bad cell degrades to "missing"; only a payload that
//! is not a table at all is rejected.

use crate::error::OrchestrationError;
use crate::models::{AggregateSlice, LedgerRow, NumericColumn, Period, QueryFilters};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Account label fragment whose rows never reach any summary.
pub const DEFAULT_EXCLUSION_TOKEN: &str = "CXP";

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub exclusion_token: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            exclusion_token: DEFAULT_EXCLUSION_TOKEN.to_string(),
        }
    }
}

/// Which logical columns the snapshot carried (or the normalizer derived).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnPresence {
    pub company: bool,
    pub account: bool,
    pub bank: bool,
    pub date: bool,
    pub initial_balance: bool,
    pub ending_balance: bool,
    pub net_movement: bool,
    pub inflow: bool,
    pub outflow: bool,
}

impl ColumnPresence {
    pub fn has(&self, column: NumericColumn) -> bool {
        match column {
            NumericColumn::InitialBalance => self.initial_balance,
            NumericColumn::EndingBalance => self.ending_balance,
            NumericColumn::NetMovement => self.net_movement,
            NumericColumn::Inflow => self.inflow,
            NumericColumn::Outflow => self.outflow,
        }
    }

    fn mark(&mut self, field: Field) {
        match field {
            Field::Company => self.company = true,
            Field::Account => self.account = true,
            Field::Bank => self.bank = true,
            Field::Date => self.date = true,
            Field::Numeric(NumericColumn::InitialBalance) => self.initial_balance = true,
            Field::Numeric(NumericColumn::EndingBalance) => self.ending_balance = true,
            Field::Numeric(NumericColumn::NetMovement) => self.net_movement = true,
            Field::Numeric(NumericColumn::Inflow) => self.inflow = true,
            Field::Numeric(NumericColumn::Outflow) => self.outflow = true,
        }
    }
}

/// Cleaned, immutable cash-position table for one query.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    rows: Vec<LedgerRow>,
    columns: ColumnPresence,
}

impl Ledger {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalize an optional snapshot. `None` and JSON `null` give an empty ledger.
    pub fn from_snapshot(snapshot: Option<&Value>, config: &NormalizerConfig) -> Result<Self> {
        match snapshot {
            None | Some(Value::Null) => Ok(Self::empty()),
            Some(value) => {
                let table = RawTable::parse(value, true)?;
                Ok(normalize(table, config))
            }
        }
    }

    pub fn from_json_str(raw: &str, config: &NormalizerConfig) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            OrchestrationError::MalformedInput(format!("snapshot is not valid JSON: {}", e))
        })?;
        Self::from_snapshot(Some(&value), config)
    }

    /// Build directly from already-clean rows (excluded accounts are still dropped).
    pub fn from_rows(rows: Vec<LedgerRow>, config: &NormalizerConfig) -> Self {
        let token = config.exclusion_token.to_lowercase();
        let rows = rows
            .into_iter()
            .filter(|row| !is_excluded(row.account.as_deref(), &token))
            .collect();
        Self {
            rows,
            columns: ColumnPresence {
                company: true,
                account: true,
                bank: true,
                date: true,
                initial_balance: true,
                ending_balance: true,
                net_movement: true,
                inflow: true,
                outflow: true,
            },
        }
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn columns(&self) -> ColumnPresence {
        self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn filtered<'a>(&'a self, filters: &'a QueryFilters) -> impl Iterator<Item = &'a LedgerRow> + 'a {
        self.rows.iter().filter(move |row| filters.matches(row))
    }

    /// Per-period aggregates of the filtered rows, chronological.
    pub fn period_series(&self, filters: &QueryFilters) -> BTreeMap<Period, AggregateSlice> {
        let mut series: BTreeMap<Period, AggregateSlice> = BTreeMap::new();
        for row in self.filtered(filters) {
            if let Some(period) = row.period {
                series.entry(period).or_default().add(row);
            }
        }
        series
    }
}

//
// ================= Raw table =================
//

struct RawTable {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl RawTable {
    fn parse(value: &Value, allow_wrapped: bool) -> Result<Self> {
        match value {
            Value::String(raw) if allow_wrapped => {
                let inner: Value = serde_json::from_str(raw).map_err(|e| {
                    OrchestrationError::MalformedInput(format!(
                        "snapshot string is not valid JSON: {}",
                        e
                    ))
                })?;
                if inner.is_null() {
                    return Ok(Self {
                        columns: vec![],
                        data: vec![],
                    });
                }
                Self::parse(&inner, false)
            }
            Value::Array(records) => Self::from_records(records),
            Value::Object(obj) => {
                if let (Some(columns), Some(data)) = (obj.get("columns"), obj.get("data")) {
                    Self::from_split(columns, data)
                } else if let Some(Value::Array(records)) = obj.get("data") {
                    // `table` orientation: schema + records
                    Self::from_records(records)
                } else {
                    Err(OrchestrationError::MalformedInput(
                        "snapshot object needs 'columns' and 'data'".to_string(),
                    ))
                }
            }
            other => Err(OrchestrationError::MalformedInput(format!(
                "snapshot is not tabular (got {})",
                json_kind(other)
            ))),
        }
    }

    fn from_split(columns: &Value, data: &Value) -> Result<Self> {
        let columns: Vec<String> = columns
            .as_array()
            .ok_or_else(|| {
                OrchestrationError::MalformedInput("'columns' must be an array".to_string())
            })?
            .iter()
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        let rows = data.as_array().ok_or_else(|| {
            OrchestrationError::MalformedInput("'data' must be an array".to_string())
        })?;

        let mut out = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let cells = row.as_array().ok_or_else(|| {
                OrchestrationError::MalformedInput(format!("row {} is not an array", i))
            })?;
            if cells.len() != columns.len() {
                return Err(OrchestrationError::MalformedInput(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    cells.len(),
                    columns.len()
                )));
            }
            out.push(cells.clone());
        }

        Ok(Self { columns, data: out })
    }

    fn from_records(records: &[Value]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut objects: Vec<&Map<String, Value>> = Vec::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            let obj = record.as_object().ok_or_else(|| {
                OrchestrationError::MalformedInput(format!("record {} is not an object", i))
            })?;
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
            objects.push(obj);
        }

        let data = objects
            .into_iter()
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, data })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//
// ================= Column resolution =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Company,
    Account,
    Bank,
    Date,
    Numeric(NumericColumn),
}

fn resolve_field(header: &str) -> Option<Field> {
    match header.trim().to_lowercase().as_str() {
        "empresa" | "company" => Some(Field::Company),
        "cuenta" | "account" => Some(Field::Account),
        "banco" | "bank" => Some(Field::Bank),
        "fecha" | "date" => Some(Field::Date),
        other => NumericColumn::from_name(other).map(Field::Numeric),
    }
}

//
// ================= Normalization =================
//

fn normalize(table: RawTable, config: &NormalizerConfig) -> Ledger {
    let mut presence = ColumnPresence::default();
    let mut mapping: Vec<(usize, Field)> = Vec::new();

    for (idx, header) in table.columns.iter().enumerate() {
        if let Some(field) = resolve_field(header) {
            if mapping.iter().any(|(_, f)| *f == field) {
                continue;
            }
            presence.mark(field);
            mapping.push((idx, field));
        }
    }

    let token = config.exclusion_token.to_lowercase();
    let derive_inflow = presence.net_movement && !presence.inflow;
    let derive_outflow = presence.net_movement && !presence.outflow;

    let total = table.data.len();
    let mut rows = Vec::with_capacity(total);

    for cells in &table.data {
        let mut row = LedgerRow::default();
        for (idx, field) in &mapping {
            let cell = &cells[*idx];
            match field {
                Field::Company => row.company = text_cell(cell),
                Field::Account => row.account = text_cell(cell),
                Field::Bank => row.bank = text_cell(cell),
                Field::Date => row.date = parse_date(cell),
                Field::Numeric(NumericColumn::InitialBalance) => row.initial_balance = parse_number(cell),
                Field::Numeric(NumericColumn::EndingBalance) => row.ending_balance = parse_number(cell),
                Field::Numeric(NumericColumn::NetMovement) => row.net_movement = parse_number(cell),
                Field::Numeric(NumericColumn::Inflow) => row.inflow = parse_number(cell),
                Field::Numeric(NumericColumn::Outflow) => row.outflow = parse_number(cell),
            }
        }

        row.period = row.date.map(Period::from_date);

        if is_excluded(row.account.as_deref(), &token) {
            continue;
        }

        if derive_inflow {
            row.inflow = row.net_movement.map(|mv| mv.max(0.0));
        }
        if derive_outflow {
            row.outflow = row.net_movement.map(|mv| (-mv).max(0.0));
        }

        rows.push(row);
    }

    presence.inflow |= derive_inflow;
    presence.outflow |= derive_outflow;

    debug!(
        total_rows = total,
        kept_rows = rows.len(),
        excluded_rows = total - rows.len(),
        "Snapshot normalized"
    );

    Ledger {
        rows,
        columns: presence,
    }
}

fn is_excluded(account: Option<&str>, token_lower: &str) -> bool {
    if token_lower.is_empty() {
        return false;
    }
    account
        .map(|a| a.to_lowercase().contains(token_lower))
        .unwrap_or(false)
}

fn text_cell(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        other => Some(other.to_string()),
    }
}

/// Accepts ISO dates/datetimes, RFC 3339, `DD/MM/YYYY` and epoch milliseconds.
fn parse_date(cell: &Value) -> Option<NaiveDate> {
    match cell {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
        }
        Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    if let Some(head) = s.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return Some(date);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    None
}

fn parse_number(cell: &Value) -> Option<f64> {
    match cell {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_locale_number(s),
        _ => None,
    }
}

/// Parses `1234.5`, `1,234.50`, `1.234,50`, `$ 1,234`, `(250.00)`.
fn parse_locale_number(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '\u{a0}'))
        .collect();

    let accounting_negative = s.starts_with('(') && s.ends_with(')') && s.len() > 2;
    if accounting_negative {
        s = s[1..s.len() - 1].to_string();
    }
    if s.is_empty() {
        return None;
    }

    let normalized = match (s.rfind('.'), s.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = s.len() - comma - 1;
            if s.matches(',').count() == 1 && decimals != 3 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(_), None) if s.matches('.').count() > 1 => s.replace('.', ""),
        _ => s,
    };

    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| if accounting_negative { -v } else { v })
}
