//! Boundary normalization of raw upload rows into activity entries.
//!
//! Values may arrive as currency-formatted strings (`"$1,234.56"`,
//! `"(500)"` for negatives) and periods as any shape the normalizer
//! recognizes. Rows that cannot be normalized are skipped and counted, never
//! fatal; the caller receives an aggregate summary.

use crate::period;
use crate::schema::{ActivityEntry, RawActivityRecord};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a row was left out of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    MissingDimensionKey,
    MissingAccountKey,
    UnrecognizedPeriod,
    InvalidValue,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::MissingDimensionKey => "missing dimension key",
            SkipReason::MissingAccountKey => "missing account key",
            SkipReason::UnrecognizedPeriod => "unrecognized period",
            SkipReason::InvalidValue => "invalid value",
        };
        f.write_str(text)
    }
}

/// Aggregate outcome of one ingestion call, in the "out of N rows, M were
/// skipped" form the caller reports to users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub total_rows: usize,
    pub ingested: usize,
    pub skipped_missing_key: usize,
    pub skipped_unrecognized_period: usize,
    pub skipped_invalid_value: usize,
    /// Entries dropped later, during reconciliation.
    pub dropped_in_reconcile: usize,
    /// Entries written by the persistence pass.
    pub persisted: usize,
}

impl IngestionSummary {
    pub fn skipped(&self) -> usize {
        self.skipped_missing_key + self.skipped_unrecognized_period + self.skipped_invalid_value
    }

    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::MissingDimensionKey | SkipReason::MissingAccountKey => {
                self.skipped_missing_key += 1
            }
            SkipReason::UnrecognizedPeriod => self.skipped_unrecognized_period += 1,
            SkipReason::InvalidValue => self.skipped_invalid_value += 1,
        }
    }
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out of {} rows, {} were skipped ({} missing keys, {} unrecognized period, {} invalid value)",
            self.total_rows,
            self.skipped(),
            self.skipped_missing_key,
            self.skipped_unrecognized_period,
            self.skipped_invalid_value
        )
    }
}

/// Strips currency formatting (`$`, thousands separators) and treats a
/// parenthesized value as negative. `None` for anything that does not parse
/// to a finite number.
pub fn parse_money(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (body, negated) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (inner, true),
        None => (trimmed, false),
    };

    let cleaned: String = body.chars().filter(|c| !matches!(c, '$' | ',')).collect();
    let value: f64 = cleaned.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negated { -value } else { value })
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => parse_money(s),
        _ => None,
    }
}

/// Converts one payload row into an activity entry, or names the reason it
/// cannot be.
pub fn record_to_entry(record: &RawActivityRecord) -> std::result::Result<ActivityEntry, SkipReason> {
    let dimension_key = record
        .dimension_key
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SkipReason::MissingDimensionKey)?;
    let account_key = record
        .account_key
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SkipReason::MissingAccountKey)?;

    let period = period::detect_from_row(&record.extra).ok_or(SkipReason::UnrecognizedPeriod)?;
    let value = numeric_value(&record.value).ok_or(SkipReason::InvalidValue)?;

    Ok(ActivityEntry::new(dimension_key, account_key, period, value))
}

/// Converts a payload batch, skipping and counting rows that fail
/// normalization.
pub fn ingest_records(records: &[RawActivityRecord]) -> (Vec<ActivityEntry>, IngestionSummary) {
    let mut summary = IngestionSummary {
        total_rows: records.len(),
        ..Default::default()
    };
    let mut entries = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        match record_to_entry(record) {
            Ok(entry) => {
                summary.ingested += 1;
                entries.push(entry);
            }
            Err(reason) => {
                warn!("skipping row {}: {}", index, reason);
                summary.record_skip(reason);
            }
        }
    }

    (entries, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(json: serde_json::Value) -> RawActivityRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_parse_money_currency_strings() {
        assert_eq!(parse_money("$1,234.56"), Some(1234.56));
        assert_eq!(parse_money("(500)"), Some(-500.0));
        assert_eq!(parse_money("($1,234.50)"), Some(-1234.50));
        assert_eq!(parse_money("  42 "), Some(42.0));
        assert_eq!(parse_money("-17.5"), Some(-17.5));
    }

    #[test]
    fn test_parse_money_rejects_garbage() {
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_money(""), None);
        assert_eq!(parse_money("(abc)"), None);
        assert_eq!(parse_money("NaN"), None);
        assert_eq!(parse_money("inf"), None);
    }

    #[test]
    fn test_record_to_entry() {
        let rec = record(json!({
            "dimensionKey": "OP1",
            "accountKey": "4000",
            "value": "$1,234.56",
            "glMonth": "Jan'24"
        }));
        let entry = record_to_entry(&rec).unwrap();
        assert_eq!(entry.dimension_key, "OP1");
        assert_eq!(entry.account_key, "4000");
        assert_eq!(entry.period.to_string(), "2024-01-01");
        assert_eq!(entry.value, 1234.56);
    }

    #[test]
    fn test_record_numeric_value_passthrough() {
        let rec = record(json!({
            "operation": "OP1",
            "account": "4000",
            "value": -250.75,
            "Period": "2024-03"
        }));
        let entry = record_to_entry(&rec).unwrap();
        assert_eq!(entry.value, -250.75);
        assert_eq!(entry.period.to_string(), "2024-03-01");
    }

    #[test]
    fn test_skip_reasons() {
        let missing_dim = record(json!({ "account": "4000", "value": 1, "glMonth": "2024-01" }));
        assert_eq!(
            record_to_entry(&missing_dim),
            Err(SkipReason::MissingDimensionKey)
        );

        let bad_period = record(json!({
            "operation": "OP1", "account": "4000", "value": 1, "glMonth": "pending"
        }));
        assert_eq!(
            record_to_entry(&bad_period),
            Err(SkipReason::UnrecognizedPeriod)
        );

        let bad_value = record(json!({
            "operation": "OP1", "account": "4000", "value": "n/a", "glMonth": "2024-01"
        }));
        assert_eq!(record_to_entry(&bad_value), Err(SkipReason::InvalidValue));
    }

    #[test]
    fn test_summary_aggregation_and_display() {
        let records = vec![
            record(json!({ "operation": "OP1", "account": "4000", "value": 100, "glMonth": "Jan'24" })),
            record(json!({ "operation": "OP1", "account": "4000", "value": "oops", "glMonth": "Jan'24" })),
            record(json!({ "operation": "OP1", "account": "4000", "value": 5, "glMonth": "???" })),
            record(json!({ "value": 5, "glMonth": "2024-01" })),
        ];
        let (entries, summary) = ingest_records(&records);

        assert_eq!(entries.len(), 1);
        assert_eq!(summary.total_rows, 4);
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.skipped(), 3);
        assert_eq!(summary.skipped_invalid_value, 1);
        assert_eq!(summary.skipped_unrecognized_period, 1);
        assert_eq!(summary.skipped_missing_key, 1);
        assert!(summary.to_string().starts_with("out of 4 rows, 3 were skipped"));
    }
}
