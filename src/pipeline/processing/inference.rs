//! Heuristic, per-column type promotion.
//!
//! There is no declared schema: each text column is probed with a numeric and a
//! temporal parser and promoted when enough of its non-blank values parse.
//! Numeric is tried first so epoch-like integers never become dates. Columns are
//! independent, so [`infer_table`] evaluates them in parallel.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::InferenceConfig;
use crate::pipeline::table::{Column, ColumnType, NullTokens, Table, Value};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y%m%dT%H%M%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

/// What inference did to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastOutcome {
    Numeric,
    Temporal,
    /// Probed but left as text
    Text,
    /// Not probed (no candidates, or already typed)
    Untouched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastReason {
    NoCandidates,
    AlreadyTyped,
    NumericRatio,
    TemporalRatio,
    KeywordOverride,
    BelowThresholds,
}

/// Audit record of one heuristic cast decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastDecision {
    pub column: String,
    pub outcome: CastOutcome,
    pub reason: CastReason,
    pub target_type: ColumnType,
    /// Non-blank values considered
    pub candidates: usize,
    pub numeric_ratio: Option<f64>,
    pub temporal_ratio: Option<f64>,
    /// Non-blank values that failed to parse and became null
    pub nulled: usize,
    /// A ratio landed within the ambiguity band of its threshold
    pub ambiguous: bool,
}

#[derive(Debug, Clone)]
pub struct InferredColumn {
    pub column: Column,
    pub decision: CastDecision,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Int(i64),
    Float(f64),
}

/// Parse a numeric literal after dropping thousands separators. Non-finite values are rejected.
fn parse_numeric(raw: &str) -> Option<Numeric> {
    let cleaned = raw.replace(',', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(i) = cleaned.parse::<i64>() {
        return Some(Numeric::Int(i));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Numeric::Float)
}

/// Parse a timestamp or date in any supported format; offsets are converted to UTC.
pub fn parse_temporal(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%z") {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Whether a normalized column name signals a date/time column.
///
/// Keywords match whole `_`-separated tokens; keywords of four or more letters
/// also match as a token prefix or suffix (`datetime`, `fechaalta`). This is
/// narrower than substring matching: `ts` never matches inside a longer token,
/// so neither `createdts` nor `status` qualifies.
pub fn has_temporal_keyword(name: &str, keywords: &[String]) -> bool {
    let name = name.to_lowercase();
    let tokens: Vec<&str> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        tokens.iter().any(|token| {
            *token == keyword
                || (keyword.len() >= 4 && (token.starts_with(&keyword) || token.ends_with(&keyword)))
        })
    })
}

fn cell_text(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn ratio(parsed: usize, total: usize) -> f64 {
    parsed as f64 / total as f64
}

/// Decide and apply the type of one column. Pure: no state is shared between columns.
pub fn infer(column: Column, config: &InferenceConfig, null_tokens: &NullTokens) -> InferredColumn {
    let current = column.column_type();
    let mut decision = CastDecision {
        column: column.name.clone(),
        outcome: CastOutcome::Untouched,
        reason: CastReason::AlreadyTyped,
        target_type: current,
        candidates: 0,
        numeric_ratio: None,
        temporal_ratio: None,
        nulled: 0,
        ambiguous: false,
    };

    if !matches!(current, ColumnType::Text | ColumnType::Null) {
        return InferredColumn { column, decision };
    }

    let candidates: Vec<String> = column
        .cells
        .iter()
        .filter(|cell| !cell.is_blank(null_tokens))
        .filter_map(cell_text)
        .collect();
    decision.candidates = candidates.len();
    if candidates.is_empty() {
        decision.reason = CastReason::NoCandidates;
        return InferredColumn { column, decision };
    }

    let numeric: Vec<Option<Numeric>> = candidates.iter().map(|c| parse_numeric(c)).collect();
    let numeric_ok = numeric.iter().filter(|n| n.is_some()).count();
    let numeric_ratio = ratio(numeric_ok, candidates.len());
    decision.numeric_ratio = Some(numeric_ratio);
    decision.ambiguous = (numeric_ratio - config.numeric_threshold).abs() <= config.ambiguity_band;

    if numeric_ratio >= config.numeric_threshold {
        let all_int = numeric.iter().flatten().all(|n| matches!(n, Numeric::Int(_)));
        let cells: Vec<Value> = column
            .cells
            .iter()
            .map(|cell| {
                if cell.is_blank(null_tokens) {
                    return Value::Null;
                }
                match cell_text(cell).as_deref().and_then(parse_numeric) {
                    Some(Numeric::Int(i)) if all_int => Value::Integer(i),
                    Some(Numeric::Int(i)) => Value::Float(i as f64),
                    Some(Numeric::Float(f)) => Value::Float(f),
                    None => Value::Null,
                }
            })
            .collect();
        decision.outcome = CastOutcome::Numeric;
        decision.reason = CastReason::NumericRatio;
        decision.target_type = if all_int { ColumnType::Integer } else { ColumnType::Float };
        decision.nulled = candidates.len() - numeric_ok;
        return InferredColumn {
            column: Column::new(column.name, cells),
            decision,
        };
    }

    let temporal_ok = candidates.iter().filter(|c| parse_temporal(c).is_some()).count();
    let temporal_ratio = ratio(temporal_ok, candidates.len());
    decision.temporal_ratio = Some(temporal_ratio);
    decision.ambiguous |= (temporal_ratio - config.temporal_threshold).abs() <= config.ambiguity_band;

    let by_ratio = temporal_ratio >= config.temporal_threshold;
    if by_ratio || has_temporal_keyword(&column.name, &config.temporal_keywords) {
        let cells: Vec<Value> = column
            .cells
            .iter()
            .map(|cell| {
                if cell.is_blank(null_tokens) {
                    return Value::Null;
                }
                cell_text(cell)
                    .as_deref()
                    .and_then(parse_temporal)
                    .map(Value::Timestamp)
                    .unwrap_or(Value::Null)
            })
            .collect();
        decision.outcome = CastOutcome::Temporal;
        decision.reason = if by_ratio {
            CastReason::TemporalRatio
        } else {
            CastReason::KeywordOverride
        };
        decision.target_type = ColumnType::Timestamp;
        decision.nulled = candidates.len() - temporal_ok;
        return InferredColumn {
            column: Column::new(column.name, cells),
            decision,
        };
    }

    decision.outcome = CastOutcome::Text;
    decision.reason = CastReason::BelowThresholds;
    decision.target_type = ColumnType::Text;
    InferredColumn { column, decision }
}

/// Run [`infer`] over every column in parallel, keeping column order.
pub fn infer_table(table: Table, config: &InferenceConfig) -> (Table, Vec<CastDecision>) {
    let null_tokens = config.null_tokens();
    let rows = table.row_count();

    let inferred: Vec<InferredColumn> = table
        .into_columns()
        .into_par_iter()
        .map(|column| infer(column, config, &null_tokens))
        .collect();

    let mut out = Table::with_row_count(rows);
    let mut decisions = Vec::with_capacity(inferred.len());
    for InferredColumn { column, decision } in inferred {
        log_decision(&decision);
        out.push_column(column);
        decisions.push(decision);
    }
    (out, decisions)
}

fn log_decision(decision: &CastDecision) {
    if decision.ambiguous {
        warn!(
            column = %decision.column,
            outcome = ?decision.outcome,
            numeric_ratio = ?decision.numeric_ratio,
            temporal_ratio = ?decision.temporal_ratio,
            "CastAmbiguous: ratio close to threshold"
        );
    }
    match decision.outcome {
        CastOutcome::Numeric | CastOutcome::Temporal => info!(
            column = %decision.column,
            target = %decision.target_type,
            reason = ?decision.reason,
            nulled = decision.nulled,
            "Cast column"
        ),
        CastOutcome::Text | CastOutcome::Untouched => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_column(name: &str, values: &[&str]) -> Column {
        Column::new(name, values.iter().map(|v| Value::text(*v)).collect())
    }

    fn run(column: Column) -> InferredColumn {
        infer(column, &InferenceConfig::default(), &NullTokens::default())
    }

    /// `ok` numeric values followed by `bad` non-numeric values.
    fn numeric_mix(ok: usize, bad: usize) -> Column {
        let mut values: Vec<String> = (0..ok).map(|i| i.to_string()).collect();
        values.extend((0..bad).map(|i| format!("n/a-{}", i)));
        Column::new("x", values.into_iter().map(Value::Text).collect())
    }

    /// `ok` parseable dates followed by `bad` unparseable values.
    fn date_mix(name: &str, ok: usize, bad: usize) -> Column {
        let mut values: Vec<String> = (0..ok).map(|i| format!("2024-01-{:02}", i % 28 + 1)).collect();
        values.extend((0..bad).map(|i| format!("someday-{}", i)));
        Column::new(name, values.into_iter().map(Value::Text).collect())
    }

    #[test]
    fn numeric_boundary_at_ninety_percent_casts() {
        let out = run(numeric_mix(9, 1));
        assert_eq!(out.decision.outcome, CastOutcome::Numeric);
        assert_eq!(out.decision.nulled, 1);
        assert_eq!(out.column.cells[9], Value::Null);
        assert_eq!(out.column.cells[3], Value::Integer(3));
    }

    #[test]
    fn numeric_boundary_below_ninety_percent_stays_text() {
        let out = run(numeric_mix(89, 11));
        assert_eq!(out.decision.outcome, CastOutcome::Text);
        assert_eq!(out.column.cells[0], Value::text("0"));
    }

    #[test]
    fn temporal_boundary_at_eighty_percent_casts() {
        let out = run(date_mix("x", 8, 2));
        assert_eq!(out.decision.outcome, CastOutcome::Temporal);
        assert_eq!(out.decision.reason, CastReason::TemporalRatio);
        assert_eq!(out.decision.nulled, 2);
        assert!(matches!(out.column.cells[0], Value::Timestamp(_)));
    }

    #[test]
    fn temporal_boundary_below_eighty_percent_stays_text() {
        let out = run(date_mix("x", 79, 21));
        assert_eq!(out.decision.outcome, CastOutcome::Text);
    }

    #[test]
    fn keyword_overrides_low_temporal_ratio() {
        let out = run(date_mix("event_date", 5, 5));
        assert_eq!(out.decision.outcome, CastOutcome::Temporal);
        assert_eq!(out.decision.reason, CastReason::KeywordOverride);
        assert_eq!(out.column.cells[7], Value::Null);

        let out = run(date_mix("x", 5, 5));
        assert_eq!(out.decision.outcome, CastOutcome::Text);
    }

    #[test]
    fn numeric_wins_over_temporal_for_epoch_like_values() {
        let out = run(text_column("event_ts", &["1700000000", "1700000100"]));
        assert_eq!(out.decision.outcome, CastOutcome::Numeric);
        assert_eq!(out.decision.target_type, ColumnType::Integer);
    }

    #[test]
    fn blanks_are_excluded_from_the_denominator() {
        let out = run(text_column("amount", &["1,000", "nan", "", "None", "2.5"]));
        assert_eq!(out.decision.candidates, 2);
        assert_eq!(out.decision.numeric_ratio, Some(1.0));
        assert_eq!(out.decision.target_type, ColumnType::Float);
        assert_eq!(
            out.column.cells,
            vec![Value::Float(1000.0), Value::Null, Value::Null, Value::Null, Value::Float(2.5)]
        );
    }

    #[test]
    fn all_blank_column_is_untouched() {
        let column = text_column("x", &["", "nan"]);
        let out = run(column.clone());
        assert_eq!(out.decision.reason, CastReason::NoCandidates);
        assert_eq!(out.column, column);
    }

    #[test]
    fn typed_columns_are_left_alone() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let column = Column::new("ingest_date", vec![Value::Date(d)]);
        let out = run(column.clone());
        assert_eq!(out.decision.reason, CastReason::AlreadyTyped);
        assert_eq!(out.column, column);
    }

    #[test]
    fn non_finite_literals_are_not_numbers() {
        assert_eq!(parse_numeric("inf"), None);
        assert_eq!(parse_numeric("NaN"), None);
        assert_eq!(parse_numeric(" -3 "), Some(Numeric::Int(-3)));
        assert_eq!(parse_numeric("1e3"), Some(Numeric::Float(1000.0)));
    }

    #[test]
    fn parses_common_temporal_formats() {
        for raw in [
            "2024-05-01",
            "2024-05-01 10:15:00",
            "2024-05-01T10:15:00.123",
            "2024-05-01T10:15:00Z",
            "2024-05-01T12:15:00+02:00",
            "05/01/2024",
            "20240501T101500",
        ] {
            assert!(parse_temporal(raw).is_some(), "failed to parse {raw}");
        }
        assert_eq!(
            parse_temporal("2024-05-01T12:15:00+02:00"),
            parse_temporal("2024-05-01 10:15:00")
        );
        assert!(parse_temporal("20240501").is_none());
        assert!(parse_temporal("not a date").is_none());
    }

    #[test]
    fn keyword_matching_uses_tokens() {
        let keywords = InferenceConfig::default().temporal_keywords;
        assert!(has_temporal_keyword("event_date", &keywords));
        assert!(has_temporal_keyword("ingest_ts", &keywords));
        assert!(has_temporal_keyword("fecha_alta", &keywords));
        assert!(has_temporal_keyword("datetime", &keywords));
        assert!(!has_temporal_keyword("status", &keywords));
        assert!(!has_temporal_keyword("accounts", &keywords));
        assert!(!has_temporal_keyword("x", &keywords));
        assert!(!has_temporal_keyword("createdts", &keywords));
    }

    #[test]
    fn flags_ratios_near_the_threshold() {
        let out = run(numeric_mix(88, 12));
        assert!(out.decision.ambiguous);
        let out = run(numeric_mix(10, 0));
        assert!(!out.decision.ambiguous);
    }

    #[test]
    fn infer_table_preserves_column_order() {
        let table = Table::from_columns(vec![
            text_column("a", &["1", "2"]),
            text_column("b", &["x", "y"]),
            text_column("c", &["2024-01-01", "2024-01-02"]),
        ]);
        let (out, decisions) = infer_table(table, &InferenceConfig::default());
        assert_eq!(out.column_names(), vec!["a", "b", "c"]);
        let outcomes: Vec<CastOutcome> = decisions.iter().map(|d| d.outcome).collect();
        assert_eq!(
            outcomes,
            vec![CastOutcome::Numeric, CastOutcome::Text, CastOutcome::Temporal]
        );
    }
}
