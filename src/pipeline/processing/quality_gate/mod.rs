use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TableConfig;
use crate::constants::{QUARANTINE_REASONS_FIELD, RULE_MISSING_CRITICAL_FIELD};
use crate::error::Result;
use crate::pipeline::table::{Table, Value};

/// Row-level predicate bound to one column. A row *violates* the rule when the
/// predicate holds on its cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Violated by numeric values below `min`
    AtLeast { min: f64 },
    /// Violated by numeric values above `max`
    AtMost { max: f64 },
    /// Violated by numeric values outside `[min, max]`
    Between { min: f64, max: f64 },
    /// Violated by null cells (and by every row when the column is absent)
    NotNull,
}

impl RuleCheck {
    fn is_numeric(&self) -> bool {
        !matches!(self, RuleCheck::NotNull)
    }

    pub fn violated_by(&self, cell: &Value) -> bool {
        match self {
            RuleCheck::NotNull => cell.is_null(),
            RuleCheck::AtLeast { min } => cell.as_f64().map(|v| v < *min).unwrap_or(false),
            RuleCheck::AtMost { max } => cell.as_f64().map(|v| v > *max).unwrap_or(false),
            RuleCheck::Between { min, max } => cell
                .as_f64()
                .map(|v| v < *min || v > *max)
                .unwrap_or(false),
        }
    }
}

/// A named rule bound to a physical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBinding {
    pub name: String,
    pub column: String,
    pub check: RuleCheck,
}

impl RuleBinding {
    pub fn new(name: impl Into<String>, column: impl Into<String>, check: RuleCheck) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            check,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("rule name must not be empty".to_string());
        }
        if self.column.trim().is_empty() {
            return Err(format!("rule '{}' has no column", self.name));
        }
        if let RuleCheck::Between { min, max } = self.check {
            if min > max {
                return Err(format!("rule '{}' has min {} > max {}", self.name, min, max));
            }
        }
        Ok(())
    }
}

/// Rule bindings for one table.
#[derive(Debug, Clone, Default)]
pub struct QualityGateConfig {
    pub rules: Vec<RuleBinding>,
    pub critical_fields: Vec<String>,
}

impl QualityGateConfig {
    /// Every binding, with critical fields expanded into `missing_critical_field` checks.
    pub fn bindings(&self) -> Vec<RuleBinding> {
        let mut bindings = self.rules.clone();
        bindings.extend(self.critical_fields.iter().map(|field| {
            RuleBinding::new(RULE_MISSING_CRITICAL_FIELD, field.clone(), RuleCheck::NotNull)
        }));
        bindings
    }
}

impl From<&TableConfig> for QualityGateConfig {
    fn from(table: &TableConfig) -> Self {
        Self {
            rules: table.rules.clone(),
            critical_fields: table.critical_fields.clone(),
        }
    }
}

/// Rows rejected by the gate, each with the names of the rules it violated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuarantineTable {
    pub rows: Table,
    pub reasons: Vec<Vec<String>>,
}

impl QuarantineTable {
    pub fn len(&self) -> usize {
        self.rows.row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retain_rows(&mut self, keep: &[bool]) {
        self.rows.retain_rows(keep);
        let mut idx = 0;
        self.reasons.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
    }

    /// The row as a JSON object with its reasons under `quarantine_reasons`.
    pub fn row_to_json(&self, row: usize) -> serde_json::Map<String, serde_json::Value> {
        let mut map = self.rows.row_to_json(row);
        map.insert(
            QUARANTINE_REASONS_FIELD.to_string(),
            serde_json::Value::from(self.reasons[row].clone()),
        );
        map
    }

    /// Quarantined rows per rule name.
    pub fn violation_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for reasons in &self.reasons {
            for reason in reasons {
                *counts.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Result of gating one table.
#[derive(Debug, Clone, Default)]
pub struct GateOutcome {
    pub accepted: Table,
    pub quarantine: QuarantineTable,
}

/// Splits a typed table into accepted and quarantined rows
pub trait QualityGate {
    fn assess(&self, table: Table) -> Result<GateOutcome>;
}

/// Quality gate driven entirely by [`QualityGateConfig`] bindings
pub struct DefaultQualityGate {
    pub config: QualityGateConfig,
}

struct BoundRule<'a> {
    binding: &'a RuleBinding,
    column: Option<usize>,
}

impl DefaultQualityGate {
    /// Gate with no rules bound: every row passes
    pub fn new() -> Self {
        Self {
            config: QualityGateConfig::default(),
        }
    }

    pub fn with_config(config: QualityGateConfig) -> Self {
        Self { config }
    }

    pub fn for_table(table: &TableConfig) -> Self {
        Self::with_config(QualityGateConfig::from(table))
    }

    /// Resolve bindings against the table, dropping the ones that cannot apply.
    fn bind<'a>(&self, bindings: &'a [RuleBinding], table: &Table) -> Vec<BoundRule<'a>> {
        let mut bound = Vec::new();
        for binding in bindings {
            let column = table.column_index(&binding.column);
            match column {
                None if binding.check.is_numeric() => {
                    debug!(rule = %binding.name, column = %binding.column, "Rule column absent, rule not applicable");
                    continue;
                }
                None => {
                    warn!(rule = %binding.name, column = %binding.column, "Critical column absent, every row is missing it");
                }
                Some(idx) if binding.check.is_numeric() => {
                    let ty = table.columns()[idx].column_type();
                    if !ty.is_numeric() && ty != crate::pipeline::table::ColumnType::Null {
                        warn!(
                            rule = %binding.name,
                            column = %binding.column,
                            column_type = %ty,
                            "Rule column is not numeric, rule not applicable"
                        );
                        continue;
                    }
                }
                Some(_) => {}
            }
            bound.push(BoundRule { binding, column });
        }
        bound
    }

    fn violations(&self, rules: &[BoundRule<'_>], table: &Table, row: usize) -> Vec<String> {
        let mut reasons: Vec<String> = Vec::new();
        for rule in rules {
            let violated = match rule.column {
                Some(idx) => rule.binding.check.violated_by(table.cell(row, idx)),
                None => rule.binding.check.violated_by(&Value::Null),
            };
            if violated && !reasons.iter().any(|r| r == &rule.binding.name) {
                reasons.push(rule.binding.name.clone());
            }
        }
        reasons
    }
}

impl QualityGate for DefaultQualityGate {
    fn assess(&self, table: Table) -> Result<GateOutcome> {
        let bindings = self.config.bindings();
        let rules = self.bind(&bindings, &table);

        let mut accepted_rows = Vec::new();
        let mut quarantined_rows = Vec::new();
        let mut reasons = Vec::new();
        for row in 0..table.row_count() {
            let violated = self.violations(&rules, &table, row);
            if violated.is_empty() {
                accepted_rows.push(row);
            } else {
                quarantined_rows.push(row);
                reasons.push(violated);
            }
        }

        let outcome = GateOutcome {
            accepted: table.select_rows(&accepted_rows),
            quarantine: QuarantineTable {
                rows: table.select_rows(&quarantined_rows),
                reasons,
            },
        };

        info!(
            rules = rules.len(),
            accepted = outcome.accepted.row_count(),
            quarantined = outcome.quarantine.len(),
            "Quality gate applied"
        );
        Ok(outcome)
    }
}

impl Default for DefaultQualityGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{RULE_INVALID_RATE, RULE_NEGATIVE_BALANCE, RULE_NEGATIVE_DPD};
    use crate::pipeline::table::Column;

    fn credit_gate() -> DefaultQualityGate {
        DefaultQualityGate::for_table(&TableConfig::credit_events())
    }

    fn credit_table(dpd: Vec<Value>, balance: Vec<Value>, rate: Vec<Value>, loan: Vec<Value>) -> Table {
        let rows = dpd.len();
        Table::from_columns(vec![
            Column::new("loan_id", loan),
            Column::new("customer_id", vec![Value::text("c"); rows]),
            Column::new("event_time", vec![Value::Integer(0); rows]),
            Column::new("days_past_due", dpd),
            Column::new("outstanding_balance", balance),
            Column::new("interest_rate", rate),
        ])
    }

    #[test]
    fn accepts_clean_rows() {
        let table = credit_table(
            vec![Value::Integer(0)],
            vec![Value::Float(10.0)],
            vec![Value::Float(0.2)],
            vec![Value::text("L1")],
        );
        let outcome = credit_gate().assess(table).unwrap();
        assert_eq!(outcome.accepted.row_count(), 1);
        assert!(outcome.quarantine.is_empty());
    }

    #[test]
    fn quarantines_with_every_violated_rule() {
        let table = credit_table(
            vec![Value::Integer(-1), Value::Integer(3)],
            vec![Value::Float(-5.0), Value::Null],
            vec![Value::Float(1.5), Value::Float(1.0)],
            vec![Value::Null, Value::text("L2")],
        );

        let outcome = credit_gate().assess(table).unwrap();

        assert_eq!(outcome.accepted.row_count(), 1);
        assert_eq!(outcome.quarantine.len(), 1);
        assert_eq!(
            outcome.quarantine.reasons[0],
            vec![
                RULE_NEGATIVE_DPD.to_string(),
                RULE_NEGATIVE_BALANCE.to_string(),
                RULE_INVALID_RATE.to_string(),
                RULE_MISSING_CRITICAL_FIELD.to_string(),
            ]
        );
        let json = outcome.quarantine.row_to_json(0);
        assert_eq!(json["quarantine_reasons"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn rate_bounds_are_inclusive() {
        let check = RuleCheck::Between { min: 0.0, max: 1.0 };
        assert!(!check.violated_by(&Value::Float(0.0)));
        assert!(!check.violated_by(&Value::Integer(1)));
        assert!(check.violated_by(&Value::Float(-0.01)));
        assert!(!check.violated_by(&Value::Null));
    }

    #[test]
    fn numeric_rules_skip_text_and_absent_columns() {
        let table = Table::from_columns(vec![Column::from_text("days_past_due", &[Some("-3")])]);
        let gate = DefaultQualityGate::with_config(QualityGateConfig {
            rules: vec![
                RuleBinding::new(RULE_NEGATIVE_DPD, "days_past_due", RuleCheck::AtLeast { min: 0.0 }),
                RuleBinding::new(RULE_NEGATIVE_BALANCE, "outstanding_balance", RuleCheck::AtLeast { min: 0.0 }),
            ],
            critical_fields: Vec::new(),
        });
        let outcome = gate.assess(table).unwrap();
        assert_eq!(outcome.accepted.row_count(), 1);
    }

    #[test]
    fn absent_critical_field_quarantines_every_row() {
        let table = Table::from_columns(vec![Column::from_text("loan_id", &[Some("L1"), Some("L2")])]);
        let gate = DefaultQualityGate::with_config(QualityGateConfig {
            rules: Vec::new(),
            critical_fields: vec!["loan_id".to_string(), "customer_id".to_string()],
        });
        let outcome = gate.assess(table).unwrap();
        assert_eq!(outcome.quarantine.len(), 2);
        assert_eq!(
            outcome.quarantine.violation_counts().get(RULE_MISSING_CRITICAL_FIELD),
            Some(&2)
        );
    }

    #[test]
    fn empty_rule_set_accepts_everything() {
        let table = Table::from_columns(vec![Column::from_text("region", &[None::<&str>, Some("x")])]);
        let outcome = DefaultQualityGate::new().assess(table).unwrap();
        assert_eq!(outcome.accepted.row_count(), 2);
    }

    #[test]
    fn invalid_between_binding_is_rejected() {
        let binding = RuleBinding::new("r", "c", RuleCheck::Between { min: 2.0, max: 1.0 });
        assert!(binding.validate().is_err());
    }
}
