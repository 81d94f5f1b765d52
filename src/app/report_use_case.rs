use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::ports::PublishedTablePort;
use crate::config::TableConfig;
use crate::error::{Result, Stage};
use crate::infra::silver_layout::PublishedTable;
use crate::pipeline::table::Table;

/// Counts a caller derives from a published table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub table: String,
    pub rows_read: usize,
    pub rows_accepted: usize,
    pub rows_quarantined: usize,
    pub duplicates_removed: usize,
    pub empty_rows_dropped: usize,
    pub rule_violations: BTreeMap<String, usize>,
    /// Percentage of null values per critical field over accepted and quarantined rows
    pub critical_null_pct: BTreeMap<String, f64>,
}

impl QualityReport {
    /// Rescan the two data tables; read-side counts that no longer exist in
    /// the outputs (duplicates, empty rows) come from the manifest.
    pub fn from_published(published: &PublishedTable, critical_fields: &[String]) -> Self {
        let counts = &published.manifest.counts;
        let canonical = &published.canonical;
        let quarantine = &published.quarantine;

        let total = canonical.row_count() + quarantine.len();
        let critical_null_pct = critical_fields
            .iter()
            .map(|field| {
                let nulls = null_count(canonical, field) + null_count(&quarantine.rows, field);
                let pct = if total == 0 {
                    0.0
                } else {
                    nulls as f64 * 100.0 / total as f64
                };
                (field.clone(), pct)
            })
            .collect();

        Self {
            table: published.manifest.table.clone(),
            rows_read: counts.rows_read,
            rows_accepted: canonical.row_count(),
            rows_quarantined: quarantine.len(),
            duplicates_removed: counts.duplicates_removed + counts.quarantine_duplicates_removed,
            empty_rows_dropped: counts.empty_rows_dropped,
            rule_violations: quarantine.violation_counts(),
            critical_null_pct,
        }
    }
}

/// An absent column counts as null in every row.
fn null_count(table: &Table, field: &str) -> usize {
    table
        .column(field)
        .map(|c| c.null_count())
        .unwrap_or_else(|| table.row_count())
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.table)?;
        writeln!(f, "rows read:          {}", self.rows_read)?;
        writeln!(f, "rows accepted:      {}", self.rows_accepted)?;
        writeln!(f, "rows quarantined:   {}", self.rows_quarantined)?;
        writeln!(f, "duplicates removed: {}", self.duplicates_removed)?;
        writeln!(f, "empty rows dropped: {}", self.empty_rows_dropped)?;
        if !self.rule_violations.is_empty() {
            writeln!(f, "rule violations:")?;
            for (rule, rows) in &self.rule_violations {
                writeln!(f, "  {:<24} {}", rule, rows)?;
            }
        }
        if !self.critical_null_pct.is_empty() {
            writeln!(f, "critical field nulls:")?;
            for (field, pct) in &self.critical_null_pct {
                writeln!(f, "  {:<24} {:.2}%", field, pct)?;
            }
        }
        Ok(())
    }
}

/// Builds quality reports from published silver tables
pub struct ReportUseCase {
    reader: Arc<dyn PublishedTablePort>,
}

impl ReportUseCase {
    pub fn new(reader: Arc<dyn PublishedTablePort>) -> Self {
        Self { reader }
    }

    pub async fn report(&self, table: &TableConfig) -> Result<QualityReport> {
        let published = self
            .reader
            .read(&table.name)
            .await
            .map_err(|e| e.at_stage(&table.name, Stage::Read))?;
        Ok(QualityReport::from_published(&published, &table.critical_fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::silver_use_case::{RunAudit, RunCounts};
    use crate::infra::silver_layout::{Manifest, SchemaDocument};
    use crate::pipeline::processing::QuarantineTable;
    use crate::pipeline::table::{Column, Value};

    fn published() -> PublishedTable {
        let canonical = Table::from_columns(vec![
            Column::new("loan_id", vec![Value::text("L1"), Value::text("L2"), Value::text("L3")]),
            Column::new("event_time", vec![Value::Null, Value::Integer(1), Value::Integer(2)]),
        ]);
        let quarantine = QuarantineTable {
            rows: Table::from_columns(vec![
                Column::new("loan_id", vec![Value::Null]),
                Column::new("event_time", vec![Value::Integer(3)]),
            ]),
            reasons: vec![vec!["missing_critical_field".to_string(), "negative_dpd".to_string()]],
        };
        PublishedTable {
            location: "silver/credit_events".into(),
            schema: SchemaDocument {
                table: "credit_events".to_string(),
                columns: Vec::new(),
                audit: RunAudit::default(),
            },
            manifest: Manifest {
                table: "credit_events".to_string(),
                version: uuid::Uuid::nil(),
                published_at: chrono::Utc::now(),
                counts: RunCounts {
                    rows_read: 6,
                    empty_rows_dropped: 1,
                    rows_accepted: 3,
                    rows_quarantined: 1,
                    duplicates_removed: 1,
                    quarantine_duplicates_removed: 0,
                },
                files: Vec::new(),
            },
            canonical,
            quarantine,
        }
    }

    #[test]
    fn counts_and_critical_null_percentages() {
        let fields = vec![
            "loan_id".to_string(),
            "event_time".to_string(),
            "customer_id".to_string(),
        ];

        let report = QualityReport::from_published(&published(), &fields);

        assert_eq!(report.rows_read, 6);
        assert_eq!(report.rows_accepted, 3);
        assert_eq!(report.rows_quarantined, 1);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.rule_violations.get("negative_dpd"), Some(&1));
        assert_eq!(report.critical_null_pct["loan_id"], 25.0);
        assert_eq!(report.critical_null_pct["event_time"], 25.0);
        assert_eq!(report.critical_null_pct["customer_id"], 100.0);
        assert!(report.to_string().contains("rows quarantined:   1"));
    }
}
