//! Metrics for the silver pipeline.
//!
//! Recording goes through the `metrics` facade, so it is a no-op until a
//! recorder is installed. The binary installs the Prometheus recorder with
//! [`init`] and can dump the text exposition with [`write_textfile`].

use std::fmt;
use std::fs;
use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

/// Every metric name the pipeline records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Capture
    CaptureFilesCaptured,
    CaptureFilesSkipped,
    CaptureRowsCaptured,

    // Silver run
    SilverRowsRead,
    SilverRowsAccepted,
    SilverRowsQuarantined,
    SilverDuplicatesRemoved,
    SilverEmptyRowsDropped,
    SilverEmptyColumnsDropped,
    SilverColumnsCast,
    SilverCellsNulled,
    SilverCastsAmbiguous,
    SilverColumnCollisions,
    SilverRuleViolations,
    SilverRunDuration,
    SilverRunsSucceeded,
    SilverRunsFailed,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CaptureFilesCaptured => "silverize_capture_files_captured_total",
            MetricName::CaptureFilesSkipped => "silverize_capture_files_skipped_total",
            MetricName::CaptureRowsCaptured => "silverize_capture_rows_captured_total",

            MetricName::SilverRowsRead => "silverize_silver_rows_read_total",
            MetricName::SilverRowsAccepted => "silverize_silver_rows_accepted_total",
            MetricName::SilverRowsQuarantined => "silverize_silver_rows_quarantined_total",
            MetricName::SilverDuplicatesRemoved => "silverize_silver_duplicates_removed_total",
            MetricName::SilverEmptyRowsDropped => "silverize_silver_empty_rows_dropped_total",
            MetricName::SilverEmptyColumnsDropped => "silverize_silver_empty_columns_dropped_total",
            MetricName::SilverColumnsCast => "silverize_silver_columns_cast_total",
            MetricName::SilverCellsNulled => "silverize_silver_cells_nulled_total",
            MetricName::SilverCastsAmbiguous => "silverize_silver_casts_ambiguous_total",
            MetricName::SilverColumnCollisions => "silverize_silver_column_collisions_total",
            MetricName::SilverRuleViolations => "silverize_silver_rule_violations_total",
            MetricName::SilverRunDuration => "silverize_silver_run_duration_seconds",
            MetricName::SilverRunsSucceeded => "silverize_silver_runs_succeeded_total",
            MetricName::SilverRunsFailed => "silverize_silver_runs_failed_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init() -> Result<(), String> {
    if PROMETHEUS.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    let _ = PROMETHEUS.set(handle);
    info!("Metrics recorder installed");
    Ok(())
}

/// Current text exposition, if a recorder was installed
pub fn render() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

/// Write the text exposition to `path` (node-exporter textfile style).
pub fn write_textfile(path: &Path) -> std::io::Result<bool> {
    match render() {
        Some(text) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, text)?;
            info!("Wrote metrics to {}", path.display());
            Ok(true)
        }
        None => Ok(false),
    }
}

// ============================================================================
// Capture Metrics
// ============================================================================

pub mod capture {
    use super::MetricName;

    pub fn files_captured(table: &str, files: usize, rows: usize) {
        ::metrics::counter!(MetricName::CaptureFilesCaptured.as_str(), "table" => table.to_string())
            .increment(files as u64);
        ::metrics::counter!(MetricName::CaptureRowsCaptured.as_str(), "table" => table.to_string())
            .increment(rows as u64);
    }

    pub fn files_skipped(table: &str, files: usize) {
        ::metrics::counter!(MetricName::CaptureFilesSkipped.as_str(), "table" => table.to_string())
            .increment(files as u64);
    }
}

// ============================================================================
// Silver Metrics
// ============================================================================

pub mod silver {
    use super::MetricName;

    fn count(name: MetricName, table: &str, value: usize) {
        ::metrics::counter!(name.as_str(), "table" => table.to_string()).increment(value as u64);
    }

    pub fn rows_read(table: &str, rows: usize) {
        count(MetricName::SilverRowsRead, table, rows);
    }

    pub fn emptiness(table: &str, columns: usize, rows: usize) {
        count(MetricName::SilverEmptyColumnsDropped, table, columns);
        count(MetricName::SilverEmptyRowsDropped, table, rows);
    }

    pub fn column_collisions(table: &str, collisions: usize) {
        count(MetricName::SilverColumnCollisions, table, collisions);
    }

    /// One heuristic cast applied to a column
    pub fn column_cast(table: &str, target_type: &str, nulled: usize, ambiguous: bool) {
        ::metrics::counter!(
            MetricName::SilverColumnsCast.as_str(),
            "table" => table.to_string(),
            "target_type" => target_type.to_string()
        )
        .increment(1);
        count(MetricName::SilverCellsNulled, table, nulled);
        if ambiguous {
            count(MetricName::SilverCastsAmbiguous, table, 1);
        }
    }

    pub fn rule_violations(table: &str, rule: &str, rows: usize) {
        ::metrics::counter!(
            MetricName::SilverRuleViolations.as_str(),
            "table" => table.to_string(),
            "rule" => rule.to_string()
        )
        .increment(rows as u64);
    }

    pub fn outcome(table: &str, accepted: usize, quarantined: usize, duplicates: usize) {
        count(MetricName::SilverRowsAccepted, table, accepted);
        count(MetricName::SilverRowsQuarantined, table, quarantined);
        count(MetricName::SilverDuplicatesRemoved, table, duplicates);
    }

    pub fn run_succeeded(table: &str, secs: f64) {
        count(MetricName::SilverRunsSucceeded, table, 1);
        ::metrics::histogram!(MetricName::SilverRunDuration.as_str(), "table" => table.to_string())
            .record(secs);
    }

    pub fn run_failed(table: &str, stage: &str) {
        ::metrics::counter!(
            MetricName::SilverRunsFailed.as_str(),
            "table" => table.to_string(),
            "stage" => stage.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed_and_unique() {
        let names = [
            MetricName::CaptureFilesCaptured,
            MetricName::SilverRowsRead,
            MetricName::SilverRuleViolations,
            MetricName::SilverRunDuration,
            MetricName::SilverRunsFailed,
        ];
        let mut seen = std::collections::HashSet::new();
        for name in names {
            assert!(name.as_str().starts_with("silverize_"));
            assert!(seen.insert(name.as_str()));
        }
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        silver::rows_read("t", 3);
        silver::rule_violations("t", "negative_dpd", 1);
        silver::run_failed("t", "read");
    }
}
