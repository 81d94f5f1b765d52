use tracing::{info, info_span};

use crate::config::TableConfig;
use crate::error::{Result, Stage};
use crate::observability::metrics::capture as capture_metrics;
use crate::pipeline::ingestion::{BronzeCapture, CaptureSummary};

/// Use case capturing landing files of a table into bronze
pub struct CaptureUseCase {
    capture: BronzeCapture,
}

impl CaptureUseCase {
    pub fn new(capture: BronzeCapture) -> Self {
        Self { capture }
    }

    pub async fn run(&self, table: &TableConfig) -> Result<CaptureSummary> {
        let _span = info_span!("capture", table = %table.name).entered();
        let summary = self
            .capture
            .capture(&table.name, table.ingest_type)
            .map_err(|e| e.at_stage(&table.name, Stage::Capture))?;

        capture_metrics::files_captured(&table.name, summary.captured.len(), summary.rows());
        capture_metrics::files_skipped(&table.name, summary.skipped.len());
        info!(
            captured = summary.captured.len(),
            skipped = summary.skipped.len(),
            rows = summary.rows(),
            "Capture complete"
        );
        Ok(summary)
    }
}
