use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};

use crate::app::ports::{BatchSourcePort, TableSinkPort};
use crate::config::{CollisionPolicy, Config, InferenceConfig, TableConfig};
use crate::constants::QUARANTINE_REASONS_FIELD;
use crate::error::{Result, SilverError, Stage};
use crate::infra::silver_layout::Manifest;
use crate::observability::metrics::silver as silver_metrics;
use crate::pipeline::ingestion::{BatchInfo, BatchSet};
use crate::pipeline::processing::{
    canonicalize_strings, deduplicate, deduplicate_quarantine, drop_fully_empty, infer_table,
    normalize_columns, CastDecision, CastOutcome, ColumnCollision, DefaultQualityGate,
    EmptinessReport, QualityGate, QuarantineTable,
};
use crate::pipeline::table::{ColumnType, Table};

/// Row accounting for one run. Every row read ends up in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub rows_read: usize,
    pub empty_rows_dropped: usize,
    pub rows_accepted: usize,
    pub rows_quarantined: usize,
    pub duplicates_removed: usize,
    pub quarantine_duplicates_removed: usize,
}

impl RunCounts {
    pub fn accounted(&self) -> usize {
        self.empty_rows_dropped
            + self.rows_accepted
            + self.rows_quarantined
            + self.duplicates_removed
            + self.quarantine_duplicates_removed
    }

    pub fn is_complete(&self) -> bool {
        self.accounted() == self.rows_read
    }
}

/// Everything a run decided on the way, persisted next to the data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAudit {
    pub batches: Vec<BatchInfo>,
    pub collisions: Vec<ColumnCollision>,
    pub emptiness: EmptinessReport,
    pub casts: Vec<CastDecision>,
    pub violation_counts: BTreeMap<String, usize>,
}

/// Canonical and quarantine tables of one table, ready to publish.
#[derive(Debug, Clone)]
pub struct SilverOutput {
    pub table: String,
    pub schema: Vec<(String, ColumnType)>,
    pub canonical: Table,
    pub quarantine: QuarantineTable,
    pub counts: RunCounts,
    pub audit: RunAudit,
}

/// Settings shared by every table run.
#[derive(Debug, Clone, Default)]
pub struct SilverSettings {
    pub inference: InferenceConfig,
    pub collision_policy: CollisionPolicy,
}

impl From<&Config> for SilverSettings {
    fn from(config: &Config) -> Self {
        Self {
            inference: config.inference.clone(),
            collision_policy: config.normalize.collision_policy,
        }
    }
}

/// Use case turning the bronze batches of one table into its silver outputs
pub struct SilverUseCase {
    table: TableConfig,
    settings: SilverSettings,
    quality_gate: Arc<dyn QualityGate + Send + Sync>,
    source: Arc<dyn BatchSourcePort>,
    sink: Arc<dyn TableSinkPort>,
}

impl SilverUseCase {
    pub fn new(
        table: TableConfig,
        settings: SilverSettings,
        quality_gate: Arc<dyn QualityGate + Send + Sync>,
        source: Arc<dyn BatchSourcePort>,
        sink: Arc<dyn TableSinkPort>,
    ) -> Self {
        Self {
            table,
            settings,
            quality_gate,
            source,
            sink,
        }
    }

    /// Create a use case gated by the table's configured rule bindings
    pub fn with_default_quality_gate(
        table: TableConfig,
        settings: SilverSettings,
        source: Arc<dyn BatchSourcePort>,
        sink: Arc<dyn TableSinkPort>,
    ) -> Self {
        let quality_gate = Arc::new(DefaultQualityGate::for_table(&table));
        Self::new(table, settings, quality_gate, source, sink)
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// Load, transform and publish. Nothing is published unless every stage succeeds.
    pub async fn run(&self) -> Result<Manifest> {
        let name = self.table.name.clone();
        let span = info_span!("silver", table = %name);
        async move {
            let started = Instant::now();
            let result = self.run_stages().await;
            match &result {
                Ok(manifest) => {
                    silver_metrics::run_succeeded(&name, started.elapsed().as_secs_f64());
                    info!(
                        accepted = manifest.counts.rows_accepted,
                        quarantined = manifest.counts.rows_quarantined,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Silver run complete"
                    );
                }
                Err(e) => {
                    let stage = e.stage().map(|s| s.as_str()).unwrap_or("unknown");
                    silver_metrics::run_failed(&name, stage);
                    error!(stage, "Silver run failed: {}", e);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self) -> Result<Manifest> {
        let name = self.table.name.as_str();
        let batches = self
            .source
            .load(name)
            .await
            .map_err(|e| e.at_stage(name, Stage::Read))?;

        let table = self.table.clone();
        let settings = self.settings.clone();
        let quality_gate = self.quality_gate.clone();
        let output = tokio::task::spawn_blocking(move || {
            transform_batches(&table, &settings, quality_gate.as_ref(), batches)
        })
        .await
        .map_err(|e| SilverError::Invariant(format!("transform task for '{}' aborted: {}", name, e)))??;
        self.record_metrics(&output);

        self.sink
            .publish(&output)
            .await
            .map_err(|e| e.at_stage(name, Stage::Write))
    }

    /// The in-memory stages, run on the calling thread.
    pub fn transform(&self, batches: BatchSet) -> Result<SilverOutput> {
        transform_batches(&self.table, &self.settings, self.quality_gate.as_ref(), batches)
    }

    fn record_metrics(&self, output: &SilverOutput) {
        let name = output.table.as_str();
        let counts = &output.counts;
        silver_metrics::rows_read(name, counts.rows_read);
        silver_metrics::column_collisions(name, output.audit.collisions.len());
        silver_metrics::emptiness(
            name,
            output.audit.emptiness.dropped_columns.len(),
            counts.empty_rows_dropped,
        );
        for cast in &output.audit.casts {
            if matches!(cast.outcome, CastOutcome::Numeric | CastOutcome::Temporal) {
                silver_metrics::column_cast(name, cast.target_type.as_str(), cast.nulled, cast.ambiguous);
            }
        }
        for (rule, rows) in &output.audit.violation_counts {
            silver_metrics::rule_violations(name, rule, *rows);
        }
        silver_metrics::outcome(
            name,
            counts.rows_accepted,
            counts.rows_quarantined,
            counts.duplicates_removed + counts.quarantine_duplicates_removed,
        );
    }
}

/// The in-memory stages, in order: normalize names, drop empties, infer types,
/// canonicalize strings, gate, deduplicate.
fn transform_batches(
    config: &TableConfig,
    settings: &SilverSettings,
    quality_gate: &dyn QualityGate,
    batches: BatchSet,
) -> Result<SilverOutput> {
    let name = config.name.as_str();
    let null_tokens = settings.inference.null_tokens();

    let BatchSet { table, batches } = batches;
    let rows_read = table.row_count();
    info!(rows = rows_read, batches = batches.len(), "Loaded bronze batches");

    let (table, collisions) = normalize_columns(table, name, settings.collision_policy)
        .map_err(|e| e.at_stage(name, Stage::NormalizeColumns))?;

    let (table, emptiness) = drop_fully_empty(table, &null_tokens);

    let (table, casts) = infer_table(table, &settings.inference);

    let table = canonicalize_strings(table);
    let schema = table.schema();

    if table.column_index(QUARANTINE_REASONS_FIELD).is_some() {
        return Err(SilverError::SchemaConflict {
            table: name.to_string(),
            column: QUARANTINE_REASONS_FIELD.to_string(),
            detail: "name is reserved for the quarantine reasons of each row".to_string(),
        }
        .at_stage(name, Stage::QualityGate));
    }
    let gated = quality_gate
        .assess(table)
        .map_err(|e| e.at_stage(name, Stage::QualityGate))?;

    let accepted = deduplicate(gated.accepted);
    let quarantine = deduplicate_quarantine(gated.quarantine);

    let counts = RunCounts {
        rows_read,
        empty_rows_dropped: emptiness.dropped_rows,
        rows_accepted: accepted.table.row_count(),
        rows_quarantined: quarantine.table.len(),
        duplicates_removed: accepted.removed,
        quarantine_duplicates_removed: quarantine.removed,
    };
    if !counts.is_complete() {
        return Err(SilverError::Stage {
            table: name.to_string(),
            stage: Stage::Deduplicate,
            source: Box::new(SilverError::Invariant(format!(
                "row accounting mismatch: read {} but accounted for {}",
                counts.rows_read,
                counts.accounted()
            ))),
        });
    }

    let audit = RunAudit {
        batches,
        collisions,
        emptiness,
        casts,
        violation_counts: quarantine.table.violation_counts(),
    };

    Ok(SilverOutput {
        table: name.to_string(),
        schema,
        canonical: accepted.table,
        quarantine: quarantine.table,
        counts,
        audit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RULE_NEGATIVE_DPD;
    use crate::pipeline::table::{Column, Value};

    struct NoSource;

    #[async_trait::async_trait]
    impl BatchSourcePort for NoSource {
        async fn load(&self, table: &str) -> Result<BatchSet> {
            Err(SilverError::SourceNotFound {
                table: table.to_string(),
                location: "nowhere".to_string(),
            })
        }
    }

    struct NoSink;

    #[async_trait::async_trait]
    impl TableSinkPort for NoSink {
        async fn publish(&self, _output: &SilverOutput) -> Result<Manifest> {
            panic!("nothing should be published");
        }
    }

    fn use_case(table: TableConfig) -> SilverUseCase {
        SilverUseCase::with_default_quality_gate(
            table,
            SilverSettings::default(),
            Arc::new(NoSource),
            Arc::new(NoSink),
        )
    }

    fn batch(columns: Vec<Column>) -> BatchSet {
        BatchSet {
            table: Table::from_columns(columns),
            batches: Vec::new(),
        }
    }

    #[test]
    fn transform_runs_every_stage() {
        let mut config = TableConfig::credit_events();
        config.critical_fields.clear();
        let output = use_case(config)
            .transform(batch(vec![
                Column::from_text("Amount", &[Some("100"), Some("not_a_number"), Some("200"), Some("100")]),
                Column::from_text("Days Past Due", &[Some("5"), Some("5"), Some("-3"), Some("5")]),
                Column::from_text("Notes ", &[Some(" ok "), None, Some("nan"), Some("ok")]),
                Column::from_text("empty", &[None::<&str>, None, None, None]),
            ]))
            .unwrap();

        assert_eq!(
            output.schema,
            vec![
                ("amount".to_string(), ColumnType::Text),
                ("days_past_due".to_string(), ColumnType::Integer),
                ("notes".to_string(), ColumnType::Text),
            ]
        );
        assert_eq!(output.counts.rows_read, 4);
        assert_eq!(output.counts.rows_accepted, 2);
        assert_eq!(output.counts.rows_quarantined, 1);
        assert_eq!(output.counts.duplicates_removed, 1);
        assert!(output.counts.is_complete());
        assert_eq!(output.quarantine.reasons[0], vec![RULE_NEGATIVE_DPD.to_string()]);
        assert_eq!(output.audit.emptiness.dropped_columns, vec!["empty"]);
        assert_eq!(
            output.canonical.column("notes").unwrap().cells,
            vec![Value::text("ok"), Value::Null]
        );
    }

    #[test]
    fn schema_conflict_names_the_stage() {
        let mut settings = SilverSettings::default();
        settings.collision_policy = CollisionPolicy::Fail;
        let use_case = SilverUseCase::with_default_quality_gate(
            TableConfig::region_reference(),
            settings,
            Arc::new(NoSource),
            Arc::new(NoSink),
        );

        let err = use_case
            .transform(batch(vec![
                Column::from_text("Region", &[Some("n")]),
                Column::from_text("region", &[Some("s")]),
            ]))
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::NormalizeColumns));
    }

    #[test]
    fn reserved_reasons_column_is_a_schema_conflict() {
        let err = use_case(TableConfig::region_reference())
            .transform(batch(vec![
                Column::from_text("region", &[Some("n")]),
                Column::from_text("Quarantine Reasons", &[Some("[]")]),
            ]))
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::QualityGate));
        match err {
            SilverError::Stage { source, .. } => {
                assert!(matches!(*source, SilverError::SchemaConflict { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Loses every row, so the run cannot account for what it read.
    struct LosingGate;

    impl QualityGate for LosingGate {
        fn assess(&self, table: Table) -> Result<crate::pipeline::processing::GateOutcome> {
            let empty = table.select_rows(&[]);
            Ok(crate::pipeline::processing::GateOutcome {
                accepted: empty.clone(),
                quarantine: QuarantineTable {
                    rows: empty,
                    reasons: Vec::new(),
                },
            })
        }
    }

    #[test]
    fn lost_rows_are_an_invariant_failure() {
        let use_case = SilverUseCase::new(
            TableConfig::region_reference(),
            SilverSettings::default(),
            Arc::new(LosingGate),
            Arc::new(NoSource),
            Arc::new(NoSink),
        );

        let err = use_case
            .transform(batch(vec![Column::from_text("region", &[Some("n"), Some("s")])]))
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Deduplicate));
        match err {
            SilverError::Stage { source, .. } => assert!(matches!(*source, SilverError::Invariant(_))),
            other => panic!("unexpected error: {other}"),
        }
    }

    struct OneBatch;

    #[async_trait::async_trait]
    impl BatchSourcePort for OneBatch {
        async fn load(&self, _table: &str) -> Result<BatchSet> {
            Ok(batch(vec![Column::from_text(
                "region",
                &[Some("north"), Some("south"), Some("north")],
            )]))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        published: std::sync::Mutex<Vec<RunCounts>>,
    }

    #[async_trait::async_trait]
    impl TableSinkPort for RecordingSink {
        async fn publish(&self, output: &SilverOutput) -> Result<Manifest> {
            self.published.lock().unwrap().push(output.counts.clone());
            Ok(Manifest {
                table: output.table.clone(),
                version: uuid::Uuid::nil(),
                published_at: chrono::Utc::now(),
                counts: output.counts.clone(),
                files: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn run_transforms_on_the_blocking_pool_then_publishes() {
        let sink = Arc::new(RecordingSink::default());
        let use_case = SilverUseCase::with_default_quality_gate(
            TableConfig::region_reference(),
            SilverSettings::default(),
            Arc::new(OneBatch),
            sink.clone(),
        );

        let manifest = use_case.run().await.unwrap();

        assert_eq!(manifest.counts.rows_accepted, 2);
        assert_eq!(manifest.counts.duplicates_removed, 1);
        assert_eq!(sink.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_source_fails_at_read_without_publishing() {
        let err = use_case(TableConfig::credit_events()).run().await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Read));
        assert!(err.to_string().contains("credit_events"));
    }
}
