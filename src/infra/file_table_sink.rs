use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::ports::TableSinkPort;
use crate::app::silver_use_case::SilverOutput;
use crate::constants::{CANONICAL_FILE, MANIFEST_FILE, QUARANTINE_FILE, SCHEMA_FILE, STAGING_DIR};
use crate::error::{Result, SilverError};
use crate::infra::silver_layout::{table_dir, ColumnSchema, FileChecksum, Manifest, SchemaDocument};
use crate::pipeline::processing::QuarantineTable;
use crate::pipeline::table::Table;

/// Publishes silver tables under `<silver_root>/<table>/`.
///
/// All four files are written into `<silver_root>/.staging/` first and the
/// finished directory is renamed over the previous version, so readers see
/// either the old pair of tables or the new one.
#[derive(Debug, Clone)]
pub struct FileTableSink {
    silver_root: PathBuf,
}

impl FileTableSink {
    pub fn new(silver_root: impl Into<PathBuf>) -> Self {
        Self {
            silver_root: silver_root.into(),
        }
    }

    pub fn silver_root(&self) -> &Path {
        &self.silver_root
    }

    fn publish_blocking(&self, output: &SilverOutput) -> Result<Manifest> {
        let version = Uuid::new_v4();
        let staging_root = self.silver_root.join(STAGING_DIR);
        let staging = staging_root.join(format!("{}-{}", output.table, version));
        fs::create_dir_all(&staging)?;

        match self.write_version(&staging, output, version) {
            Ok(manifest) => {
                self.swap_in(&staging, &output.table, version)?;
                info!(
                    table = %output.table,
                    version = %version,
                    accepted = manifest.counts.rows_accepted,
                    quarantined = manifest.counts.rows_quarantined,
                    "Published silver table"
                );
                Ok(manifest)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!("Failed to remove staging dir {}: {}", staging.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    fn write_version(&self, dir: &Path, output: &SilverOutput, version: Uuid) -> Result<Manifest> {
        let data = canonical_ndjson(&output.canonical)?;
        let quarantine = quarantine_ndjson(&output.quarantine)?;
        write_file(&dir.join(CANONICAL_FILE), &data)?;
        write_file(&dir.join(QUARANTINE_FILE), &quarantine)?;

        let schema = SchemaDocument {
            table: output.table.clone(),
            columns: output
                .schema
                .iter()
                .map(|(name, ty)| ColumnSchema {
                    name: name.clone(),
                    column_type: *ty,
                })
                .collect(),
            audit: output.audit.clone(),
        };
        write_file(&dir.join(SCHEMA_FILE), &serde_json::to_vec_pretty(&schema)?)?;

        let manifest = Manifest {
            table: output.table.clone(),
            version,
            published_at: Utc::now(),
            counts: output.counts.clone(),
            files: vec![
                FileChecksum::of(CANONICAL_FILE, &data),
                FileChecksum::of(QUARANTINE_FILE, &quarantine),
            ],
        };
        write_file(&dir.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)?;
        Ok(manifest)
    }

    /// Move the previous version aside, rename the staged one into place, then drop the old one.
    fn swap_in(&self, staging: &Path, table: &str, version: Uuid) -> Result<()> {
        let target = table_dir(&self.silver_root, table);
        let retired = self
            .silver_root
            .join(STAGING_DIR)
            .join(format!("{}-{}.old", table, version));

        let had_previous = target.exists();
        if had_previous {
            fs::rename(&target, &retired)?;
        }
        if let Err(e) = fs::rename(staging, &target) {
            if had_previous {
                // put the last good version back
                fs::rename(&retired, &target)?;
            }
            return Err(SilverError::Io(e));
        }
        if had_previous {
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!("Failed to remove retired version {}: {}", retired.display(), e);
            }
        }
        debug!("Swapped {} into {}", staging.display(), target.display());
        Ok(())
    }
}

#[async_trait]
impl TableSinkPort for FileTableSink {
    /// Runs the file writes and renames on the blocking pool.
    async fn publish(&self, output: &SilverOutput) -> Result<Manifest> {
        let sink = self.clone();
        let output = output.clone();
        tokio::task::spawn_blocking(move || sink.publish_blocking(&output))
            .await
            .map_err(|e| SilverError::Io(std::io::Error::other(e)))?
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// One JSON object per row, keys in column order. Deterministic for a given table.
pub fn canonical_ndjson(table: &Table) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in 0..table.row_count() {
        serde_json::to_writer(&mut out, &table.row_to_json(row))?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn quarantine_ndjson(quarantine: &QuarantineTable) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for row in 0..quarantine.len() {
        serde_json::to_writer(&mut out, &quarantine.row_to_json(row))?;
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::silver_use_case::{RunAudit, RunCounts};
    use crate::pipeline::table::{Column, ColumnType, Value};
    use tempfile::tempdir;

    fn output(amounts: &[i64]) -> SilverOutput {
        let canonical = Table::from_columns(vec![Column::new(
            "amount",
            amounts.iter().map(|a| Value::Integer(*a)).collect(),
        )]);
        SilverOutput {
            table: "t".to_string(),
            schema: vec![("amount".to_string(), ColumnType::Integer)],
            counts: RunCounts {
                rows_read: amounts.len(),
                rows_accepted: amounts.len(),
                ..Default::default()
            },
            canonical,
            quarantine: QuarantineTable {
                rows: Table::from_columns(vec![Column::new("amount", Vec::new())]),
                reasons: Vec::new(),
            },
            audit: RunAudit::default(),
        }
    }

    #[tokio::test]
    async fn publishes_all_files_and_replaces_previous_version() {
        let dir = tempdir().unwrap();
        let sink = FileTableSink::new(dir.path());

        sink.publish(&output(&[1, 2])).await.unwrap();
        let manifest = sink.publish(&output(&[3])).await.unwrap();

        let table_dir = dir.path().join("t");
        assert_eq!(
            fs::read_to_string(table_dir.join(CANONICAL_FILE)).unwrap(),
            "{\"amount\":3}\n"
        );
        assert_eq!(fs::read_to_string(table_dir.join(QUARANTINE_FILE)).unwrap(), "");
        assert!(table_dir.join(SCHEMA_FILE).is_file());
        assert!(table_dir.join(MANIFEST_FILE).is_file());
        assert_eq!(manifest.files[0].bytes, 13);
        // nothing left behind in staging
        let leftovers = fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn quarantine_rows_carry_reasons() {
        let quarantine = QuarantineTable {
            rows: Table::from_columns(vec![Column::new("dpd", vec![Value::Integer(-3)])]),
            reasons: vec![vec!["negative_dpd".to_string()]],
        };
        let bytes = quarantine_ndjson(&quarantine).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "{\"dpd\":-3,\"quarantine_reasons\":[\"negative_dpd\"]}\n"
        );
    }
}
