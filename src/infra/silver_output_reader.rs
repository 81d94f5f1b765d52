use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use crate::app::ports::PublishedTablePort;
use crate::constants::{
    CANONICAL_FILE, MANIFEST_FILE, QUARANTINE_FILE, QUARANTINE_REASONS_FIELD, SCHEMA_FILE,
};
use crate::error::{Result, SilverError};
use crate::infra::silver_layout::{table_dir, FileChecksum, Manifest, PublishedTable, SchemaDocument};
use crate::pipeline::processing::QuarantineTable;
use crate::pipeline::table::{Column, ColumnType, Table, Value};

/// Reads published silver tables back into memory.
pub struct SilverOutputReader {
    silver_root: PathBuf,
}

impl SilverOutputReader {
    pub fn new(silver_root: impl Into<PathBuf>) -> Self {
        Self {
            silver_root: silver_root.into(),
        }
    }

    pub fn read_table(&self, table: &str) -> Result<PublishedTable> {
        let location = table_dir(&self.silver_root, table);
        let manifest_path = location.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(SilverError::SourceNotFound {
                table: table.to_string(),
                location: location.display().to_string(),
            });
        }

        let manifest: Manifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
        let schema: SchemaDocument = serde_json::from_slice(&fs::read(location.join(SCHEMA_FILE))?)?;
        let types = schema.column_types();

        let data = read_verified(&location, CANONICAL_FILE, &manifest)?;
        let (canonical, _) = decode_ndjson(&data, &types, false)?;

        let quarantine_bytes = read_verified(&location, QUARANTINE_FILE, &manifest)?;
        let (rows, reasons) = decode_ndjson(&quarantine_bytes, &types, true)?;

        Ok(PublishedTable {
            location,
            schema,
            manifest,
            canonical,
            quarantine: QuarantineTable { rows, reasons },
        })
    }
}

#[async_trait]
impl PublishedTablePort for SilverOutputReader {
    async fn read(&self, table: &str) -> Result<PublishedTable> {
        self.read_table(table)
    }
}

fn read_verified(dir: &Path, file: &str, manifest: &Manifest) -> Result<Vec<u8>> {
    let bytes = fs::read(dir.join(file))?;
    match manifest.files.iter().find(|f| f.file == file) {
        Some(expected) if *expected != FileChecksum::of(file, &bytes) => {
            warn!(
                file,
                expected = %expected.sha256,
                "Checksum mismatch against manifest"
            );
        }
        Some(_) => {}
        None => warn!(file, "File not listed in manifest"),
    }
    Ok(bytes)
}

/// Decode NDJSON rows into the declared column types, optionally collecting quarantine reasons.
fn decode_ndjson(
    bytes: &[u8],
    types: &[(String, ColumnType)],
    with_reasons: bool,
) -> Result<(Table, Vec<Vec<String>>)> {
    let mut cells: Vec<Vec<Value>> = types.iter().map(|_| Vec::new()).collect();
    let mut reasons = Vec::new();

    for line in bytes.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let row: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(line)?;
        for ((name, ty), column) in types.iter().zip(cells.iter_mut()) {
            let cell = row
                .get(name)
                .map(|json| Value::from_json(json, *ty))
                .unwrap_or(Value::Null);
            column.push(cell);
        }
        if with_reasons {
            let row_reasons = row
                .get(QUARANTINE_REASONS_FIELD)
                .and_then(|r| r.as_array())
                .map(|r| {
                    r.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            reasons.push(row_reasons);
        }
    }

    let table = Table::from_columns(
        types
            .iter()
            .zip(cells)
            .map(|((name, _), cells)| Column::new(name.clone(), cells))
            .collect(),
    );
    Ok((table, reasons))
}
