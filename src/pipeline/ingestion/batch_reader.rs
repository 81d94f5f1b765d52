use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{CSV_EXTENSION, INGEST_DATE_COLUMN, NDJSON_EXTENSIONS, PARTITION_PREFIX};
use crate::error::{Result, SilverError};
use crate::pipeline::processing::columns::normalize_column_name;
use crate::pipeline::processing::inference::parse_temporal;
use crate::pipeline::table::{Column, Table, Value};

/// Where one loaded batch came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Path relative to the table's bronze directory
    pub path: String,
    pub rows: usize,
    pub partition: Option<NaiveDate>,
    /// Ingest-date values that could not be parsed and were nulled
    #[serde(default)]
    pub partition_key_nulled: usize,
}

/// All batches of one table concatenated in deterministic order.
#[derive(Debug, Clone)]
pub struct BatchSet {
    pub table: Table,
    pub batches: Vec<BatchInfo>,
}

/// Loads every bronze batch file of a table into one [`Table`].
#[derive(Debug, Clone)]
pub struct BatchReader {
    bronze_root: PathBuf,
}

impl BatchReader {
    pub fn new(bronze_root: impl Into<PathBuf>) -> Self {
        Self {
            bronze_root: bronze_root.into(),
        }
    }

    pub fn table_location(&self, table: &str) -> PathBuf {
        self.bronze_root.join(table)
    }

    /// Batch files of `table`, sorted lexicographically by their path under the table directory.
    pub fn discover(&self, table: &str) -> Result<Vec<PathBuf>> {
        let location = self.table_location(table);
        let mut files = Vec::new();
        if location.is_dir() {
            collect_batch_files(&location, &mut files)?;
        }
        if files.is_empty() {
            return Err(SilverError::SourceNotFound {
                table: table.to_string(),
                location: location.display().to_string(),
            });
        }
        files.sort();
        Ok(files)
    }

    /// Read every batch of `table` (in parallel) and stack them over the union of their columns.
    pub fn read_table(&self, table: &str) -> Result<BatchSet> {
        let location = self.table_location(table);
        let files = self.discover(table)?;
        info!("Reading {} batch file(s) for {}", files.len(), table);

        let loaded: Vec<(BatchInfo, Table)> = files
            .par_iter()
            .map(|path| {
                let (batch, partition_key_nulled) = read_batch_file(table, path)?;
                let info = BatchInfo {
                    path: path
                        .strip_prefix(&location)
                        .unwrap_or(path)
                        .display()
                        .to_string(),
                    rows: batch.row_count(),
                    partition: partition_date_from_path(path),
                    partition_key_nulled,
                };
                Ok((info, batch))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut batches = Vec::with_capacity(loaded.len());
        let mut tables = Vec::with_capacity(loaded.len());
        for (info, batch) in loaded {
            debug!("Loaded batch {} ({} rows)", info.path, info.rows);
            batches.push(info);
            tables.push(batch);
        }

        let table = Table::concat(tables);
        info!(
            "Unified {} batch(es) into {} rows x {} columns",
            batches.len(),
            table.row_count(),
            table.column_count()
        );
        Ok(BatchSet { table, batches })
    }
}

fn collect_batch_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // hidden and marker files (e.g. `_SUCCESS`, `.tmp`) are not batches
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        if path.is_dir() {
            collect_batch_files(&path, out)?;
        } else if batch_format(&path).is_some() {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchFormat {
    Csv,
    NdJson,
}

fn batch_format(path: &Path) -> Option<BatchFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if ext == CSV_EXTENSION {
        Some(BatchFormat::Csv)
    } else if NDJSON_EXTENSIONS.contains(&ext.as_str()) {
        Some(BatchFormat::NdJson)
    } else {
        None
    }
}

/// Load one batch file with every cell as text, then normalize its partition key.
/// Also returns how many partition-key values could not be parsed.
pub fn read_batch_file(table: &str, path: &Path) -> Result<(Table, usize)> {
    let mut batch = match batch_format(path) {
        Some(BatchFormat::Csv) => read_csv(table, path)?,
        Some(BatchFormat::NdJson) => read_ndjson(table, path)?,
        None => {
            return Err(SilverError::Config(format!(
                "unsupported batch file: {}",
                path.display()
            )))
        }
    };
    let nulled = normalize_partition_key(&mut batch, partition_date_from_path(path));
    if nulled > 0 {
        warn!(
            file = %path.display(),
            nulled,
            "Unparseable {} values set to null",
            INGEST_DATE_COLUMN
        );
    }
    Ok((batch, nulled))
}

fn read_csv(table: &str, path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    ensure_unique_headers(table, path, &headers)?;

    let mut cells: Vec<Vec<Value>> = headers.iter().map(|_| Vec::new()).collect();
    for record in reader.records() {
        let record = record?;
        for (slot, field) in record.iter().enumerate() {
            // empty CSV fields carry no value at all
            let value = if field.is_empty() {
                Value::Null
            } else {
                Value::text(field)
            };
            cells[slot].push(value);
        }
    }

    Ok(Table::from_columns(
        headers
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect(),
    ))
}

fn read_ndjson(table: &str, path: &Path) -> Result<Table> {
    let reader = BufReader::new(File::open(path)?);
    let mut order: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut cells: Vec<Vec<Value>> = Vec::new();
    let mut rows = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let object = match serde_json::from_str::<serde_json::Value>(&line)? {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(SilverError::SchemaConflict {
                    table: table.to_string(),
                    column: "<row>".to_string(),
                    detail: format!("{} line {} is not a JSON object", path.display(), line_no + 1),
                })
            }
        };

        for (key, value) in object {
            let slot = match index.get(&key) {
                Some(slot) => *slot,
                None => {
                    let slot = order.len();
                    index.insert(key.clone(), slot);
                    order.push(key);
                    cells.push(vec![Value::Null; rows]);
                    slot
                }
            };
            cells[slot].push(json_to_text(value));
        }
        rows += 1;
        for column in cells.iter_mut() {
            if column.len() < rows {
                column.push(Value::Null);
            }
        }
    }

    Ok(Table::from_columns(
        order
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect(),
    ))
}

fn json_to_text(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

fn ensure_unique_headers(table: &str, path: &Path, headers: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for header in headers {
        if !seen.insert(header.as_str()) {
            return Err(SilverError::SchemaConflict {
                table: table.to_string(),
                column: header.clone(),
                detail: format!("header appears twice in {}", path.display()),
            });
        }
    }
    Ok(())
}

/// Date encoded in the nearest `ingest_date=YYYY-MM-DD` directory of `path`.
pub fn partition_date_from_path(path: &Path) -> Option<NaiveDate> {
    path.ancestors().find_map(|dir| {
        dir.file_name()?
            .to_str()?
            .strip_prefix(PARTITION_PREFIX)
            .and_then(parse_partition_date)
    })
}

/// Canonical date for a raw partition-key value (plain date or any supported timestamp).
pub fn parse_partition_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_temporal(trimmed).map(|ts| ts.date()))
}

/// Turn the batch's ingest-date column into real dates so equal days compare equal across
/// batches; batches without the column inherit it from their partition directory.
/// Returns the number of values that failed to parse.
fn normalize_partition_key(batch: &mut Table, from_dir: Option<NaiveDate>) -> usize {
    let existing = batch
        .columns()
        .iter()
        .position(|c| normalize_column_name(&c.name) == INGEST_DATE_COLUMN);

    let mut nulled = 0;
    match existing {
        Some(idx) => {
            let columns = std::mem::take(batch).into_columns();
            let columns = columns
                .into_iter()
                .enumerate()
                .map(|(i, column)| {
                    if i != idx {
                        return column;
                    }
                    let cells = column
                        .cells
                        .into_iter()
                        .map(|cell| match cell {
                            Value::Text(s) => match parse_partition_date(&s) {
                                Some(date) => Value::Date(date),
                                None => {
                                    nulled += 1;
                                    Value::Null
                                }
                            },
                            other => other,
                        })
                        .collect();
                    Column::new(column.name, cells)
                })
                .collect();
            *batch = Table::from_columns(columns);
        }
        None => {
            if let Some(date) = from_dir {
                let rows = batch.row_count();
                batch.push_column(Column::new(INGEST_DATE_COLUMN, vec![Value::Date(date); rows]));
            }
        }
    }
    nulled
}
