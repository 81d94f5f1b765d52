use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{
    CSV_EXTENSION, INGEST_DATE_COLUMN, INGEST_TIMESTAMP_COLUMN, INGEST_TYPE_COLUMN,
    PARTITION_PREFIX, SOURCE_FILE_COLUMN, SOURCE_SYSTEM_COLUMN,
};
use crate::error::Result;
use crate::pipeline::ingestion::IngestType;
use crate::pipeline::table::DATE_FORMAT;

/// One landing file copied into bronze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFile {
    pub file: String,
    pub rows: usize,
    pub bronze_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub table: String,
    pub partition: Option<NaiveDate>,
    pub captured: Vec<CapturedFile>,
    /// Landing files already present in some bronze partition
    pub skipped: Vec<String>,
}

impl CaptureSummary {
    pub fn rows(&self) -> usize {
        self.captured.iter().map(|f| f.rows).sum()
    }
}

/// Copies landing CSV files into date-partitioned bronze batches, tagging every row.
#[derive(Debug, Clone)]
pub struct BronzeCapture {
    landing_root: PathBuf,
    bronze_root: PathBuf,
}

impl BronzeCapture {
    pub fn new(landing_root: impl Into<PathBuf>, bronze_root: impl Into<PathBuf>) -> Self {
        Self {
            landing_root: landing_root.into(),
            bronze_root: bronze_root.into(),
        }
    }

    pub fn capture(&self, table: &str, ingest_type: IngestType) -> Result<CaptureSummary> {
        self.capture_at(table, ingest_type, Utc::now())
    }

    /// Capture with an explicit clock; all files of one call share the timestamp.
    pub fn capture_at(
        &self,
        table: &str,
        ingest_type: IngestType,
        now: DateTime<Utc>,
    ) -> Result<CaptureSummary> {
        let landing = self.landing_root.join(table);
        let bronze_table = self.bronze_root.join(table);
        let date = now.date_naive();
        let mut summary = CaptureSummary {
            table: table.to_string(),
            ..Default::default()
        };

        let files = landing_files(&landing)?;
        if files.is_empty() {
            info!("No landing files found for {} in {}", table, landing.display());
            return Ok(summary);
        }

        let partition_dir = bronze_table.join(format!(
            "{}{}",
            PARTITION_PREFIX,
            date.format(DATE_FORMAT)
        ));
        let tags = Tags {
            ingest_timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            ingest_date: date.format(DATE_FORMAT).to_string(),
            source_system: table.to_string(),
            ingest_type: ingest_type.as_str().to_string(),
        };

        for path in files {
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if already_captured(&bronze_table, &file_name)? {
                debug!("Skipping {} for {}: already in bronze", file_name, table);
                summary.skipped.push(file_name);
                continue;
            }

            fs::create_dir_all(&partition_dir)?;
            let target = partition_dir.join(&file_name);
            let rows = write_tagged_batch(&path, &target, &file_name, &tags)?;
            info!("Captured {} ({} rows) into {}", file_name, rows, target.display());
            summary.captured.push(CapturedFile {
                file: file_name,
                rows,
                bronze_path: target,
            });
        }

        if !summary.captured.is_empty() {
            summary.partition = Some(date);
        }
        Ok(summary)
    }
}

struct Tags {
    ingest_timestamp: String,
    ingest_date: String,
    source_system: String,
    ingest_type: String,
}

impl Tags {
    fn columns() -> [&'static str; 5] {
        [
            INGEST_TIMESTAMP_COLUMN,
            INGEST_DATE_COLUMN,
            SOURCE_SYSTEM_COLUMN,
            INGEST_TYPE_COLUMN,
            SOURCE_FILE_COLUMN,
        ]
    }

    fn values<'a>(&'a self, source_file: &'a str) -> [&'a str; 5] {
        [
            &self.ingest_timestamp,
            &self.ingest_date,
            &self.source_system,
            &self.ingest_type,
            source_file,
        ]
    }
}

fn landing_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(CSV_EXTENSION))
            .unwrap_or(false);
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn already_captured(bronze_table: &Path, file_name: &str) -> Result<bool> {
    if !bronze_table.is_dir() {
        return Ok(false);
    }
    for entry in fs::read_dir(bronze_table)? {
        let partition = entry?.path();
        if partition.is_dir() && partition.join(file_name).is_file() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Copy `source` to `target` with the tag columns set on every row. A header that
/// already names a tag column is overwritten in place rather than duplicated.
fn write_tagged_batch(source: &Path, target: &Path, file_name: &str, tags: &Tags) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(source)?;
    let mut headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut slots = Vec::with_capacity(5);
    for column in Tags::columns() {
        match headers.iter().position(|h| h.trim() == column) {
            Some(slot) => {
                warn!("{} already carries {}, overwriting", file_name, column);
                slots.push(slot);
            }
            None => {
                slots.push(headers.len());
                headers.push(column.to_string());
            }
        }
    }

    let staging = target.with_extension("csv.partial");
    let values = tags.values(file_name);
    match copy_tagged_records(&mut reader, &staging, &headers, &slots, &values) {
        Ok(rows) => {
            fs::rename(&staging, target)?;
            Ok(rows)
        }
        Err(e) => {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_file(&staging) {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
            }
            Err(e)
        }
    }
}

fn copy_tagged_records(
    reader: &mut csv::Reader<fs::File>,
    staging: &Path,
    headers: &[String],
    slots: &[usize],
    values: &[&str],
) -> Result<usize> {
    let mut writer = csv::Writer::from_path(staging)?;
    writer.write_record(headers)?;

    let mut rows = 0;
    for record in reader.records() {
        let record = record?;
        let mut fields: Vec<&str> = record.iter().collect();
        fields.resize(headers.len(), "");
        for (slot, value) in slots.iter().zip(values.iter()) {
            fields[*slot] = *value;
        }
        writer.write_record(&fields)?;
        rows += 1;
    }
    writer.flush()?;
    Ok(rows)
}
