//! On-disk shape of a published silver table.
//!
//! ```text
//! <silver_root>/<table>/
//!     data.ndjson        canonical rows, one JSON object per line
//!     quarantine.ndjson  rejected rows plus `quarantine_reasons`
//!     _schema.json       column types, cast audit, collisions
//!     _manifest.json     counts and sha256 of both data files
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::app::silver_use_case::{RunAudit, RunCounts};
use crate::pipeline::processing::QuarantineTable;
use crate::pipeline::table::{ColumnType, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Column types of both data files plus the audit of how they were decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub table: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(flatten)]
    pub audit: RunAudit,
}

impl SchemaDocument {
    pub fn column_types(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub file: String,
    pub bytes: u64,
    pub sha256: String,
}

impl FileChecksum {
    pub fn of(file: &str, contents: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(contents);
        Self {
            file: file.to_string(),
            bytes: contents.len() as u64,
            sha256: hex::encode(hasher.finalize()),
        }
    }
}

/// Published version of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub table: String,
    pub version: Uuid,
    pub published_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub files: Vec<FileChecksum>,
}

/// A published table read back from disk.
#[derive(Debug, Clone)]
pub struct PublishedTable {
    pub location: PathBuf,
    pub schema: SchemaDocument,
    pub manifest: Manifest,
    pub canonical: Table,
    pub quarantine: QuarantineTable,
}

pub fn table_dir(silver_root: &Path, table: &str) -> PathBuf {
    silver_root.join(table)
}
