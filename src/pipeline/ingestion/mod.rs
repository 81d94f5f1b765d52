// Pipeline ingestion: bronze capture of landing files and batch loading for silver

pub mod batch_reader;
pub mod bronze;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use batch_reader::{BatchInfo, BatchReader, BatchSet};
pub use bronze::{BronzeCapture, CaptureSummary};

/// Whether a table carries facts (events) or a reference dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestType {
    #[default]
    Fact,
    Dimension,
}

impl IngestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestType::Fact => "FACT",
            IngestType::Dimension => "DIMENSION",
        }
    }
}

impl fmt::Display for IngestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
