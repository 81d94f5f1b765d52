use std::path::PathBuf;

use async_trait::async_trait;

use crate::app::ports::BatchSourcePort;
use crate::error::{Result, SilverError};
use crate::pipeline::ingestion::{BatchReader, BatchSet};

/// Bronze batches read from a local directory tree.
pub struct FsBatchSource {
    reader: BatchReader,
}

impl FsBatchSource {
    pub fn new(bronze_root: impl Into<PathBuf>) -> Self {
        Self {
            reader: BatchReader::new(bronze_root),
        }
    }
}

#[async_trait]
impl BatchSourcePort for FsBatchSource {
    async fn load(&self, table: &str) -> Result<BatchSet> {
        let reader = self.reader.clone();
        let table = table.to_string();
        tokio::task::spawn_blocking(move || reader.read_table(&table))
            .await
            .map_err(|e| SilverError::Io(std::io::Error::other(e)))?
    }
}
