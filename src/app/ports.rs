use async_trait::async_trait;

use crate::app::silver_use_case::SilverOutput;
use crate::error::Result;
use crate::infra::silver_layout::{Manifest, PublishedTable};
use crate::pipeline::ingestion::BatchSet;

// Silver-side ports

/// Supplies every bronze batch of one table, already unified into a single table.
#[async_trait]
pub trait BatchSourcePort: Send + Sync {
    async fn load(&self, table: &str) -> Result<BatchSet>;
}

/// Replaces the published canonical and quarantine tables of one table as a unit.
#[async_trait]
pub trait TableSinkPort: Send + Sync {
    async fn publish(&self, output: &SilverOutput) -> Result<Manifest>;
}

/// Reads a published table back for reporting.
#[async_trait]
pub trait PublishedTablePort: Send + Sync {
    async fn read(&self, table: &str) -> Result<PublishedTable>;
}
