use std::fmt;

use thiserror::Error;

/// Pipeline step a table run was executing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Capture,
    Read,
    NormalizeColumns,
    QualityGate,
    Deduplicate,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Read => "read",
            Stage::NormalizeColumns => "normalize_columns",
            Stage::QualityGate => "quality_gate",
            Stage::Deduplicate => "deduplicate",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SilverError {
    #[error("no batch files found for table '{table}' under {location}")]
    SourceNotFound { table: String, location: String },

    #[error("schema conflict in table '{table}' on column '{column}': {detail}")]
    SchemaConflict {
        table: String,
        column: String,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A run broke one of its own bookkeeping guarantees
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("table '{table}' failed at stage '{stage}': {source}")]
    Stage {
        table: String,
        stage: Stage,
        #[source]
        source: Box<SilverError>,
    },
}

impl SilverError {
    /// Attach the table and stage to an error unless it already carries them.
    pub fn at_stage(self, table: &str, stage: Stage) -> Self {
        match self {
            err @ SilverError::Stage { .. } => err,
            other => SilverError::Stage {
                table: table.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage this error was raised in, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SilverError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SilverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_names_table_and_stage() {
        let err = SilverError::SourceNotFound {
            table: "credit_events".to_string(),
            location: "data/bronze/credit_events".to_string(),
        }
        .at_stage("credit_events", Stage::Read);

        assert_eq!(err.stage(), Some(Stage::Read));
        let message = err.to_string();
        assert!(message.contains("credit_events"));
        assert!(message.contains("'read'"));
    }

    #[test]
    fn stage_wrapping_is_not_nested() {
        let err = SilverError::Config("bad".to_string())
            .at_stage("t", Stage::QualityGate)
            .at_stage("t", Stage::Write);
        assert_eq!(err.stage(), Some(Stage::QualityGate));
    }
}
