/// Table identifiers shipped in the default configuration
pub const CREDIT_EVENTS_TABLE: &str = "credit_events";
pub const REGION_REFERENCE_TABLE: &str = "region_reference";

// Capture tags appended to every bronze row
pub const INGEST_TIMESTAMP_COLUMN: &str = "ingest_timestamp";
pub const INGEST_DATE_COLUMN: &str = "ingest_date";
pub const SOURCE_SYSTEM_COLUMN: &str = "source_system";
pub const INGEST_TYPE_COLUMN: &str = "ingest_type";
pub const SOURCE_FILE_COLUMN: &str = "source_file";

/// Partition directory prefix, e.g. `ingest_date=2024-05-01`
pub const PARTITION_PREFIX: &str = "ingest_date=";

// Silver output layout
pub const CANONICAL_FILE: &str = "data.ndjson";
pub const QUARANTINE_FILE: &str = "quarantine.ndjson";
pub const SCHEMA_FILE: &str = "_schema.json";
pub const MANIFEST_FILE: &str = "_manifest.json";
pub const STAGING_DIR: &str = ".staging";
pub const QUARANTINE_REASONS_FIELD: &str = "quarantine_reasons";

/// Batch file extensions the reader understands
pub const CSV_EXTENSION: &str = "csv";
pub const NDJSON_EXTENSIONS: &[&str] = &["ndjson", "jsonl"];

// Heuristic defaults
pub const DEFAULT_NUMERIC_THRESHOLD: f64 = 0.9;
pub const DEFAULT_TEMPORAL_THRESHOLD: f64 = 0.8;
pub const DEFAULT_AMBIGUITY_BAND: f64 = 0.05;
pub const DEFAULT_TEMPORAL_KEYWORDS: &[&str] = &["date", "time", "ts", "timestamp", "fecha", "hora"];
pub const DEFAULT_NULL_TOKENS: &[&str] = &["", "nan", "none"];

// Built-in quality rule names
pub const RULE_NEGATIVE_DPD: &str = "negative_dpd";
pub const RULE_NEGATIVE_BALANCE: &str = "negative_balance";
pub const RULE_INVALID_RATE: &str = "invalid_rate";
pub const RULE_MISSING_CRITICAL_FIELD: &str = "missing_critical_field";
