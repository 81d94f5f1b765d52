// Pipeline processing: the silver stages, leaf-first in execution order

pub mod columns;
pub mod emptiness;
pub mod inference;
pub mod strings;
pub mod quality_gate;
pub mod dedup;

pub use columns::{normalize_column_name, normalize_columns, ColumnCollision};
pub use dedup::{deduplicate, deduplicate_quarantine, row_fingerprint, DedupOutcome};
pub use emptiness::{drop_fully_empty, EmptinessReport};
pub use inference::{infer, infer_table, CastDecision, CastOutcome, InferredColumn};
pub use quality_gate::{
    DefaultQualityGate, GateOutcome, QualityGate, QualityGateConfig, QuarantineTable, RuleBinding,
    RuleCheck,
};
pub use strings::canonicalize_strings;
