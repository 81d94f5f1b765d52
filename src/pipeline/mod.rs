// Data pipeline: the shared table model, bronze ingestion, and the silver stages

pub mod ingestion;
pub mod processing;
pub mod table;

pub use table::{Column, ColumnType, Table, Value};
