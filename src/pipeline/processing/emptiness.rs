use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::table::{NullTokens, Table};

/// What the emptiness filter removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptinessReport {
    pub dropped_columns: Vec<String>,
    pub dropped_rows: usize,
}

/// Drop all-null columns, then rows with no informative cell.
///
/// Columns go first: removing a column can leave a row with nothing but blanks.
/// A cell is informative when it is neither null nor a null token.
pub fn drop_fully_empty(mut table: Table, null_tokens: &NullTokens) -> (Table, EmptinessReport) {
    let mut report = EmptinessReport::default();

    table.retain_columns(|column| {
        if column.is_all_null() {
            report.dropped_columns.push(column.name.clone());
            false
        } else {
            true
        }
    });

    let keep: Vec<bool> = (0..table.row_count())
        .map(|row| table.row(row).any(|cell| !cell.is_blank(null_tokens)))
        .collect();
    report.dropped_rows = keep.iter().filter(|k| !**k).count();
    table.retain_rows(&keep);

    if !report.dropped_columns.is_empty() || report.dropped_rows > 0 {
        info!(
            dropped_columns = ?report.dropped_columns,
            dropped_rows = report.dropped_rows,
            "Removed empty columns and rows"
        );
    }

    (table, report)
}
