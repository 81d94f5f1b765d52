use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::pipeline::processing::quality_gate::QuarantineTable;
use crate::pipeline::table::Table;

/// Rows kept and the number of exact duplicates removed.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome<T> {
    pub table: T,
    pub removed: usize,
}

/// SHA-256 over the row's canonical key; identical rows share a fingerprint.
pub fn row_fingerprint(table: &Table, row: usize) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(table.row_key(row));
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(&hasher.finalize());
    fingerprint
}

fn first_occurrence_mask(table: &Table) -> Vec<bool> {
    let mut seen = HashSet::with_capacity(table.row_count());
    (0..table.row_count())
        .map(|row| seen.insert(row_fingerprint(table, row)))
        .collect()
}

/// Remove rows identical across every column. The first occurrence survives
/// and relative order is preserved.
pub fn deduplicate(mut table: Table) -> DedupOutcome<Table> {
    let keep = first_occurrence_mask(&table);
    let removed = keep.iter().filter(|k| !**k).count();
    table.retain_rows(&keep);
    if removed > 0 {
        info!(removed, remaining = table.row_count(), "Removed duplicate rows");
    }
    DedupOutcome { table, removed }
}

/// Same as [`deduplicate`], keeping each surviving row's reasons aligned.
pub fn deduplicate_quarantine(mut quarantine: QuarantineTable) -> DedupOutcome<QuarantineTable> {
    let keep = first_occurrence_mask(&quarantine.rows);
    let removed = keep.iter().filter(|k| !**k).count();
    quarantine.retain_rows(&keep);
    DedupOutcome {
        table: quarantine,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::inference::parse_temporal;
    use crate::pipeline::table::{Column, Value};

    #[test]
    fn first_occurrence_wins() {
        let table = Table::from_columns(vec![
            Column::new("id", vec![Value::Integer(1), Value::Integer(2), Value::Integer(1)]),
            Column::from_text("v", &[Some("a"), Some("b"), Some("a")]),
        ]);

        let outcome = deduplicate(table);

        assert_eq!(outcome.removed, 1);
        assert_eq!(
            outcome.table.column("id").unwrap().cells,
            vec![Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn rows_differing_in_one_column_are_kept() {
        let table = Table::from_columns(vec![
            Column::new("id", vec![Value::Integer(1), Value::Integer(1)]),
            Column::new("v", vec![Value::Null, Value::text("")]),
        ]);
        assert_eq!(deduplicate(table).removed, 0);
    }

    #[test]
    fn far_future_timestamps_keep_distinct_identities() {
        let sentinel = parse_temporal("9999-12-31").unwrap();
        let far = parse_temporal("2300-06-01").unwrap();
        let table = Table::from_columns(vec![
            Column::from_text("loan_id", &[Some("L1"), Some("L1"), Some("L1")]),
            Column::new(
                "maturity",
                vec![Value::Timestamp(sentinel), Value::Timestamp(far), Value::Timestamp(sentinel)],
            ),
        ]);

        let outcome = deduplicate(table);

        assert_eq!(outcome.removed, 1);
        assert_eq!(
            outcome.table.column("maturity").unwrap().cells,
            vec![Value::Timestamp(sentinel), Value::Timestamp(far)]
        );
    }

    #[test]
    fn quarantine_reasons_stay_aligned() {
        let rows = Table::from_columns(vec![Column::new(
            "id",
            vec![Value::Integer(7), Value::Integer(7), Value::Integer(8)],
        )]);
        let quarantine = QuarantineTable {
            rows,
            reasons: vec![
                vec!["negative_dpd".to_string()],
                vec!["negative_dpd".to_string()],
                vec!["invalid_rate".to_string()],
            ],
        };

        let outcome = deduplicate_quarantine(quarantine);

        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.table.reasons[1], vec!["invalid_rate".to_string()]);
    }
}
