use crate::pipeline::table::{Column, ColumnType, Table, Value};

const NAN_LITERAL: &str = "nan";

/// Trim text columns and turn the literal `nan` into null. Idempotent.
pub fn canonicalize_strings(table: Table) -> Table {
    table.map_columns(|column| {
        if column.column_type() != ColumnType::Text {
            return column;
        }
        let cells = column
            .cells
            .into_iter()
            .map(|cell| match cell {
                Value::Text(s) => {
                    let trimmed = s.trim();
                    if trimmed == NAN_LITERAL {
                        Value::Null
                    } else if trimmed.len() == s.len() {
                        Value::Text(s)
                    } else {
                        Value::Text(trimmed.to_string())
                    }
                }
                other => other,
            })
            .collect();
        Column::new(column.name, cells)
    })
}
