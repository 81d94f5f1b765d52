//! Column-name canonicalization.
//!
//! Batches written months apart rarely agree on header style (`Event ID`,
//! `event_id`, `Event.Id`). Names are folded to one snake-ish form so they line
//! up on the same logical column, and any headers that fold together are merged
//! under the configured [`CollisionPolicy`].

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::CollisionPolicy;
use crate::error::{Result, SilverError};
use crate::pipeline::table::{Column, Table, Value};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Trim, lowercase, whitespace runs to `_`, drop periods, slashes to `_`.
pub fn normalize_column_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    WHITESPACE_RUN
        .replace_all(&lowered, "_")
        .replace('.', "")
        .replace('/', "_")
}

/// Raw headers that normalized to the same name and were merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCollision {
    pub name: String,
    /// Raw names in column order; later names win on conflicting rows
    pub sources: Vec<String>,
    /// Rows where two or more sources held different non-null values
    pub conflicting_rows: usize,
}

/// Rename every column to its normalized form, merging collisions.
///
/// A merged column keeps the position of its first source. Per row it takes the
/// right-most non-null value among its sources, which for stacked batches means
/// the batch that introduced the later header style wins.
pub fn normalize_columns(
    table: Table,
    table_name: &str,
    policy: CollisionPolicy,
) -> Result<(Table, Vec<ColumnCollision>)> {
    let rows = table.row_count();
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Column>> = HashMap::new();

    for (position, column) in table.into_columns().into_iter().enumerate() {
        let mut name = normalize_column_name(&column.name);
        if name.is_empty() {
            name = format!("unnamed_{}", position);
        }
        groups
            .entry(name.clone())
            .or_insert_with(|| {
                order.push(name.clone());
                Vec::new()
            })
            .push(column);
    }

    let mut out = Table::with_row_count(rows);
    let mut collisions = Vec::new();

    for name in order {
        let mut sources = groups.remove(&name).unwrap_or_default();
        if sources.len() == 1 {
            let column = sources.remove(0);
            out.push_column(Column::new(name, column.cells));
            continue;
        }

        let raw_names: Vec<String> = sources.iter().map(|c| c.name.clone()).collect();
        if policy == CollisionPolicy::Fail {
            return Err(SilverError::SchemaConflict {
                table: table_name.to_string(),
                column: name,
                detail: format!("headers {:?} normalize to the same name", raw_names),
            });
        }

        let (cells, conflicting_rows) = coalesce_last(&sources, rows);
        warn!(
            column = %name,
            sources = ?raw_names,
            conflicting_rows,
            "Merged colliding columns"
        );
        collisions.push(ColumnCollision {
            name: name.clone(),
            sources: raw_names,
            conflicting_rows,
        });
        out.push_column(Column::new(name, cells));
    }

    Ok((out, collisions))
}

fn coalesce_last(sources: &[Column], rows: usize) -> (Vec<Value>, usize) {
    let mut cells = Vec::with_capacity(rows);
    let mut conflicting = 0;
    for row in 0..rows {
        let mut chosen: Option<&Value> = None;
        let mut conflict = false;
        for source in sources.iter().rev() {
            let cell = &source.cells[row];
            if cell.is_null() {
                continue;
            }
            match chosen {
                None => chosen = Some(cell),
                Some(existing) if existing != cell => conflict = true,
                Some(_) => {}
            }
        }
        if conflict {
            conflicting += 1;
        }
        cells.push(chosen.cloned().unwrap_or(Value::Null));
    }
    (cells, conflicting)
}
