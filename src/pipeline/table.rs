//! In-memory table shared by every silver stage.
//!
//! A [`Table`] is an ordered list of named, row-aligned [`Column`]s. Column
//! order is insertion order and row order is arrival order, so every stage can
//! consume and produce the same shape and be tested in isolation.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, for rule predicates.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Null, or text that only carries a null token such as `""` or `nan`.
    pub fn is_blank(&self, null_tokens: &NullTokens) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => null_tokens.matches(s),
            _ => false,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Integer(_) => ColumnType::Integer,
            Value::Float(_) => ColumnType::Float,
            Value::Date(_) => ColumnType::Date,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::Text(_) => ColumnType::Text,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format(TIMESTAMP_FORMAT).to_string())
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Decode a JSON cell written by [`Value::to_json`] back into its declared type.
    /// Cells that do not fit the declared type decode as `Null`.
    pub fn from_json(json: &serde_json::Value, ty: ColumnType) -> Value {
        match (ty, json) {
            (_, serde_json::Value::Null) => Value::Null,
            (ColumnType::Integer, v) => v.as_i64().map(Value::Integer).unwrap_or(Value::Null),
            (ColumnType::Float, v) => v.as_f64().map(Value::Float).unwrap_or(Value::Null),
            (ColumnType::Date, serde_json::Value::String(s)) => {
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map(Value::Date)
                    .unwrap_or(Value::Null)
            }
            (ColumnType::Timestamp, serde_json::Value::String(s)) => {
                NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                    .map(Value::Timestamp)
                    .unwrap_or(Value::Null)
            }
            (ColumnType::Text, serde_json::Value::String(s)) => Value::Text(s.clone()),
            (ColumnType::Text, other) => Value::Text(other.to_string()),
            _ => Value::Null,
        }
    }

    /// Append an unambiguous byte encoding of the cell, used for row identity.
    pub fn write_key(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(0),
            Value::Integer(i) => {
                buf.push(1);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                buf.push(2);
                buf.extend_from_slice(&f.to_bits().to_le_bytes());
            }
            Value::Date(d) => {
                buf.push(3);
                buf.extend_from_slice(d.format(DATE_FORMAT).to_string().as_bytes());
            }
            Value::Timestamp(ts) => {
                buf.push(4);
                let utc = ts.and_utc();
                buf.extend_from_slice(&utc.timestamp().to_le_bytes());
                buf.extend_from_slice(&utc.timestamp_subsec_nanos().to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(5);
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Physical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Every cell is null.
    Null,
    Integer,
    Float,
    Date,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Null => "null",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text values treated as "no information" (compared trimmed, case-insensitively).
#[derive(Debug, Clone)]
pub struct NullTokens {
    tokens: Vec<String>,
}

impl NullTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty() || self.tokens.iter().any(|t| t.eq_ignore_ascii_case(trimmed))
    }
}

impl Default for NullTokens {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_NULL_TOKENS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn from_text<S: AsRef<str>>(name: impl Into<String>, values: &[Option<S>]) -> Self {
        let cells = values
            .iter()
            .map(|v| match v {
                Some(s) => Value::Text(s.as_ref().to_string()),
                None => Value::Null,
            })
            .collect();
        Self::new(name, cells)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_all_null(&self) -> bool {
        self.cells.iter().all(Value::is_null)
    }

    pub fn null_count(&self) -> usize {
        self.cells.iter().filter(|v| v.is_null()).count()
    }

    /// The single type shared by the non-null cells. Mixed columns widen to text.
    pub fn column_type(&self) -> ColumnType {
        let mut found: Option<ColumnType> = None;
        for cell in self.cells.iter().filter(|c| !c.is_null()) {
            let ty = cell.column_type();
            match found {
                None => found = Some(ty),
                Some(existing) if existing == ty => {}
                Some(_) => return ColumnType::Text,
            }
        }
        found.unwrap_or(ColumnType::Null)
    }
}

/// Row-aligned, ordered collection of columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns that must all have the same length.
    pub fn from_columns(columns: Vec<Column>) -> Self {
        let rows = columns.first().map(Column::len).unwrap_or(0);
        assert!(
            columns.iter().all(|c| c.len() == rows),
            "table columns must be row-aligned"
        );
        Self { columns, rows }
    }

    /// A table with `rows` rows and no columns yet.
    pub fn with_row_count(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column; its length must match the table's row count.
    pub fn push_column(&mut self, column: Column) {
        if self.columns.is_empty() && self.rows == 0 {
            self.rows = column.len();
        }
        assert_eq!(column.len(), self.rows, "column '{}' is not row-aligned", column.name);
        self.columns.push(column);
    }

    pub fn cell(&self, row: usize, column: usize) -> &Value {
        &self.columns[column].cells[row]
    }

    pub fn row(&self, row: usize) -> impl Iterator<Item = &Value> + '_ {
        self.columns.iter().map(move |c| &c.cells[row])
    }

    /// Stable identity of a row across every column, in column order.
    pub fn row_key(&self, row: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for column in &self.columns {
            buf.extend_from_slice(column.name.as_bytes());
            buf.push(0xff);
            column.cells[row].write_key(&mut buf);
        }
        buf
    }

    /// Keep the rows whose mask entry is `true`, preserving order.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.rows, "row mask length must match row count");
        for column in &mut self.columns {
            let mut idx = 0;
            column.cells.retain(|_| {
                let k = keep[idx];
                idx += 1;
                k
            });
        }
        self.rows = keep.iter().filter(|k| **k).count();
    }

    /// New table holding the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), rows.iter().map(|r| c.cells[*r].clone()).collect()))
            .collect();
        Table {
            columns,
            rows: rows.len(),
        }
    }

    pub fn retain_columns<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Column) -> bool,
    {
        self.columns.retain(|c| keep(c));
    }

    pub fn map_columns<F>(self, f: F) -> Table
    where
        F: FnMut(Column) -> Column,
    {
        let rows = self.rows;
        let columns: Vec<Column> = self.columns.into_iter().map(f).collect();
        debug_assert!(columns.iter().all(|c| c.len() == rows));
        Table { columns, rows }
    }

    /// Stack tables vertically over the union of their columns.
    ///
    /// Column order follows first appearance; a column missing from a table is
    /// filled with `Null` for that table's rows.
    pub fn concat(tables: Vec<Table>) -> Table {
        let mut order: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for table in &tables {
            for column in &table.columns {
                if !index.contains_key(&column.name) {
                    index.insert(column.name.clone(), order.len());
                    order.push(column.name.clone());
                }
            }
        }

        let total: usize = tables.iter().map(|t| t.rows).sum();
        let mut cells: Vec<Vec<Value>> = order.iter().map(|_| Vec::with_capacity(total)).collect();

        for table in tables {
            let rows = table.rows;
            let mut seen = vec![false; order.len()];
            for column in table.columns {
                let slot = index[&column.name];
                seen[slot] = true;
                cells[slot].extend(column.cells);
            }
            for (slot, present) in seen.into_iter().enumerate() {
                if !present {
                    cells[slot].extend(std::iter::repeat(Value::Null).take(rows));
                }
            }
        }

        let columns = order
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect();
        Table {
            columns,
            rows: total,
        }
    }

    /// One JSON object per row, keys in column order.
    pub fn row_to_json(&self, row: usize) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::with_capacity(self.columns.len());
        for column in &self.columns {
            map.insert(column.name.clone(), column.cells[row].to_json());
        }
        map
    }

    /// Column name and type pairs, in column order.
    pub fn schema(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.column_type()))
            .collect()
    }
}
