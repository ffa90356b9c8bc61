//! In-memory columnar tables.
//!
//! [`Table`] is the shape upstream session tables arrive in and the shape readers hand
//! back: ordered, named columns of [`Field`] values, all of the same length.
//!
//! JSON form is column oriented, matching a dataframe exported with `orient="list"`:
//! `{"cell_specimen_id": [1, 2], "dff": [[0.1, 0.2], [0.3, 0.4]]}`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::field::{Field, RawRecord};

/// Errors raised while building or reading tables.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    /// A column's length disagrees with the table's row count.
    #[error("column '{column}' has {got} rows, expected {expected}")]
    LengthMismatch {
        /// Offending column.
        column: String,
        /// Table row count.
        expected: usize,
        /// Column length.
        got: usize,
    },
    /// A required column is absent.
    #[error("table has no column '{0}'")]
    MissingColumn(String),
}

/// Ordered, named, equal-length columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, Vec<Field>>", into = "IndexMap<String, Vec<Field>>")]
pub struct Table {
    columns: IndexMap<String, Vec<Field>>,
    len: usize,
}

impl Table {
    /// Empty table with no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with the given columns and zero rows.
    pub fn with_columns<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|n| (n.as_ref().to_string(), Vec::new()))
                .collect(),
            len: 0,
        }
    }

    /// Build a table from rows. Columns appear in first-seen order; cells a row does not
    /// carry are null.
    pub fn from_rows<I: IntoIterator<Item = RawRecord>>(rows: I) -> Self {
        let mut table = Table::new();
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Append a row, null-filling missing cells and back-filling new columns.
    pub fn push_row(&mut self, row: RawRecord) {
        let mut row = row;
        for (name, cells) in self.columns.iter_mut() {
            cells.push(row.shift_remove(name).unwrap_or(Field::Null));
        }
        for (name, value) in row {
            let mut cells = vec![Field::Null; self.len];
            cells.push(value);
            self.columns.insert(name, cells);
        }
        self.len += 1;
    }

    /// Add or replace a column.
    pub fn set_column(
        &mut self,
        name: impl Into<String>,
        cells: Vec<Field>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.columns.is_empty() {
            self.len = cells.len();
        } else if cells.len() != self.len {
            return Err(TableError::LengthMismatch {
                column: name,
                expected: self.len,
                got: cells.len(),
            });
        }
        self.columns.insert(name, cells);
        Ok(())
    }

    /// Builder form of [`Table::set_column`].
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        cells: Vec<Field>,
    ) -> Result<Self, TableError> {
        self.set_column(name, cells)?;
        Ok(self)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// True if `name` is a column.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Cells of a column.
    pub fn column(&self, name: &str) -> Option<&[Field]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Cells of a column that must exist.
    pub fn require_column(&self, name: &str) -> Result<&[Field], TableError> {
        self.column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Drop the named columns; names that are not columns are ignored. Returns how many
    /// columns were removed.
    pub fn drop_columns(&mut self, names: &[&str]) -> usize {
        let before = self.columns.len();
        self.columns.retain(|name, _| !names.contains(&name.as_str()));
        before - self.columns.len()
    }

    /// Rename a column in place, keeping its position. Does nothing if `from` is absent.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.columns.get_index_of(from) {
            let cells = self.columns.shift_remove(from).unwrap_or_default();
            self.columns.shift_remove(to);
            let idx = idx.min(self.columns.len());
            self.columns.shift_insert(idx, to.to_string(), cells);
        }
    }

    /// Row `i` as a record.
    pub fn row(&self, i: usize) -> Option<RawRecord> {
        if i >= self.len {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|(name, cells)| (name.clone(), cells[i].clone()))
                .collect(),
        )
    }

    /// Rows in order.
    pub fn rows(&self) -> impl Iterator<Item = RawRecord> + '_ {
        (0..self.len).filter_map(move |i| self.row(i))
    }

    /// Rows for which `keep` returns true, as a new table with the same columns.
    pub fn filter_rows<F: FnMut(&RawRecord) -> bool>(&self, mut keep: F) -> Table {
        let mut out = Table::with_columns(&self.columns.keys().collect::<Vec<_>>());
        for row in self.rows() {
            if keep(&row) {
                out.push_row(row);
            }
        }
        out
    }

    /// Stack tables vertically. Columns are the union in first-seen order.
    pub fn concat<I: IntoIterator<Item = Table>>(tables: I) -> Table {
        let mut out = Table::new();
        for table in tables {
            for name in table.columns.keys() {
                if !out.columns.contains_key(name) {
                    out.columns
                        .insert(name.clone(), vec![Field::Null; out.len]);
                }
            }
            for row in table.rows() {
                out.push_row(row);
            }
        }
        out
    }

    /// Parse a column-oriented JSON table.
    pub fn from_json_str(s: &str) -> anyhow::Result<Table> {
        Ok(serde_json::from_str(s)?)
    }
}

impl TryFrom<IndexMap<String, Vec<Field>>> for Table {
    type Error = TableError;

    fn try_from(columns: IndexMap<String, Vec<Field>>) -> Result<Self, Self::Error> {
        let mut table = Table::new();
        for (name, cells) in columns {
            table.set_column(name, cells)?;
        }
        Ok(table)
    }
}

impl From<Table> for IndexMap<String, Vec<Field>> {
    fn from(table: Table) -> Self {
        table.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Field)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn from_rows_null_fills() {
        let t = Table::from_rows([
            row(&[("a", Field::I64(1))]),
            row(&[("a", Field::I64(2)), ("b", Field::Text("x".into()))]),
        ]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.column("a").unwrap(), &[Field::I64(1), Field::I64(2)]);
        assert_eq!(t.column("b").unwrap(), &[Field::Null, Field::Text("x".into())]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = Table::new()
            .with_column("a", vec![Field::I64(1), Field::I64(2)])
            .unwrap()
            .with_column("b", vec![Field::I64(1)])
            .unwrap_err();
        assert_eq!(
            err,
            TableError::LengthMismatch {
                column: "b".into(),
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn json_is_column_oriented() {
        let t = Table::from_json_str(r#"{"cell_specimen_id": [1, 2], "dff": [[0.5], [1.5]]}"#)
            .unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(
            t.row(1).unwrap()["dff"],
            Field::Seq(vec![Field::F64(1.5)])
        );
        assert!(Table::from_json_str(r#"{"a": [1], "b": [1, 2]}"#).is_err());
    }

    #[test]
    fn rename_keeps_position() {
        let mut t = Table::new()
            .with_column("experiment_id", vec![Field::I64(1)])
            .unwrap()
            .with_column("cell_specimen_id", vec![Field::I64(2)])
            .unwrap();
        t.rename_column("experiment_id", "ophys_experiment_id");
        let names: Vec<&str> = t.column_names().collect();
        assert_eq!(names, vec!["ophys_experiment_id", "cell_specimen_id"]);
    }

    #[test]
    fn drop_ignores_unknown_columns() {
        let mut t = Table::with_columns(&["licks", "rewards", "image_name"]);
        assert_eq!(t.drop_columns(&["licks", "rewards", "nope"]), 2);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["image_name"]);
    }

    #[test]
    fn concat_unions_columns() {
        let a = Table::from_rows([row(&[("x", Field::I64(1))])]);
        let b = Table::from_rows([row(&[("y", Field::I64(2))])]);
        let c = Table::concat([a, b]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.column("x").unwrap(), &[Field::I64(1), Field::Null]);
        assert_eq!(c.column("y").unwrap(), &[Field::Null, Field::I64(2)]);
    }

    #[test]
    fn filter_rows_keeps_columns() {
        let t = Table::from_rows([
            row(&[("equipment_name", Field::Text("CAM2P.3".into()))]),
            row(&[("equipment_name", Field::Text("MESO.1".into()))]),
        ]);
        let kept = t.filter_rows(|r| r["equipment_name"].as_str() != Some("MESO.1"));
        assert_eq!(kept.len(), 1);
        let empty = t.filter_rows(|_| false);
        assert!(empty.is_empty());
        assert!(empty.has_column("equipment_name"));
    }
}
