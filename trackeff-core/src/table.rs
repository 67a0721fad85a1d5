//! Columnar record storage.
//!
//! `RecordTable` stores ntuple rows as one vector per column (`SoA` layout),
//! the same layout the ntuple files use on disk. Rows are accessed through
//! [`RowRef`], which implements [`Record`].

use crate::event::{FieldValue, Record};
use crate::{Error, Result};
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A table of records stored in Structure of Arrays (`SoA`) format.
///
/// Missing cells are stored as `None`, so heterogeneous rows can be loaded
/// without inventing values.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Vec<Option<FieldValue>>>,
    len: usize,
}

impl RecordTable {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn with_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for name in names {
            table.column_index_or_insert(&name.into());
        }
        table
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the column names in insertion order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Returns true if the table has the named column.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Checks that every named column exists.
    ///
    /// # Errors
    /// Returns `MissingField` for the first absent column.
    pub fn require_columns<'a, I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            if !self.has_column(name) {
                return Err(Error::missing_field(name));
            }
        }
        Ok(())
    }

    /// Appends a row given as (name, value) pairs.
    ///
    /// Unknown names create new columns, back-filled with `None`.
    pub fn push_row<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (S, FieldValue)>,
        S: AsRef<str>,
    {
        for column in &mut self.columns {
            column.push(None);
        }
        self.len += 1;
        let last = self.len - 1;
        for (name, value) in fields {
            let i = self.column_index_or_insert(name.as_ref());
            self.columns[i][last] = Some(value);
        }
    }

    /// Appends all rows of another table, merging columns by name.
    pub fn append(&mut self, other: &RecordTable) {
        let base = self.len;
        let total = base + other.len;
        for column in &mut self.columns {
            column.resize(total, None);
        }
        self.len = total;
        for (name, cells) in other.names.iter().zip(&other.columns) {
            let i = self.column_index_or_insert(name);
            self.columns[i][base..].copy_from_slice(cells);
        }
    }

    /// Clears all rows, keeping the columns.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.len = 0;
    }

    /// Returns a view of the given row.
    ///
    /// # Panics
    /// Panics if `row` is out of bounds.
    #[must_use]
    pub fn row(&self, row: usize) -> RowRef<'_> {
        assert!(row < self.len, "row {row} out of bounds ({} rows)", self.len);
        RowRef { table: self, row }
    }

    /// Returns an iterator over all rows.
    pub fn rows(&self) -> impl ExactSizeIterator<Item = RowRef<'_>> + '_ {
        (0..self.len).map(move |row| RowRef { table: self, row })
    }

    fn column_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), i);
        self.columns.push(vec![None; self.len]);
        i
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a RecordTable,
    row: usize,
}

impl RowRef<'_> {
    /// Returns the row number within the table.
    #[must_use]
    pub fn index(&self) -> usize {
        self.row
    }
}

impl Record for RowRef<'_> {
    #[inline]
    fn get(&self, field: &str) -> Option<FieldValue> {
        let i = *self.table.index.get(field)?;
        self.table.columns[i][self.row]
    }
}
