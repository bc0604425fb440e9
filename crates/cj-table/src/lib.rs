#![forbid(unsafe_code)]

use std::collections::HashMap;

use thiserror::Error;

/// One data row: cells in header order, kept verbatim as text.
pub type Row = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("schema error: primary key column `{column}` not found in header")]
    MissingKeyColumn { column: String },
    #[error("malformed row error: data row {row} has {found} cells but the header has {expected}")]
    MalformedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Primary-key value -> position of the first row carrying it.
///
/// Later rows with an already-seen key are shadowed: they stay in the table's
/// row sequence but are never returned by a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIndex {
    positions: HashMap<String, usize>,
    first_positions: Vec<usize>,
}

impl KeyIndex {
    pub fn build(rows: &[Row], key_column: usize) -> Self {
        let mut positions = HashMap::with_capacity(rows.len());
        let mut first_positions = Vec::with_capacity(rows.len());

        for (pos, row) in rows.iter().enumerate() {
            let Some(key) = row.get(key_column) else {
                continue;
            };
            if positions.contains_key(key.as_str()) {
                continue;
            }
            positions.insert(key.clone(), pos);
            first_positions.push(pos);
        }

        Self {
            positions,
            first_positions,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Row positions of each distinct key's first occurrence, in file order.
    #[must_use]
    pub fn first_positions(&self) -> &[usize] {
        &self.first_positions
    }
}

/// An immutable in-memory table with a designated primary-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Row>,
    key_column: usize,
    key_index: KeyIndex,
}

impl Table {
    /// Resolves `key_column_name` against `header`, checks every row's width
    /// and builds the key index.
    pub fn new(
        header: Vec<String>,
        rows: Vec<Row>,
        key_column_name: &str,
    ) -> Result<Self, TableError> {
        let key_column = header
            .iter()
            .position(|name| name == key_column_name)
            .ok_or_else(|| TableError::MissingKeyColumn {
                column: key_column_name.to_owned(),
            })?;

        let expected = header.len();
        if let Some((pos, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != expected)
        {
            return Err(TableError::MalformedRow {
                row: pos + 1,
                expected,
                found: row.len(),
            });
        }

        let key_index = KeyIndex::build(&rows, key_column);
        let table = Self {
            header,
            rows,
            key_column,
            key_index,
        };

        let shadowed = table.shadowed_rows();
        if shadowed > 0 {
            log::warn!(
                "key column `{key_column_name}` has {shadowed} duplicate row(s); lookups resolve to the first occurrence"
            );
        }

        Ok(table)
    }

    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn row(&self, pos: usize) -> Option<&[String]> {
        self.rows.get(pos).map(Vec::as_slice)
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.header.len()
    }

    /// Number of data rows, shadowed duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn key_column(&self) -> usize {
        self.key_column
    }

    #[must_use]
    pub fn key_column_name(&self) -> &str {
        &self.header[self.key_column]
    }

    #[must_use]
    pub fn key_index(&self) -> &KeyIndex {
        &self.key_index
    }

    /// Key cell of the row at `pos`.
    #[must_use]
    pub fn key_at(&self, pos: usize) -> Option<&str> {
        self.rows
            .get(pos)
            .map(|row| row[self.key_column].as_str())
    }

    /// The first row carrying `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&[String]> {
        self.key_index.get(key).and_then(|pos| self.row(pos))
    }

    /// Distinct key values in order of first appearance.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.key_index
            .first_positions()
            .iter()
            .map(|&pos| self.rows[pos][self.key_column].as_str())
    }

    /// Rows unreachable by key lookup because an earlier row has the same key.
    #[must_use]
    pub fn shadowed_rows(&self) -> usize {
        self.rows.len() - self.key_index.len()
    }
}
