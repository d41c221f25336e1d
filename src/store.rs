//! Column storage owned by one table.
//!
//! The store keeps the table's columns, the primary-key index and the
//! ring-buffer cursor. Every mutation first validates and coerces the whole
//! input batch, and only then touches the columns, so a failed update leaves
//! the store exactly as it was.

use crate::changeset::{Changeset, PortId, TableChange};
use crate::column::{Column, ColumnType, ColumnValue};
use crate::dataset::{Batch, Dataset, Record};
use crate::error::{Error, Result};
use crate::schema::Schema;
use chrono::{DateTime, NaiveDate, Utc};
use log::trace;
use std::collections::HashMap;

/// Options fixed at table construction.
///
/// ```
/// use livepivot::TableOptions;
///
/// let options = TableOptions::new().index("id").limit(1000);
/// assert_eq!(options.index.as_deref(), Some("id"));
/// assert_eq!(options.limit, Some(1000));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Primary-key column; enables upsert and remove by key.
    pub index: Option<String>,
    /// Maximum number of rows; further appends overwrite the oldest row.
    pub limit: Option<usize>,
}

impl TableOptions {
    pub fn new() -> Self {
        TableOptions::default()
    }

    pub fn index(mut self, column: impl Into<String>) -> Self {
        self.index = Some(column.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Read-only copy of a table's columns at one point in time.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    schema: Schema,
    columns: Vec<Column>,
}

impl TableSnapshot {
    /// An empty snapshot with the given schema.
    pub fn new(schema: Schema) -> Self {
        let columns = schema
            .iter()
            .map(|(name, ty)| Column::new(name, ty))
            .collect();
        TableSnapshot { schema, columns }
    }

    /// Build a snapshot directly from a dataset, inferring its schema.
    pub fn from_dataset(data: impl Into<Dataset>) -> Result<Self> {
        let batch = data.into().normalize()?;
        let mut store = ColumnStore::new("snapshot", batch.schema()?, TableOptions::default())?;
        store.apply_update(batch, PortId::default())?;
        Ok(store.data)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema.get_column_index(name).map(|i| &self.columns[i])
    }

    pub fn get_value(&self, row: usize, column: &str) -> Option<ColumnValue> {
        self.column(column)?.get(row)
    }

    pub fn row(&self, row: usize) -> Option<Record> {
        if row >= self.num_rows() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name().to_string(), c.get(row).unwrap_or(ColumnValue::Null)))
                .collect(),
        )
    }

    pub fn to_records(&self) -> Vec<Record> {
        (0..self.num_rows()).filter_map(|i| self.row(i)).collect()
    }
}

/// Hashable form of a primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Integer(i64),
    Float(u64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl IndexKey {
    fn from_value(value: &ColumnValue) -> Option<IndexKey> {
        match value {
            ColumnValue::Integer(n) => Some(IndexKey::Integer(*n)),
            ColumnValue::Float(f) => {
                // -0.0 and 0.0 are the same key
                let f = if *f == 0.0 { 0.0 } else { *f };
                Some(IndexKey::Float(f.to_bits()))
            }
            ColumnValue::String(s) => Some(IndexKey::String(s.clone())),
            ColumnValue::Boolean(b) => Some(IndexKey::Boolean(*b)),
            ColumnValue::Date(d) => Some(IndexKey::Date(*d)),
            ColumnValue::DateTime(dt) => Some(IndexKey::DateTime(*dt)),
            ColumnValue::Null => None,
        }
    }
}

/// Batch cells coerced to the table schema, one vector per schema column.
/// `None` is an absent field.
type PreparedRows = Vec<Vec<Option<ColumnValue>>>;

pub(crate) struct ColumnStore {
    table: String,
    data: TableSnapshot,
    index: Option<usize>,
    limit: Option<usize>,
    keys: HashMap<IndexKey, usize>,
    /// Position of the oldest row of a wrapped ring buffer, 0 otherwise.
    /// Overwrites, and appends after a removal, land here.
    cursor: usize,
    generation: u64,
}

impl ColumnStore {
    pub fn new(table: impl Into<String>, schema: Schema, options: TableOptions) -> Result<Self> {
        let table = table.into();
        if schema.is_empty() {
            return Err(Error::schema(format!("table '{}' has no columns", table)));
        }
        let index = match &options.index {
            Some(name) => Some(schema.get_column_index(name).ok_or_else(|| {
                Error::schema(format!("index column '{}' is not in the schema of '{}'", name, table))
            })?),
            None => None,
        };
        if options.limit == Some(0) {
            return Err(Error::schema("limit must be a positive integer"));
        }
        Ok(ColumnStore {
            table,
            data: TableSnapshot::new(schema),
            index,
            limit: options.limit,
            keys: HashMap::new(),
            cursor: 0,
            generation: 0,
        })
    }

    pub fn snapshot(&self) -> &TableSnapshot {
        &self.data
    }

    pub fn schema(&self) -> &Schema {
        &self.data.schema
    }

    pub fn len(&self) -> usize {
        self.data.num_rows()
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.map(|i| self.data.columns[i].name())
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Upsert/append every row of `batch`.
    pub fn apply_update(&mut self, batch: Batch, port: PortId) -> Result<Changeset> {
        let prepared = self.prepare(batch)?;
        let num_rows = prepared.first().map(Vec::len).unwrap_or(0);

        self.generation += 1;
        let mut changeset = Changeset::new(self.generation, port);
        let mut columns: Vec<std::vec::IntoIter<Option<ColumnValue>>> =
            prepared.into_iter().map(Vec::into_iter).collect();
        for _ in 0..num_rows {
            let row: Vec<Option<ColumnValue>> = columns
                .iter_mut()
                .map(|c| c.next().flatten())
                .collect();
            self.apply_row(row, &mut changeset)?;
        }

        trace!(
            "table '{}' update from {}: {} rows, {} changes, size {}",
            self.table,
            port,
            num_rows,
            changeset.len(),
            self.len()
        );
        Ok(changeset)
    }

    /// Remove the rows whose primary key is in `keys`. Keys that match no
    /// row, or cannot be coerced to the index type, are ignored.
    pub fn remove(&mut self, keys: &[ColumnValue], port: PortId) -> Result<(usize, Changeset)> {
        let index = self.index.ok_or_else(|| Error::Index {
            table: self.table.clone(),
            operation: "remove".to_string(),
        })?;
        let key_type = self.data.columns[index].column_type();
        let key_name = self.data.columns[index].name().to_string();

        let mut doomed: Vec<usize> = keys
            .iter()
            .filter_map(|k| k.clone().coerce(key_type, &key_name).ok())
            .filter_map(|k| IndexKey::from_value(&k))
            .filter_map(|k| self.keys.get(&k).copied())
            .collect();
        doomed.sort_unstable();
        doomed.dedup();

        self.generation += 1;
        let mut changeset = Changeset::new(self.generation, port);
        if doomed.is_empty() {
            return Ok((0, changeset));
        }

        let mut keep = vec![true; self.len()];
        for &row in &doomed {
            keep[row] = false;
        }
        for column in &mut self.data.columns {
            column.retain(&keep);
        }
        // highest first so each index refers to the layout left by the previous delete
        for &row in doomed.iter().rev() {
            changeset.push(TableChange::RowDeleted { index: row });
        }

        let before_cursor = doomed.iter().filter(|&&row| row < self.cursor).count();
        self.cursor -= before_cursor;
        if self.cursor >= self.len() {
            self.cursor = 0;
        }
        self.rebuild_keys();

        trace!(
            "table '{}' removed {} rows, size {}",
            self.table,
            doomed.len(),
            self.len()
        );
        Ok((doomed.len(), changeset))
    }

    /// Drop every row.
    pub fn clear(&mut self, port: PortId) -> Changeset {
        for column in &mut self.data.columns {
            column.clear();
        }
        self.keys.clear();
        self.cursor = 0;
        self.generation += 1;
        let mut changeset = Changeset::new(self.generation, port);
        changeset.push(TableChange::Cleared);
        changeset
    }

    /// Swap the table's rows for `batch` under the same schema and options.
    pub fn replace(&mut self, batch: Batch, port: PortId) -> Result<Changeset> {
        let mut fresh = ColumnStore {
            table: self.table.clone(),
            data: TableSnapshot::new(self.data.schema.clone()),
            index: self.index,
            limit: self.limit,
            keys: HashMap::new(),
            cursor: 0,
            generation: self.generation,
        };
        fresh.apply_update(batch, port)?;

        self.data = fresh.data;
        self.keys = fresh.keys;
        self.cursor = fresh.cursor;
        self.generation += 1;
        let mut changeset = Changeset::new(self.generation, port);
        changeset.push(TableChange::Cleared);
        Ok(changeset)
    }

    /// Validate the batch against the schema and coerce every cell.
    fn prepare(&self, batch: Batch) -> Result<PreparedRows> {
        let schema = &self.data.schema;
        for name in &batch.names {
            if !schema.contains(name) {
                return Err(Error::ColumnMismatch {
                    table: self.table.clone(),
                    column: name.clone(),
                });
            }
        }

        let len = batch.len;
        let mut prepared: PreparedRows = vec![vec![None; len]; schema.len()];
        for (name, cells) in batch.names.into_iter().zip(batch.columns) {
            let pos = schema.get_column_index(&name).unwrap_or_default();
            let ty: ColumnType = self.data.columns[pos].column_type();
            prepared[pos] = cells
                .into_iter()
                .map(|cell| cell.map(|v| v.coerce(ty, &name)).transpose())
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(prepared)
    }

    fn apply_row(&mut self, row: Vec<Option<ColumnValue>>, changeset: &mut Changeset) -> Result<()> {
        let existing = self
            .index
            .and_then(|i| row[i].as_ref())
            .and_then(IndexKey::from_value)
            .and_then(|key| self.keys.get(&key).copied());

        match existing {
            Some(pos) => {
                for (column, cell) in self.data.columns.iter_mut().zip(row) {
                    if let Some(value) = cell {
                        column.set(pos, value)?;
                    }
                }
                changeset.push(TableChange::RowUpdated { index: pos });
            }
            None => self.append_row(row, changeset)?,
        }
        Ok(())
    }

    /// Append a row, or overwrite the oldest one when the table is at its
    /// limit. Absent fields become null.
    fn append_row(&mut self, row: Vec<Option<ColumnValue>>, changeset: &mut Changeset) -> Result<()> {
        let new_key = self
            .index
            .and_then(|i| row[i].as_ref())
            .and_then(IndexKey::from_value);

        let full = self.limit.map_or(false, |limit| self.len() >= limit);
        if !full && self.cursor == 0 {
            let pos = self.len();
            for (column, cell) in self.data.columns.iter_mut().zip(row) {
                column.push(cell.unwrap_or(ColumnValue::Null))?;
            }
            if let Some(key) = new_key {
                self.keys.insert(key, pos);
            }
            changeset.push(TableChange::RowInserted { index: pos });
            return Ok(());
        }

        // a removal left room behind the cursor: the new row goes just
        // before the oldest one so overwrites keep evicting in age order
        if !full {
            let pos = self.cursor;
            for (column, cell) in self.data.columns.iter_mut().zip(row) {
                column.insert(pos, cell.unwrap_or(ColumnValue::Null))?;
            }
            for row in self.keys.values_mut() {
                if *row >= pos {
                    *row += 1;
                }
            }
            if let Some(key) = new_key {
                self.keys.insert(key, pos);
            }
            self.cursor = pos + 1;
            changeset.push(TableChange::RowSpliced { index: pos });
            return Ok(());
        }

        let pos = self.cursor;
        if let Some(i) = self.index {
            let evicted = self.data.columns[i].get(pos).and_then(|v| IndexKey::from_value(&v));
            if let Some(old) = evicted {
                if self.keys.get(&old) == Some(&pos) {
                    self.keys.remove(&old);
                }
            }
        }
        for (column, cell) in self.data.columns.iter_mut().zip(row) {
            column.set(pos, cell.unwrap_or(ColumnValue::Null))?;
        }
        if let Some(key) = new_key {
            self.keys.insert(key, pos);
        }
        let len = self.len();
        self.cursor = (pos + 1) % len;
        changeset.push(TableChange::RowUpdated { index: pos });
        Ok(())
    }

    fn rebuild_keys(&mut self) {
        self.keys.clear();
        if let Some(i) = self.index {
            for (pos, value) in self.data.columns[i].iter().enumerate() {
                if let Some(key) = IndexKey::from_value(&value) {
                    self.keys.insert(key, pos);
                }
            }
        }
    }
}
