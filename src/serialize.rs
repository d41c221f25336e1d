//! Serialization adapters for materialized view output.
//!
//! Every form carries the same cell values: nulls stay `ColumnValue::Null`
//! in the typed forms, become `null` in JSON and empty fields in CSV. Dates
//! and datetimes stay typed everywhere except the text forms, where they are
//! written as ISO 8601.

use crate::column::{ColumnType, ColumnValue};
use crate::dataset::{Record, Tabular};
use crate::error::Result;
use crate::pipeline::ViewOutput;
use crate::schema::Schema;
use serde::Serialize;

/// Column-oriented form: `(name, values)` pairs in output order. It can be
/// fed straight back into [`Dataset::Columns`](crate::Dataset::Columns).
pub type Columns = Vec<(String, Vec<ColumnValue>)>;

/// Flat matrix form: a header plus row-major values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Matrix {
    pub header: Vec<String>,
    pub types: Vec<ColumnType>,
    pub num_rows: usize,
    pub num_columns: usize,
    /// `values[row * num_columns + column]`
    pub values: Vec<ColumnValue>,
}

impl Matrix {
    pub fn get(&self, row: usize, column: usize) -> Option<&ColumnValue> {
        if row >= self.num_rows || column >= self.num_columns {
            return None;
        }
        self.values.get(row * self.num_columns + column)
    }

    pub fn row(&self, row: usize) -> Option<&[ColumnValue]> {
        if row >= self.num_rows {
            return None;
        }
        let start = row * self.num_columns;
        Some(&self.values[start..start + self.num_columns])
    }
}

/// Typed columnar frame, the external tabular form. It implements
/// [`Tabular`], so a frame can seed a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    schema: Schema,
    columns: Vec<Vec<ColumnValue>>,
}

impl Frame {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&[ColumnValue]> {
        self.schema
            .get_column_index(name)
            .map(|i| self.columns[i].as_slice())
    }
}

impl Tabular for Frame {
    fn column_names(&self) -> Vec<String> {
        self.schema
            .get_column_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.schema.get_column_type(name)
    }

    fn column_iter<'a>(&'a self, name: &str) -> Option<Box<dyn Iterator<Item = ColumnValue> + 'a>> {
        let values = self.column(name)?;
        Some(Box::new(values.iter().cloned()))
    }
}

pub(crate) fn to_records(output: &ViewOutput) -> Vec<Record> {
    output.to_records()
}

pub(crate) fn to_columns(output: &ViewOutput) -> Columns {
    output
        .columns()
        .map(|(name, values)| (name.to_string(), values.to_vec()))
        .collect()
}

pub(crate) fn to_matrix(output: &ViewOutput) -> Matrix {
    let num_rows = output.num_rows();
    let num_columns = output.num_columns();
    let columns: Vec<&[ColumnValue]> = output.columns().map(|(_, values)| values).collect();
    let mut values = Vec::with_capacity(num_rows * num_columns);
    for row in 0..num_rows {
        for column in &columns {
            values.push(column[row].clone());
        }
    }
    Matrix {
        header: output.column_names().into_iter().map(str::to_string).collect(),
        types: output.schema().iter().map(|(_, ty)| ty).collect(),
        num_rows,
        num_columns,
        values,
    }
}

pub(crate) fn to_frame(output: &ViewOutput) -> Frame {
    Frame {
        schema: output.schema().clone(),
        columns: output.columns().map(|(_, values)| values.to_vec()).collect(),
    }
}

/// Export to JSON (array of objects keyed by column name).
pub(crate) fn to_json(output: &ViewOutput) -> Result<String> {
    Ok(serde_json::to_string(&output.to_records())?)
}

/// Export to CSV.
///
/// NULL values become empty fields and empty strings are written as `""`,
/// so the two stay apart when the text is read back. Floats always carry a
/// decimal point or exponent.
pub(crate) fn to_csv(output: &ViewOutput) -> String {
    let mut result = String::new();
    let header: Vec<String> = output
        .column_names()
        .into_iter()
        .map(escape_csv)
        .collect();
    result.push_str(&header.join(","));
    result.push('\n');

    let columns: Vec<&[ColumnValue]> = output.columns().map(|(_, values)| values).collect();
    for row in 0..output.num_rows() {
        let fields: Vec<String> = columns
            .iter()
            .map(|column| match &column[row] {
                ColumnValue::Null => String::new(),
                ColumnValue::String(s) if s.is_empty() => "\"\"".to_string(),
                ColumnValue::String(s) => escape_csv(s),
                ColumnValue::Float(v) => format_float(*v),
                other => other.to_string(),
            })
            .collect();
        result.push_str(&fields.join(","));
        result.push('\n');
    }
    result
}

fn format_float(v: f64) -> String {
    let text = v.to_string();
    if v.is_finite() && !text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        format!("{}.0", text)
    } else {
        text
    }
}

fn escape_csv(s: &str) -> String {
    if s.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
