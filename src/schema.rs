//! Table schemas and type inference.
//!
//! A schema is an ordered list of `(name, type)` pairs. Order is significant
//! for display and for the default column order of views.
//!
//! # Examples
//!
//! ```
//! use livepivot::{ColumnType, Schema};
//!
//! let schema = Schema::new(vec![
//!     ("id".to_string(), ColumnType::Integer),
//!     ("email".to_string(), ColumnType::String),
//! ]).unwrap();
//!
//! assert_eq!(schema.len(), 2);
//! assert_eq!(schema.get_column_index("email"), Some(1));
//!
//! let parsed = Schema::from_tokens(&[("id", "int"), ("email", "str")]).unwrap();
//! assert_eq!(parsed, schema);
//! ```

use crate::column::{ColumnType, ColumnValue};
use crate::error::{Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    /// Build a schema. Fails on duplicate or empty column names.
    pub fn new(columns: Vec<(String, ColumnType)>) -> Result<Self> {
        for (i, (name, _)) in columns.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::schema("column names must not be empty"));
            }
            if columns[..i].iter().any(|(other, _)| other == name) {
                return Err(Error::schema(format!("duplicate column '{}'", name)));
            }
        }
        Ok(Schema { columns })
    }

    /// Build a schema from string type tokens such as `"integer"` or `"f64"`.
    pub fn from_tokens(columns: &[(&str, &str)]) -> Result<Self> {
        let typed = columns
            .iter()
            .map(|(name, token)| Ok((name.to_string(), token.parse::<ColumnType>()?)))
            .collect::<Result<Vec<_>>>()?;
        Schema::new(typed)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(col, _)| col == name)
    }

    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, ty)| *ty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_column_index(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }
}

/// Infer the canonical type of a column from its sampled values.
///
/// Non-null value types are folded with [`ColumnType::promote`]; any mix
/// without a common narrow type, and any column with no non-null values,
/// falls back to `String`.
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a ColumnValue>,
{
    let mut inferred: Option<ColumnType> = None;
    for ty in values.into_iter().filter_map(ColumnValue::column_type) {
        inferred = match inferred {
            None => Some(ty),
            Some(current) => match current.promote(ty) {
                Some(widened) => Some(widened),
                None => return ColumnType::String,
            },
        };
    }
    inferred.unwrap_or(ColumnType::String)
}

/// Infer the type of a column of raw text (CSV fields). Empty fields are
/// nulls and do not participate.
pub(crate) fn infer_text_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut inferred: Option<ColumnType> = None;
    for text in values.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
        let ty = infer_text_value_type(text);
        inferred = match inferred {
            None => Some(ty),
            Some(current) => match current.promote(ty) {
                Some(widened) => Some(widened),
                None => return ColumnType::String,
            },
        };
    }
    inferred.unwrap_or(ColumnType::String)
}

/// Infer the type of a single text value.
fn infer_text_value_type(text: &str) -> ColumnType {
    if crate::column::parse_bool(text).is_some() {
        return ColumnType::Boolean;
    }
    if crate::column::parse_datetime(text).is_some() {
        return ColumnType::DateTime;
    }
    if crate::column::parse_date(text).is_some() {
        return ColumnType::Date;
    }
    if text.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }
    if text.parse::<f64>().is_ok() {
        return ColumnType::Float;
    }
    ColumnType::String
}
