//! Input datasets and their normalization into one columnar batch.
//!
//! Tables accept several input shapes:
//!
//! - row-oriented: a sequence of [`Record`]s, possibly with different keys
//!   per row (a missing key is an absent field for that row)
//! - column-oriented: a list of `(name, values)` pairs of equal length
//! - an external tabular structure implementing [`Tabular`], which also
//!   declares a type for each column
//! - an explicit [`Schema`] with zero rows
//!
//! All of them normalize into a [`Batch`] before schema inference or
//! validation runs, so the rest of the engine only sees one representation.

use crate::column::{ColumnType, ColumnValue};
use crate::error::{Error, Result};
use crate::schema::{infer_column_type, infer_text_type, Schema};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One row as an ordered name → value mapping.
///
/// # Examples
///
/// ```
/// use livepivot::{ColumnValue, Record};
///
/// let row = Record::new().with("k", "r1").with("v", 5);
/// assert_eq!(row.get("v"), Some(&ColumnValue::Integer(5)));
/// assert_eq!(row.names().collect::<Vec<_>>(), vec!["k", "v"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, ColumnValue)>,
}

impl Record {
    pub fn new() -> Self {
        Record { fields: Vec::new() }
    }

    /// Builder form of [`Record::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ColumnValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, V: Into<ColumnValue>> FromIterator<(K, V)> for Record {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// An external columnar structure the engine can ingest.
///
/// Anything that can enumerate its columns, declare a type for each and
/// iterate a column's values can be used to create or update a table.
pub trait Tabular {
    fn column_names(&self) -> Vec<String>;

    fn column_type(&self, name: &str) -> Option<ColumnType>;

    fn column_iter<'a>(&'a self, name: &str) -> Option<Box<dyn Iterator<Item = ColumnValue> + 'a>>;
}

/// Input to table creation and update.
#[derive(Debug, Clone)]
pub enum Dataset {
    /// Row-oriented records.
    Rows(Vec<Record>),
    /// Column-oriented `(name, values)` pairs; all sequences equal length.
    Columns(Vec<(String, Vec<ColumnValue>)>),
    /// Columns with declared types, as produced from a [`Tabular`] source.
    Typed {
        schema: Schema,
        columns: Vec<Vec<ColumnValue>>,
    },
    /// An explicit schema with zero rows.
    Schema(Schema),
}

impl Dataset {
    pub fn from_rows(rows: Vec<Record>) -> Self {
        Dataset::Rows(rows)
    }

    pub fn from_columns<N: Into<String>>(columns: Vec<(N, Vec<ColumnValue>)>) -> Self {
        Dataset::Columns(
            columns
                .into_iter()
                .map(|(name, values)| (name.into(), values))
                .collect(),
        )
    }

    /// Read every column of a [`Tabular`] source together with its declared
    /// type.
    pub fn from_tabular<T: Tabular + ?Sized>(source: &T) -> Result<Self> {
        let names = source.column_names();
        let mut typed = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let ty = source
                .column_type(&name)
                .ok_or_else(|| Error::schema(format!("tabular source has no type for column '{}'", name)))?;
            let values: Vec<ColumnValue> = source
                .column_iter(&name)
                .ok_or_else(|| Error::schema(format!("tabular source cannot iterate column '{}'", name)))?
                .collect();
            typed.push((name, ty));
            columns.push(values);
        }
        Ok(Dataset::Typed {
            schema: Schema::new(typed)?,
            columns,
        })
    }

    /// Parse JSON: either an array of objects (rows) or an object whose
    /// values are arrays (columns). Strings holding ISO dates or datetimes
    /// become temporal values.
    ///
    /// ```
    /// use livepivot::Dataset;
    ///
    /// let rows = Dataset::from_json(r#"[{"id": 1, "name": "Alice"}, {"id": 2}]"#).unwrap();
    /// let cols = Dataset::from_json(r#"{"id": [1, 2], "name": ["Alice", null]}"#).unwrap();
    /// assert!(matches!(rows, Dataset::Rows(_)));
    /// assert!(matches!(cols, Dataset::Columns(_)));
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        match parsed {
            serde_json::Value::Array(items) => {
                let rows = items
                    .iter()
                    .map(|item| {
                        let obj = item
                            .as_object()
                            .ok_or_else(|| Error::parse("expected an array of objects"))?;
                        obj.iter()
                            .map(|(key, value)| Ok((key.clone(), json_to_value(key, value)?)))
                            .collect::<Result<Record>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Dataset::Rows(rows))
            }
            serde_json::Value::Object(obj) => {
                let columns = obj
                    .iter()
                    .map(|(key, value)| {
                        let items = value
                            .as_array()
                            .ok_or_else(|| Error::parse(format!("column '{}' is not an array", key)))?;
                        let values = items
                            .iter()
                            .map(|item| json_to_value(key, item))
                            .collect::<Result<Vec<_>>>()?;
                        Ok((key.clone(), values))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Dataset::Columns(columns))
            }
            _ => Err(Error::parse("expected a JSON array or object")),
        }
    }

    /// Parse CSV text. The first line is the header. Each column's type is
    /// inferred from all of its non-empty fields; empty fields are nulls,
    /// except a quoted empty field (`""`) in a string column, which is an
    /// empty string.
    ///
    /// ```
    /// use livepivot::Dataset;
    ///
    /// let data = Dataset::from_csv("id,name,score\n1,Alice,95.5\n2,Bob,87").unwrap();
    /// assert!(matches!(data, Dataset::Typed { .. }));
    /// ```
    pub fn from_csv(csv: &str) -> Result<Self> {
        let mut all_rows = parse_csv_rows(csv);
        if all_rows.is_empty() {
            return Err(Error::parse("CSV is empty"));
        }

        let header: Vec<String> = all_rows.remove(0).into_iter().map(|f| f.text).collect();
        if header.iter().all(|h| h.trim().is_empty()) {
            return Err(Error::parse("CSV header is empty"));
        }

        let rows: Vec<Vec<CsvField>> = all_rows
            .into_iter()
            .filter(|row| !row.iter().all(|f| f.text.is_empty() && !f.quoted))
            .collect();

        for (i, row) in rows.iter().enumerate() {
            if row.len() > header.len() {
                return Err(Error::parse(format!(
                    "row {} has {} fields but the header has {}",
                    i + 1,
                    row.len(),
                    header.len()
                )));
            }
        }

        let mut typed = Vec::with_capacity(header.len());
        let mut columns = Vec::with_capacity(header.len());
        for (col_idx, name) in header.iter().enumerate() {
            let field = |row: &Vec<CsvField>| {
                row.get(col_idx)
                    .map(|f| (f.text.trim().to_string(), f.quoted))
                    .unwrap_or_default()
            };
            let texts: Vec<(String, bool)> = rows.iter().map(field).collect();
            let ty = infer_text_type(texts.iter().map(|(text, _)| text.as_str()));
            let values = texts
                .into_iter()
                .map(|(text, quoted)| match (text.is_empty(), quoted) {
                    (true, true) if ty == ColumnType::String => Ok(ColumnValue::String(text)),
                    (true, _) => Ok(ColumnValue::Null),
                    (false, _) => ColumnValue::String(text).coerce(ty, name),
                })
                .collect::<Result<Vec<_>>>()?;
            typed.push((name.trim().to_string(), ty));
            columns.push(values);
        }

        Ok(Dataset::Typed {
            schema: Schema::new(typed)?,
            columns,
        })
    }

    /// Normalize into a columnar [`Batch`].
    pub(crate) fn normalize(self) -> Result<Batch> {
        match self {
            Dataset::Rows(rows) => {
                let mut names: Vec<String> = Vec::new();
                for row in &rows {
                    for name in row.names() {
                        if !names.iter().any(|n| n == name) {
                            names.push(name.to_string());
                        }
                    }
                }
                let mut columns: Vec<Vec<Option<ColumnValue>>> =
                    vec![Vec::with_capacity(rows.len()); names.len()];
                let len = rows.len();
                for row in rows {
                    let mut fields: Vec<Option<ColumnValue>> = vec![None; names.len()];
                    for (name, value) in row.fields {
                        if let Some(pos) = names.iter().position(|n| *n == name) {
                            fields[pos] = Some(value);
                        }
                    }
                    for (column, field) in columns.iter_mut().zip(fields) {
                        column.push(field);
                    }
                }
                Ok(Batch {
                    names,
                    columns,
                    len,
                    declared: None,
                })
            }
            Dataset::Columns(pairs) => {
                let len = pairs.first().map(|(_, values)| values.len()).unwrap_or(0);
                let mut names = Vec::with_capacity(pairs.len());
                let mut columns = Vec::with_capacity(pairs.len());
                for (name, values) in pairs {
                    if values.len() != len {
                        return Err(Error::schema(format!(
                            "column '{}' has {} values, expected {}",
                            name,
                            values.len(),
                            len
                        )));
                    }
                    if names.contains(&name) {
                        return Err(Error::schema(format!("duplicate column '{}'", name)));
                    }
                    names.push(name);
                    columns.push(values.into_iter().map(Some).collect());
                }
                Ok(Batch {
                    names,
                    columns,
                    len,
                    declared: None,
                })
            }
            Dataset::Typed { schema, columns } => {
                let len = columns.first().map(Vec::len).unwrap_or(0);
                if columns.len() != schema.len() || columns.iter().any(|c| c.len() != len) {
                    return Err(Error::schema("typed columns do not match their schema"));
                }
                Ok(Batch {
                    names: schema.get_column_names().iter().map(|s| s.to_string()).collect(),
                    columns: columns
                        .into_iter()
                        .map(|values| values.into_iter().map(Some).collect())
                        .collect(),
                    len,
                    declared: Some(schema),
                })
            }
            Dataset::Schema(schema) => Ok(Batch {
                names: schema.get_column_names().iter().map(|s| s.to_string()).collect(),
                columns: vec![Vec::new(); schema.len()],
                len: 0,
                declared: Some(schema),
            }),
        }
    }
}

impl From<Vec<Record>> for Dataset {
    fn from(rows: Vec<Record>) -> Self {
        Dataset::Rows(rows)
    }
}

impl From<Schema> for Dataset {
    fn from(schema: Schema) -> Self {
        Dataset::Schema(schema)
    }
}

/// Canonical columnar form of any input dataset.
///
/// `None` marks a field absent from a row (only possible for row-oriented
/// input); `Some(ColumnValue::Null)` is an explicit null.
#[derive(Debug, Clone)]
pub(crate) struct Batch {
    pub names: Vec<String>,
    pub columns: Vec<Vec<Option<ColumnValue>>>,
    pub len: usize,
    pub declared: Option<Schema>,
}

impl Batch {
    /// The declared schema if there is one, otherwise one inferred from the
    /// batch's values.
    pub fn schema(&self) -> Result<Schema> {
        if let Some(schema) = &self.declared {
            return Ok(schema.clone());
        }
        let columns = self
            .names
            .iter()
            .zip(&self.columns)
            .map(|(name, values)| (name.clone(), infer_column_type(values.iter().flatten())))
            .collect();
        Schema::new(columns)
    }

    /// Field `row` of column `col`.
    #[cfg(test)]
    pub fn field(&self, col: usize, row: usize) -> Option<&ColumnValue> {
        self.columns.get(col).and_then(|c| c.get(row)).and_then(Option::as_ref)
    }
}

/// Convert one JSON cell into a value.
pub(crate) fn json_to_value(key: &str, value: &serde_json::Value) -> Result<ColumnValue> {
    Ok(match value {
        serde_json::Value::Null => ColumnValue::Null,
        serde_json::Value::Bool(b) => ColumnValue::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => ColumnValue::Integer(i),
            None => ColumnValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => {
            if let Some(dt) = crate::column::parse_datetime(s) {
                ColumnValue::DateTime(dt)
            } else if let Some(d) = crate::column::parse_date(s) {
                ColumnValue::Date(d)
            } else {
                ColumnValue::String(s.clone())
            }
        }
        _ => {
            return Err(Error::parse(format!(
                "unsupported nested JSON value for '{}'",
                key
            )))
        }
    })
}

#[derive(Debug, Default)]
struct CsvField {
    text: String,
    /// The field was written in quotes, so an empty one is an empty string.
    quoted: bool,
}

/// Parse a CSV string into rows, handling quoted fields with embedded newlines
fn parse_csv_rows(csv: &str) -> Vec<Vec<CsvField>> {
    let mut rows = Vec::new();
    let mut current_row = Vec::new();
    let mut current_field = CsvField::default();
    let mut in_quotes = false;
    let mut chars = csv.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current_field.text.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => {
                in_quotes = true;
                current_field.quoted = true;
            }
            ',' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
            }
            '\n' if !in_quotes => {
                current_row.push(std::mem::take(&mut current_field));
                rows.push(std::mem::take(&mut current_row));
            }
            '\r' if !in_quotes => {}
            _ => current_field.text.push(c),
        }
    }

    if !current_field.text.is_empty() || current_field.quoted || !current_row.is_empty() {
        current_row.push(current_field);
        rows.push(current_row);
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_with_heterogeneous_keys() {
        let data = Dataset::from_rows(vec![
            Record::new().with("a", 1).with("b", "x"),
            Record::new().with("c", true),
            Record::new().with("b", "z").with("a", 3),
        ]);
        let batch = data.normalize().unwrap();
        assert_eq!(batch.names, vec!["a", "b", "c"]);
        assert_eq!(batch.len, 3);
        assert_eq!(batch.field(0, 1), None);
        assert_eq!(batch.field(2, 1), Some(&ColumnValue::Boolean(true)));
        assert_eq!(batch.field(0, 2), Some(&ColumnValue::Integer(3)));

        let schema = batch.schema().unwrap();
        assert_eq!(schema.get_column_type("a"), Some(ColumnType::Integer));
        assert_eq!(schema.get_column_type("b"), Some(ColumnType::String));
        assert_eq!(schema.get_column_type("c"), Some(ColumnType::Boolean));
    }

    #[test]
    fn test_columns_must_have_equal_length() {
        let data = Dataset::from_columns(vec![
            ("a", vec![1.into(), 2.into()]),
            ("b", vec!["x".into()]),
        ]);
        assert!(matches!(data.normalize(), Err(Error::Schema(_))));
    }

    #[test]
    fn test_schema_dataset_is_empty_and_declared() {
        let schema = Schema::from_tokens(&[("a", "float"), ("b", "date")]).unwrap();
        let batch = Dataset::Schema(schema.clone()).normalize().unwrap();
        assert_eq!(batch.len, 0);
        assert_eq!(batch.schema().unwrap(), schema);
    }

    #[test]
    fn test_json_rows_and_dates() {
        let data = Dataset::from_json(
            r#"[{"id": 1, "when": "2024-05-01", "at": "2024-05-01T10:30:00Z"}, {"id": 2.5}]"#,
        )
        .unwrap();
        let batch = data.normalize().unwrap();
        let schema = batch.schema().unwrap();
        assert_eq!(schema.get_column_names(), vec!["id", "when", "at"]);
        assert_eq!(schema.get_column_type("id"), Some(ColumnType::Float));
        assert_eq!(schema.get_column_type("when"), Some(ColumnType::Date));
        assert_eq!(schema.get_column_type("at"), Some(ColumnType::DateTime));
    }

    #[test]
    fn test_json_rejects_nested_values() {
        assert!(matches!(
            Dataset::from_json(r#"[{"a": [1, 2]}]"#),
            Err(Error::Parse(_))
        ));
        assert!(matches!(Dataset::from_json("42"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_csv_inference_and_quoting() {
        let csv = "id,name,score\n1,\"Smith, Jane\",9.5\n2,,10\n";
        let batch = Dataset::from_csv(csv).unwrap().normalize().unwrap();
        let schema = batch.schema().unwrap();
        assert_eq!(schema.get_column_type("id"), Some(ColumnType::Integer));
        assert_eq!(schema.get_column_type("name"), Some(ColumnType::String));
        assert_eq!(schema.get_column_type("score"), Some(ColumnType::Float));
        assert_eq!(batch.field(1, 0), Some(&ColumnValue::from("Smith, Jane")));
        assert_eq!(batch.field(1, 1), Some(&ColumnValue::Null));
        assert_eq!(batch.field(2, 1), Some(&ColumnValue::Float(10.0)));
    }

    #[test]
    fn test_csv_quoted_empty_is_empty_string() {
        let csv = "name,qty\n\"\",1\n,\"\"\n\"a\r\nb\",2\n";
        let batch = Dataset::from_csv(csv).unwrap().normalize().unwrap();
        assert_eq!(batch.len, 3);
        assert_eq!(batch.field(0, 0), Some(&ColumnValue::from("")));
        assert_eq!(batch.field(0, 1), Some(&ColumnValue::Null));
        assert_eq!(batch.field(0, 2), Some(&ColumnValue::from("a\r\nb")));
        // a quoted empty field in a numeric column is still null
        assert_eq!(batch.field(1, 1), Some(&ColumnValue::Null));
    }

    struct Fixed;

    impl Tabular for Fixed {
        fn column_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn column_type(&self, _name: &str) -> Option<ColumnType> {
            Some(ColumnType::Float)
        }

        fn column_iter<'a>(&'a self, _name: &str) -> Option<Box<dyn Iterator<Item = ColumnValue> + 'a>> {
            Some(Box::new(vec![ColumnValue::Float(1.0), ColumnValue::Null].into_iter()))
        }
    }

    #[test]
    fn test_tabular_source_keeps_declared_types() {
        let batch = Dataset::from_tabular(&Fixed).unwrap().normalize().unwrap();
        assert_eq!(batch.len, 2);
        assert_eq!(batch.schema().unwrap().get_column_type("x"), Some(ColumnType::Float));
    }
}
