//! Column types, cell values and typed column storage.
//!
//! A Column is an array-like random-access data container indexed by integer.
//! Each Column has one canonical type fixed for its lifetime; every cell is
//! either a value of that type or null.
//!
//! Values are stored in a typed vector per column with a parallel null-flag
//! vector, so numeric aggregation reads primitive slices instead of enums.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Canonical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    DateTime,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::String,
        ColumnType::Boolean,
        ColumnType::Date,
        ColumnType::DateTime,
    ];

    /// The canonical string token for this type.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::DateTime)
    }

    /// Narrowest type accommodating values of both `self` and `other`.
    ///
    /// Returns `None` when the only common type is `String`, so callers can
    /// tell a widening from a fallback.
    pub fn promote(self, other: ColumnType) -> Option<ColumnType> {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Integer, Float) | (Float, Integer) => Some(Float),
            (Date, DateTime) | (DateTime, Date) => Some(DateTime),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    /// Parse a type token. Accepts the canonical names plus the common
    /// native spellings (`int`, `i64`, `f64`, `str`, `bool`, `timestamp`, ...).
    fn from_str(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "i32" | "i64" | "int32" | "int64" => Ok(ColumnType::Integer),
            "float" | "f32" | "f64" | "double" | "float64" | "number" => Ok(ColumnType::Float),
            "string" | "str" | "text" | "utf8" => Ok(ColumnType::String),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" | "timestamp" | "time" => Ok(ColumnType::DateTime),
            other => Err(Error::schema(format!("unrecognized column type '{}'", other))),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// The canonical type of this value, or `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            ColumnValue::Integer(_) => Some(ColumnType::Integer),
            ColumnValue::Float(_) => Some(ColumnType::Float),
            ColumnValue::String(_) => Some(ColumnType::String),
            ColumnValue::Boolean(_) => Some(ColumnType::Boolean),
            ColumnValue::Date(_) => Some(ColumnType::Date),
            ColumnValue::DateTime(_) => Some(ColumnType::DateTime),
            ColumnValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value widened to f64 (integers and floats only).
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Integer(v) => Some(*v as f64),
            ColumnValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            ColumnValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ColumnValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Short description used in error messages, e.g. `string "abc"`.
    pub(crate) fn describe(&self) -> String {
        match self {
            ColumnValue::Null => "null".to_string(),
            ColumnValue::String(s) => format!("string {:?}", s),
            other => match other.column_type() {
                Some(ty) => format!("{} {}", ty, other),
                None => other.to_string(),
            },
        }
    }

    /// Convert this value to `target`, following the engine's coercion rules.
    ///
    /// Null stays null. Integers widen to floats; floats narrow to integers
    /// only when integral; ISO text parses into dates and datetimes; dates
    /// widen to datetimes at midnight; integers are read as epoch
    /// milliseconds for datetime columns; anything renders into a string.
    pub fn coerce(self, target: ColumnType, column: &str) -> Result<ColumnValue> {
        use ColumnValue as V;
        let mismatch = |value: &ColumnValue| Error::TypeMismatch {
            column: column.to_string(),
            expected: target,
            found: value.describe(),
        };

        if self.column_type() == Some(target) || self.is_null() {
            return Ok(self);
        }

        let coerced = match (&self, target) {
            (V::Integer(n), ColumnType::Float) => Some(V::Float(*n as f64)),
            (V::Float(f), ColumnType::Integer) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(V::Integer(*f as i64))
                } else {
                    None
                }
            }
            (V::Integer(ms), ColumnType::DateTime) => Utc.timestamp_millis_opt(*ms).single().map(V::DateTime),
            (V::Date(d), ColumnType::DateTime) => d
                .and_hms_opt(0, 0, 0)
                .map(|naive| V::DateTime(Utc.from_utc_datetime(&naive))),
            (V::String(s), ColumnType::Integer) => s.trim().parse::<i64>().ok().map(V::Integer),
            (V::String(s), ColumnType::Float) => s.trim().parse::<f64>().ok().map(V::Float),
            (V::String(s), ColumnType::Boolean) => parse_bool(s).map(V::Boolean),
            (V::String(s), ColumnType::Date) => parse_date(s).map(V::Date),
            (V::String(s), ColumnType::DateTime) => parse_datetime(s).map(V::DateTime),
            (_, ColumnType::String) => Some(V::String(self.to_string())),
            _ => None,
        };

        coerced.ok_or_else(|| mismatch(&self))
    }

    /// Total order over values: nulls first, then booleans, numbers (integers
    /// and floats compare numerically), temporal values, and strings.
    pub fn total_cmp(&self, other: &ColumnValue) -> Ordering {
        use ColumnValue as V;
        match (self, other) {
            (V::Null, V::Null) => Ordering::Equal,
            (V::Integer(a), V::Integer(b)) => a.cmp(b),
            (V::Float(a), V::Float(b)) => a.total_cmp(b),
            (V::Integer(a), V::Float(b)) => (*a as f64).total_cmp(b),
            (V::Float(a), V::Integer(b)) => a.total_cmp(&(*b as f64)),
            (V::String(a), V::String(b)) => a.cmp(b),
            (V::Boolean(a), V::Boolean(b)) => a.cmp(b),
            (V::Date(a), V::Date(b)) => a.cmp(b),
            (V::DateTime(a), V::DateTime(b)) => a.cmp(b),
            (V::Date(a), V::DateTime(b)) => midnight(*a).cmp(b),
            (V::DateTime(a), V::Date(b)) => a.cmp(&midnight(*b)),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            ColumnValue::Null => 0,
            ColumnValue::Boolean(_) => 1,
            ColumnValue::Integer(_) | ColumnValue::Float(_) => 2,
            ColumnValue::Date(_) | ColumnValue::DateTime(_) => 3,
            ColumnValue::String(_) => 4,
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&naive)
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Integer(n) => write!(f, "{}", n),
            ColumnValue::Float(v) => write!(f, "{}", v),
            ColumnValue::String(s) => f.write_str(s),
            ColumnValue::Boolean(b) => write!(f, "{}", b),
            ColumnValue::Date(d) => f.write_str(&format_date(*d)),
            ColumnValue::DateTime(dt) => f.write_str(&format_datetime(*dt)),
            ColumnValue::Null => f.write_str("null"),
        }
    }
}

impl Serialize for ColumnValue {
    /// JSON has no date type, so temporal values serialize as ISO-8601 text.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ColumnValue::Integer(n) => serializer.serialize_i64(*n),
            ColumnValue::Float(v) => serializer.serialize_f64(*v),
            ColumnValue::String(s) => serializer.serialize_str(s),
            ColumnValue::Boolean(b) => serializer.serialize_bool(*b),
            ColumnValue::Date(d) => serializer.serialize_str(&format_date(*d)),
            ColumnValue::DateTime(dt) => serializer.serialize_str(&format_datetime(*dt)),
            ColumnValue::Null => serializer.serialize_none(),
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Integer(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Integer(v as i64)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Boolean(v)
    }
}

impl From<NaiveDate> for ColumnValue {
    fn from(v: NaiveDate) -> Self {
        ColumnValue::Date(v)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(v: DateTime<Utc>) -> Self {
        ColumnValue::DateTime(v)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ColumnValue::Null)
    }
}

// ============================================================================
// Text helpers shared by coercion and the CSV/JSON readers
// ============================================================================

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub(crate) fn parse_bool(text: &str) -> Option<bool> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse an ISO 8601 date (`YYYY-MM-DD`).
pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.len() != 10 || trimmed.as_bytes().get(4) != Some(&b'-') {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

/// Parse an ISO 8601 datetime. Accepts RFC 3339 with offset, or a naive
/// `YYYY-MM-DD[T ]HH:MM[:SS[.fff]]` which is taken as UTC.
pub(crate) fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if !(trimmed.contains('T') || trimmed.contains(' ')) || !trimmed.contains(':') {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = trimmed.trim_end_matches('Z');
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

// ============================================================================
// Column storage
// ============================================================================

#[derive(Debug, Clone)]
enum ColumnData {
    Integer(Vec<i64>),
    Float(Vec<f64>),
    String(Vec<String>),
    Boolean(Vec<bool>),
    Date(Vec<NaiveDate>),
    DateTime(Vec<DateTime<Utc>>),
}

impl ColumnData {
    fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => ColumnData::Integer(Vec::new()),
            ColumnType::Float => ColumnData::Float(Vec::new()),
            ColumnType::String => ColumnData::String(Vec::new()),
            ColumnType::Boolean => ColumnData::Boolean(Vec::new()),
            ColumnType::Date => ColumnData::Date(Vec::new()),
            ColumnType::DateTime => ColumnData::DateTime(Vec::new()),
        }
    }

    fn get(&self, index: usize) -> Option<ColumnValue> {
        match self {
            ColumnData::Integer(v) => v.get(index).map(|x| ColumnValue::Integer(*x)),
            ColumnData::Float(v) => v.get(index).map(|x| ColumnValue::Float(*x)),
            ColumnData::String(v) => v.get(index).map(|x| ColumnValue::String(x.clone())),
            ColumnData::Boolean(v) => v.get(index).map(|x| ColumnValue::Boolean(*x)),
            ColumnData::Date(v) => v.get(index).map(|x| ColumnValue::Date(*x)),
            ColumnData::DateTime(v) => v.get(index).map(|x| ColumnValue::DateTime(*x)),
        }
    }

    /// Store `value` at `index`, or append when `index` is `None`. A null
    /// value stores the type's placeholder; the caller tracks the null flag.
    fn put(&mut self, index: Option<usize>, value: ColumnValue) {
        fn place<T>(vec: &mut Vec<T>, index: Option<usize>, item: T) {
            match index {
                Some(i) => vec[i] = item,
                None => vec.push(item),
            }
        }
        match (self, value) {
            (ColumnData::Integer(v), ColumnValue::Integer(x)) => place(v, index, x),
            (ColumnData::Float(v), ColumnValue::Float(x)) => place(v, index, x),
            (ColumnData::String(v), ColumnValue::String(x)) => place(v, index, x),
            (ColumnData::Boolean(v), ColumnValue::Boolean(x)) => place(v, index, x),
            (ColumnData::Date(v), ColumnValue::Date(x)) => place(v, index, x),
            (ColumnData::DateTime(v), ColumnValue::DateTime(x)) => place(v, index, x),
            (ColumnData::Integer(v), _) => place(v, index, 0),
            (ColumnData::Float(v), _) => place(v, index, 0.0),
            (ColumnData::String(v), _) => place(v, index, String::new()),
            (ColumnData::Boolean(v), _) => place(v, index, false),
            (ColumnData::Date(v), _) => place(v, index, NaiveDate::default()),
            (ColumnData::DateTime(v), _) => place(v, index, DateTime::<Utc>::default()),
        }
    }

    /// Insert `value` at `index`, shifting later values up. Null stores the
    /// type's placeholder like `put`.
    fn insert(&mut self, index: usize, value: ColumnValue) {
        match (self, value) {
            (ColumnData::Integer(v), ColumnValue::Integer(x)) => v.insert(index, x),
            (ColumnData::Float(v), ColumnValue::Float(x)) => v.insert(index, x),
            (ColumnData::String(v), ColumnValue::String(x)) => v.insert(index, x),
            (ColumnData::Boolean(v), ColumnValue::Boolean(x)) => v.insert(index, x),
            (ColumnData::Date(v), ColumnValue::Date(x)) => v.insert(index, x),
            (ColumnData::DateTime(v), ColumnValue::DateTime(x)) => v.insert(index, x),
            (ColumnData::Integer(v), _) => v.insert(index, 0),
            (ColumnData::Float(v), _) => v.insert(index, 0.0),
            (ColumnData::String(v), _) => v.insert(index, String::new()),
            (ColumnData::Boolean(v), _) => v.insert(index, false),
            (ColumnData::Date(v), _) => v.insert(index, NaiveDate::default()),
            (ColumnData::DateTime(v), _) => v.insert(index, DateTime::<Utc>::default()),
        }
    }

    fn retain(&mut self, keep: &[bool]) {
        fn retain_vec<T>(vec: &mut Vec<T>, keep: &[bool]) {
            let mut i = 0;
            vec.retain(|_| {
                let kept = keep[i];
                i += 1;
                kept
            });
        }
        match self {
            ColumnData::Integer(v) => retain_vec(v, keep),
            ColumnData::Float(v) => retain_vec(v, keep),
            ColumnData::String(v) => retain_vec(v, keep),
            ColumnData::Boolean(v) => retain_vec(v, keep),
            ColumnData::Date(v) => retain_vec(v, keep),
            ColumnData::DateTime(v) => retain_vec(v, keep),
        }
    }

    fn clear(&mut self) {
        match self {
            ColumnData::Integer(v) => v.clear(),
            ColumnData::Float(v) => v.clear(),
            ColumnData::String(v) => v.clear(),
            ColumnData::Boolean(v) => v.clear(),
            ColumnData::Date(v) => v.clear(),
            ColumnData::DateTime(v) => v.clear(),
        }
    }
}

/// Typed column with null tracking.
///
/// Values passed to [`Column::push`] and [`Column::set`] must already be of the
/// column's type (or null); use [`ColumnValue::coerce`] first.
#[derive(Clone)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    data: ColumnData,
    null_flags: Vec<bool>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            column_type,
            data: ColumnData::new(column_type),
            null_flags: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn len(&self) -> usize {
        self.null_flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.null_flags.is_empty()
    }

    fn validate(&self, value: &ColumnValue) -> Result<()> {
        match value.column_type() {
            None => Ok(()),
            Some(ty) if ty == self.column_type => Ok(()),
            Some(_) => Err(Error::TypeMismatch {
                column: self.name.clone(),
                expected: self.column_type,
                found: value.describe(),
            }),
        }
    }

    pub fn get(&self, index: usize) -> Option<ColumnValue> {
        if *self.null_flags.get(index)? {
            return Some(ColumnValue::Null);
        }
        self.data.get(index)
    }

    /// Fast numeric access without building a `ColumnValue`.
    /// Returns None if the value is null, not numeric, or out of bounds.
    #[inline]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        if self.is_null_at(index) {
            return None;
        }
        match &self.data {
            ColumnData::Integer(v) => v.get(index).map(|n| *n as f64),
            ColumnData::Float(v) => v.get(index).copied(),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null_at(&self, index: usize) -> bool {
        self.null_flags.get(index).copied().unwrap_or(true)
    }

    pub fn push(&mut self, value: ColumnValue) -> Result<()> {
        self.validate(&value)?;
        self.null_flags.push(value.is_null());
        self.data.put(None, value);
        Ok(())
    }

    pub fn set(&mut self, index: usize, value: ColumnValue) -> Result<()> {
        if index >= self.len() {
            return Err(Error::schema(format!(
                "row {} out of range [0, {}) in column '{}'",
                index,
                self.len(),
                self.name
            )));
        }
        self.validate(&value)?;
        self.null_flags[index] = value.is_null();
        self.data.put(Some(index), value);
        Ok(())
    }

    /// Insert a row at `index` (at most `len()`), shifting later rows up.
    pub fn insert(&mut self, index: usize, value: ColumnValue) -> Result<()> {
        if index > self.len() {
            return Err(Error::schema(format!(
                "row {} out of range [0, {}] in column '{}'",
                index,
                self.len(),
                self.name
            )));
        }
        self.validate(&value)?;
        self.null_flags.insert(index, value.is_null());
        self.data.insert(index, value);
        Ok(())
    }

    /// Keep only the rows whose flag in `keep` is true. `keep.len()` must
    /// equal the column length.
    pub fn retain(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.len());
        self.data.retain(keep);
        let mut i = 0;
        self.null_flags.retain(|_| {
            let kept = keep[i];
            i += 1;
            kept
        });
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.null_flags.clear();
    }

    pub fn iter(&self) -> ColumnIterator<'_> {
        ColumnIterator {
            column: self,
            index: 0,
        }
    }
}

pub struct ColumnIterator<'a> {
    column: &'a Column,
    index: usize,
}

impl<'a> Iterator for ColumnIterator<'a> {
    type Item = ColumnValue;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.column.get(self.index)?;
        self.index += 1;
        Some(value)
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {}, len: {} }}",
            self.name,
            self.column_type,
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_basic() {
        let mut col = Column::new("qty", ColumnType::Integer);
        col.push(ColumnValue::Integer(10)).unwrap();
        col.push(ColumnValue::Null).unwrap();
        col.push(ColumnValue::Integer(30)).unwrap();

        assert_eq!(col.len(), 3);
        assert_eq!(col.get(0).unwrap().as_i64(), Some(10));
        assert!(col.get(1).unwrap().is_null());
        assert!(col.is_null_at(1));
        assert_eq!(col.get_f64(2), Some(30.0));
        assert_eq!(col.get_f64(1), None);
        assert!(col.get(3).is_none());
    }

    #[test]
    fn test_column_rejects_wrong_type() {
        let mut col = Column::new("qty", ColumnType::Integer);
        let err = col.push(ColumnValue::String("ten".into())).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(col.is_empty());
    }

    #[test]
    fn test_column_set_and_retain() {
        let mut col = Column::new("name", ColumnType::String);
        for name in ["a", "b", "c", "d"] {
            col.push(name.into()).unwrap();
        }
        col.set(1, ColumnValue::Null).unwrap();
        col.set(2, "z".into()).unwrap();
        col.retain(&[true, true, false, true]);

        let values: Vec<ColumnValue> = col.iter().collect();
        assert_eq!(values, vec!["a".into(), ColumnValue::Null, "d".into()]);

        col.insert(1, ColumnValue::Null).unwrap();
        col.insert(0, "y".into()).unwrap();
        let values: Vec<ColumnValue> = col.iter().collect();
        assert_eq!(values, vec!["y".into(), "a".into(), ColumnValue::Null, ColumnValue::Null, "d".into()]);
        assert!(col.insert(9, "q".into()).is_err());
    }

    #[test]
    fn test_type_tokens() {
        assert_eq!("INTEGER".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert_eq!("f64".parse::<ColumnType>().unwrap(), ColumnType::Float);
        assert_eq!("timestamp".parse::<ColumnType>().unwrap(), ColumnType::DateTime);
        for ty in ColumnType::ALL {
            assert_eq!(ty.name().parse::<ColumnType>().unwrap(), ty);
        }
        assert!(matches!("decimal".parse::<ColumnType>(), Err(Error::Schema(_))));
    }

    #[test]
    fn test_promotion() {
        assert_eq!(ColumnType::Integer.promote(ColumnType::Float), Some(ColumnType::Float));
        assert_eq!(ColumnType::Date.promote(ColumnType::DateTime), Some(ColumnType::DateTime));
        assert_eq!(ColumnType::Integer.promote(ColumnType::String), None);
        assert_eq!(ColumnType::Boolean.promote(ColumnType::Boolean), Some(ColumnType::Boolean));
    }

    #[test]
    fn test_coercion() {
        let v = ColumnValue::Integer(3).coerce(ColumnType::Float, "x").unwrap();
        assert_eq!(v, ColumnValue::Float(3.0));

        let v = ColumnValue::Float(4.0).coerce(ColumnType::Integer, "x").unwrap();
        assert_eq!(v, ColumnValue::Integer(4));
        assert!(ColumnValue::Float(4.5).coerce(ColumnType::Integer, "x").is_err());

        let v = ColumnValue::from("2024-03-01").coerce(ColumnType::Date, "d").unwrap();
        assert_eq!(v, ColumnValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));

        let v = ColumnValue::Boolean(true).coerce(ColumnType::String, "s").unwrap();
        assert_eq!(v, ColumnValue::from("true"));

        assert!(ColumnValue::Boolean(true).coerce(ColumnType::Date, "d").is_err());
        assert!(ColumnValue::Null.coerce(ColumnType::Date, "d").unwrap().is_null());
    }

    #[test]
    fn test_datetime_text() {
        let dt = parse_datetime("2024-01-02T03:04:05.250Z").unwrap();
        assert_eq!(format_datetime(dt), "2024-01-02T03:04:05.250Z");

        let dt = parse_datetime("2024-01-02 03:04").unwrap();
        assert_eq!(format_datetime(dt), "2024-01-02T03:04:00.000Z");

        assert!(parse_datetime("2024-01-02").is_none());
        assert!(parse_date("2024-13-02").is_none());
    }

    #[test]
    fn test_total_order() {
        use std::cmp::Ordering::*;
        assert_eq!(ColumnValue::Null.total_cmp(&ColumnValue::Integer(0)), Less);
        assert_eq!(ColumnValue::Integer(2).total_cmp(&ColumnValue::Float(1.5)), Greater);
        assert_eq!(ColumnValue::from("a").total_cmp(&ColumnValue::from("b")), Less);
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dt = midnight(d);
        assert_eq!(ColumnValue::Date(d).total_cmp(&ColumnValue::DateTime(dt)), Equal);
    }

    #[test]
    fn test_json_serialization() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let values = vec![
            ColumnValue::Integer(1),
            ColumnValue::Float(2.5),
            ColumnValue::Null,
            ColumnValue::Date(d),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[1,2.5,null,"2024-01-01"]"#);
    }
}
