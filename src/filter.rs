//! Row filters for views.
//!
//! A view's filter list is a conjunction: a row is kept only if every filter
//! matches it. Filters are compiled against the table schema once, when the
//! view is created, and then evaluated per row with direct column access.
//!
//! # Null handling
//!
//! Any comparison involving a null cell yields false, including `!=` and
//! `not in`. Use `is null` / `is not null` to test for nulls.

use crate::column::{Column, ColumnType, ColumnValue};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::store::TableSnapshot;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    BeginsWith,
    EndsWith,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Contains => "contains",
            FilterOp::In => "in",
            FilterOp::NotIn => "not in",
            FilterOp::IsNull => "is null",
            FilterOp::IsNotNull => "is not null",
            FilterOp::BeginsWith => "begins with",
            FilterOp::EndsWith => "ends with",
        }
    }

    /// Operators that take no operand.
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }

    fn takes_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    fn is_textual(&self) -> bool {
        matches!(self, FilterOp::Contains | FilterOp::BeginsWith | FilterOp::EndsWith)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let normalized = token.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        match normalized.as_str() {
            "==" | "=" => Ok(FilterOp::Eq),
            "!=" | "<>" => Ok(FilterOp::Ne),
            "<" => Ok(FilterOp::Lt),
            "<=" => Ok(FilterOp::Le),
            ">" => Ok(FilterOp::Gt),
            ">=" => Ok(FilterOp::Ge),
            "contains" => Ok(FilterOp::Contains),
            "in" => Ok(FilterOp::In),
            "not in" => Ok(FilterOp::NotIn),
            "is null" => Ok(FilterOp::IsNull),
            "is not null" => Ok(FilterOp::IsNotNull),
            "begins with" | "startswith" => Ok(FilterOp::BeginsWith),
            "ends with" | "endswith" => Ok(FilterOp::EndsWith),
            _ => Err(Error::config(format!("unknown filter operator '{}'", token))),
        }
    }
}

impl Serialize for FilterOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Operand {
    None,
    Value(ColumnValue),
    List(Vec<ColumnValue>),
}

macro_rules! operand_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Value(value.into())
                }
            }
        )*
    };
}

operand_from!(ColumnValue, i64, i32, f64, bool, &str, String, NaiveDate, DateTime<Utc>);

impl<V: Into<ColumnValue>> From<Vec<V>> for Operand {
    fn from(values: Vec<V>) -> Self {
        Operand::List(values.into_iter().map(Into::into).collect())
    }
}

/// One `[column, operator, operand]` filter clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub operand: Operand,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, operand: impl Into<Operand>) -> Self {
        Filter {
            column: column.into(),
            op,
            operand: operand.into(),
        }
    }

    /// A filter without operand (`is null`, `is not null`).
    pub fn unary(column: impl Into<String>, op: FilterOp) -> Self {
        Filter {
            column: column.into(),
            op,
            operand: Operand::None,
        }
    }

    /// A filter against a list of values (`in`, `not in`).
    pub fn list<V: Into<ColumnValue>>(column: impl Into<String>, op: FilterOp, values: Vec<V>) -> Self {
        Filter {
            column: column.into(),
            op,
            operand: Operand::List(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Check the clause against `schema` and prepare it for evaluation.
    pub(crate) fn compile(&self, schema: &Schema) -> Result<CompiledFilter> {
        let column = schema
            .get_column_index(&self.column)
            .ok_or_else(|| Error::config(format!("filter column '{}' does not exist", self.column)))?;
        let ty = schema
            .get_column_type(&self.column)
            .unwrap_or(ColumnType::String);

        if self.op.is_textual() && ty != ColumnType::String {
            return Err(Error::config(format!(
                "'{}' needs a string column, '{}' is {}",
                self.op, self.column, ty
            )));
        }

        let operand = match (&self.operand, self.op) {
            (Operand::None, op) if op.is_unary() => Vec::new(),
            (_, op) if op.is_unary() => {
                return Err(Error::config(format!("'{}' takes no operand", op)));
            }
            (Operand::None, op) => {
                return Err(Error::config(format!("'{}' on '{}' needs an operand", op, self.column)));
            }
            (Operand::List(values), op) if op.takes_list() => {
                values.iter().map(|v| operand_for(v, ty)).collect()
            }
            (Operand::Value(value), op) if op.takes_list() => vec![operand_for(value, ty)],
            (Operand::List(_), op) => {
                return Err(Error::config(format!("'{}' takes a single operand", op)));
            }
            (Operand::Value(value), _) => vec![operand_for(value, ty)],
        };

        Ok(CompiledFilter {
            column,
            op: self.op,
            operand,
        })
    }
}

/// Coerce an operand to the column type when possible. Operands that do not
/// convert are kept as given and simply never compare equal.
fn operand_for(value: &ColumnValue, ty: ColumnType) -> ColumnValue {
    if value.column_type().map_or(false, |t| t.is_numeric()) && ty.is_numeric() {
        return value.clone();
    }
    value.clone().coerce(ty, "").unwrap_or_else(|_| value.clone())
}

/// A filter bound to a column position.
#[derive(Debug, Clone)]
pub(crate) struct CompiledFilter {
    column: usize,
    op: FilterOp,
    operand: Vec<ColumnValue>,
}

impl CompiledFilter {
    pub fn column(&self) -> usize {
        self.column
    }

    pub fn matches_value(&self, value: &ColumnValue) -> bool {
        match self.op {
            FilterOp::IsNull => return value.is_null(),
            FilterOp::IsNotNull => return !value.is_null(),
            _ => {}
        }
        if value.is_null() {
            return false;
        }
        let Some(first) = self.operand.first() else {
            return false;
        };
        match self.op {
            FilterOp::In => self.operand.iter().any(|v| compare(value, v) == Some(Ordering::Equal)),
            FilterOp::NotIn => self
                .operand
                .iter()
                .all(|v| matches!(compare(value, v), Some(o) if o != Ordering::Equal)),
            FilterOp::Contains => text_pair(value, first).map_or(false, |(a, b)| a.contains(b)),
            FilterOp::BeginsWith => text_pair(value, first).map_or(false, |(a, b)| a.starts_with(b)),
            FilterOp::EndsWith => text_pair(value, first).map_or(false, |(a, b)| a.ends_with(b)),
            op => compare(value, first).map_or(false, |ord| compare_ord(ord, op)),
        }
    }

    pub fn matches(&self, column: &Column, row: usize) -> bool {
        match column.get(row) {
            Some(value) => self.matches_value(&value),
            None => false,
        }
    }
}

/// True if `row` passes every filter.
pub(crate) fn row_matches(filters: &[CompiledFilter], snapshot: &TableSnapshot, row: usize) -> bool {
    let columns = snapshot.columns();
    filters.iter().all(|f| f.matches(&columns[f.column()], row))
}

/// Order two non-null values of compatible types. Mismatched types are not
/// comparable.
fn compare(a: &ColumnValue, b: &ColumnValue) -> Option<Ordering> {
    let (ta, tb) = (a.column_type()?, b.column_type()?);
    let compatible = ta == tb || (ta.is_numeric() && tb.is_numeric()) || (ta.is_temporal() && tb.is_temporal());
    compatible.then(|| a.total_cmp(b))
}

fn compare_ord(ord: Ordering, op: FilterOp) -> bool {
    match op {
        FilterOp::Eq => ord == Ordering::Equal,
        FilterOp::Ne => ord != Ordering::Equal,
        FilterOp::Lt => ord == Ordering::Less,
        FilterOp::Le => ord != Ordering::Greater,
        FilterOp::Gt => ord == Ordering::Greater,
        FilterOp::Ge => ord != Ordering::Less,
        _ => false,
    }
}

fn text_pair<'a>(a: &'a ColumnValue, b: &'a ColumnValue) -> Option<(&'a str, &'a str)> {
    Some((a.as_str()?, b.as_str()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from_tokens(&[
            ("name", "string"),
            ("age", "integer"),
            ("score", "float"),
            ("joined", "date"),
        ])
        .unwrap()
    }

    fn check(filter: Filter, value: ColumnValue) -> bool {
        filter.compile(&schema()).unwrap().matches_value(&value)
    }

    #[test]
    fn test_parse_operators() {
        assert_eq!("==".parse::<FilterOp>().unwrap(), FilterOp::Eq);
        assert_eq!("NOT  IN".parse::<FilterOp>().unwrap(), FilterOp::NotIn);
        assert_eq!("is not null".parse::<FilterOp>().unwrap(), FilterOp::IsNotNull);
        assert_eq!("begins with".parse::<FilterOp>().unwrap(), FilterOp::BeginsWith);
        assert!(matches!("~=".parse::<FilterOp>(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_simple_comparison() {
        assert!(check(Filter::new("age", FilterOp::Gt, 30), 35.into()));
        assert!(!check(Filter::new("age", FilterOp::Gt, 30), 30.into()));
        assert!(check(Filter::new("age", FilterOp::Le, 30.5), 30.into()));
        assert!(check(Filter::new("score", FilterOp::Eq, 2), 2.0.into()));
        assert!(check(Filter::new("name", FilterOp::Ne, "Bob"), "Alice".into()));
    }

    #[test]
    fn test_null_comparisons_are_false() {
        assert!(!check(Filter::new("age", FilterOp::Ne, 1), ColumnValue::Null));
        assert!(!check(Filter::list("age", FilterOp::NotIn, vec![1]), ColumnValue::Null));
        assert!(check(Filter::unary("age", FilterOp::IsNull), ColumnValue::Null));
        assert!(!check(Filter::unary("age", FilterOp::IsNotNull), ColumnValue::Null));
    }

    #[test]
    fn test_list_and_text_operators() {
        let names = vec!["Alice", "Carol"];
        assert!(check(Filter::list("name", FilterOp::In, names.clone()), "Carol".into()));
        assert!(!check(Filter::list("name", FilterOp::In, names.clone()), "Bob".into()));
        assert!(check(Filter::list("name", FilterOp::NotIn, names), "Bob".into()));
        assert!(check(Filter::new("name", FilterOp::Contains, "li"), "Alice".into()));
        assert!(check(Filter::new("name", FilterOp::BeginsWith, "Al"), "Alice".into()));
        assert!(check(Filter::new("name", FilterOp::EndsWith, "ce"), "Alice".into()));
    }

    #[test]
    fn test_date_operand_from_text() {
        let d = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(check(Filter::new("joined", FilterOp::Ge, "2024-01-01"), d.into()));
        assert!(!check(Filter::new("joined", FilterOp::Lt, "2024-01-01"), d.into()));
    }

    #[test]
    fn test_compile_errors() {
        let s = schema();
        assert!(Filter::new("nope", FilterOp::Eq, 1).compile(&s).is_err());
        assert!(Filter::new("age", FilterOp::Contains, "1").compile(&s).is_err());
        assert!(Filter::new("age", FilterOp::IsNull, 1).compile(&s).is_err());
        assert!(Filter::unary("age", FilterOp::Eq).compile(&s).is_err());
        assert!(Filter::list("age", FilterOp::Eq, vec![1, 2]).compile(&s).is_err());
        assert!(Filter::new("age", FilterOp::In, 1).compile(&s).is_ok());
    }

    #[test]
    fn test_mismatched_types_never_match() {
        assert!(!check(Filter::new("age", FilterOp::Lt, "abc"), 3.into()));
        assert!(!check(Filter::new("age", FilterOp::Ne, "abc"), 3.into()));
    }
}
