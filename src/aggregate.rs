//! Aggregate functions used by pivoted views.
//!
//! Every aggregate skips nulls. A group with no non-null values aggregates
//! to null, except `count` and `distinct count` which yield 0.

use crate::column::{Column, ColumnType, ColumnValue};
use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    First,
    Last,
    DistinctCount,
    /// The value shared by every row of the group, or null if they differ.
    Unique,
    Median,
    /// Linear-interpolated percentile, `0.0..=100.0`.
    Percentile(f64),
}

impl Aggregate {
    /// Default aggregate for a column type: `sum` for numbers, `last` for
    /// dates and datetimes, `count` otherwise.
    pub fn default_for(ty: ColumnType) -> Aggregate {
        match ty {
            ColumnType::Integer | ColumnType::Float => Aggregate::Sum,
            ColumnType::Date | ColumnType::DateTime => Aggregate::Last,
            ColumnType::String | ColumnType::Boolean => Aggregate::Count,
        }
    }

    /// Check that this aggregate applies to a column of type `ty`.
    pub fn validate(&self, column: &str, ty: ColumnType) -> Result<()> {
        let numeric_only = matches!(
            self,
            Aggregate::Sum | Aggregate::Avg | Aggregate::Median | Aggregate::Percentile(_)
        );
        if numeric_only && !ty.is_numeric() {
            return Err(Error::config(format!(
                "aggregate '{}' cannot be applied to {} column '{}'",
                self, ty, column
            )));
        }
        Ok(())
    }

    /// Type of the aggregated value for an input column of type `ty`.
    pub fn output_type(&self, ty: ColumnType) -> ColumnType {
        match self {
            Aggregate::Count | Aggregate::DistinctCount => ColumnType::Integer,
            Aggregate::Avg | Aggregate::Median | Aggregate::Percentile(_) => ColumnType::Float,
            Aggregate::Sum | Aggregate::Min | Aggregate::Max | Aggregate::First | Aggregate::Last | Aggregate::Unique => ty,
        }
    }

    /// Reduce the cells of `column` at `rows`, taken in the given order.
    pub(crate) fn reduce(&self, column: &Column, rows: &[usize]) -> ColumnValue {
        match self {
            Aggregate::Count => {
                let n = rows.iter().filter(|&&r| !column.is_null_at(r)).count();
                ColumnValue::Integer(n as i64)
            }
            Aggregate::Sum => match column.column_type() {
                ColumnType::Integer => {
                    let mut total: Option<i64> = None;
                    for value in non_null(column, rows) {
                        if let Some(n) = value.as_i64() {
                            total = Some(total.unwrap_or(0).saturating_add(n));
                        }
                    }
                    total.into()
                }
                _ => {
                    let values = numbers(column, rows);
                    if values.is_empty() {
                        ColumnValue::Null
                    } else {
                        ColumnValue::Float(values.iter().sum())
                    }
                }
            },
            Aggregate::Avg => {
                let values = numbers(column, rows);
                if values.is_empty() {
                    ColumnValue::Null
                } else {
                    ColumnValue::Float(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Aggregate::Min => non_null(column, rows)
                .min_by(|a, b| a.total_cmp(b))
                .unwrap_or(ColumnValue::Null),
            Aggregate::Max => non_null(column, rows)
                .max_by(|a, b| a.total_cmp(b))
                .unwrap_or(ColumnValue::Null),
            Aggregate::First => non_null(column, rows).next().unwrap_or(ColumnValue::Null),
            Aggregate::Last => non_null(column, rows).last().unwrap_or(ColumnValue::Null),
            Aggregate::DistinctCount => {
                let mut values: Vec<ColumnValue> = non_null(column, rows).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
                ColumnValue::Integer(values.len() as i64)
            }
            Aggregate::Unique => {
                let mut values = non_null(column, rows);
                let Some(first) = values.next() else {
                    return ColumnValue::Null;
                };
                if values.all(|v| v.total_cmp(&first) == Ordering::Equal) {
                    first
                } else {
                    ColumnValue::Null
                }
            }
            Aggregate::Median => percentile(numbers(column, rows), 50.0),
            Aggregate::Percentile(p) => percentile(numbers(column, rows), *p),
        }
    }
}

fn non_null<'a>(column: &'a Column, rows: &'a [usize]) -> impl Iterator<Item = ColumnValue> + 'a {
    rows.iter()
        .filter_map(move |&r| column.get(r))
        .filter(|v| !v.is_null())
}

fn numbers(column: &Column, rows: &[usize]) -> Vec<f64> {
    rows.iter().filter_map(|&r| column.get_f64(r)).collect()
}

fn percentile(mut values: Vec<f64>, p: f64) -> ColumnValue {
    if values.is_empty() {
        return ColumnValue::Null;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    ColumnValue::Float(values[lo] + (values[hi] - values[lo]) * frac)
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Sum => f.write_str("sum"),
            Aggregate::Count => f.write_str("count"),
            Aggregate::Avg => f.write_str("avg"),
            Aggregate::Min => f.write_str("min"),
            Aggregate::Max => f.write_str("max"),
            Aggregate::First => f.write_str("first"),
            Aggregate::Last => f.write_str("last"),
            Aggregate::DistinctCount => f.write_str("distinct count"),
            Aggregate::Unique => f.write_str("unique"),
            Aggregate::Median => f.write_str("median"),
            Aggregate::Percentile(p) => write!(f, "percentile({})", p),
        }
    }
}

impl FromStr for Aggregate {
    type Err = Error;

    /// Accepts `sum`, `count`, `avg`/`mean`, `min`/`low`, `max`/`high`,
    /// `first`, `last`, `distinct count`, `unique`, `median`, `p95` and
    /// `percentile(95)`.
    fn from_str(token: &str) -> Result<Self> {
        let name = token.trim().to_ascii_lowercase().replace('_', " ");
        let unknown = || Error::config(format!("unknown aggregate '{}'", token));
        let agg = match name.as_str() {
            "sum" => Aggregate::Sum,
            "count" => Aggregate::Count,
            "avg" | "mean" | "average" => Aggregate::Avg,
            "min" | "low" => Aggregate::Min,
            "max" | "high" => Aggregate::Max,
            "first" | "first by index" => Aggregate::First,
            "last" | "last by index" => Aggregate::Last,
            "distinct count" | "count distinct" | "dcount" => Aggregate::DistinctCount,
            "unique" => Aggregate::Unique,
            "median" => Aggregate::Median,
            other => {
                let digits = other
                    .strip_prefix("percentile(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .or_else(|| other.strip_prefix('p'))
                    .ok_or_else(unknown)?;
                let p: f64 = digits.trim().parse().map_err(|_| unknown())?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(Error::config(format!("percentile {} is outside 0..=100", p)));
                }
                Aggregate::Percentile(p)
            }
        };
        Ok(agg)
    }
}

impl Serialize for Aggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
