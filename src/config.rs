//! View configuration.
//!
//! A [`ViewConfig`] is immutable once bound to a table. It can be built with
//! the builder methods or read from JSON:
//!
//! ```
//! use livepivot::{Aggregate, SortOrder, ViewConfig};
//!
//! let config = ViewConfig::from_json(r#"{
//!     "row_pivots": ["b"],
//!     "aggregates": {"a": "sum"},
//!     "sort": [["a", "desc"]],
//!     "filter": [["a", ">", 1]]
//! }"#).unwrap();
//!
//! assert_eq!(config.row_pivots, vec!["b"]);
//! assert_eq!(config.aggregate_override("a"), Some(Aggregate::Sum));
//! assert_eq!(config.sort[0].order, SortOrder::Descending);
//! ```

use crate::aggregate::Aggregate;
use crate::column::ColumnType;
use crate::dataset::json_to_value;
use crate::error::{Error, Result};
use crate::filter::{Filter, Operand};
use crate::schema::Schema;
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Ascending order (smallest first, nulls first)
    Ascending,
    /// Descending order (largest first, nulls last)
    Descending,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(Error::config(format!("unknown sort direction '{}'", token))),
        }
    }
}

impl Serialize for SortOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A single sort key specifying a column and order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub column: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn ascending(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            order: SortOrder::Descending,
        }
    }

    pub fn new(column: impl Into<String>, order: SortOrder) -> Self {
        SortKey {
            column: column.into(),
            order,
        }
    }
}

/// Declarative description of a view.
///
/// All parts are optional and combine independently. The pipeline runs
/// filter, pivot, aggregate, sort and project, in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewConfig {
    /// Grouping columns, outermost first.
    pub row_pivots: Vec<String>,
    /// Splitting columns, outermost first.
    pub column_pivots: Vec<String>,
    /// Aggregate overrides per column; other columns use their type default.
    pub aggregates: Vec<(String, Aggregate)>,
    /// Projection. `None` keeps every column in schema order.
    pub columns: Option<Vec<String>>,
    pub sort: Vec<SortKey>,
    pub filter: Vec<Filter>,
}

impl ViewConfig {
    pub fn new() -> Self {
        ViewConfig::default()
    }

    pub fn row_pivot(mut self, column: impl Into<String>) -> Self {
        self.row_pivots.push(column.into());
        self
    }

    pub fn column_pivot(mut self, column: impl Into<String>) -> Self {
        self.column_pivots.push(column.into());
        self
    }

    /// Set the aggregate for `column`, replacing any earlier setting.
    pub fn aggregate(mut self, column: impl Into<String>, aggregate: Aggregate) -> Self {
        let column = column.into();
        self.aggregates.retain(|(name, _)| *name != column);
        self.aggregates.push((column, aggregate));
        self
    }

    pub fn columns<S: Into<String>>(mut self, columns: Vec<S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter.push(filter);
        self
    }

    /// True if the view groups or splits its rows.
    pub fn is_pivoted(&self) -> bool {
        !self.row_pivots.is_empty() || !self.column_pivots.is_empty()
    }

    /// The configured aggregate for `column`, if any.
    pub fn aggregate_override(&self, column: &str) -> Option<Aggregate> {
        self.aggregates
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, agg)| *agg)
    }

    /// The aggregate applied to `column` of type `ty`.
    pub fn aggregate_for(&self, column: &str, ty: ColumnType) -> Aggregate {
        self.aggregate_override(column)
            .unwrap_or_else(|| Aggregate::default_for(ty))
    }

    /// Projected source columns in output order.
    pub fn projected_columns<'a>(&'a self, schema: &'a Schema) -> Vec<&'a str> {
        match &self.columns {
            Some(columns) => columns.iter().map(String::as_str).collect(),
            None => schema.get_column_names(),
        }
    }

    /// Check every column reference, aggregate and filter against `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let require = |column: &str, role: &str| {
            if schema.contains(column) {
                Ok(())
            } else {
                Err(Error::config(format!("{} column '{}' does not exist", role, column)))
            }
        };

        for column in &self.row_pivots {
            require(column, "row pivot")?;
        }
        for column in &self.column_pivots {
            require(column, "column pivot")?;
        }
        for (column, aggregate) in &self.aggregates {
            require(column, "aggregate")?;
            if let Some(ty) = schema.get_column_type(column) {
                aggregate.validate(column, ty)?;
            }
        }
        if let Some(columns) = &self.columns {
            for (i, column) in columns.iter().enumerate() {
                require(column, "projected")?;
                if columns[..i].contains(column) {
                    return Err(Error::config(format!("column '{}' is projected twice", column)));
                }
            }
        }
        for key in &self.sort {
            require(&key.column, "sort")?;
        }
        for filter in &self.filter {
            filter.compile(schema)?;
        }
        Ok(())
    }

    /// Read a configuration from JSON.
    ///
    /// Filters are `[column, operator]` or `[column, operator, operand]`
    /// arrays; an array operand is a value list for `in`/`not in`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;

        let aggregates = raw
            .aggregates
            .iter()
            .map(|(column, name)| {
                let name = name
                    .as_str()
                    .ok_or_else(|| Error::config(format!("aggregate for '{}' must be a string", column)))?;
                Ok((column.clone(), name.parse::<Aggregate>()?))
            })
            .collect::<Result<Vec<_>>>()?;

        let sort = raw
            .sort
            .into_iter()
            .map(|(column, order)| Ok(SortKey::new(column, order.parse()?)))
            .collect::<Result<Vec<_>>>()?;

        let filter = raw
            .filter
            .iter()
            .map(|clause| parse_filter(clause))
            .collect::<Result<Vec<_>>>()?;

        Ok(ViewConfig {
            row_pivots: raw.row_pivots,
            column_pivots: raw.column_pivots,
            aggregates,
            columns: raw.columns,
            sort,
            filter,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    row_pivots: Vec<String>,
    #[serde(default)]
    column_pivots: Vec<String>,
    #[serde(default)]
    aggregates: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    columns: Option<Vec<String>>,
    #[serde(default)]
    sort: Vec<(String, String)>,
    #[serde(default)]
    filter: Vec<Vec<serde_json::Value>>,
}

fn parse_filter(clause: &[serde_json::Value]) -> Result<Filter> {
    let text = |i: usize, what: &str| {
        clause
            .get(i)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::config(format!("filter {:?} is missing its {}", clause, what)))
    };
    let column = text(0, "column")?;
    let op = text(1, "operator")?.parse()?;
    let operand = match clause.get(2) {
        None => Operand::None,
        Some(serde_json::Value::Array(items)) => Operand::List(
            items
                .iter()
                .map(|item| json_to_value(column, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        Some(value) => Operand::Value(json_to_value(column, value)?),
    };
    if clause.len() > 3 {
        return Err(Error::config(format!("filter {:?} has too many parts", clause)));
    }
    Ok(Filter {
        column: column.to_string(),
        op,
        operand,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnValue;
    use crate::filter::FilterOp;

    fn schema() -> Schema {
        Schema::from_tokens(&[("a", "integer"), ("b", "string"), ("d", "date")]).unwrap()
    }

    #[test]
    fn test_builder() {
        let config = ViewConfig::new()
            .row_pivot("b")
            .aggregate("a", Aggregate::Avg)
            .aggregate("a", Aggregate::Max)
            .sort(SortKey::descending("a"))
            .filter(Filter::new("a", FilterOp::Gt, 0))
            .columns(vec!["a"]);
        assert!(config.is_pivoted());
        assert_eq!(config.aggregates.len(), 1);
        assert_eq!(config.aggregate_for("a", ColumnType::Integer), Aggregate::Max);
        assert_eq!(config.aggregate_for("d", ColumnType::Date), Aggregate::Last);
        assert_eq!(config.projected_columns(&schema()), vec!["a"]);
        assert!(config.validate(&schema()).is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_columns() {
        let s = schema();
        assert!(ViewConfig::new().row_pivot("x").validate(&s).is_err());
        assert!(ViewConfig::new().columns(vec!["a", "a"]).validate(&s).is_err());
        assert!(ViewConfig::new().sort(SortKey::ascending("zz")).validate(&s).is_err());
        assert!(ViewConfig::new()
            .aggregate("b", Aggregate::Sum)
            .validate(&s)
            .is_err());
        assert!(matches!(
            ViewConfig::new().filter(Filter::new("q", FilterOp::Eq, 1)).validate(&s),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let config = ViewConfig::from_json(
            r#"{"column_pivots": ["b"], "columns": ["a"],
                "filter": [["b", "in", ["x", "y"]], ["a", "is not null"], ["d", ">=", "2024-01-01"]]}"#,
        )
        .unwrap();
        assert_eq!(config.column_pivots, vec!["b"]);
        assert_eq!(config.filter.len(), 3);
        assert_eq!(
            config.filter[0].operand,
            Operand::List(vec![ColumnValue::from("x"), ColumnValue::from("y")])
        );
        assert_eq!(config.filter[1].operand, Operand::None);
        assert!(matches!(config.filter[2].operand, Operand::Value(ColumnValue::Date(_))));
        assert!(config.validate(&schema()).is_ok());
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(ViewConfig::from_json("{"), Err(Error::Parse(_))));
        assert!(ViewConfig::from_json(r#"{"pivots": ["a"]}"#).is_err());
        assert!(ViewConfig::from_json(r#"{"aggregates": {"a": "mode"}}"#).is_err());
        assert!(ViewConfig::from_json(r#"{"sort": [["a", "sideways"]]}"#).is_err());
        assert!(ViewConfig::from_json(r#"{"filter": [["a"]]}"#).is_err());
    }

    #[test]
    fn test_json_round_trip_shape() {
        let config = ViewConfig::new().row_pivot("b").sort(SortKey::descending("a"));
        let json = config.to_json().unwrap();
        assert!(json.contains(r#""row_pivots":["b"]"#));
        assert!(json.contains(r#""order":"desc""#));
    }
}
