//! The view pipeline.
//!
//! A [`ViewConfig`] is compiled into a [`Plan`] against a table schema once.
//! Running a plan over a [`TableSnapshot`] filters, pivots, aggregates,
//! sorts and projects the rows into a [`ViewOutput`].
//!
//! Views without row or column pivots keep a mapping from output position
//! to table row, ordered by the sort keys and then by row index, and patch
//! it from each [`Changeset`] the way a sorted index is maintained. Pivoted
//! views are recomputed from the snapshot.
//!
//! # Pivoted layout
//!
//! The first row is the grand total. Group rows follow depth-first, each
//! group before its children; siblings are in ascending key order unless a
//! sort key reorders them. One `__ROW_PATH_<level>__` column per row pivot is
//! prepended, holding the group's key at each level and null below its
//! depth. Column pivots split every value column into `v1|v2|column`
//! sub-columns, one per distinct combination of pivot values. Combinations
//! that render to the same name get a `#2`, `#3`, ... suffix in header order.

use crate::aggregate::Aggregate;
use crate::changeset::{Changeset, IndexAdjuster, TableChange};
use crate::column::{ColumnType, ColumnValue};
use crate::config::{SortOrder, ViewConfig};
use crate::dataset::Record;
use crate::error::Result;
use crate::filter::{row_matches, CompiledFilter};
use crate::schema::Schema;
use crate::store::TableSnapshot;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Separator between split values and the column name in column-pivoted
/// output.
pub const SPLIT_SEPARATOR: &str = "|";

/// Name of the path column for row pivot `level`.
pub fn row_path_column(level: usize) -> String {
    format!("__ROW_PATH_{}__", level)
}

/// Run the full pipeline over a snapshot.
///
/// ```
/// use livepivot::{materialize, Aggregate, ColumnValue, Dataset, TableSnapshot, ViewConfig};
///
/// let snapshot = TableSnapshot::from_dataset(Dataset::from_columns(vec![
///     ("a", vec![1.into(), 2.into(), 3.into()]),
///     ("b", vec!["x".into(), "y".into(), "x".into()]),
/// ])).unwrap();
/// let config = ViewConfig::new().row_pivot("b").aggregate("a", Aggregate::Sum);
///
/// let output = materialize(&snapshot, &config).unwrap();
/// assert_eq!(output.num_rows(), 3);
/// assert_eq!(output.get_value(0, "a"), Some(&ColumnValue::Integer(6)));
/// assert_eq!(output.get_value(1, "a"), Some(&ColumnValue::Integer(4)));
/// ```
pub fn materialize(snapshot: &TableSnapshot, config: &ViewConfig) -> Result<ViewOutput> {
    let plan = Plan::new(snapshot.schema(), config)?;
    let (output, _) = plan.run(snapshot)?;
    Ok(output)
}

/// Materialized view content, stored column-major.
#[derive(Debug, Clone, Default)]
pub struct ViewOutput {
    schema: Schema,
    columns: Vec<Vec<ColumnValue>>,
    row_paths: Vec<Vec<ColumnValue>>,
    pivot_depth: usize,
    num_rows: usize,
}

impl ViewOutput {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.get_column_names()
    }

    /// Number of row pivots; 0 for views without row pivots.
    pub fn pivot_depth(&self) -> usize {
        self.pivot_depth
    }

    pub fn column(&self, name: &str) -> Option<&[ColumnValue]> {
        self.schema
            .get_column_index(name)
            .map(|i| self.columns[i].as_slice())
    }

    /// `(name, values)` for every output column in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &[ColumnValue])> {
        self.schema
            .iter()
            .map(|(name, _)| name)
            .zip(self.columns.iter().map(Vec::as_slice))
    }

    pub fn get_value(&self, row: usize, column: &str) -> Option<&ColumnValue> {
        self.column(column)?.get(row)
    }

    pub fn row(&self, row: usize) -> Option<Record> {
        if row >= self.num_rows {
            return None;
        }
        Some(
            self.columns()
                .map(|(name, values)| (name.to_string(), values[row].clone()))
                .collect(),
        )
    }

    pub fn to_records(&self) -> Vec<Record> {
        (0..self.num_rows).filter_map(|i| self.row(i)).collect()
    }

    /// Group keys leading to `row`: empty for the grand total and for views
    /// without row pivots.
    pub fn row_path(&self, row: usize) -> Option<&[ColumnValue]> {
        if row >= self.num_rows {
            return None;
        }
        Some(self.row_paths.get(row).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// True for the grand total row of a row-pivoted view.
    pub fn is_total_row(&self, row: usize) -> bool {
        self.pivot_depth > 0 && self.row_path(row).map_or(false, |p| p.is_empty())
    }
}

#[derive(Debug, Clone)]
struct ValueColumn {
    source: usize,
    aggregate: Aggregate,
}

#[derive(Debug, Clone)]
struct SortSpec {
    source: usize,
    order: SortOrder,
    aggregate: Aggregate,
}

/// A view configuration compiled against a schema.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    filters: Vec<CompiledFilter>,
    row_pivots: Vec<usize>,
    column_pivots: Vec<usize>,
    values: Vec<ValueColumn>,
    row_sort: Vec<SortSpec>,
    split_orders: Vec<SortOrder>,
}

impl Plan {
    pub fn new(schema: &Schema, config: &ViewConfig) -> Result<Plan> {
        config.validate(schema)?;
        let position = |name: &str| schema.get_column_index(name).unwrap_or_default();
        let ty = |name: &str| schema.get_column_type(name).unwrap_or(ColumnType::String);

        let filters = config
            .filter
            .iter()
            .map(|f| f.compile(schema))
            .collect::<Result<Vec<_>>>()?;

        let values = config
            .projected_columns(schema)
            .into_iter()
            .map(|name| ValueColumn {
                source: position(name),
                aggregate: config.aggregate_for(name, ty(name)),
            })
            .collect();

        let row_sort = config
            .sort
            .iter()
            .filter(|key| !config.column_pivots.contains(&key.column))
            .map(|key| SortSpec {
                source: position(key.column.as_str()),
                order: key.order,
                aggregate: config.aggregate_for(&key.column, ty(key.column.as_str())),
            })
            .collect();

        let split_orders = config
            .column_pivots
            .iter()
            .map(|pivot| {
                config
                    .sort
                    .iter()
                    .find(|key| key.column == *pivot)
                    .map_or(SortOrder::Ascending, |key| key.order)
            })
            .collect();

        Ok(Plan {
            filters,
            row_pivots: config.row_pivots.iter().map(|c| position(c.as_str())).collect(),
            column_pivots: config.column_pivots.iter().map(|c| position(c.as_str())).collect(),
            values,
            row_sort,
            split_orders,
        })
    }

    /// True if the output is a sorted selection of table rows that can be
    /// maintained incrementally.
    pub fn is_flat(&self) -> bool {
        self.row_pivots.is_empty() && self.column_pivots.is_empty()
    }

    /// Run the pipeline. Flat plans also return their row mapping.
    pub fn run(&self, snapshot: &TableSnapshot) -> Result<(ViewOutput, Option<Vec<usize>>)> {
        if self.is_flat() {
            let mapping = self.flat_mapping(snapshot);
            let output = self.project_flat(snapshot, &mapping)?;
            Ok((output, Some(mapping)))
        } else if self.row_pivots.is_empty() {
            Ok((self.run_split_rows(snapshot)?, None))
        } else {
            Ok((self.run_pivoted(snapshot)?, None))
        }
    }

    /// Filtered rows in output order.
    pub fn flat_mapping(&self, snapshot: &TableSnapshot) -> Vec<usize> {
        let mut rows: Vec<usize> = (0..snapshot.num_rows())
            .filter(|&r| row_matches(&self.filters, snapshot, r))
            .collect();
        if !self.row_sort.is_empty() {
            rows.sort_by(|&a, &b| self.compare_rows(snapshot, a, b));
        }
        rows
    }

    /// Patch a flat mapping for `changeset`, which has already been applied
    /// to `snapshot`. Returns true if the selected rows may have changed.
    pub fn apply_changes(&self, snapshot: &TableSnapshot, mapping: &mut Vec<usize>, changeset: &Changeset) -> bool {
        if changeset.requires_rebuild() {
            *mapping = self.flat_mapping(snapshot);
            return true;
        }

        let mut modified = false;
        for change in changeset.changes() {
            match *change {
                TableChange::RowDeleted { index } => {
                    modified |= IndexAdjuster::adjust_mapping_for_delete(mapping, index);
                }
                TableChange::RowSpliced { index } => IndexAdjuster::adjust_mapping_for_insert(mapping, index),
                _ => {}
            }
        }

        let touched = changeset.touched_rows();
        if touched.is_empty() {
            return modified;
        }

        // the untouched rows stay correctly ordered, so touched rows are
        // pulled out and binary-inserted against them
        let touched_set: HashSet<usize> = touched.iter().copied().collect();
        mapping.retain(|row| !touched_set.contains(row));
        for row in touched {
            if row < snapshot.num_rows() && row_matches(&self.filters, snapshot, row) {
                let pos = mapping
                    .binary_search_by(|&existing| self.compare_rows(snapshot, existing, row))
                    .unwrap_or_else(|p| p);
                mapping.insert(pos, row);
            }
        }
        true
    }

    /// Build flat output from a row mapping.
    pub fn project_flat(&self, snapshot: &TableSnapshot, mapping: &[usize]) -> Result<ViewOutput> {
        let columns = snapshot.columns();
        let schema = Schema::new(
            self.values
                .iter()
                .map(|v| (columns[v.source].name().to_string(), columns[v.source].column_type()))
                .collect(),
        )?;
        let data = self
            .values
            .iter()
            .map(|v| {
                let column = &columns[v.source];
                mapping
                    .iter()
                    .map(|&r| column.get(r).unwrap_or(ColumnValue::Null))
                    .collect()
            })
            .collect();
        Ok(ViewOutput {
            schema,
            columns: data,
            row_paths: Vec::new(),
            pivot_depth: 0,
            num_rows: mapping.len(),
        })
    }

    fn compare_rows(&self, snapshot: &TableSnapshot, a: usize, b: usize) -> Ordering {
        let columns = snapshot.columns();
        for key in &self.row_sort {
            let column = &columns[key.source];
            let va = column.get(a).unwrap_or(ColumnValue::Null);
            let vb = column.get(b).unwrap_or(ColumnValue::Null);
            let ord = directed(va.total_cmp(&vb), key.order);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.cmp(&b)
    }

    fn compare_splits(&self, a: &[ColumnValue], b: &[ColumnValue]) -> Ordering {
        for ((va, vb), order) in a.iter().zip(b).zip(&self.split_orders) {
            let ord = directed(va.total_cmp(vb), *order);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Distinct column-pivot combinations among `rows`, in header order, and
    /// the combination index of every table row (`None` for rows not in
    /// `rows`).
    fn split_combos(&self, snapshot: &TableSnapshot, rows: &[usize]) -> (Vec<Vec<ColumnValue>>, Vec<Option<usize>>) {
        let columns = snapshot.columns();
        let key_of = |row: usize| -> Vec<ColumnValue> {
            self.column_pivots
                .iter()
                .map(|&c| columns[c].get(row).unwrap_or(ColumnValue::Null))
                .collect()
        };

        let mut combos: Vec<Vec<ColumnValue>> = rows.iter().map(|&r| key_of(r)).collect();
        combos.sort_by(|a, b| self.compare_splits(a, b));
        combos.dedup_by(|a, b| self.compare_splits(a, b) == Ordering::Equal);

        let mut split_of = vec![None; snapshot.num_rows()];
        for &row in rows {
            let key = key_of(row);
            split_of[row] = combos
                .binary_search_by(|candidate| self.compare_splits(candidate, &key))
                .ok();
        }
        (combos, split_of)
    }

    fn split_name(combo: &[ColumnValue], column: &str) -> String {
        let mut parts: Vec<String> = combo.iter().map(ToString::to_string).collect();
        parts.push(column.to_string());
        parts.join(SPLIT_SEPARATOR)
    }

    /// Value columns of pivoted output as `(name, type)`, split by `combos`.
    fn value_schema(&self, snapshot: &TableSnapshot, combos: &[Vec<ColumnValue>], aggregated: bool) -> Vec<(String, ColumnType)> {
        let columns = snapshot.columns();
        let typed = |v: &ValueColumn| {
            let ty = columns[v.source].column_type();
            if aggregated {
                v.aggregate.output_type(ty)
            } else {
                ty
            }
        };
        if combos.is_empty() {
            return self
                .values
                .iter()
                .map(|v| (columns[v.source].name().to_string(), typed(v)))
                .collect();
        }
        combos
            .iter()
            .flat_map(|combo| {
                self.values
                    .iter()
                    .map(move |v| (Self::split_name(combo, columns[v.source].name()), typed(v)))
            })
            .collect()
    }

    /// Column pivots without row pivots: one output row per selected table
    /// row, each value placed in the sub-column of its split.
    fn run_split_rows(&self, snapshot: &TableSnapshot) -> Result<ViewOutput> {
        let rows = self.flat_mapping(snapshot);
        let (combos, split_of) = self.split_combos(snapshot, &rows);
        let mut names = self.value_schema(snapshot, &combos, false);
        dedupe_names(&mut names);
        let schema = Schema::new(names)?;

        let columns = snapshot.columns();
        if combos.is_empty() {
            return Ok(ViewOutput {
                columns: vec![Vec::new(); schema.len()],
                schema,
                row_paths: Vec::new(),
                pivot_depth: 0,
                num_rows: 0,
            });
        }
        let mut data = Vec::with_capacity(schema.len());
        for (ci, _) in combos.iter().enumerate() {
            for v in &self.values {
                let column = &columns[v.source];
                data.push(
                    rows.iter()
                        .map(|&r| {
                            if split_of[r] == Some(ci) {
                                column.get(r).unwrap_or(ColumnValue::Null)
                            } else {
                                ColumnValue::Null
                            }
                        })
                        .collect(),
                );
            }
        }

        Ok(ViewOutput {
            schema,
            columns: data,
            row_paths: Vec::new(),
            pivot_depth: 0,
            num_rows: rows.len(),
        })
    }

    fn run_pivoted(&self, snapshot: &TableSnapshot) -> Result<ViewOutput> {
        let columns = snapshot.columns();
        let rows: Vec<usize> = (0..snapshot.num_rows())
            .filter(|&r| row_matches(&self.filters, snapshot, r))
            .collect();
        let (combos, split_of) = if self.column_pivots.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            self.split_combos(snapshot, &rows)
        };

        let mut names: Vec<(String, ColumnType)> = self
            .row_pivots
            .iter()
            .enumerate()
            .map(|(level, &c)| (row_path_column(level), columns[c].column_type()))
            .collect();
        names.extend(self.value_schema(snapshot, &combos, true));
        dedupe_names(&mut names);
        let schema = Schema::new(names)?;

        let mut emitter = Emitter {
            columns: vec![Vec::new(); schema.len()],
            row_paths: Vec::new(),
        };

        if !rows.is_empty() {
            let mut root = Group::new(ColumnValue::Null);
            for &row in &rows {
                root.rows.push(row);
                let mut node = &mut root;
                for &pivot in &self.row_pivots {
                    let key = columns[pivot].get(row).unwrap_or(ColumnValue::Null);
                    node = node
                        .children
                        .entry(GroupKey(key.clone()))
                        .or_insert_with(|| Group::new(key));
                    node.rows.push(row);
                }
            }
            let mut path = Vec::with_capacity(self.row_pivots.len());
            self.emit(snapshot, &root, &mut path, &combos, &split_of, &mut emitter);
        }

        let num_rows = emitter.row_paths.len();
        Ok(ViewOutput {
            schema,
            columns: emitter.columns,
            row_paths: emitter.row_paths,
            pivot_depth: self.row_pivots.len(),
            num_rows,
        })
    }

    fn emit(
        &self,
        snapshot: &TableSnapshot,
        group: &Group,
        path: &mut Vec<ColumnValue>,
        combos: &[Vec<ColumnValue>],
        split_of: &[Option<usize>],
        out: &mut Emitter,
    ) {
        let columns = snapshot.columns();
        let mut cell = 0;
        for level in 0..self.row_pivots.len() {
            out.columns[cell].push(path.get(level).cloned().unwrap_or(ColumnValue::Null));
            cell += 1;
        }

        if combos.is_empty() {
            for v in &self.values {
                out.columns[cell].push(v.aggregate.reduce(&columns[v.source], &group.rows));
                cell += 1;
            }
        } else {
            let mut parts: Vec<Vec<usize>> = vec![Vec::new(); combos.len()];
            for &row in &group.rows {
                if let Some(ci) = split_of.get(row).copied().flatten() {
                    parts[ci].push(row);
                }
            }
            for part in &parts {
                for v in &self.values {
                    out.columns[cell].push(v.aggregate.reduce(&columns[v.source], part));
                    cell += 1;
                }
            }
        }
        out.row_paths.push(path.clone());

        let depth = path.len();
        let mut children: Vec<&Group> = group.children.values().collect();
        self.sort_siblings(snapshot, &mut children, depth);
        for child in children {
            path.push(child.key.clone());
            self.emit(snapshot, child, path, combos, split_of, out);
            path.pop();
        }
    }

    /// Order the children of a group at `depth`. A sort key on this level's
    /// pivot column orders by the group key; any other key orders by the
    /// group's aggregate of that column.
    fn sort_siblings(&self, snapshot: &TableSnapshot, children: &mut Vec<&Group>, depth: usize) {
        if self.row_sort.is_empty() || children.len() < 2 {
            return;
        }
        let columns = snapshot.columns();
        let level_column = self.row_pivots.get(depth).copied();
        let mut keyed: Vec<(Vec<ColumnValue>, &Group)> = children
            .iter()
            .map(|&g| {
                let keys = self
                    .row_sort
                    .iter()
                    .map(|key| {
                        if Some(key.source) == level_column {
                            g.key.clone()
                        } else {
                            key.aggregate.reduce(&columns[key.source], &g.rows)
                        }
                    })
                    .collect();
                (keys, g)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for ((va, vb), key) in a.iter().zip(b).zip(&self.row_sort) {
                let ord = directed(va.total_cmp(vb), key.order);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        *children = keyed.into_iter().map(|(_, g)| g).collect();
    }
}

/// Give repeated output names a `#2`, `#3`, ... suffix. Distinct split
/// values can render alike (a null and the text "null", or values holding
/// the separator), and each still needs its own column.
fn dedupe_names(names: &mut [(String, ColumnType)]) {
    let mut seen: HashSet<String> = HashSet::with_capacity(names.len());
    for (name, _) in names.iter_mut() {
        if seen.insert(name.clone()) {
            continue;
        }
        let mut n = 2;
        while seen.contains(&format!("{}#{}", name, n)) {
            n += 1;
        }
        *name = format!("{}#{}", name, n);
        seen.insert(name.clone());
    }
}

fn directed(ord: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Ascending => ord,
        SortOrder::Descending => ord.reverse(),
    }
}

/// Group key ordered by the value total order.
#[derive(Debug, Clone)]
struct GroupKey(ColumnValue);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug)]
struct Group {
    key: ColumnValue,
    rows: Vec<usize>,
    children: BTreeMap<GroupKey, Group>,
}

impl Group {
    fn new(key: ColumnValue) -> Self {
        Group {
            key,
            rows: Vec::new(),
            children: BTreeMap::new(),
        }
    }
}

struct Emitter {
    columns: Vec<Vec<ColumnValue>>,
    row_paths: Vec<Vec<ColumnValue>>,
}
