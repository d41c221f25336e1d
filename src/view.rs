//! Views.
//!
//! A view binds a [`ViewConfig`] to a table and owns the materialized
//! output of the pipeline for that configuration. The table pushes every
//! settled mutation into its registered views before the mutating call
//! returns; flat views (no pivots) patch their row mapping from the
//! changeset, pivoted views run the pipeline again.

use crate::callbacks::{CallbackId, CallbackRegistry, DeleteCallback, UpdateCallback, UpdateEvent};
use crate::changeset::Changeset;
use crate::column::ColumnValue;
use crate::config::ViewConfig;
use crate::dataset::Record;
use crate::error::{Error, Result};
use crate::pipeline::{Plan, ViewOutput};
use crate::schema::Schema;
use crate::serialize::{self, Columns, Frame, Matrix};
use crate::store::TableSnapshot;
use crate::table::TableShared;
use log::{debug, error, trace};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct ViewState {
    /// `None` once the view or its table has been released.
    plan: Option<Plan>,
    output: ViewOutput,
    /// Table rows in output order, kept for flat views only.
    mapping: Option<Vec<usize>>,
    generation: u64,
    /// Set when the last recompute failed; reads report it until a later
    /// refresh succeeds.
    fault: Option<Error>,
}

pub(crate) struct ViewShared {
    table: Arc<TableShared>,
    config: ViewConfig,
    state: RwLock<ViewState>,
    on_update: CallbackRegistry<UpdateCallback>,
    on_delete: CallbackRegistry<DeleteCallback>,
    released: AtomicBool,
}

impl ViewShared {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() || self.table.is_released() {
            return Err(Error::StaleView(format!("view on table '{}'", self.table.name())));
        }
        Ok(())
    }

    /// Bring the output up to date with `snapshot`, which already contains
    /// the changes in `changeset`.
    pub fn refresh(&self, snapshot: &TableSnapshot, changeset: &Changeset) {
        if self.is_released() {
            return;
        }
        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(plan) = state.plan.as_ref() else {
            return;
        };
        // created against a snapshot that already holds this changeset
        if changeset.generation() <= state.generation {
            return;
        }

        let result = match state.mapping.as_mut() {
            Some(mapping) => {
                if plan.apply_changes(snapshot, mapping, changeset) {
                    plan.project_flat(snapshot, mapping).map(Some)
                } else {
                    Ok(None)
                }
            }
            None => plan.run(snapshot).map(|(output, _)| Some(output)),
        };
        match result {
            Ok(Some(output)) => {
                state.output = output;
                state.fault = None;
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    "view on table '{}' failed to recompute at generation {}: {}",
                    self.table.name(),
                    changeset.generation(),
                    e
                );
                state.fault = Some(e);
            }
        }
        state.generation = changeset.generation();

        trace!(
            "view on table '{}' at generation {}: {} rows x {} columns",
            self.table.name(),
            state.generation,
            state.output.num_rows(),
            state.output.num_columns()
        );
    }

    pub fn notify_update(&self, event: &UpdateEvent) {
        if self.on_update.is_empty() || self.ensure_live().is_err() {
            return;
        }
        if self.state.read().fault.is_some() {
            return;
        }
        self.on_update.dispatch(|callback| callback(event));
    }

    /// Drop the materialized state after the table has been released.
    pub fn invalidate(&self) {
        *self.state.write() = ViewState::default();
    }
}

/// Handle to a view. Clones share the same view.
#[derive(Clone)]
pub struct View {
    shared: Arc<ViewShared>,
}

impl View {
    pub(crate) fn create(table: Arc<TableShared>, config: ViewConfig) -> Result<View> {
        table.ensure_live()?;
        let store = table.read_store();
        table.ensure_live()?;

        let plan = Plan::new(store.schema(), &config)?;
        let (output, mapping) = plan.run(store.snapshot())?;
        let generation = store.generation();
        debug!(
            "created view on table '{}': {} rows x {} columns",
            table.name(),
            output.num_rows(),
            output.num_columns()
        );

        let shared = Arc::new(ViewShared {
            table: Arc::clone(&table),
            config,
            state: RwLock::new(ViewState {
                plan: Some(plan),
                output,
                mapping,
                generation,
                fault: None,
            }),
            on_update: CallbackRegistry::new(),
            on_delete: CallbackRegistry::new(),
            released: AtomicBool::new(false),
        });
        table.register_view(Arc::downgrade(&shared));
        drop(store);
        Ok(View { shared })
    }

    pub fn config(&self) -> &ViewConfig {
        &self.shared.config
    }

    pub fn num_rows(&self) -> Result<usize> {
        self.read(|output| output.num_rows())
    }

    pub fn num_columns(&self) -> Result<usize> {
        self.read(|output| output.num_columns())
    }

    pub fn schema(&self) -> Result<Schema> {
        self.read(|output| output.schema().clone())
    }

    /// Output column names, including pivot path and split columns.
    pub fn column_paths(&self) -> Result<Vec<String>> {
        self.read(|output| output.column_names().into_iter().map(str::to_string).collect())
    }

    /// Group path of an output row. The grand-total row has an empty path;
    /// rows of unpivoted views have none.
    pub fn row_path(&self, row: usize) -> Result<Option<Vec<ColumnValue>>> {
        self.read(|output| output.row_path(row).map(<[ColumnValue]>::to_vec))
    }

    /// Table generation the output reflects.
    pub fn generation(&self) -> Result<u64> {
        self.shared.ensure_live()?;
        Ok(self.shared.state.read().generation)
    }

    /// Smallest and largest non-null value of an output column, ignoring
    /// the grand-total row.
    pub fn get_min_max(&self, column: &str) -> Result<Option<(ColumnValue, ColumnValue)>> {
        self.read(|output| {
            let values = output
                .column(column)
                .ok_or_else(|| Error::config(format!("no output column '{}'", column)))?;
            let mut bounds: Option<(&ColumnValue, &ColumnValue)> = None;
            for (row, value) in values.iter().enumerate() {
                if value.is_null() || output.is_total_row(row) {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (value, value),
                    Some((lo, hi)) => (
                        if value.total_cmp(lo).is_lt() { value } else { lo },
                        if value.total_cmp(hi).is_gt() { value } else { hi },
                    ),
                });
            }
            Ok(bounds.map(|(lo, hi)| (lo.clone(), hi.clone())))
        })?
    }

    /// A copy of the current output.
    pub fn output(&self) -> Result<ViewOutput> {
        self.read(ViewOutput::clone)
    }

    pub fn to_records(&self) -> Result<Vec<Record>> {
        self.read(serialize::to_records)
    }

    pub fn to_columns(&self) -> Result<Columns> {
        self.read(serialize::to_columns)
    }

    pub fn to_matrix(&self) -> Result<Matrix> {
        self.read(serialize::to_matrix)
    }

    pub fn to_frame(&self) -> Result<Frame> {
        self.read(serialize::to_frame)
    }

    pub fn to_json(&self) -> Result<String> {
        self.read(serialize::to_json)?
    }

    pub fn to_csv(&self) -> Result<String> {
        self.read(serialize::to_csv)
    }

    /// Register an observer fired once per settled table mutation, after
    /// the output reflects it.
    pub fn on_update<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.shared.ensure_live()?;
        Ok(self.shared.on_update.register(Box::new(callback)))
    }

    /// Unknown handles are ignored.
    pub fn remove_update(&self, id: CallbackId) -> bool {
        self.shared.on_update.remove(id)
    }

    /// Register an observer fired once when the view is released.
    pub fn on_delete<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.shared.is_released() {
            return Err(Error::StaleView(format!(
                "view on table '{}'",
                self.shared.table.name()
            )));
        }
        Ok(self.shared.on_delete.register(Box::new(callback)))
    }

    pub fn remove_delete(&self, id: CallbackId) -> bool {
        self.shared.on_delete.remove(id)
    }

    /// Release the view: unregister it from its table, fire the delete
    /// observers in registration order, then drop the output. Repeated
    /// calls do nothing.
    pub fn delete(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.released.swap(true, Ordering::AcqRel) {
            debug!("view on table '{}' was already released", shared.table.name());
            return Ok(());
        }
        shared.table.unregister_view(Arc::as_ptr(shared));
        let fired = shared.on_delete.dispatch_final(|callback| callback());
        let dropped = shared.on_update.len();
        shared.on_update.clear();
        shared.invalidate();
        debug!(
            "released view on table '{}' ({} delete observers fired, {} update observers dropped)",
            shared.table.name(),
            fired,
            dropped
        );
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    fn read<T>(&self, f: impl FnOnce(&ViewOutput) -> T) -> Result<T> {
        self.shared.ensure_live()?;
        let state = self.shared.state.read();
        if let Some(fault) = &state.fault {
            return Err(fault.clone());
        }
        Ok(f(&state.output))
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        write!(
            f,
            "View {{ table: '{}', rows: {}, columns: {}, released: {} }}",
            self.shared.table.name(),
            state.output.num_rows(),
            state.output.num_columns(),
            self.shared.is_released()
        )
    }
}
