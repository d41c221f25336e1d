//! Table handle.
//!
//! A `Table` is a cheap, cloneable handle to shared table state. Mutations
//! go through a per-table writer gate, so they are serialized against each
//! other and against the recomputation of the table's views. The gate is
//! reentrant: an observer running on the mutating thread may issue a nested
//! mutation, which settles completely before the outer dispatch continues.
//!
//! # Example
//!
//! ```
//! use livepivot::{ColumnValue, Dataset, Table, TableOptions};
//!
//! let table = Table::new(
//!     "prices",
//!     Dataset::from_columns(vec![
//!         ("sym", vec!["AAPL".into(), "MSFT".into()]),
//!         ("px", vec![190.5.into(), 410.0.into()]),
//!     ]),
//!     TableOptions::new().index("sym"),
//! )
//! .unwrap();
//!
//! table
//!     .update(Dataset::from_columns(vec![
//!         ("sym", vec!["AAPL".into()]),
//!         ("px", vec![191.0.into()]),
//!     ]))
//!     .unwrap();
//! assert_eq!(table.size().unwrap(), 2);
//!
//! let first = table.snapshot().unwrap().get_value(0, "px");
//! assert_eq!(first, Some(ColumnValue::Float(191.0)));
//! ```

use crate::callbacks::{CallbackId, CallbackRegistry, DeleteCallback, UpdateEvent};
use crate::changeset::{Changeset, PortId};
use crate::column::ColumnValue;
use crate::config::ViewConfig;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::store::{ColumnStore, TableOptions, TableSnapshot};
use crate::view::{View, ViewShared};
use log::{debug, trace, warn};
use parking_lot::{Mutex, ReentrantMutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub(crate) struct TableShared {
    name: String,
    store: RwLock<ColumnStore>,
    writer: ReentrantMutex<()>,
    views: Mutex<Vec<Weak<ViewShared>>>,
    on_delete: CallbackRegistry<DeleteCallback>,
    released: AtomicBool,
    next_port: AtomicU64,
}

impl TableShared {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            return Err(Error::StaleView(format!("table '{}'", self.name)));
        }
        Ok(())
    }

    pub fn read_store(&self) -> RwLockReadGuard<'_, ColumnStore> {
        self.store.read()
    }

    pub fn register_view(&self, view: Weak<ViewShared>) {
        self.views.lock().push(view);
    }

    pub fn unregister_view(&self, view: *const ViewShared) {
        self.views
            .lock()
            .retain(|w| w.strong_count() > 0 && w.as_ptr() != view);
    }

    /// Registered views that are still alive, pruning dropped ones.
    fn live_views(&self) -> Vec<Arc<ViewShared>> {
        let mut views = self.views.lock();
        let mut live = Vec::with_capacity(views.len());
        views.retain(|w| match w.upgrade() {
            Some(view) => {
                if !view.is_released() {
                    live.push(view);
                }
                true
            }
            None => false,
        });
        live
    }
}

/// Handle to a live table. Clones share the same table.
#[derive(Clone)]
pub struct Table {
    shared: Arc<TableShared>,
}

impl Table {
    /// Create a table from a dataset or an explicit schema.
    ///
    /// Without a declared schema, column types are inferred from the data.
    pub fn new(name: impl Into<String>, data: impl Into<Dataset>, options: TableOptions) -> Result<Table> {
        let name = name.into();
        let batch = data.into().normalize()?;
        let schema = batch.schema()?;
        let mut store = ColumnStore::new(name.clone(), schema, options)?;
        if batch.len > 0 {
            store.apply_update(batch, PortId::default())?;
        }
        debug!(
            "created table '{}' with {} columns, {} rows (index: {:?}, limit: {:?})",
            name,
            store.schema().len(),
            store.len(),
            store.index_name(),
            store.limit()
        );
        Ok(Table {
            shared: Arc::new(TableShared {
                name,
                store: RwLock::new(store),
                writer: ReentrantMutex::new(()),
                views: Mutex::new(Vec::new()),
                on_delete: CallbackRegistry::new(),
                released: AtomicBool::new(false),
                next_port: AtomicU64::new(1),
            }),
        })
    }

    /// Create an empty table with a fixed schema.
    pub fn from_schema(name: impl Into<String>, schema: Schema, options: TableOptions) -> Result<Table> {
        Table::new(name, Dataset::Schema(schema), options)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn size(&self) -> Result<usize> {
        self.read(|store| store.len())
    }

    pub fn columns(&self) -> Result<Vec<String>> {
        self.read(|store| {
            store
                .schema()
                .get_column_names()
                .into_iter()
                .map(str::to_string)
                .collect()
        })
    }

    pub fn schema(&self) -> Result<Schema> {
        self.read(|store| store.schema().clone())
    }

    /// Name of the primary-key column, if the table is indexed.
    pub fn index(&self) -> Option<String> {
        self.shared.store.read().index_name().map(str::to_string)
    }

    pub fn limit(&self) -> Option<usize> {
        self.shared.store.read().limit()
    }

    /// A copy of the current rows.
    pub fn snapshot(&self) -> Result<TableSnapshot> {
        self.read(|store| store.snapshot().clone())
    }

    /// Allocate a fresh port id for tagging mutations from one input stream.
    pub fn make_port(&self) -> PortId {
        PortId(self.shared.next_port.fetch_add(1, Ordering::Relaxed))
    }

    /// Upsert or append rows. Returns the change in row count.
    pub fn update(&self, data: impl Into<Dataset>) -> Result<usize> {
        self.update_with_port(data, PortId::default())
    }

    pub fn update_with_port(&self, data: impl Into<Dataset>, port: PortId) -> Result<usize> {
        let batch = data.into().normalize()?;
        self.mutate(|store| {
            let before = store.len();
            let changeset = store.apply_update(batch, port)?;
            Ok((store.len().saturating_sub(before), changeset))
        })
    }

    /// Remove rows by primary key. Returns the number of rows removed.
    pub fn remove<I, K>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: Into<ColumnValue>,
    {
        self.remove_with_port(keys, PortId::default())
    }

    pub fn remove_with_port<I, K>(&self, keys: I, port: PortId) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: Into<ColumnValue>,
    {
        let keys: Vec<ColumnValue> = keys.into_iter().map(Into::into).collect();
        self.mutate(|store| store.remove(&keys, port))
    }

    /// Remove every row.
    pub fn clear(&self) -> Result<()> {
        self.mutate(|store| Ok(((), store.clear(PortId::default()))))
    }

    /// Swap the table's rows for `data`, keeping schema and options.
    pub fn replace(&self, data: impl Into<Dataset>) -> Result<()> {
        let batch = data.into().normalize()?;
        self.mutate(|store| Ok(((), store.replace(batch, PortId::default())?)))
    }

    /// Create a view over this table.
    pub fn view(&self, config: ViewConfig) -> Result<View> {
        View::create(Arc::clone(&self.shared), config)
    }

    /// Number of registered, unreleased views.
    pub fn num_views(&self) -> usize {
        self.shared.live_views().len()
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    /// Register an observer fired once when the table is released.
    pub fn on_delete<F>(&self, callback: F) -> Result<CallbackId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.ensure_live()?;
        Ok(self.shared.on_delete.register(Box::new(callback)))
    }

    pub fn remove_delete(&self, id: CallbackId) -> bool {
        self.shared.on_delete.remove(id)
    }

    /// Release the table.
    ///
    /// Views still bound to the table become stale; their delete observers
    /// are not fired. A second call returns [`Error::InUse`].
    pub fn delete(&self) -> Result<()> {
        let shared = &self.shared;
        let _writer = shared.writer.lock();
        if shared.released.swap(true, Ordering::AcqRel) {
            warn!("table '{}' was already released", shared.name);
            return Err(Error::InUse(format!("table '{}'", shared.name)));
        }

        let views = std::mem::take(&mut *shared.views.lock());
        let mut invalidated = 0;
        for view in views.iter().filter_map(Weak::upgrade) {
            view.invalidate();
            invalidated += 1;
        }
        let fired = shared.on_delete.dispatch_final(|callback| callback());
        shared.store.write().clear(PortId::default());

        debug!(
            "released table '{}' ({} views invalidated, {} delete observers)",
            shared.name, invalidated, fired
        );
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&ColumnStore) -> T) -> Result<T> {
        self.shared.ensure_live()?;
        let store = self.shared.store.read();
        self.shared.ensure_live()?;
        Ok(f(&store))
    }

    /// Apply one mutation and propagate it.
    ///
    /// Views are refreshed while the store is still read-locked, so no
    /// reader sees the new rows before the views reflect them. Observers run
    /// after every lock except the writer gate has been released.
    fn mutate<T>(&self, apply: impl FnOnce(&mut ColumnStore) -> Result<(T, Changeset)>) -> Result<T> {
        let shared = &self.shared;
        shared.ensure_live()?;
        let _writer = shared.writer.lock();
        shared.ensure_live()?;

        let mut store = shared.store.write();
        let (result, changeset) = apply(&mut store)?;
        let store = RwLockWriteGuard::downgrade(store);

        let views = shared.live_views();
        for view in &views {
            view.refresh(store.snapshot(), &changeset);
        }
        let size = store.len();
        drop(store);

        trace!(
            "table '{}' generation {} from {}: {} changes, size {}, {} views",
            shared.name,
            changeset.generation(),
            changeset.port(),
            changeset.len(),
            size,
            views.len()
        );

        let event = UpdateEvent {
            port_id: changeset.port(),
            generation: changeset.generation(),
        };
        for view in &views {
            view.notify_update(&event);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.shared.store.read();
        write!(
            f,
            "Table {{ name: '{}', columns: {}, rows: {}, released: {} }}",
            self.shared.name,
            store.schema().len(),
            store.len(),
            self.shared.is_released()
        )
    }
}
