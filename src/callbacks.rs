//! Ordered observer registries.
//!
//! Observers fire in registration order. Dispatch iterates a snapshot of the
//! registry taken when the event starts, with the registry lock released, so
//! an observer may register or remove observers (including itself) while it
//! runs. A removed observer that has not been reached yet is skipped for the
//! current event and never fires again.

use crate::changeset::PortId;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned when an observer is registered; pass it back to remove
/// the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// Passed to update observers once per settled mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateEvent {
    /// Origin of the mutation.
    pub port_id: PortId,
    /// Table generation after the mutation.
    pub generation: u64,
}

pub type UpdateCallback = dyn Fn(&UpdateEvent) + Send + Sync;
pub type DeleteCallback = dyn Fn() + Send + Sync;

struct Entry<F: ?Sized> {
    id: u64,
    active: AtomicBool,
    callback: Box<F>,
}

pub(crate) struct CallbackRegistry<F: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Arc<Entry<F>>>>,
}

impl<F: ?Sized> CallbackRegistry<F> {
    pub fn new() -> Self {
        CallbackRegistry {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, callback: Box<F>) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            callback,
        }));
        CallbackId(id)
    }

    /// Remove an observer. Unknown handles are ignored.
    pub fn remove(&self, handle: CallbackId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.id == handle.0) {
            Some(pos) => {
                let entry = entries.remove(pos);
                entry.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every active observer in registration order. Returns the
    /// number of observers invoked.
    pub fn dispatch(&self, mut invoke: impl FnMut(&F)) -> usize {
        let snapshot: Vec<Arc<Entry<F>>> = self.entries.lock().clone();
        let mut fired = 0;
        for entry in snapshot {
            if entry.active.load(Ordering::Acquire) {
                invoke(&*entry.callback);
                fired += 1;
            }
        }
        fired
    }

    /// Dispatch once and deactivate every observer, so each fires at most
    /// once. Used for delete notifications.
    pub fn dispatch_final(&self, invoke: impl FnMut(&F)) -> usize {
        let fired = self.dispatch(invoke);
        self.clear();
        fired
    }

    pub fn clear(&self) {
        let drained: Vec<Arc<Entry<F>>> = std::mem::take(&mut *self.entries.lock());
        for entry in drained {
            entry.active.store(false, Ordering::Release);
        }
    }
}

impl<F: ?Sized> Default for CallbackRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event() -> UpdateEvent {
        UpdateEvent {
            port_id: PortId(0),
            generation: 1,
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry: CallbackRegistry<UpdateCallback> = CallbackRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            registry.register(Box::new(move |_| order.lock().push(n)));
        }
        assert_eq!(registry.dispatch(|cb| cb(&event())), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry: CallbackRegistry<DeleteCallback> = CallbackRegistry::new();
        let id = registry.register(Box::new(|| {}));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_during_dispatch_is_skipped() {
        let registry: Arc<CallbackRegistry<UpdateCallback>> = Arc::new(CallbackRegistry::new());
        let later_calls = Arc::new(AtomicUsize::new(0));
        let victim = Arc::new(Mutex::new(None));

        let remover = registry.clone();
        let target = victim.clone();
        registry.register(Box::new(move |_| {
            if let Some(id) = *target.lock() {
                remover.remove(id);
            }
        }));
        let calls = later_calls.clone();
        let id = registry.register(Box::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
        *victim.lock() = Some(id);

        assert_eq!(registry.dispatch(|cb| cb(&event())), 1);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        registry.dispatch(|cb| cb(&event()));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_final_fires_once() {
        let registry: CallbackRegistry<DeleteCallback> = CallbackRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.register(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        registry.dispatch_final(|cb| cb());
        registry.dispatch_final(|cb| cb());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
