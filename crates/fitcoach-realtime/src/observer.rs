//! Observer registry with unsubscribe handles and per-handler panic isolation.
//!
//! Every component that fans events out to callers (peer state, inbound
//! control messages, autoplay notices, orchestrator lifecycle) uses an
//! [`ObserverRegistry`]. Handlers run synchronously on the emitting thread;
//! a panicking handler is logged and skipped so the remaining handlers and
//! the emitting transport keep running.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entries<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler<T>)>>,
}

/// A set of callbacks receiving `&T`.
///
/// Cloning the registry shares the same handler set.
pub struct ObserverRegistry<T> {
    name: &'static str,
    entries: Arc<Entries<T>>,
}

impl<T> Clone for ObserverRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: 'static> ObserverRegistry<T> {
    /// Create an empty registry. `name` only appears in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(Entries {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler. Keep the returned [`Subscription`] to remove it later;
    /// dropping the handle leaves the handler registered.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.entries.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut handlers) = self.entries.handlers.lock() {
            handlers.push((id, Arc::new(handler)));
        }

        let weak: Weak<Entries<T>> = Arc::downgrade(&self.entries);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(entries) = weak.upgrade() {
                    if let Ok(mut handlers) = entries.handlers.lock() {
                        handlers.retain(|(handler_id, _)| *handler_id != id);
                    }
                }
            })),
        }
    }

    /// Deliver `value` to every handler registered at the time of the call.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe from inside their callback.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = match self.entries.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(_) => return,
        };

        for (id, handler) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                tracing::error!(
                    registry = self.name,
                    handler_id = id,
                    "Event handler panicked; continuing with remaining handlers"
                );
            }
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.handlers.lock().map_or(0, |h| h.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every handler.
    pub fn clear(&self) {
        if let Ok(mut handlers) = self.entries.handlers.lock() {
            handlers.clear();
        }
    }
}

/// Capability to remove one handler from its registry.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler. Safe to call after the registry is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
