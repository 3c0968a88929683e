//! In-process observer registry.
//!
//! Every listener owns a queue drained by its own task, so a slow or
//! panicking callback never reaches the runtime or the other listeners.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

type Entries<T> = Mutex<Vec<(u64, mpsc::UnboundedSender<T>)>>;

/// Handle returned by `on_event` / `on_status`.
///
/// Dropping it keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove exactly that listener.
#[must_use = "dropping a Subscription does not unsubscribe; keep it to call unsubscribe()"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub(crate) struct ListenerSet<T> {
    kind: &'static str,
    next_id: AtomicU64,
    entries: Arc<Entries<T>>,
    handle: Handle,
}

impl<T> ListenerSet<T>
where
    T: Clone + Send + 'static,
{
    /// Must be called from within a tokio runtime.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
            entries: Arc::new(Mutex::new(Vec::new())),
            handle: Handle::current(),
        }
    }

    /// Registers `listener`. When `initial` yields a value it is queued
    /// before the listener becomes visible to [`publish`](Self::publish),
    /// so it is always delivered first.
    pub fn subscribe<F, I>(&self, listener: F, initial: I) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
        I: FnOnce() -> Option<T>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let kind = self.kind;

        self.handle.spawn(async move {
            while let Some(value) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                    warn!(listener = id, kind, "Listener panicked; continuing");
                }
            }
        });

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = initial() {
                let _ = tx.send(value);
            }
            entries.push((id, tx));
        }

        let registry: Weak<Entries<T>> = Arc::downgrade(&self.entries);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(entries) = registry.upgrade() {
                    entries
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Queues `value` for every registered listener, in registration order.
    pub fn publish(&self, value: &T) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
