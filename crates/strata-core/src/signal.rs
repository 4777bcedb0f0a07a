//! State signal - explicit listener list for active contributors
//!
//! An active contributor owns a [`StateSignal`] and emits it whenever its internal
//! state changes. Queues connect a listener on registration and disconnect it on
//! every removal path, so a signal never keeps a dead queue's callback around.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ListenerId;

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SignalInner {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

/// Listener list emitted by active contributors.
///
/// Clones share the same listener list, so a timer or external event source can hold
/// a clone and emit on the contributor's behalf.
#[derive(Clone, Default)]
pub struct StateSignal {
    inner: Arc<Mutex<SignalInner>>,
}

impl StateSignal {
    pub fn new() -> Self {
        StateSignal::default()
    }

    /// Register a listener, returning the id needed to disconnect it
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId::new(inner.next_id);
        inner.listeners.push((id, Arc::new(listener)));
        tracing::trace!(listener = id.0, "signal listener connected");
        id
    }

    /// Remove a listener. Returns false if it was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        let removed = inner.listeners.len() != before;
        if removed {
            tracing::trace!(listener = id.0, "signal listener disconnected");
        }
        removed
    }

    /// Notify every connected listener, in connection order.
    ///
    /// Listeners run without the list locked, so they may connect or disconnect.
    /// Returns the number of listeners notified.
    pub fn emit(&self) -> usize {
        let snapshot: Vec<Listener> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in &snapshot {
            listener();
        }
        snapshot.len()
    }

    /// Number of connected listeners
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_connected(&self, id: ListenerId) -> bool {
        self.inner.lock().listeners.iter().any(|(lid, _)| *lid == id)
    }
}

impl fmt::Debug for StateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSignal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
