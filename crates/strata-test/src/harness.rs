//! Test harness building blocks
//!
//! Observers and contributors with recorded side effects, shared by the fuzzer,
//! the integration suite and the benches.

use std::sync::{Arc, Once};

use parking_lot::Mutex;
use strata_core::{ChangeEvent, StateSignal, SubscriptionId};
use strata_queue::{Contributor, SharedContributor, StateQueue, StateTarget};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// OBSERVERS
// ============================================================================

/// Records every change event it sees, either as a subscriber or as a target
pub struct RecordingObserver<T> {
    events: Arc<Mutex<Vec<ChangeEvent<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> RecordingObserver<T> {
    pub fn new() -> Self {
        RecordingObserver {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to a queue. Clones of the observer share the same record.
    pub fn attach(&self, queue: &StateQueue<T>) -> SubscriptionId {
        let events = Arc::clone(&self.events);
        queue.subscribe(move |event| events.lock().push(event.clone()))
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn events(&self) -> Vec<ChangeEvent<T>> {
        self.events.lock().clone()
    }

    /// (previous, current) pairs in delivery order
    pub fn transitions(&self) -> Vec<(T, T)> {
        self.events
            .lock()
            .iter()
            .map(|e| (e.previous().clone(), e.current().clone()))
            .collect()
    }

    pub fn last(&self) -> Option<ChangeEvent<T>> {
        self.events.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<T: Clone + Send + Sync + 'static> Default for RecordingObserver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RecordingObserver<T> {
    fn clone(&self) -> Self {
        RecordingObserver {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StateTarget<T> for RecordingObserver<T> {
    fn state_changed(&self, event: &ChangeEvent<T>) {
        self.events.lock().push(event.clone());
    }
}

// ============================================================================
// CONTRIBUTORS
// ============================================================================

/// Appends its tag to a string value and logs each application to a shared journal
pub struct TagContributor {
    priority: i32,
    tag: String,
    journal: Arc<Mutex<Vec<String>>>,
}

impl TagContributor {
    pub fn new(priority: i32, tag: impl Into<String>, journal: Arc<Mutex<Vec<String>>>) -> Self {
        TagContributor {
            priority,
            tag: tag.into(),
            journal,
        }
    }

    pub fn shared(self) -> SharedContributor<String> {
        Arc::new(self)
    }
}

impl Contributor<String> for TagContributor {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, _target: Option<&dyn StateTarget<String>>, mut value: String) -> String {
        self.journal.lock().push(self.tag.clone());
        value.push_str(&self.tag);
        value
    }
}

/// Active contributor whose override is set from the outside.
///
/// While the override is `None` the value passes through unchanged.
pub struct ManualContributor<T> {
    priority: i32,
    value: Mutex<Option<T>>,
    signal: StateSignal,
}

impl<T: Clone + Send + Sync + 'static> ManualContributor<T> {
    pub fn new(priority: i32, value: Option<T>) -> Arc<Self> {
        Arc::new(ManualContributor {
            priority,
            value: Mutex::new(value),
            signal: StateSignal::new(),
        })
    }

    /// Change the override and emit the signal
    pub fn set(&self, value: Option<T>) {
        *self.value.lock() = value;
        self.signal.emit();
    }

    pub fn listener_count(&self) -> usize {
        self.signal.listener_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Contributor<T> for ManualContributor<T> {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, _target: Option<&dyn StateTarget<T>>, value: T) -> T {
        self.value.lock().clone().unwrap_or(value)
    }

    fn signal(&self) -> Option<&StateSignal> {
        Some(&self.signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_as_subscriber_and_target() {
        let target: Arc<RecordingObserver<i32>> = Arc::new(RecordingObserver::new());
        let subscriber: RecordingObserver<i32> = RecordingObserver::new();
        let queue = StateQueue::with_target(&target, 0);
        subscriber.attach(&queue);

        let manual = ManualContributor::<i32>::new(0, Some(3));
        queue.add(manual.clone()).unwrap();

        assert_eq!(target.transitions(), vec![(0, 3)]);
        assert_eq!(subscriber.transitions(), vec![(0, 3)]);
        assert_eq!(subscriber.last().map(|e| e.origin()), Some(queue.id()));

        let recorded = subscriber.events();
        assert_eq!(recorded.len(), 1);
        assert_eq!(*recorded[0].current(), 3);
        subscriber.clear();
        assert_eq!(subscriber.count(), 0);
        assert_eq!(target.count(), 1);
    }

    #[test]
    fn test_manual_contributor_pass_through() {
        let manual = ManualContributor::<i32>::new(0, None);
        assert_eq!(manual.apply(None, 4), 4);
        manual.set(Some(9));
        assert_eq!(manual.apply(None, 4), 9);
    }

    #[test]
    fn test_tag_contributor_journal() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let tag = TagContributor::new(1, "x", Arc::clone(&journal));
        assert_eq!(tag.apply(None, "a".to_string()), "ax");
        assert_eq!(*journal.lock(), vec!["x".to_string()]);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
