//! Contributors and targets
//!
//! A contributor transforms the value being resolved. The queue applies contributors
//! in ascending priority order, so the highest priority has the final say.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use strata_core::{ChangeEvent, ContributorHandle, Origin, StateSignal};

/// Access to the concrete type behind a trait object.
///
/// Implemented for every sized `'static` type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<S: Any> AsAny for S {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Designated observer of a queue.
///
/// Passed to every contributor during resolution as read-only context, and notified
/// before general subscribers when the resolved value changes. Contributors reach the
/// concrete host through [`downcast_ref`](#method.downcast_ref).
pub trait StateTarget<T>: AsAny + Send + Sync {
    fn state_changed(&self, event: &ChangeEvent<T>);
}

impl<'a, T> dyn StateTarget<T> + 'a {
    /// The target as its concrete type, if it is an `S`
    pub fn downcast_ref<S: StateTarget<T> + 'static>(&self) -> Option<&S> {
        self.as_any().downcast_ref::<S>()
    }
}

/// A unit of logic that may override or transform a queue's value
pub trait Contributor<T>: Send + Sync {
    /// Sort key. Read once when the contributor is registered.
    fn priority(&self) -> i32;

    /// Transform the value computed so far
    fn apply(&self, target: Option<&dyn StateTarget<T>>, value: T) -> T;

    /// Signal emitted when the contributor's own state changes.
    ///
    /// Contributors returning `Some` are active: every emission re-resolves each queue
    /// the contributor is registered with.
    fn signal(&self) -> Option<&StateSignal> {
        None
    }
}

pub type SharedContributor<T> = Arc<dyn Contributor<T>>;

/// Equivalence used to detect duplicates and to find contributors to remove
pub type ContributorComparer<T> =
    Arc<dyn Fn(&SharedContributor<T>, &SharedContributor<T>) -> bool + Send + Sync>;

/// Identity comparison. Only the data pointer is compared, never the vtable.
#[inline]
pub fn same_contributor<T>(a: &SharedContributor<T>, b: &SharedContributor<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

type ApplyFn<T> = dyn Fn(Option<&dyn StateTarget<T>>, T) -> T + Send + Sync;

/// Contributor built from a closure
pub struct FnContributor<T> {
    priority: i32,
    apply: Box<ApplyFn<T>>,
    signal: Option<StateSignal>,
}

impl<T: 'static> FnContributor<T> {
    pub fn new<F>(priority: i32, apply: F) -> Self
    where
        F: Fn(Option<&dyn StateTarget<T>>, T) -> T + Send + Sync + 'static,
    {
        FnContributor {
            priority,
            apply: Box::new(apply),
            signal: None,
        }
    }

    /// Closure that ignores the target
    pub fn map<F>(priority: i32, f: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self::new(priority, move |_, value| f(value))
    }

    /// Make the contributor active, driven by the given signal
    pub fn with_signal(mut self, signal: StateSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn shared(self) -> SharedContributor<T> {
        Arc::new(self)
    }
}

impl<T: 'static> Contributor<T> for FnContributor<T> {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, target: Option<&dyn StateTarget<T>>, value: T) -> T {
        (self.apply)(target, value)
    }

    fn signal(&self) -> Option<&StateSignal> {
        self.signal.as_ref()
    }
}

impl<T> fmt::Debug for FnContributor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnContributor")
            .field("priority", &self.priority)
            .field("active", &self.signal.is_some())
            .finish()
    }
}

/// Read-only view of one registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContributorInfo {
    pub handle: ContributorHandle,
    pub priority: i32,
    pub origin: Option<Origin>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_contributor_apply() {
        let c = FnContributor::map(3, |v: i32| v * 2);
        assert_eq!(c.priority(), 3);
        assert_eq!(c.apply(None, 21), 42);
        assert!(c.signal().is_none());
    }

    #[test]
    fn test_fn_contributor_with_signal_is_active() {
        let c = FnContributor::map(0, |v: i32| v).with_signal(StateSignal::new());
        assert!(c.signal().is_some());
    }

    struct Limit(i32);

    impl StateTarget<i32> for Limit {
        fn state_changed(&self, _event: &ChangeEvent<i32>) {}
    }

    struct Other;

    impl StateTarget<i32> for Other {
        fn state_changed(&self, _event: &ChangeEvent<i32>) {}
    }

    #[test]
    fn test_contributor_reads_target() {
        let clamp = FnContributor::new(0, |target, v: i32| {
            match target.and_then(|t| t.downcast_ref::<Limit>()) {
                Some(limit) => v.min(limit.0),
                None => v,
            }
        });
        let limit: &dyn StateTarget<i32> = &Limit(10);
        let other: &dyn StateTarget<i32> = &Other;

        assert_eq!(clamp.apply(Some(limit), 25), 10);
        assert_eq!(clamp.apply(Some(other), 25), 25);
        assert_eq!(clamp.apply(None, 25), 25);
    }

    #[test]
    fn test_identity_comparison() {
        let a = FnContributor::map(0, |v: i32| v).shared();
        let b = FnContributor::map(0, |v: i32| v).shared();
        let a2 = Arc::clone(&a);

        assert!(same_contributor(&a, &a2));
        assert!(!same_contributor(&a, &b));
    }
}
