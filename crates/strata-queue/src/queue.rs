//! State queue - one resolved value from many prioritized contributors
//!
//! Resolution seeds with the default and applies contributors from the lowest to the
//! highest priority, so the most important contributor transforms the value last.
//! Observers are only notified when the folded value differs from the committed one,
//! and they run before the new value is committed.
//!
//! No lock is held while contributors, the target or subscribers run. Resolve requests
//! arriving during a running resolve (from an active signal, a mutation made inside
//! `apply`, or a subscriber) are collapsed into further passes of that resolve,
//! bounded by [`QueueConfig::max_resolve_passes`].
//!
//! The target is held weakly so a host can own the queue it is the target of.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strata_core::{
    origins_match, ChangeEvent, ContributorHandle, ListenerId, Origin, QueueError, QueueId,
    QueueResult, SubscriptionId,
};

use crate::{
    same_contributor, Contributor, ContributorComparer, ContributorInfo, QueueConfig,
    SharedContributor, StateTarget,
};

type Subscriber<T> = Arc<dyn Fn(&ChangeEvent<T>) + Send + Sync>;

/// Value equality used for change detection and `set_default`
pub type ValueEquality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

fn partial_eq<T: PartialEq + 'static>() -> ValueEquality<T> {
    Arc::new(|a: &T, b: &T| a == b)
}

fn downgrade_target<T: 'static, S: StateTarget<T> + 'static>(
    target: &Arc<S>,
) -> Weak<dyn StateTarget<T>> {
    Arc::downgrade(target) as Weak<S>
}

struct Entry<T> {
    handle: ContributorHandle,
    contributor: SharedContributor<T>,
    priority: i32,
    origin: Option<Origin>,
    listener: Option<ListenerId>,
}

impl<T> Entry<T> {
    fn info(&self) -> ContributorInfo {
        ContributorInfo {
            handle: self.handle,
            priority: self.priority,
            origin: self.origin.clone(),
            active: self.listener.is_some(),
        }
    }

    fn detach(&self) {
        if let (Some(id), Some(signal)) = (self.listener, self.contributor.signal()) {
            signal.disconnect(id);
        }
    }
}

struct QueueState<T> {
    default: T,
    current: T,
    /// Descending priority, insertion order among equal priorities
    entries: Vec<Entry<T>>,
    /// Held weakly, the target usually owns the queue
    target: Option<Weak<dyn StateTarget<T>>>,
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
    comparer: Option<ContributorComparer<T>>,
    value_eq: ValueEquality<T>,
    config: QueueConfig,
    next_handle: u64,
    next_subscription: u64,
    batch_depth: u32,
    batch_dirty: bool,
}

impl<T> QueueState<T> {
    fn matches(&self, a: &SharedContributor<T>, b: &SharedContributor<T>) -> bool {
        match &self.comparer {
            Some(eq) => eq(a, b),
            None => same_contributor(a, b),
        }
    }

    /// Before the first entry with a strictly lower priority, else at the end
    fn insert_position(&self, priority: i32) -> usize {
        self.entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len())
    }
}

struct Shared<T> {
    id: QueueId,
    state: Mutex<QueueState<T>>,
    resolving: AtomicBool,
    pending: AtomicBool,
}

/// Releases the re-entrancy flag even if an observer panics
struct ResolveGuard<'a> {
    resolving: &'a AtomicBool,
}

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        self.resolving.store(false, Ordering::SeqCst);
    }
}

/// Closes one batch level. The outermost level resolves deferred requests, unless the
/// batch is unwinding, in which case the requests are discarded.
struct BatchGuard<'a, T: Clone + Send + Sync + 'static> {
    shared: &'a Shared<T>,
}

impl<'a, T: Clone + Send + Sync + 'static> BatchGuard<'a, T> {
    fn enter(shared: &'a Shared<T>) -> Self {
        shared.state.lock().batch_depth += 1;
        BatchGuard { shared }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for BatchGuard<'_, T> {
    fn drop(&mut self) {
        let dirty = {
            let mut state = self.shared.state.lock();
            state.batch_depth -= 1;
            state.batch_depth == 0 && std::mem::take(&mut state.batch_dirty)
        };
        if !dirty {
            return;
        }
        if std::thread::panicking() {
            tracing::warn!(
                queue = %self.shared.id,
                "batch unwound with unresolved mutations, resolve() to catch up"
            );
        } else {
            self.shared.resolve();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    /// Resolve unless the configuration or an open batch defers it
    fn schedule_resolve(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.config.auto_resolve {
                return false;
            }
            if state.batch_depth > 0 {
                state.batch_dirty = true;
                return false;
            }
        }
        self.resolve()
    }

    fn resolve(&self) -> bool {
        let mut changed = false;
        loop {
            if self.resolving.swap(true, Ordering::SeqCst) {
                self.pending.store(true, Ordering::SeqCst);
                if self.resolving.load(Ordering::SeqCst) {
                    tracing::trace!(queue = %self.id, "resolve collapsed into running pass");
                    return changed;
                }
                // The running resolve finished before it could see the request.
                continue;
            }
            changed |= self.run_passes();

            // A request from another thread may land after the last pass checked.
            if !self.pending.swap(false, Ordering::SeqCst) {
                return changed;
            }
        }
    }

    fn run_passes(&self) -> bool {
        let _guard = ResolveGuard {
            resolving: &self.resolving,
        };

        let max_passes = self.state.lock().config.max_resolve_passes;
        let mut changed = false;
        let mut pass = 1;
        loop {
            self.pending.store(false, Ordering::SeqCst);
            changed |= self.resolve_pass(pass);

            if !self.pending.load(Ordering::SeqCst) {
                break;
            }
            if pass >= max_passes {
                self.pending.store(false, Ordering::SeqCst);
                tracing::warn!(
                    queue = %self.id,
                    passes = pass,
                    "re-entrant resolve requests exceeded pass limit, dropping"
                );
                break;
            }
            pass += 1;
        }
        changed
    }

    fn resolve_pass(&self, pass: u32) -> bool {
        let (seed, contributors, target) = {
            let state = self.state.lock();
            let contributors: Vec<SharedContributor<T>> = state
                .entries
                .iter()
                .rev()
                .map(|e| Arc::clone(&e.contributor))
                .collect();
            let target = state.target.as_ref().and_then(|t| t.upgrade());
            (state.default.clone(), contributors, target)
        };

        let value = contributors
            .iter()
            .fold(seed, |value, c| c.apply(target.as_deref(), value));

        let (event, subscribers) = {
            let state = self.state.lock();
            if (state.value_eq)(&state.current, &value) {
                return false;
            }
            let subscribers: Vec<Subscriber<T>> = state
                .subscribers
                .iter()
                .map(|(_, s)| Arc::clone(s))
                .collect();
            (
                ChangeEvent::new(self.id, state.current.clone(), value),
                subscribers,
            )
        };

        tracing::debug!(
            queue = %self.id,
            pass,
            subscribers = subscribers.len(),
            "resolved value changed"
        );

        if let Some(target) = &target {
            target.state_changed(&event);
        }
        for subscriber in &subscribers {
            subscriber(&event);
        }

        let (_, _, current) = event.into_parts();
        self.state.lock().current = current;
        true
    }

    fn connect_listener(
        shared: &Arc<Shared<T>>,
        contributor: &SharedContributor<T>,
    ) -> Option<ListenerId> {
        let signal = contributor.signal()?;
        let weak = Arc::downgrade(shared);
        Some(signal.connect(move || {
            if let Some(shared) = weak.upgrade() {
                shared.schedule_resolve();
            }
        }))
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        for entry in self.state.get_mut().entries.drain(..) {
            entry.detach();
        }
    }
}

/// Layered state resolution queue.
///
/// Cloning yields another handle to the same queue. Active-contributor listeners only
/// hold weak references, so the queue is torn down when the last handle is dropped.
pub struct StateQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> StateQueue<T> {
    /// Create a queue with default configuration
    pub fn new(default: T) -> Self {
        Self::from_parts(default, None, QueueConfig::default(), None, None)
    }

    /// Create a queue with a designated target.
    ///
    /// The queue only keeps a weak reference, so a target may own its queue.
    pub fn with_target<S: StateTarget<T> + 'static>(target: &Arc<S>, default: T) -> Self {
        Self::with_weak_target(downgrade_target(target), default)
    }

    /// Create a queue for a target that is still being built, e.g. inside
    /// `Arc::new_cyclic`
    pub fn with_weak_target(target: Weak<dyn StateTarget<T>>, default: T) -> Self {
        Self::from_parts(default, Some(target), QueueConfig::default(), None, None)
    }

    /// Create a queue with custom configuration
    pub fn with_config(default: T, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(default, None, config, None, None))
    }

    pub fn builder(default: T) -> QueueBuilder<T> {
        QueueBuilder::new(default)
    }

    fn from_parts(
        default: T,
        target: Option<Weak<dyn StateTarget<T>>>,
        config: QueueConfig,
        comparer: Option<ContributorComparer<T>>,
        value_eq: Option<ValueEquality<T>>,
    ) -> Self {
        let id = QueueId::next();
        let value_eq = value_eq.unwrap_or_else(partial_eq::<T>);
        let state = QueueState {
            current: default.clone(),
            default,
            entries: Vec::new(),
            target,
            subscribers: Vec::new(),
            comparer,
            value_eq,
            config,
            next_handle: 0,
            next_subscription: 0,
            batch_depth: 0,
            batch_dirty: false,
        };
        tracing::trace!(queue = %id, "state queue created");
        StateQueue {
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(state),
                resolving: AtomicBool::new(false),
                pending: AtomicBool::new(false),
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> StateQueue<T> {
    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a contributor.
    ///
    /// Fails with [`QueueError::Duplicate`] if it is already registered, in which case
    /// nothing changes and nothing resolves.
    pub fn add(&self, contributor: SharedContributor<T>) -> QueueResult<ContributorHandle> {
        self.register(contributor, None)
    }

    /// Register a contributor tagged with an origin for later bulk removal
    pub fn add_with_origin(
        &self,
        contributor: SharedContributor<T>,
        origin: impl Into<Origin>,
    ) -> QueueResult<ContributorHandle> {
        self.register(contributor, Some(origin.into()))
    }

    /// Register a contributor held elsewhere. Fails if it has already been dropped.
    pub fn add_weak(&self, contributor: &Weak<dyn Contributor<T>>) -> QueueResult<ContributorHandle> {
        let contributor = contributor
            .upgrade()
            .ok_or(QueueError::ContributorDropped)?;
        self.register(contributor, None)
    }

    fn register(
        &self,
        contributor: SharedContributor<T>,
        origin: Option<Origin>,
    ) -> QueueResult<ContributorHandle> {
        let priority = contributor.priority();
        let handle = {
            let mut state = self.shared.state.lock();
            if state
                .entries
                .iter()
                .any(|e| state.matches(&e.contributor, &contributor))
            {
                tracing::trace!(queue = %self.shared.id, priority, "duplicate contributor rejected");
                return Err(QueueError::Duplicate);
            }

            state.next_handle += 1;
            let handle = ContributorHandle::new(state.next_handle);
            let listener = Shared::connect_listener(&self.shared, &contributor);
            let position = state.insert_position(priority);
            state.entries.insert(
                position,
                Entry {
                    handle,
                    contributor,
                    priority,
                    origin,
                    listener,
                },
            );
            tracing::trace!(
                queue = %self.shared.id,
                handle = %handle,
                priority,
                position,
                active = listener.is_some(),
                "contributor added"
            );
            handle
        };

        self.shared.schedule_resolve();
        Ok(handle)
    }

    /// Remove the first registration matching `contributor`
    pub fn remove(&self, contributor: &SharedContributor<T>) -> QueueResult<()> {
        let entry = {
            let mut state = self.shared.state.lock();
            let index = state
                .entries
                .iter()
                .position(|e| state.matches(&e.contributor, contributor))
                .ok_or(QueueError::NotRegistered)?;
            state.entries.remove(index)
        };
        self.finish_removal(vec![entry]);
        Ok(())
    }

    /// Remove the registration with the given handle
    pub fn remove_handle(&self, handle: ContributorHandle) -> QueueResult<()> {
        let entry = {
            let mut state = self.shared.state.lock();
            let index = state
                .entries
                .iter()
                .position(|e| e.handle == handle)
                .ok_or(QueueError::UnknownHandle(handle))?;
            state.entries.remove(index)
        };
        self.finish_removal(vec![entry]);
        Ok(())
    }

    /// Remove every registration matching `contributor`. Returns the number removed.
    pub fn remove_all(&self, contributor: &SharedContributor<T>) -> usize {
        self.remove_where(|state, e| state.matches(&e.contributor, contributor))
    }

    /// Remove every contributor registered with a matching origin.
    ///
    /// `None` matches contributors registered without an origin.
    pub fn remove_by_origin(&self, origin: Option<&Origin>) -> usize {
        self.remove_by_origin_with(origin, origins_match)
    }

    /// Like [`remove_by_origin`](Self::remove_by_origin) with a custom origin equality.
    /// The first argument is the registered origin, the second the one given here.
    pub fn remove_by_origin_with<F>(&self, origin: Option<&Origin>, eq: F) -> usize
    where
        F: Fn(Option<&Origin>, Option<&Origin>) -> bool,
    {
        self.remove_where(|_, e| eq(e.origin.as_ref(), origin))
    }

    /// Remove every contributor. Returns the number removed.
    pub fn clear(&self) -> usize {
        self.remove_where(|_, _| true)
    }

    fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&QueueState<T>, &Entry<T>) -> bool,
    {
        let removed: Vec<Entry<T>> = {
            let mut state = self.shared.state.lock();
            let entries = std::mem::take(&mut state.entries);
            let (removed, kept): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|e| predicate(&*state, e));
            state.entries = kept;
            removed
        };
        let count = removed.len();
        if count > 0 {
            self.finish_removal(removed);
        }
        count
    }

    /// Disconnect listeners and drop entries outside the lock, then resolve once
    fn finish_removal(&self, removed: Vec<Entry<T>>) {
        for entry in &removed {
            entry.detach();
            tracing::trace!(
                queue = %self.shared.id,
                handle = %entry.handle,
                priority = entry.priority,
                "contributor removed"
            );
        }
        drop(removed);
        self.shared.schedule_resolve();
    }

    // ------------------------------------------------------------------
    // Default value and resolution
    // ------------------------------------------------------------------

    /// Replace the default. Resolves only if the value actually changed.
    pub fn set_default(&self, value: T) -> bool {
        {
            let mut state = self.shared.state.lock();
            if (state.value_eq)(&state.default, &value) {
                return false;
            }
            state.default = value;
        }
        tracing::trace!(queue = %self.shared.id, "default changed");
        self.shared.schedule_resolve();
        true
    }

    /// Replace the default without resolving, for restoring persisted state.
    /// The host calls [`resolve`](Self::resolve) when ready.
    pub fn load_default(&self, value: T) {
        self.shared.state.lock().default = value;
    }

    /// Fold the default through all contributors and notify observers on change.
    ///
    /// Returns whether a change event was fired. A call made while a resolve is
    /// already running returns false and makes the running resolve do another pass.
    pub fn resolve(&self) -> bool {
        self.shared.resolve()
    }

    /// Run several mutations with at most one resolve at the end.
    ///
    /// Batches nest. Only the outermost batch resolves, and only if a mutation inside
    /// asked for it.
    /// If `f` panics, requests deferred by the batch are dropped and the queue keeps
    /// the last committed value until the next resolve.
    pub fn batch<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _batch = BatchGuard::enter(&self.shared);
        f(self)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Subscribe to change events. Subscribers run after the target, in subscription order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent<T>) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        state.next_subscription += 1;
        let id = SubscriptionId::new(state.next_subscription);
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sid, _)| *sid != id);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Replace the designated target. Does not resolve.
    pub fn set_target<S: StateTarget<T> + 'static>(&self, target: &Arc<S>) {
        self.shared.state.lock().target = Some(downgrade_target(target));
    }

    /// Drop the designated target. Does not resolve.
    pub fn clear_target(&self) {
        self.shared.state.lock().target = None;
    }

    /// The designated target, if set and still alive
    pub fn target(&self) -> Option<Arc<dyn StateTarget<T>>> {
        self.shared.state.lock().target.as_ref().and_then(|t| t.upgrade())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Last resolved value, or the default when no contributors are registered
    pub fn current(&self) -> T {
        let state = self.shared.state.lock();
        if state.entries.is_empty() {
            state.default.clone()
        } else {
            state.current.clone()
        }
    }

    pub fn default_value(&self) -> T {
        self.shared.state.lock().default.clone()
    }

    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    pub fn contains(&self, contributor: &SharedContributor<T>) -> bool {
        let state = self.shared.state.lock();
        state
            .entries
            .iter()
            .any(|e| state.matches(&e.contributor, contributor))
    }

    /// Registrations in stored order (descending priority)
    pub fn entries(&self) -> Vec<ContributorInfo> {
        self.shared
            .state
            .lock()
            .entries
            .iter()
            .map(Entry::info)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<ContributorInfo> {
        self.shared.state.lock().entries.get(index).map(Entry::info)
    }

    pub fn config(&self) -> QueueConfig {
        self.shared.state.lock().config.clone()
    }

    pub fn downgrade(&self) -> WeakStateQueue<T> {
        WeakStateQueue {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<T: Clone + Send + Sync + 'static + fmt::Display> StateQueue<T> {
    /// Current value prefixed with the queue's value type, e.g. `StateQueue<i32>: 15`
    pub fn describe(&self) -> String {
        format!("StateQueue<{}>: {}", std::any::type_name::<T>(), self)
    }
}

impl<U: Clone + PartialEq + Send + Sync + 'static> StateQueue<Option<U>> {
    /// Current value, or `fallback` when it is absent
    pub fn current_or(&self, fallback: U) -> U {
        self.current().unwrap_or(fallback)
    }
}

impl<T> Clone for StateQueue<T> {
    fn clone(&self) -> Self {
        StateQueue {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Default + PartialEq + Send + Sync + 'static> Default for StateQueue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + Sync + 'static + fmt::Display> fmt::Display for StateQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current())
    }
}

impl<T> fmt::Debug for StateQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateQueue")
            .field("id", &self.shared.id)
            .field("contributors", &self.shared.state.lock().entries.len())
            .finish()
    }
}

/// Non-owning handle to a [`StateQueue`]
pub struct WeakStateQueue<T> {
    shared: Weak<Shared<T>>,
}

impl<T> WeakStateQueue<T> {
    pub fn upgrade(&self) -> Option<StateQueue<T>> {
        self.shared.upgrade().map(|shared| StateQueue { shared })
    }
}

impl<T> Clone for WeakStateQueue<T> {
    fn clone(&self) -> Self {
        WeakStateQueue {
            shared: Weak::clone(&self.shared),
        }
    }
}

/// Builder for queues that need a target, comparer or custom equality
pub struct QueueBuilder<T> {
    default: T,
    target: Option<Weak<dyn StateTarget<T>>>,
    config: QueueConfig,
    comparer: Option<ContributorComparer<T>>,
    value_eq: Option<ValueEquality<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> QueueBuilder<T> {
    pub fn new(default: T) -> Self {
        QueueBuilder {
            default,
            target: None,
            config: QueueConfig::default(),
            comparer: None,
            value_eq: None,
        }
    }

    pub fn target<S: StateTarget<T> + 'static>(mut self, target: &Arc<S>) -> Self {
        self.target = Some(downgrade_target(target));
        self
    }

    pub fn weak_target(mut self, target: Weak<dyn StateTarget<T>>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Equivalence for duplicate detection and removal, replacing pointer identity.
    /// Runs with the queue locked and must not call back into the queue.
    pub fn contributor_comparer<F>(mut self, eq: F) -> Self
    where
        F: Fn(&SharedContributor<T>, &SharedContributor<T>) -> bool + Send + Sync + 'static,
    {
        self.comparer = Some(Arc::new(eq));
        self
    }

    /// Equality for change detection, replacing `PartialEq`.
    /// Runs with the queue locked and must not call back into the queue.
    pub fn value_equality<F>(mut self, eq: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.value_eq = Some(Arc::new(eq));
        self
    }

    pub fn build(self) -> QueueResult<StateQueue<T>> {
        self.config.validate()?;
        Ok(StateQueue::from_parts(
            self.default,
            self.target,
            self.config,
            self.comparer,
            self.value_eq,
        ))
    }
}
