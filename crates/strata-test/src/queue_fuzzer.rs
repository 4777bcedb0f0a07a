//! Queue Fuzzer - Randomized operation sequences checked against a reference model
//!
//! Checks after every operation:
//! - Resolved value equals the reference fold
//! - Exactly one change event per observable change
//! - Duplicate registrations are rejected
//! - Active listeners are connected while registered and torn down after removal

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::{Origin, QueueError, StateSignal};
use strata_queue::{Contributor, SharedContributor, StateQueue, StateTarget};

const ORIGINS: [&str; 3] = ["a", "b", "c"];

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of operations to run
    pub op_count: usize,
    /// Priorities are drawn from `-priority_span..=priority_span`
    pub priority_span: i32,
    /// Probability that a new contributor is active
    pub active_prob: f64,
    /// Probability that a new contributor carries an origin tag
    pub origin_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            op_count: 1000,
            priority_span: 3,
            active_prob: 0.3,
            origin_prob: 0.6,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            op_count: 200,
            ..FuzzerConfig::default()
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            op_count: 20_000,
            priority_span: 8,
            active_prob: 0.5,
            origin_prob: 0.8,
            seed: 42,
        }
    }
}

/// Affine contributor: `value * mul + add`.
///
/// Order-sensitive, so any ordering mistake changes the folded value.
pub struct AffineContributor {
    priority: i32,
    mul: i64,
    add: AtomicI64,
    signal: Option<StateSignal>,
}

impl AffineContributor {
    pub fn new(priority: i32, mul: i64, add: i64, active: bool) -> Arc<Self> {
        Arc::new(AffineContributor {
            priority,
            mul,
            add: AtomicI64::new(add),
            signal: active.then(StateSignal::new),
        })
    }

    fn transform(&self, value: i64) -> i64 {
        value
            .wrapping_mul(self.mul)
            .wrapping_add(self.add.load(Ordering::SeqCst))
    }

    /// Change the offset and emit, if active
    pub fn bump(&self, add: i64) {
        self.add.store(add, Ordering::SeqCst);
        if let Some(signal) = &self.signal {
            signal.emit();
        }
    }

    pub fn is_active(&self) -> bool {
        self.signal.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.signal.as_ref().map_or(0, StateSignal::listener_count)
    }
}

impl Contributor<i64> for AffineContributor {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, _target: Option<&dyn StateTarget<i64>>, value: i64) -> i64 {
        self.transform(value)
    }

    fn signal(&self) -> Option<&StateSignal> {
        self.signal.as_ref()
    }
}

struct ModelEntry {
    contributor: Arc<AffineContributor>,
    shared: SharedContributor<i64>,
    origin: Option<Origin>,
}

/// Reference model of a queue: ordering and folding done the obvious way
#[derive(Default)]
struct Model {
    default: i64,
    entries: Vec<ModelEntry>,
}

impl Model {
    fn insert(&mut self, entry: ModelEntry) {
        let priority = entry.contributor.priority;
        let index = self
            .entries
            .iter()
            .position(|e| e.contributor.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
    }

    fn value(&self) -> i64 {
        self.entries
            .iter()
            .rev()
            .fold(self.default, |v, e| e.contributor.transform(v))
    }
}

/// Fuzzing result
#[derive(Debug, Default, Clone)]
pub struct FuzzResult {
    pub ops_applied: usize,
    pub events_seen: usize,
    pub value_mismatches: u32,
    pub event_mismatches: u32,
    pub duplicate_acceptances: u32,
    pub listener_leaks: u32,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.value_mismatches == 0
            && self.event_mismatches == 0
            && self.duplicate_acceptances == 0
            && self.listener_leaks == 0
    }
}

/// Queue fuzzer
pub struct QueueFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
    queue: StateQueue<i64>,
    model: Model,
    events: Arc<Mutex<usize>>,
    removed: Vec<Arc<AffineContributor>>,
    result: FuzzResult,
    expected_events: usize,
}

impl QueueFuzzer {
    /// Create a new fuzzer
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let queue = StateQueue::new(0);
        let events = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&events);
        queue.subscribe(move |_| *counter.lock() += 1);

        QueueFuzzer {
            config,
            rng,
            queue,
            model: Model::default(),
            events,
            removed: Vec::new(),
            result: FuzzResult::default(),
            expected_events: 0,
        }
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        for _ in 0..self.config.op_count {
            let before = self.model.value();
            self.step();
            let after = self.model.value();
            if before != after {
                self.expected_events += 1;
            }
            self.check();
            self.result.ops_applied += 1;
        }
        self.result.events_seen = *self.events.lock();
        tracing::debug!(result = ?self.result, "queue fuzzing finished");
        self.result.clone()
    }

    fn step(&mut self) {
        match self.rng.gen_range(0..100) {
            0..=34 => self.op_add(),
            35..=49 => self.op_remove(),
            50..=57 => self.op_remove_by_origin(),
            58..=67 => self.op_set_default(),
            68..=82 => self.op_bump(),
            83..=89 => self.op_batch(),
            90..=96 => self.op_duplicate(),
            _ => self.op_clear(),
        }
    }

    fn new_entry(&mut self) -> ModelEntry {
        let span = self.config.priority_span;
        let priority = self.rng.gen_range(-span..=span);
        let mul = self.rng.gen_range(1..=3);
        let add = self.rng.gen_range(-10..=10);
        let active = self.rng.gen_bool(self.config.active_prob);
        let origin = self
            .rng
            .gen_bool(self.config.origin_prob)
            .then(|| Origin::from(ORIGINS[self.rng.gen_range(0..ORIGINS.len())]));

        let contributor = AffineContributor::new(priority, mul, add, active);
        let shared: SharedContributor<i64> = contributor.clone();
        ModelEntry {
            contributor,
            shared,
            origin,
        }
    }

    fn register(&self, entry: &ModelEntry) {
        let result = match &entry.origin {
            Some(origin) => self
                .queue
                .add_with_origin(Arc::clone(&entry.shared), origin.clone()),
            None => self.queue.add(Arc::clone(&entry.shared)),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "fresh contributor rejected");
        }
    }

    fn op_add(&mut self) {
        let entry = self.new_entry();
        self.register(&entry);
        self.model.insert(entry);
    }

    fn op_remove(&mut self) {
        if self.model.entries.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.model.entries.len());
        let entry = self.model.entries.remove(index);
        if self.queue.remove(&entry.shared).is_err() {
            self.result.value_mismatches += 1;
        }
        self.removed.push(entry.contributor);
    }

    fn op_remove_by_origin(&mut self) {
        let origin = self
            .rng
            .gen_bool(0.8)
            .then(|| Origin::from(ORIGINS[self.rng.gen_range(0..ORIGINS.len())]));

        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.model.entries)
            .into_iter()
            .partition(|e| e.origin == origin);
        self.model.entries = kept;

        let removed = self.queue.remove_by_origin(origin.as_ref());
        if removed != gone.len() {
            self.result.value_mismatches += 1;
        }
        self.removed.extend(gone.into_iter().map(|e| e.contributor));
    }

    fn op_set_default(&mut self) {
        // Small range so no-op changes happen regularly.
        let value = self.rng.gen_range(-3..=3);
        self.model.default = value;
        self.queue.set_default(value);
    }

    fn op_bump(&mut self) {
        let active: Vec<usize> = self
            .model
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.contributor.is_active())
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            return;
        }
        let index = active[self.rng.gen_range(0..active.len())];
        let add = self.rng.gen_range(-10..=10);
        self.model.entries[index].contributor.bump(add);
    }

    fn op_batch(&mut self) {
        let count = self.rng.gen_range(2..=4);
        let entries: Vec<ModelEntry> = (0..count).map(|_| self.new_entry()).collect();
        self.queue.batch(|_| {
            for entry in &entries {
                self.register(entry);
            }
        });
        for entry in entries {
            self.model.insert(entry);
        }
    }

    fn op_duplicate(&mut self) {
        if self.model.entries.is_empty() {
            return;
        }
        let index = self.rng.gen_range(0..self.model.entries.len());
        let shared = Arc::clone(&self.model.entries[index].shared);
        if self.queue.add(shared) != Err(QueueError::Duplicate) {
            self.result.duplicate_acceptances += 1;
        }
    }

    fn op_clear(&mut self) {
        let gone = std::mem::take(&mut self.model.entries);
        let removed = self.queue.clear();
        if removed != gone.len() {
            self.result.value_mismatches += 1;
        }
        self.removed.extend(gone.into_iter().map(|e| e.contributor));
    }

    fn check(&mut self) {
        if self.queue.current() != self.model.value() {
            self.result.value_mismatches += 1;
        }
        if self.queue.len() != self.model.entries.len() {
            self.result.value_mismatches += 1;
        }
        if *self.events.lock() != self.expected_events {
            self.result.event_mismatches += 1;
            // Resync so one miss is not counted on every following op.
            self.expected_events = *self.events.lock();
        }

        for entry in &self.model.entries {
            if entry.contributor.is_active() && entry.contributor.listener_count() != 1 {
                self.result.listener_leaks += 1;
            }
        }
        for contributor in self.removed.drain(..) {
            if contributor.listener_count() != 0 {
                self.result.listener_leaks += 1;
            }
        }
    }
}
