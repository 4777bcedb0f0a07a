//! End-to-end Integration Test Suite
//!
//! Tests that exercise a queue the way a host object uses it:
//! - Several systems layering opinions over one value
//! - Timed effects driving re-resolution through signals
//! - Bulk teardown by origin
//! - Host-driven resolution

use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{ChangeEvent, Origin, StateSignal};
use strata_queue::{Contributor, FnContributor, QueueConfig, StateQueue, StateTarget};

use crate::harness::RecordingObserver;

// ============================================================================
// SIMULATED HOST
// ============================================================================

/// A timed multiplier that expires after a number of ticks and then signals
pub struct TimedEffect {
    priority: i32,
    factor: f32,
    remaining: Mutex<u32>,
    signal: StateSignal,
}

impl TimedEffect {
    pub fn new(priority: i32, factor: f32, ticks: u32) -> Arc<Self> {
        Arc::new(TimedEffect {
            priority,
            factor,
            remaining: Mutex::new(ticks),
            signal: StateSignal::new(),
        })
    }

    /// Advance one tick. Emits when the effect runs out.
    pub fn tick(&self) {
        let expired = {
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                return;
            }
            *remaining -= 1;
            *remaining == 0
        };
        if expired {
            self.signal.emit();
        }
    }

    pub fn is_expired(&self) -> bool {
        *self.remaining.lock() == 0
    }
}

impl Contributor<f32> for TimedEffect {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, _target: Option<&dyn StateTarget<f32>>, value: f32) -> f32 {
        if self.is_expired() {
            value
        } else {
            value * self.factor
        }
    }

    fn signal(&self) -> Option<&StateSignal> {
        Some(&self.signal)
    }
}

/// Host object owning a movement-speed queue and acting as its target
pub struct SimulatedActor {
    /// Speeds the actor was told about, in order
    applied: Mutex<Vec<f32>>,
    /// Speed cap exposed to contributors through the target
    pub max_speed: f32,
}

impl SimulatedActor {
    pub fn new(max_speed: f32) -> Arc<Self> {
        Arc::new(SimulatedActor {
            applied: Mutex::new(Vec::new()),
            max_speed,
        })
    }

    pub fn applied(&self) -> Vec<f32> {
        self.applied.lock().clone()
    }
}

impl StateTarget<f32> for SimulatedActor {
    fn state_changed(&self, event: &ChangeEvent<f32>) {
        self.applied.lock().push(*event.current());
    }
}

/// Scenario outcome
#[derive(Debug, Default, Clone)]
pub struct ScenarioResult {
    /// Resolved value after each scripted step
    pub timeline: Vec<f32>,
    /// Change events delivered to the general subscriber
    pub events: usize,
    /// Whether the target saw the same changes as the subscriber
    pub target_consistent: bool,
}

/// Layered movement speed:
/// base 4.0, equipment +2 (origin "gear"), a 3-tick slow (x0.5),
/// a cutscene lock forcing 0 at top priority, and the actor's cap.
pub fn movement_speed_scenario() -> ScenarioResult {
    let actor = SimulatedActor::new(5.0);
    let queue = StateQueue::with_target(&actor, 4.0_f32);
    let observer: RecordingObserver<f32> = RecordingObserver::new();
    observer.attach(&queue);

    let mut timeline = Vec::new();

    let boots = FnContributor::map(0, |v: f32| v + 1.0).shared();
    let cloak = FnContributor::map(0, |v: f32| v + 1.0).shared();
    queue.batch(|q| {
        let _ = q.add_with_origin(boots, "gear");
        let _ = q.add_with_origin(cloak, "gear");
    });
    timeline.push(queue.current());

    // Capped by the actor, applied after everything but the cutscene.
    let cap = FnContributor::new(50, |target, v: f32| {
        match target.and_then(|t| t.downcast_ref::<SimulatedActor>()) {
            Some(actor) => v.min(actor.max_speed),
            None => v,
        }
    })
    .shared();
    let _ = queue.add(cap);
    timeline.push(queue.current());

    let slow = TimedEffect::new(10, 0.5, 3);
    let _ = queue.add(slow.clone());
    timeline.push(queue.current());

    let lock = FnContributor::map(100, |_: f32| 0.0).shared();
    let _ = queue.add(lock.clone());
    timeline.push(queue.current());
    let _ = queue.remove(&lock);
    timeline.push(queue.current());

    for _ in 0..3 {
        slow.tick();
    }
    timeline.push(queue.current());

    queue.remove_by_origin(Some(&Origin::from("gear")));
    timeline.push(queue.current());

    let target_consistent = actor.applied()
        == observer
            .transitions()
            .into_iter()
            .map(|(_, current)| current)
            .collect::<Vec<_>>();

    ScenarioResult {
        timeline,
        events: observer.count(),
        target_consistent,
    }
}

/// Host-driven queue resolved once per frame
pub fn frame_driven_scenario(frames: usize) -> Vec<i32> {
    let queue = StateQueue::with_config(0, QueueConfig::manual()).unwrap_or_default();
    let mut per_frame = Vec::with_capacity(frames);

    for frame in 0..frames {
        let bonus = FnContributor::map(frame as i32, move |v: i32| v + 1).shared();
        let _ = queue.add(bonus);
        queue.resolve();
        per_frame.push(queue.current());
    }
    per_frame
}
