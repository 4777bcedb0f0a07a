//! Change events
//!
//! A [`ChangeEvent`] is built once per actual change of a queue's resolved value
//! and handed by reference to the target and every subscriber.

use crate::QueueId;

/// Record of one change of a queue's resolved value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent<T> {
    origin: QueueId,
    previous: T,
    current: T,
}

impl<T> ChangeEvent<T> {
    pub fn new(origin: QueueId, previous: T, current: T) -> Self {
        ChangeEvent {
            origin,
            previous,
            current,
        }
    }

    /// Queue that produced the event
    #[inline]
    pub fn origin(&self) -> QueueId {
        self.origin
    }

    /// Value before the change. Still the queue's committed value while observers run.
    #[inline]
    pub fn previous(&self) -> &T {
        &self.previous
    }

    /// Newly resolved value
    #[inline]
    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn into_parts(self) -> (QueueId, T, T) {
        (self.origin, self.previous, self.current)
    }
}
