//! Identity types for Strata
//!
//! Numeric identifiers are 64-bit and allocated from monotonic counters.
//! Zero is reserved as the "never allocated" value for every counter-backed id.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Queue identity - distinguishes queues in change events and logs
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct QueueId(pub u64);

impl QueueId {
    pub const ZERO: QueueId = QueueId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        QueueId(id)
    }

    /// Allocate a process-unique queue id
    pub fn next() -> Self {
        QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queue({})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Registration handle - unique within one queue, handed out on a successful add
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ContributorHandle(pub u64);

impl ContributorHandle {
    #[inline]
    pub fn new(id: u64) -> Self {
        ContributorHandle(id)
    }
}

impl fmt::Debug for ContributorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Contributor({})", self.0)
    }
}

impl fmt::Display for ContributorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Change subscription identity - unique within one queue
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    #[inline]
    pub fn new(id: u64) -> Self {
        SubscriptionId(id)
    }
}

/// Signal listener identity - unique within one [`StateSignal`](crate::StateSignal)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl ListenerId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ListenerId(id)
    }
}

/// Origin tag - opaque identity of whoever registered a contributor.
///
/// Either a name, or the identity of an owner object. Owner origins hold the owner
/// weakly and compare by address, so "everything registered by X" can key on X itself
/// without keeping X alive. Cloning is cheap.
#[derive(Clone)]
pub struct Origin(OriginKind);

#[derive(Clone)]
enum OriginKind {
    Name(Arc<str>),
    Owner(Weak<dyn Any + Send + Sync>),
}

impl Origin {
    pub fn new(name: impl AsRef<str>) -> Self {
        Origin(OriginKind::Name(Arc::from(name.as_ref())))
    }

    /// Origin keyed on the identity of `owner`
    pub fn of<O: Any + Send + Sync>(owner: &Arc<O>) -> Self {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(owner) as Weak<O>;
        Origin(OriginKind::Owner(weak))
    }

    /// The name, for named origins
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match &self.0 {
            OriginKind::Name(name) => Some(&**name),
            OriginKind::Owner(_) => None,
        }
    }

    /// Whether this origin was created from `owner`
    pub fn is_owned_by<O: Any + Send + Sync>(&self, owner: &Arc<O>) -> bool {
        self.owner_addr() == Some(Arc::as_ptr(owner) as *const ())
    }

    fn owner_addr(&self) -> Option<*const ()> {
        match &self.0 {
            OriginKind::Name(_) => None,
            OriginKind::Owner(weak) => Some(weak.as_ptr() as *const ()),
        }
    }
}

impl PartialEq for Origin {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (OriginKind::Name(a), OriginKind::Name(b)) => a == b,
            (OriginKind::Owner(_), OriginKind::Owner(_)) => self.owner_addr() == other.owner_addr(),
            _ => false,
        }
    }
}

impl Eq for Origin {}

impl Hash for Origin {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            OriginKind::Name(name) => name.hash(state),
            OriginKind::Owner(_) => self.owner_addr().hash(state),
        }
    }
}

impl From<&str> for Origin {
    fn from(name: &str) -> Self {
        Origin::new(name)
    }
}

impl From<String> for Origin {
    fn from(name: String) -> Self {
        Origin(OriginKind::Name(Arc::from(name)))
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            OriginKind::Name(name) => write!(f, "Origin({:?})", &**name),
            OriginKind::Owner(weak) => write!(f, "Origin(owner@{:p})", weak.as_ptr() as *const ()),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            OriginKind::Name(name) => f.write_str(name),
            OriginKind::Owner(weak) => write!(f, "owner@{:p}", weak.as_ptr() as *const ()),
        }
    }
}

/// Default origin equality: two absent origins are equal, absent vs present is not.
#[inline]
pub fn origins_match(a: Option<&Origin>, b: Option<&Origin>) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_ids_are_unique() {
        let a = QueueId::next();
        let b = QueueId::next();
        assert_ne!(a, b);
        assert_ne!(a, QueueId::ZERO);
    }

    #[test]
    fn test_id_formatting() {
        assert_eq!(format!("{}", QueueId::new(7)), "q7");
        assert_eq!(format!("{:?}", ContributorHandle::new(3)), "Contributor(3)");
        assert_eq!(format!("{}", Origin::from("hud")), "hud");
    }

    #[test]
    fn test_origin_matching_absence() {
        let a = Origin::from("A");
        assert!(origins_match(None, None));
        assert!(!origins_match(Some(&a), None));
        assert!(!origins_match(None, Some(&a)));
        assert!(origins_match(Some(&a), Some(&Origin::from("A"))));
        assert!(!origins_match(Some(&a), Some(&Origin::from("B"))));
    }

    #[test]
    fn test_owner_origin_identity() {
        let first = Arc::new(1u8);
        let second = Arc::new(1u8);
        let origin = Origin::of(&first);

        assert_eq!(origin, Origin::of(&first));
        assert_ne!(origin, Origin::of(&second));
        assert_ne!(origin, Origin::from("first"));
        assert!(origin.is_owned_by(&first));
        assert!(!origin.is_owned_by(&second));
        assert_eq!(origin.as_str(), None);
        assert_eq!(Origin::from("hud").as_str(), Some("hud"));
    }

    #[test]
    fn test_owner_origin_does_not_keep_owner_alive() {
        let owner = Arc::new(String::from("panel"));
        let origin = Origin::of(&owner);
        assert_eq!(Arc::strong_count(&owner), 1);
        drop(owner);
        // Still comparable after the owner is gone.
        assert_eq!(origin.clone(), origin);
    }
}
