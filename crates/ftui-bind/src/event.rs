#![forbid(unsafe_code)]

//! Thread-safe change events with weakly held subscribers.
//!
//! # Design
//!
//! A [`ChangeEvent`] is a multicast list of `Fn(&str)` callbacks that receive
//! the name of the property that changed. The event stores each callback as a
//! `Weak`; the strong `Arc` lives in the [`Subscription`] guard handed back to
//! the subscriber. An event therefore never keeps its observers alive, and an
//! observer never keeps the event's owner alive.
//!
//! [`PropertyEvents`] is the per-property flavour: one `ChangeEvent` per
//! property, looked up by the conventional event name `"{property}Changed"`.
//!
//! # Failure Modes
//!
//! - **In-flight callbacks**: `raise()` snapshots live callbacks before
//!   invoking them, so a subscription dropped concurrently with a raise may
//!   still see that one last call.
//! - **Subscriber leak**: dead weak entries are pruned lazily on `raise()`
//!   and `subscribe()`.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ahash::AHashMap;

type CallbackArc = Arc<dyn Fn(&str) + Send + Sync>;
type CallbackWeak = Weak<dyn Fn(&str) + Send + Sync>;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A multicast "property changed" event.
///
/// Cloning a `ChangeEvent` yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct ChangeEvent {
    subscribers: Arc<Mutex<Vec<CallbackWeak>>>,
}

impl ChangeEvent {
    /// Create an event with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. It is invoked with the changed property's name
    /// until the returned guard is dropped.
    pub fn subscribe(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        let strong: CallbackArc = Arc::new(callback);
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|w| w.strong_count() > 0);
        subscribers.push(Arc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Invoke every live subscriber with `property`, in registration order.
    ///
    /// No lock is held while callbacks run, so subscribers may subscribe,
    /// unsubscribe or raise further events.
    pub fn raise(&self, property: &str) {
        let callbacks: Vec<CallbackArc> = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in &callbacks {
            cb(property);
        }
    }

    /// Number of subscribers whose guards are still alive.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Conventional name of the per-property event for `property`.
#[must_use]
pub fn changed_event_name(property: &str) -> String {
    format!("{property}Changed")
}

/// Table of per-property change events keyed by event name.
#[derive(Default)]
pub struct PropertyEvents {
    events: Mutex<AHashMap<String, ChangeEvent>>,
}

impl PropertyEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the conventional event for `property`, returning it.
    pub fn declare(&self, property: &str) -> ChangeEvent {
        lock(&self.events)
            .entry(changed_event_name(property))
            .or_default()
            .clone()
    }

    /// Look up an event by its full name (e.g. `"titleChanged"`).
    #[must_use]
    pub fn find(&self, event_name: &str) -> Option<ChangeEvent> {
        lock(&self.events).get(event_name).cloned()
    }

    /// Raise the conventional event for `property`, if one was declared.
    pub fn raise(&self, property: &str) {
        if let Some(event) = self.find(&changed_event_name(property)) {
            event.raise(property);
        }
    }
}

impl fmt::Debug for PropertyEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = lock(&self.events);
        let mut names: Vec<&str> = events.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("PropertyEvents")
            .field("events", &names)
            .finish()
    }
}

/// RAII guard for an event subscription.
///
/// Dropping the guard drops the only strong reference to the callback, so
/// the event's weak entry stops upgrading and the callback is never invoked
/// again by a later `raise()`.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
