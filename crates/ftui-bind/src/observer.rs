#![forbid(unsafe_code)]

//! Observer chains: one node per property of a [`PropertyChain`], each
//! watching its current container and re-subscribing the next node whenever
//! that container's property changes.
//!
//! # Architecture
//!
//! ```text
//! root ──a──▶ obj1 ──b──▶ obj2 ──c──▶ value
//!  ▲            ▲            ▲
//!  │            │            │
//! Traverse(a) ─▶ Traverse(b) ─▶ Leaf(c) ──apply──▶ destination
//! ```
//!
//! A traverse node watches property `p` on its container; when `p` changes
//! it reads the new value and hands it to the next node as that node's
//! container. The leaf watches the terminal property and applies the value
//! to the destination, gated by its [`BindingLock`] token.
//!
//! Nodes own their subscriptions and hold containers weakly. Containers hold
//! subscriber callbacks weakly. Neither side keeps the other alive.
//!
//! # Concurrency
//!
//! Each node's slot is behind a short mutex, so swapping a subscription is
//! memory-safe from any thread. The sequence "read next value, re-subscribe
//! next node" is not serialized across nodes: two threads mutating the same
//! chain's intermediate objects at once may leave a node attached to a stale
//! container. Mutate any one chain from a single writer at a time.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::container::{Container, Notifications, ObjectRef};
use crate::dispatch::Dispatcher;
use crate::error::WriteError;
use crate::event::{Subscription, lock};
use crate::lock::BindingLock;
use crate::path::{PropertyChain, PropertyDescriptor};
use crate::value::Value;

/// Pushes a source value to the destination. `Ok(false)` means the write was
/// skipped because the destination chain is broken.
pub(crate) type Setter = Box<dyn Fn(Value) -> Result<bool, WriteError> + Send + Sync>;
/// Pushes the destination's default value.
pub(crate) type NullSetter = Box<dyn Fn() -> Result<bool, WriteError> + Send + Sync>;

/// The write side of a chain: what happens when the terminal value changes.
pub(crate) struct LeafObserver {
    setter: Setter,
    null_setter: NullSetter,
    lock: BindingLock,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl LeafObserver {
    pub(crate) fn new(
        setter: Setter,
        null_setter: NullSetter,
        lock: BindingLock,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        Self {
            setter,
            null_setter,
            lock,
            dispatcher,
        }
    }
}

enum Role {
    Traverse { next: Arc<ObserverNode> },
    Leaf(LeafObserver),
}

#[derive(Default)]
struct Slot {
    container: Option<Weak<dyn Container>>,
    subscription: Option<Subscription>,
    detached: bool,
}

pub(crate) struct ObserverNode {
    property: PropertyDescriptor,
    slot: Mutex<Slot>,
    role: Role,
}

impl ObserverNode {
    fn new(property: PropertyDescriptor, role: Role) -> Arc<Self> {
        Arc::new(Self {
            property,
            slot: Mutex::new(Slot::default()),
            role,
        })
    }

    /// Point this node at `container`.
    ///
    /// Drops the previous subscription, attaches to the new container's
    /// notification capability, stores the container and then propagates
    /// inward. With `skip_notify` the whole pass only primes subscriptions;
    /// otherwise it ends in the leaf's gated apply.
    fn subscribe(this: &Arc<Self>, container: Option<ObjectRef>, skip_notify: bool) {
        let previous = {
            let mut slot = lock(&this.slot);
            if slot.detached {
                return;
            }
            slot.subscription.take()
        };
        drop(previous);

        let subscription = container
            .as_deref()
            .and_then(|c| Self::attach(this, c));
        tracing::trace!(
            property = this.property.name(),
            container = container.as_deref().map(Container::type_name),
            observable = subscription.is_some(),
            "observer resubscribed"
        );
        {
            let mut slot = lock(&this.slot);
            if slot.detached {
                return;
            }
            slot.container = container.as_ref().map(Arc::downgrade);
            slot.subscription = subscription;
        }

        Self::on_container_changed(this, skip_notify);
    }

    fn attach(this: &Arc<Self>, container: &dyn Container) -> Option<Subscription> {
        let node = Arc::downgrade(this);
        match container.notifications() {
            Notifications::PropertyChanged(event) => {
                let property = this.property.clone();
                Some(event.subscribe(move |changed| {
                    if changed != property.name() {
                        return;
                    }
                    if let Some(node) = node.upgrade() {
                        Self::on_container_changed(&node, false);
                    }
                }))
            }
            Notifications::PerProperty(events) => {
                events.find(this.property.changed_event()).map(|event| {
                    event.subscribe(move |_| {
                        if let Some(node) = node.upgrade() {
                            Self::on_container_changed(&node, false);
                        }
                    })
                })
            }
            Notifications::None => None,
        }
    }

    /// React to a change of this node's property (or of its container).
    fn on_container_changed(this: &Arc<Self>, skip_notify: bool) {
        match &this.role {
            Role::Traverse { next } => {
                let value = this
                    .container()
                    .and_then(|c| this.property.read_object(&*c));
                Self::subscribe(next, value, skip_notify);
            }
            Role::Leaf(_) if !skip_notify => Self::notify(this),
            Role::Leaf(_) => {}
        }
    }

    /// Lock-gated entry into the leaf's apply logic.
    fn notify(this: &Arc<Self>) {
        let Role::Leaf(leaf) = &this.role else {
            return;
        };
        if this.is_detached() {
            return;
        }
        if leaf.lock.is_locked() {
            tracing::trace!(
                property = this.property.name(),
                direction = ?leaf.lock.direction(),
                "notification suppressed by sibling lock"
            );
            return;
        }
        match &leaf.dispatcher {
            None => this.apply(),
            Some(dispatcher) => {
                let node = Arc::clone(this);
                dispatcher.enqueue(Box::new(move || node.apply()));
            }
        }
    }

    /// Push the current terminal value to the destination.
    ///
    /// Never fails: conversion failures have already degraded to the
    /// destination default inside the setter, and write failures are dropped.
    ///
    /// Runs even after the chain is detached: an apply already queued on a
    /// dispatcher completes against the last container this node saw.
    fn apply(&self) {
        let Role::Leaf(leaf) = &self.role else {
            return;
        };
        let _sibling = leaf.lock.lock_sibling();
        let _ = match self.container() {
            None => (leaf.null_setter)(),
            Some(container) => {
                (leaf.setter)(self.property.read(&*container).unwrap_or_default())
            }
        };
    }

    fn container(&self) -> Option<ObjectRef> {
        lock(&self.slot).container.as_ref().and_then(Weak::upgrade)
    }

    fn is_detached(&self) -> bool {
        lock(&self.slot).detached
    }

    /// Permanently unsubscribe this node and every node inward of it.
    ///
    /// The weak container stays in place for applies already in flight.
    fn detach(&self) {
        let subscription = {
            let mut slot = lock(&self.slot);
            slot.detached = true;
            slot.subscription.take()
        };
        drop(subscription);
        if let Role::Traverse { next } = &self.role {
            next.detach();
        }
    }
}

impl fmt::Debug for ObserverNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = lock(&self.slot);
        f.debug_struct("ObserverNode")
            .field("property", &self.property.name())
            .field("leaf", &matches!(self.role, Role::Leaf(_)))
            .field(
                "attached",
                &slot.container.as_ref().is_some_and(|c| c.strong_count() > 0),
            )
            .field("subscribed", &slot.subscription.is_some())
            .finish()
    }
}

/// A built chain of observer nodes for one binding direction.
pub(crate) struct ObserverChain {
    head: Arc<ObserverNode>,
    leaf: Arc<ObserverNode>,
}

impl ObserverChain {
    /// Build nodes for `chain`, innermost first, with `leaf` at the end.
    pub(crate) fn build(chain: &PropertyChain, leaf: LeafObserver) -> Self {
        let mut descriptors = chain.descriptors().iter().rev();
        // PropertyChain guarantees at least one descriptor.
        let innermost = descriptors
            .next()
            .cloned()
            .unwrap_or_else(|| chain.leaf().clone());
        let leaf = ObserverNode::new(innermost, Role::Leaf(leaf));
        let mut head = Arc::clone(&leaf);
        for desc in descriptors {
            head = ObserverNode::new(desc.clone(), Role::Traverse { next: head });
        }
        Self { head, leaf }
    }

    /// Prime every node against `root` without applying.
    pub(crate) fn attach(&self, root: Option<ObjectRef>) {
        ObserverNode::subscribe(&self.head, root, true);
    }

    /// Run the leaf's gated apply once.
    pub(crate) fn sync(&self) {
        ObserverNode::notify(&self.leaf);
    }

    /// Unsubscribe every node.
    pub(crate) fn detach(&self) {
        self.head.detach();
    }
}

impl fmt::Debug for ObserverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverChain")
            .field("head", &self.head)
            .field("leaf", &self.leaf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{NotifyStyle, PropertyBag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Leaf that records every pushed value; `None` marks a null-setter call.
    fn recording_leaf(lock: BindingLock) -> (Arc<Mutex<Vec<Option<Value>>>>, LeafObserver) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = Arc::clone(&log);
        let l2 = Arc::clone(&log);
        let leaf = LeafObserver::new(
            Box::new(move |v| {
                crate::event::lock(&l1).push(Some(v));
                Ok(true)
            }),
            Box::new(move || {
                crate::event::lock(&l2).push(None);
                Ok(true)
            }),
            lock,
            None,
        );
        (log, leaf)
    }

    fn bag(style: NotifyStyle) -> PropertyBag {
        PropertyBag::new(style)
    }

    #[test]
    fn priming_pass_does_not_apply() {
        let inner = Arc::new(bag(NotifyStyle::PropertyChanged).with("b", 1));
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("a", &inner));
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let (log, leaf) = recording_leaf(fwd);

        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());
        assert!(lock(&log).is_empty());
        assert_eq!(root.observer_count(), 1);
        assert_eq!(inner.observer_count(), 1);

        observers.sync();
        assert_eq!(*lock(&log), vec![Some(Value::Int(1))]);
    }

    #[test]
    fn leaf_change_applies() {
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("v", 1).with("w", 0));
        let chain = PropertyChain::resolve(&root, "v").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let (log, leaf) = recording_leaf(fwd);
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());

        root.set("w", 5).unwrap();
        assert!(lock(&log).is_empty(), "other property must be filtered");
        root.set("v", 2).unwrap();
        assert_eq!(*lock(&log), vec![Some(Value::Int(2))]);
    }

    #[test]
    fn swapping_intermediate_moves_subscription() {
        let old = Arc::new(bag(NotifyStyle::PerProperty).with("b", 1));
        let new = Arc::new(bag(NotifyStyle::PerProperty).with("b", 2));
        let root = Arc::new(bag(NotifyStyle::PerProperty).with("a", &old));
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let (log, leaf) = recording_leaf(fwd);
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());
        assert_eq!(old.observer_count(), 1);

        root.set("a", &new).unwrap();
        assert_eq!(old.observer_count(), 0);
        assert_eq!(new.observer_count(), 1);
        assert_eq!(*lock(&log), vec![Some(Value::Int(2))]);

        old.set("b", 10).unwrap();
        assert_eq!(lock(&log).len(), 1, "detached container must not notify");
    }

    #[test]
    fn null_intermediate_calls_null_setter() {
        let inner = Arc::new(bag(NotifyStyle::PropertyChanged).with("b", 1));
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("a", &inner));
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let (log, leaf) = recording_leaf(fwd);
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());

        root.set("a", Value::Null).unwrap();
        assert_eq!(*lock(&log), vec![None]);
        assert_eq!(inner.observer_count(), 0);
    }

    #[test]
    fn locked_token_drops_notification() {
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("v", 1));
        let chain = PropertyChain::resolve(&root, "v").unwrap();
        let (fwd, rev) = BindingLock::pair();
        let (log, leaf) = recording_leaf(fwd);
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());

        {
            let _guard = rev.lock_sibling();
            root.set("v", 2).unwrap();
        }
        assert!(lock(&log).is_empty());
        root.set("v", 3).unwrap();
        assert_eq!(*lock(&log), vec![Some(Value::Int(3))]);
    }

    #[test]
    fn apply_locks_sibling_while_writing() {
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("v", 1));
        let chain = PropertyChain::resolve(&root, "v").unwrap();
        let (fwd, rev) = BindingLock::pair();
        let observed = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&observed);
        let rev_probe = rev.clone();
        let leaf = LeafObserver::new(
            Box::new(move |_| {
                if rev_probe.is_locked() {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                Ok(true)
            }),
            Box::new(|| Ok(true)),
            fwd,
            None,
        );
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());
        observers.sync();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert!(!rev.is_locked());
    }

    #[test]
    fn detach_unsubscribes_every_node() {
        let inner = Arc::new(bag(NotifyStyle::PropertyChanged).with("b", 1));
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("a", &inner));
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let (log, leaf) = recording_leaf(fwd);
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());

        observers.detach();
        assert_eq!(root.observer_count(), 0);
        assert_eq!(inner.observer_count(), 0);
        inner.set("b", 2).unwrap();
        root.set("a", Arc::new(bag(NotifyStyle::PropertyChanged).with("b", 3))).unwrap();
        observers.sync();
        assert!(lock(&log).is_empty());
    }

    #[test]
    fn queued_apply_completes_after_detach() {
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("v", 1));
        let chain = PropertyChain::resolve(&root, "v").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let queue = crate::dispatch::QueueDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let leaf = LeafObserver::new(
            Box::new(move |v| {
                crate::event::lock(&l).push(v);
                Ok(true)
            }),
            Box::new(|| Ok(true)),
            fwd,
            Some(queue.clone()),
        );
        let observers = ObserverChain::build(&chain, leaf);
        observers.attach(chain.root());

        root.set("v", 2).unwrap();
        assert_eq!(queue.pending(), 1);
        observers.detach();
        root.set("v", 3).unwrap();
        assert_eq!(queue.pending(), 1, "detached chain must not enqueue");

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*lock(&log), vec![Value::Int(3)]);
    }

    #[test]
    fn token_owning_a_chain_twice_panics() {
        let root = Arc::new(bag(NotifyStyle::PropertyChanged).with("v", 1));
        let chain = PropertyChain::resolve(&root, "v").unwrap();
        let (fwd, _rev) = BindingLock::pair();
        let (_l1, leaf1) = recording_leaf(fwd.clone());
        let (_l2, leaf2) = recording_leaf(fwd.clone());
        fwd.own(ObserverChain::build(&chain, leaf1));
        assert!(fwd.owns_chain());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            fwd.own(ObserverChain::build(&chain, leaf2));
        }));
        assert!(result.is_err());
        assert!(fwd.dispose());
    }
}
