#![forbid(unsafe_code)]

//! Containers: objects whose named properties a binding reads, writes and
//! watches.
//!
//! # Notification capability
//!
//! A container announces changes in exactly one of three ways, reported as a
//! tagged [`Notifications`] value when an observer attaches:
//!
//! | Variant | Event | Observer behavior |
//! |---------|-------|-------------------|
//! | `PropertyChanged` | one general event carrying the changed name | filters by name |
//! | `PerProperty` | one event per property, named `"{property}Changed"` | subscribes unconditionally |
//! | `None` | nothing | no live subscription; values refresh only on re-traversal |
//!
//! [`PropertyBag`] is the reference container used by tests and by callers
//! that do not have their own model types.

use std::fmt;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::error::WriteError;
use crate::event::{ChangeEvent, PropertyEvents, changed_event_name, lock};
use crate::value::{Value, ValueType};

/// Shared handle to a container.
pub type ObjectRef = Arc<dyn Container>;

/// How a container announces property changes.
#[derive(Debug, Clone, Copy)]
pub enum Notifications<'a> {
    /// A general event whose payload is the changed property's name.
    PropertyChanged(&'a ChangeEvent),
    /// Per-property events looked up by conventional name.
    PerProperty(&'a PropertyEvents),
    /// The container is not observable.
    None,
}

/// An object with named, dynamically typed properties.
///
/// Implementations must be cheap to read: observers read a property every
/// time the chain above them changes.
pub trait Container: Send + Sync + 'static {
    /// Name used in diagnostics.
    fn type_name(&self) -> &str;

    /// Current value of `property`, or `None` if there is no such property.
    fn read_property(&self, property: &str) -> Option<Value>;

    /// Assign `value` to `property`.
    ///
    /// # Errors
    ///
    /// Returns a [`WriteError`] if the property does not exist, is read-only,
    /// or does not accept the value's kind.
    fn write_property(&self, property: &str, value: Value) -> Result<(), WriteError>;

    /// Declared type of `property`. Values pushed by a binding are converted
    /// to this type.
    fn property_type(&self, _property: &str) -> ValueType {
        ValueType::Any
    }

    /// The container's notification capability.
    fn notifications(&self) -> Notifications<'_> {
        Notifications::None
    }
}

/// Which notification capability a [`PropertyBag`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyStyle {
    /// One general event carrying the property name.
    #[default]
    PropertyChanged,
    /// One `"{name}Changed"` event per property.
    PerProperty,
    /// No notifications.
    None,
}

struct Slot {
    value: Value,
    ty: ValueType,
    read_only: bool,
}

struct BagInner {
    slots: AHashMap<Arc<str>, Slot>,
    version: u64,
}

/// A general-purpose observable property container.
///
/// Properties are declared up front with the builder methods and keep their
/// declared type for the bag's lifetime.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 per value-changing write.
/// 2. Writing a value equal to the current one is a no-op (no version bump,
///    no notification).
/// 3. Notifications are raised after the internal lock is released, so
///    subscribers may read or write the bag re-entrantly.
pub struct PropertyBag {
    type_name: Arc<str>,
    style: NotifyStyle,
    inner: Mutex<BagInner>,
    changed: ChangeEvent,
    per_property: PropertyEvents,
}

impl PropertyBag {
    /// Create an empty bag with the given notification style.
    #[must_use]
    pub fn new(style: NotifyStyle) -> Self {
        Self::named("PropertyBag", style)
    }

    /// Create an empty bag reporting `type_name` in diagnostics.
    #[must_use]
    pub fn named(type_name: &str, style: NotifyStyle) -> Self {
        Self {
            type_name: Arc::from(type_name),
            style,
            inner: Mutex::new(BagInner {
                slots: AHashMap::new(),
                version: 0,
            }),
            changed: ChangeEvent::new(),
            per_property: PropertyEvents::new(),
        }
    }

    /// Declare a property whose type is inferred from `value`.
    #[must_use]
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = ValueType::of(&value);
        self.declare(name, ty, value, false)
    }

    /// Declare a property with an explicit type.
    #[must_use]
    pub fn with_typed(self, name: &str, ty: ValueType, value: impl Into<Value>) -> Self {
        self.declare(name, ty, value.into(), false)
    }

    /// Declare a property that rejects writes.
    #[must_use]
    pub fn with_read_only(self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = ValueType::of(&value);
        self.declare(name, ty, value, true)
    }

    fn declare(self, name: &str, ty: ValueType, value: Value, read_only: bool) -> Self {
        if self.style == NotifyStyle::PerProperty {
            self.per_property.declare(name);
        }
        lock(&self.inner).slots.insert(
            Arc::from(name),
            Slot {
                value,
                ty,
                read_only,
            },
        );
        self
    }

    /// Current value of `name`; `Null` if undeclared.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.read_property(name).unwrap_or_default()
    }

    /// Assign a value and notify observers if it changed.
    ///
    /// # Errors
    ///
    /// See [`Container::write_property`].
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), WriteError> {
        self.write_property(name, value.into())
    }

    /// Number of value-changing writes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        lock(&self.inner).version
    }

    /// Notification style chosen at construction.
    #[must_use]
    pub fn style(&self) -> NotifyStyle {
        self.style
    }

    /// Live observers attached to this bag, summed over all events.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        match self.style {
            NotifyStyle::PropertyChanged => self.changed.subscriber_count(),
            NotifyStyle::PerProperty => {
                let names: Vec<Arc<str>> = lock(&self.inner).slots.keys().cloned().collect();
                names
                    .iter()
                    .filter_map(|n| self.per_property.find(&changed_event_name(n)))
                    .map(|e| e.subscriber_count())
                    .sum()
            }
            NotifyStyle::None => 0,
        }
    }

    fn notify(&self, name: &str) {
        match self.style {
            NotifyStyle::PropertyChanged => self.changed.raise(name),
            NotifyStyle::PerProperty => self.per_property.raise(name),
            NotifyStyle::None => {}
        }
    }
}

impl Container for PropertyBag {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn read_property(&self, property: &str) -> Option<Value> {
        lock(&self.inner).slots.get(property).map(|s| s.value.clone())
    }

    fn write_property(&self, property: &str, value: Value) -> Result<(), WriteError> {
        {
            let mut inner = lock(&self.inner);
            let slot = inner
                .slots
                .get_mut(property)
                .ok_or_else(|| WriteError::UnknownProperty(property.to_owned()))?;
            if slot.read_only {
                return Err(WriteError::ReadOnly(property.to_owned()));
            }
            if !slot.ty.accepts(&value) {
                return Err(WriteError::TypeMismatch {
                    property: property.to_owned(),
                    expected: slot.ty.clone(),
                    found: value.kind(),
                });
            }
            if slot.value == value {
                return Ok(());
            }
            slot.value = value;
            inner.version += 1;
        }
        self.notify(property);
        Ok(())
    }

    fn property_type(&self, property: &str) -> ValueType {
        lock(&self.inner)
            .slots
            .get(property)
            .map_or(ValueType::Any, |s| s.ty.clone())
    }

    fn notifications(&self) -> Notifications<'_> {
        match self.style {
            NotifyStyle::PropertyChanged => Notifications::PropertyChanged(&self.changed),
            NotifyStyle::PerProperty => Notifications::PerProperty(&self.per_property),
            NotifyStyle::None => Notifications::None,
        }
    }
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        let mut names: Vec<&str> = inner.slots.keys().map(|k| &**k).collect();
        names.sort_unstable();
        f.debug_struct("PropertyBag")
            .field("type_name", &self.type_name)
            .field("style", &self.style)
            .field("properties", &names)
            .field("version", &inner.version)
            .finish()
    }
}
