#![forbid(unsafe_code)]

//! Property paths and resolved property chains.
//!
//! A [`PropertyChain`] is the resolved form of an expression such as
//! `root.a.b`: the root object plus the ordered property descriptors, outermost
//! first. Resolution evaluates the root exactly once; the chain keeps the root
//! *value*, so later reassignment of whatever produced it has no effect.
//!
//! The chain holds its root weakly. A binding built from it never extends the
//! root's lifetime.
//!
//! # Grammar
//!
//! ```text
//! path    := segment ("." segment)*
//! segment := [A-Za-z_][A-Za-z0-9_]*
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use crate::container::{Container, ObjectRef};
use crate::error::{BindError, WriteError};
use crate::event::changed_event_name;
use crate::value::{Value, ValueType};

/// A validated, dot-separated sequence of property names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    segments: Vec<Arc<str>>,
}

impl PropertyPath {
    /// Parse a dot-separated path.
    ///
    /// # Errors
    ///
    /// [`BindError::InvalidChainExpression`] if the path is empty or any
    /// segment is not an identifier.
    pub fn parse(expression: &str) -> Result<Self, BindError> {
        if expression.is_empty() {
            return Err(BindError::invalid(expression, "expression is empty"));
        }
        Self::from_names(&expression.split('.').collect::<Vec<_>>())
            .map_err(|e| relabel(e, expression))
    }

    /// Build a path from individual property names.
    ///
    /// # Errors
    ///
    /// [`BindError::InvalidChainExpression`] if `names` is empty or any name
    /// is not an identifier.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, BindError> {
        let joined = || {
            names
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(".")
        };
        if names.is_empty() {
            return Err(BindError::invalid(
                "",
                "expected at least one property access",
            ));
        }
        let mut segments = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(BindError::invalid(joined(), "empty property name"));
            }
            if !is_identifier(name) {
                return Err(BindError::invalid(
                    joined(),
                    "property name is not an identifier",
                ));
            }
            segments.push(Arc::from(name));
        }
        Ok(Self { segments })
    }

    /// Property names, outermost first.
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &str> {
        self.segments.iter().map(|s| &**s)
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false for a parsed path; provided for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

fn relabel(err: BindError, expression: &str) -> BindError {
    match err {
        BindError::InvalidChainExpression { reason, .. } => BindError::invalid(expression, reason),
        other => other,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// One property of a chain: its name and conventional change-event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyDescriptor {
    name: Arc<str>,
    changed_event: Arc<str>,
}

impl PropertyDescriptor {
    /// Describe property `name`, deriving its `"{name}Changed"` event name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            changed_event: Arc::from(changed_event_name(name)),
        }
    }

    /// The property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the per-property event announcing changes to this property.
    #[must_use]
    pub fn changed_event(&self) -> &str {
        &self.changed_event
    }

    /// Read this property from `container`. Missing properties read as `None`.
    #[must_use]
    pub fn read(&self, container: &dyn Container) -> Option<Value> {
        container.read_property(&self.name)
    }

    /// Read this property as the next container of a chain.
    ///
    /// Null, missing and non-object values all break the chain.
    #[must_use]
    pub fn read_object(&self, container: &dyn Container) -> Option<ObjectRef> {
        self.read(container).and_then(Value::into_object)
    }

    /// Write this property on `container`.
    ///
    /// # Errors
    ///
    /// Propagates the container's [`WriteError`].
    pub fn write(&self, container: &dyn Container, value: Value) -> Result<(), WriteError> {
        container.write_property(&self.name, value)
    }

    /// Declared type of this property on `container`.
    #[must_use]
    pub fn declared_type(&self, container: &dyn Container) -> ValueType {
        container.property_type(&self.name)
    }
}

/// A root object plus the descriptors leading from it to a terminal value.
///
/// # Invariants
///
/// 1. At least one descriptor.
/// 2. The root was a non-null object when the chain was resolved.
/// 3. Never mutated after construction; clones share descriptors.
#[derive(Clone)]
pub struct PropertyChain {
    root: Weak<dyn Container>,
    root_type: Arc<str>,
    path: PropertyPath,
    descriptors: Arc<[PropertyDescriptor]>,
}

impl PropertyChain {
    /// Resolve `expression` (e.g. `"a.b"`) against `root`.
    ///
    /// # Errors
    ///
    /// - [`BindError::InvalidChainExpression`] for a malformed path or a root
    ///   that is not an object.
    /// - [`BindError::NullRoot`] if `root` is null.
    pub fn resolve(root: impl Into<Value>, expression: &str) -> Result<Self, BindError> {
        let path = PropertyPath::parse(expression)?;
        Self::with_path(root.into(), path)
    }

    /// Resolve a chain from already-split property names.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn from_names<S: AsRef<str>>(
        root: impl Into<Value>,
        names: &[S],
    ) -> Result<Self, BindError> {
        let path = PropertyPath::from_names(names)?;
        Self::with_path(root.into(), path)
    }

    /// Resolve `path` against `root`.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn with_path(root: Value, path: PropertyPath) -> Result<Self, BindError> {
        let root = match root {
            Value::Object(obj) => obj,
            Value::Null => {
                return Err(BindError::NullRoot {
                    expression: path.to_string(),
                });
            }
            _ => return Err(BindError::invalid(path.to_string(), "root is not an object")),
        };
        let descriptors: Arc<[PropertyDescriptor]> =
            path.segments().map(PropertyDescriptor::new).collect();
        Ok(Self {
            root_type: Arc::from(root.type_name()),
            root: Arc::downgrade(&root),
            path,
            descriptors,
        })
    }

    /// The root object, if it is still alive.
    #[must_use]
    pub fn root(&self) -> Option<ObjectRef> {
        self.root.upgrade()
    }

    /// Descriptors, outermost first.
    #[must_use]
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    /// The innermost descriptor.
    #[must_use]
    pub fn leaf(&self) -> &PropertyDescriptor {
        // Non-empty by construction.
        &self.descriptors[self.descriptors.len() - 1]
    }

    /// The parsed path, without the root.
    #[must_use]
    pub fn path(&self) -> &PropertyPath {
        &self.path
    }

    /// Number of property accesses from the root to the terminal value.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.descriptors.len()
    }

    /// Walk from the root to the object that holds the leaf property.
    ///
    /// Returns `None` if the root is gone or any intermediate value is null
    /// or not an object.
    #[must_use]
    pub fn leaf_container(&self) -> Option<ObjectRef> {
        let mut current = self.root.upgrade()?;
        for desc in &self.descriptors[..self.descriptors.len() - 1] {
            current = desc.read_object(&*current)?;
        }
        Some(current)
    }

    /// Current terminal value, or `None` if the chain is broken.
    #[must_use]
    pub fn read_value(&self) -> Option<Value> {
        let container = self.leaf_container()?;
        Some(self.leaf().read(&*container).unwrap_or_default())
    }

    /// Write the terminal property if every intermediate object exists.
    ///
    /// Returns `Ok(false)` when the chain is broken and the write was skipped.
    ///
    /// # Errors
    ///
    /// Propagates the leaf container's [`WriteError`].
    pub fn write_value(&self, value: Value) -> Result<bool, WriteError> {
        let Some(container) = self.leaf_container() else {
            return Ok(false);
        };
        self.leaf().write(&*container, value)?;
        Ok(true)
    }
}

impl fmt::Display for PropertyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.root_type, self.path)
    }
}

impl fmt::Debug for PropertyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChain")
            .field("root_type", &self.root_type)
            .field("root_alive", &(self.root.strong_count() > 0))
            .field("path", &self.path.to_string())
            .finish()
    }
}

/// Resolve a [`PropertyChain`] from a property-access expression.
///
/// The first identifier is the root (any value convertible into
/// [`Value`](crate::Value) by reference, typically an `Arc` of a container);
/// the rest are property names.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ftui_bind::{NotifyStyle, PropertyBag, chain};
///
/// let inner = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("b", 1));
/// let root = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("a", &inner));
/// let chain = chain!(root.a.b).unwrap();
/// assert_eq!(chain.depth(), 2);
/// assert_eq!(chain.read_value().and_then(|v| v.as_int()), Some(1));
/// ```
#[macro_export]
macro_rules! chain {
    ($root:ident $(. $prop:ident)+) => {
        $crate::path::PropertyChain::from_names(
            $crate::value::Value::from(&$root),
            &[$(::core::stringify!($prop)),+],
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{NotifyStyle, PropertyBag};
    use proptest::prelude::*;

    fn nested(b: i64) -> (Arc<PropertyBag>, Arc<PropertyBag>) {
        let inner = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("b", b));
        let root = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("a", &inner));
        (root, inner)
    }

    #[test]
    fn parse_simple_path() {
        let path = PropertyPath::parse("a.b_2.C").unwrap();
        assert_eq!(path.segments().collect::<Vec<_>>(), vec!["a", "b_2", "C"]);
        assert_eq!(path.to_string(), "a.b_2.C");
    }

    #[test]
    fn parse_rejects_malformed() {
        for expr in ["", ".", "a.", ".a", "a..b", "1a", "a.b-c", "a b"] {
            assert!(
                matches!(
                    PropertyPath::parse(expr),
                    Err(BindError::InvalidChainExpression { .. })
                ),
                "{expr:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_error_reports_whole_expression() {
        let err = PropertyPath::parse("a..b").unwrap_err();
        assert_eq!(
            err,
            BindError::InvalidChainExpression {
                expression: "a..b".into(),
                reason: "empty property name",
            }
        );
    }

    #[test]
    fn null_root_fails() {
        let err = PropertyChain::resolve(Value::Null, "a.b").unwrap_err();
        assert_eq!(
            err,
            BindError::NullRoot {
                expression: "a.b".into()
            }
        );
    }

    #[test]
    fn primitive_root_fails() {
        let err = PropertyChain::resolve(5, "a").unwrap_err();
        assert!(matches!(err, BindError::InvalidChainExpression { .. }));
    }

    #[test]
    fn descriptors_outermost_first() {
        let (root, _inner) = nested(1);
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        let names: Vec<_> = chain.descriptors().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(chain.leaf().name(), "b");
        assert_eq!(chain.leaf().changed_event(), "bChanged");
    }

    #[test]
    fn read_and_write_through_chain() {
        let (root, inner) = nested(1);
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        assert_eq!(chain.read_value(), Some(Value::Int(1)));

        assert_eq!(chain.write_value(Value::Int(9)), Ok(true));
        assert_eq!(inner.get("b"), Value::Int(9));
    }

    #[test]
    fn broken_chain_skips_write() {
        let (root, inner) = nested(1);
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        root.set("a", Value::Null).unwrap();

        assert_eq!(chain.leaf_container().map(|_| ()), None);
        assert_eq!(chain.read_value(), None);
        assert_eq!(chain.write_value(Value::Int(3)), Ok(false));
        assert_eq!(inner.get("b"), Value::Int(1));
    }

    #[test]
    fn root_is_captured_by_value() {
        let (root_a, _ia) = nested(1);
        let (root_b, _ib) = nested(2);
        let mut current = Arc::clone(&root_a);
        let chain = PropertyChain::resolve(&current, "a.b").unwrap();
        current = Arc::clone(&root_b);
        drop(current);
        assert_eq!(chain.read_value(), Some(Value::Int(1)));
    }

    #[test]
    fn chain_does_not_retain_root() {
        let (root, _inner) = nested(1);
        let chain = PropertyChain::resolve(&root, "a.b").unwrap();
        drop(root);
        assert!(chain.root().is_none());
        assert_eq!(chain.read_value(), None);
    }

    #[test]
    fn chain_macro_resolves() {
        let (root, _inner) = nested(7);
        let chain = chain!(root.a.b).unwrap();
        assert_eq!(chain.read_value(), Some(Value::Int(7)));
        assert_eq!(chain.to_string(), "PropertyBag.a.b");
    }

    proptest! {
        #[test]
        fn identifier_paths_round_trip_display(
            segs in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,8}", 1..6)
        ) {
            let expr = segs.join(".");
            let path = PropertyPath::parse(&expr).unwrap();
            prop_assert_eq!(path.len(), segs.len());
            prop_assert_eq!(path.to_string(), expr);
        }

        #[test]
        fn parse_never_panics(expr in "\\PC{0,24}") {
            let _ = PropertyPath::parse(&expr);
        }
    }
}
