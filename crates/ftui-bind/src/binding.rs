#![forbid(unsafe_code)]

//! Binding construction: wire a source [`PropertyChain`] to a destination
//! [`PropertyChain`] in one or both directions.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use ftui_bind::{BindOptions, NotifyStyle, PropertyBag, PropertyChain, ValueType, bind};
//!
//! let inner = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("b", 41));
//! let root = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("a", &inner));
//! let label = Arc::new(
//!     PropertyBag::new(NotifyStyle::PropertyChanged).with_typed("text", ValueType::Str, "?"),
//! );
//!
//! let _binding = bind(
//!     PropertyChain::resolve(&root, "a.b").unwrap(),
//!     PropertyChain::resolve(&label, "text").unwrap(),
//!     BindOptions::default(),
//! );
//! assert_eq!(label.get("text").as_str(), Some("41"));
//!
//! inner.set("b", 42).unwrap();
//! assert_eq!(label.get("text").as_str(), Some("42"));
//! ```
//!
//! # Invariants
//!
//! 1. Binding creation primes every observer without applying, then syncs the
//!    forward direction exactly once.
//! 2. A two-way binding never writes a value back to the side that caused it:
//!    both directions share one [`BindingLock`] pair.
//! 3. Dropping a [`PropertyBinding`] detaches both directions.
//! 4. No binding keeps any source, destination, or intermediate object alive.
//!
//! # Failure Modes
//!
//! - Conversion failure: the destination receives its declared default.
//! - Write failure (read-only, type mismatch, unknown property): dropped.
//! - Broken destination chain at write time: the write is skipped.
//!
//! None of these are logged or reported.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::convert::Converter;
use crate::dispatch::Dispatcher;
use crate::error::WriteError;
use crate::lock::BindingLock;
use crate::observer::{LeafObserver, ObserverChain};
use crate::path::PropertyChain;
use crate::value::Value;

// ---------------------------------------------------------------------------
// BindOptions
// ---------------------------------------------------------------------------

/// Per-binding configuration, captured once at bind time.
#[derive(Clone, Default)]
pub struct BindOptions {
    converter: Converter,
    back_converter: Converter,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl BindOptions {
    /// Options with automatic conversion both ways and no dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter for source-to-destination values.
    #[must_use]
    pub fn converter(mut self, converter: Converter) -> Self {
        self.converter = converter;
        self
    }

    /// Converter for destination-to-source values (two-way only).
    #[must_use]
    pub fn back_converter(mut self, converter: Converter) -> Self {
        self.back_converter = converter;
        self
    }

    /// Marshal every apply onto `dispatcher` instead of the notifying thread.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }
}

impl fmt::Debug for BindOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindOptions")
            .field("converter", &self.converter)
            .field("back_converter", &self.back_converter)
            .field("dispatched", &self.dispatcher.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// bind / bind_two_way
// ---------------------------------------------------------------------------

/// Which directions a binding propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Source to destination only.
    OneWay,
    /// Both directions, sharing one sibling-lock pair.
    TwoWay,
}

/// Bind `source` to `target`: every change anywhere along the source chain
/// writes the current terminal value into the target property.
pub fn bind(source: PropertyChain, target: PropertyChain, options: BindOptions) -> PropertyBinding {
    build(source, target, options, BindMode::OneWay)
}

/// Bind `source` and `target` to each other.
///
/// The target is synced from the source once; afterwards either side's
/// changes flow to the other, through `back_converter` in reverse.
pub fn bind_two_way(
    source: PropertyChain,
    target: PropertyChain,
    options: BindOptions,
) -> PropertyBinding {
    build(source, target, options, BindMode::TwoWay)
}

fn build(
    source: PropertyChain,
    target: PropertyChain,
    options: BindOptions,
    mode: BindMode,
) -> PropertyBinding {
    let BindOptions {
        converter,
        back_converter,
        dispatcher,
    } = options;
    let (forward, reverse) = BindingLock::pair();

    let forward_chain = ObserverChain::build(
        &source,
        leaf_writing_to(target.clone(), converter, forward.clone(), dispatcher.clone()),
    );
    forward_chain.attach(source.root());

    if mode == BindMode::TwoWay {
        let reverse_chain = ObserverChain::build(
            &target,
            leaf_writing_to(source.clone(), back_converter, reverse.clone(), dispatcher),
        );
        reverse_chain.attach(target.root());
        reverse.own(reverse_chain);
    }

    forward_chain.sync();
    forward.own(forward_chain);

    tracing::debug!(source = %source, target = %target, ?mode, "binding created");
    PropertyBinding {
        forward,
        mode,
        label: format!("{source} -> {target}"),
        disposed: AtomicBool::new(false),
    }
}

/// The leaf for one direction: convert against the destination's declared
/// type and write through the destination chain as it stands at write time.
fn leaf_writing_to(
    destination: PropertyChain,
    converter: Converter,
    lock: BindingLock,
    dispatcher: Option<Arc<dyn Dispatcher>>,
) -> LeafObserver {
    let dest = destination.clone();
    let setter = move |value: Value| -> Result<bool, WriteError> {
        let Some(container) = dest.leaf_container() else {
            return Ok(false);
        };
        let property = dest.leaf();
        let ty = property.declared_type(&*container);
        let converted = converter
            .apply(&value, &ty)
            .unwrap_or_else(|_| ty.default_value());
        property.write(&*container, converted).map(|()| true)
    };
    let null_setter = move || -> Result<bool, WriteError> {
        let Some(container) = destination.leaf_container() else {
            return Ok(false);
        };
        let property = destination.leaf();
        let ty = property.declared_type(&*container);
        property.write(&*container, ty.default_value()).map(|()| true)
    };
    LeafObserver::new(Box::new(setter), Box::new(null_setter), lock, dispatcher)
}

// ---------------------------------------------------------------------------
// PropertyBinding
// ---------------------------------------------------------------------------

/// Handle to a live binding. Dropping it disposes the binding.
#[must_use = "dropping a PropertyBinding disposes it immediately"]
pub struct PropertyBinding {
    forward: BindingLock,
    mode: BindMode,
    label: String,
    disposed: AtomicBool,
}

impl PropertyBinding {
    /// Whether this binding is one-way or two-way.
    #[must_use]
    pub fn mode(&self) -> BindMode {
        self.mode
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Detach both directions. Idempotent.
    ///
    /// Applies already queued on a dispatcher may still run; nothing is
    /// applied for notifications raised after this returns.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.forward.dispose();
        self.forward.sibling().dispose();
        tracing::debug!(binding = %self.label, "binding disposed");
    }
}

impl Drop for PropertyBinding {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PropertyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBinding")
            .field("binding", &self.label)
            .field("mode", &self.mode)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Bind `src.a.b` to `dst.c`, resolving both chains.
///
/// Evaluates to `Result<PropertyBinding, BindError>`. An optional third
/// argument supplies [`BindOptions`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ftui_bind::{NotifyStyle, PropertyBag, bind};
///
/// let src = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("count", 3));
/// let dst = Arc::new(PropertyBag::new(NotifyStyle::PropertyChanged).with("count", 0));
/// let _b = bind!(src.count => dst.count).unwrap();
/// assert_eq!(dst.get("count").as_int(), Some(3));
/// ```
#[macro_export]
macro_rules! bind {
    ($src:ident $(. $sp:ident)+ => $dst:ident $(. $dp:ident)+) => {
        $crate::bind!($src $(. $sp)+ => $dst $(. $dp)+, $crate::binding::BindOptions::default())
    };
    ($src:ident $(. $sp:ident)+ => $dst:ident $(. $dp:ident)+, $opts:expr) => {
        match ($crate::chain!($src $(. $sp)+), $crate::chain!($dst $(. $dp)+)) {
            (::core::result::Result::Ok(s), ::core::result::Result::Ok(t)) => {
                ::core::result::Result::Ok($crate::binding::bind(s, t, $opts))
            }
            (::core::result::Result::Err(e), _) | (_, ::core::result::Result::Err(e)) => {
                ::core::result::Result::Err(e)
            }
        }
    };
}

/// Two-way form of [`bind!`].
#[macro_export]
macro_rules! bind_two_way {
    ($src:ident $(. $sp:ident)+ => $dst:ident $(. $dp:ident)+) => {
        $crate::bind_two_way!(
            $src $(. $sp)+ => $dst $(. $dp)+,
            $crate::binding::BindOptions::default()
        )
    };
    ($src:ident $(. $sp:ident)+ => $dst:ident $(. $dp:ident)+, $opts:expr) => {
        match ($crate::chain!($src $(. $sp)+), $crate::chain!($dst $(. $dp)+)) {
            (::core::result::Result::Ok(s), ::core::result::Result::Ok(t)) => {
                ::core::result::Result::Ok($crate::binding::bind_two_way(s, t, $opts))
            }
            (::core::result::Result::Err(e), _) | (_, ::core::result::Result::Err(e)) => {
                ::core::result::Result::Err(e)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// BindingScope
// ---------------------------------------------------------------------------

/// Collects bindings for a logical scope (e.g., a widget).
///
/// # Invariants
///
/// 1. Bindings are disposed in reverse registration order on drop.
/// 2. After drop, no binding from this scope will apply.
/// 3. `clear()` disposes everything immediately; the scope stays reusable.
pub struct BindingScope {
    bindings: Vec<PropertyBinding>,
}

impl BindingScope {
    /// Create an empty binding scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Keep `binding` alive until the scope is cleared or dropped.
    pub fn hold(&mut self, binding: PropertyBinding) -> &mut Self {
        self.bindings.push(binding);
        self
    }

    /// Create a one-way binding owned by this scope.
    pub fn bind(
        &mut self,
        source: PropertyChain,
        target: PropertyChain,
        options: BindOptions,
    ) -> &mut Self {
        self.hold(bind(source, target, options))
    }

    /// Create a two-way binding owned by this scope.
    pub fn bind_two_way(
        &mut self,
        source: PropertyChain,
        target: PropertyChain,
        options: BindOptions,
    ) -> &mut Self {
        self.hold(bind_two_way(source, target, options))
    }

    /// Number of bindings currently held.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the scope holds no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Dispose all bindings, newest first.
    pub fn clear(&mut self) {
        while let Some(binding) = self.bindings.pop() {
            binding.dispose();
        }
    }
}

impl Drop for BindingScope {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for BindingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("binding_count", &self.bindings.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{NotifyStyle, PropertyBag};
    use crate::dispatch::QueueDispatcher;
    use crate::value::ValueType;

    fn bag() -> PropertyBag {
        PropertyBag::new(NotifyStyle::PropertyChanged)
    }

    fn chain(root: &Arc<PropertyBag>, expr: &str) -> PropertyChain {
        PropertyChain::resolve(root, expr).unwrap()
    }

    #[test]
    fn one_way_syncs_and_follows() {
        let src = Arc::new(bag().with("v", 1));
        let dst = Arc::new(bag().with("v", 0));
        let b = bind(chain(&src, "v"), chain(&dst, "v"), BindOptions::default());
        assert_eq!(b.mode(), BindMode::OneWay);
        assert_eq!(dst.get("v"), Value::Int(1));

        src.set("v", 7).unwrap();
        assert_eq!(dst.get("v"), Value::Int(7));

        dst.set("v", 9).unwrap();
        assert_eq!(src.get("v"), Value::Int(7), "one-way must not flow back");
    }

    #[test]
    fn two_way_flows_both_ways() {
        let src = Arc::new(bag().with("v", 1));
        let dst = Arc::new(bag().with_typed("v", ValueType::Str, ""));
        let _b = bind_two_way(chain(&src, "v"), chain(&dst, "v"), BindOptions::default());
        assert_eq!(dst.get("v"), Value::from("1"));

        dst.set("v", "25").unwrap();
        assert_eq!(src.get("v"), Value::Int(25));

        src.set("v", 3).unwrap();
        assert_eq!(dst.get("v"), Value::from("3"));
    }

    #[test]
    fn dispose_is_idempotent_and_stops_updates() {
        let src = Arc::new(bag().with("v", 1));
        let dst = Arc::new(bag().with("v", 0));
        let b = bind_two_way(chain(&src, "v"), chain(&dst, "v"), BindOptions::default());
        b.dispose();
        b.dispose();
        assert!(b.is_disposed());
        assert_eq!(src.observer_count(), 0);
        assert_eq!(dst.observer_count(), 0);

        src.set("v", 5).unwrap();
        assert_eq!(dst.get("v"), Value::Int(1));
    }

    #[test]
    fn drop_disposes() {
        let src = Arc::new(bag().with("v", 1));
        let dst = Arc::new(bag().with("v", 0));
        {
            let _b = bind(chain(&src, "v"), chain(&dst, "v"), BindOptions::default());
            assert_eq!(src.observer_count(), 1);
        }
        assert_eq!(src.observer_count(), 0);
    }

    #[test]
    fn custom_converter_and_failure_default() {
        let src = Arc::new(bag().with("v", 2));
        let dst = Arc::new(bag().with_typed("v", ValueType::Int, 99));
        let options = BindOptions::new().converter(Converter::new(|v| match v.as_int() {
            Some(i) if i >= 0 => Ok(Value::Int(i * 10)),
            _ => Err(crate::error::ConvertError::Custom("negative".into())),
        }));
        let _b = bind(chain(&src, "v"), chain(&dst, "v"), options);
        assert_eq!(dst.get("v"), Value::Int(20));

        src.set("v", -1).unwrap();
        assert_eq!(dst.get("v"), Value::Int(0));
    }

    #[test]
    fn dispatcher_defers_apply() {
        let src = Arc::new(bag().with("v", 1));
        let dst = Arc::new(bag().with("v", 0));
        let queue = QueueDispatcher::new();
        let _b = bind(
            chain(&src, "v"),
            chain(&dst, "v"),
            BindOptions::new().dispatcher(queue.clone()),
        );
        assert_eq!(dst.get("v"), Value::Int(0));
        assert_eq!(queue.pending(), 1);

        src.set("v", 2).unwrap();
        assert_eq!(queue.run_pending(), 2);
        assert_eq!(dst.get("v"), Value::Int(2));
    }

    #[test]
    fn dispose_keeps_already_queued_apply() {
        let src = Arc::new(bag().with("v", 1));
        let dst = Arc::new(bag().with("v", 0));
        let queue = QueueDispatcher::new();
        let b = bind(
            chain(&src, "v"),
            chain(&dst, "v"),
            BindOptions::new().dispatcher(queue.clone()),
        );
        queue.run_pending();
        assert_eq!(dst.get("v"), Value::Int(1));

        src.set("v", 2).unwrap();
        assert_eq!(queue.pending(), 1);
        b.dispose();

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(dst.get("v"), Value::Int(2));

        src.set("v", 3).unwrap();
        assert_eq!(queue.pending(), 0, "no new applies after dispose");
        assert_eq!(dst.get("v"), Value::Int(2));
    }

    #[test]
    fn scope_releases_in_reverse_order() {
        let src = Arc::new(bag().with("v", 1));
        let a = Arc::new(bag().with("v", 0));
        let b = Arc::new(bag().with("v", 0));
        let mut scope = BindingScope::new();
        scope
            .bind(chain(&src, "v"), chain(&a, "v"), BindOptions::default())
            .bind_two_way(chain(&src, "v"), chain(&b, "v"), BindOptions::default());
        assert_eq!(scope.binding_count(), 2);
        assert_eq!(src.observer_count(), 2);

        scope.clear();
        assert!(scope.is_empty());
        assert_eq!(src.observer_count(), 0);
        assert_eq!(b.observer_count(), 0);
    }

    #[test]
    fn bind_macro_reports_bad_root() {
        let src = Value::Int(3);
        let dst = Arc::new(bag().with("v", 0));
        let result = crate::bind!(src.v => dst.v);
        assert!(result.is_err());

        let src = Arc::new(bag().with("v", 4));
        let b = crate::bind_two_way!(src.v => dst.v).unwrap();
        assert_eq!(b.mode(), BindMode::TwoWay);
        assert_eq!(dst.get("v"), Value::Int(4));
    }
}
