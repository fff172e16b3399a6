#![forbid(unsafe_code)]

//! Property-chain data bindings for FrankenTUI.
//!
//! A binding connects a source property path (`root.a.b`) to a destination
//! property path. Any change along the source chain, to an intermediate
//! object or to the terminal value, is re-resolved and pushed to the
//! destination, converting between value types as needed.
//!
//! This crate provides:
//! - [`Container`] and the reference [`PropertyBag`] for observable objects
//! - [`PropertyChain`] resolution with the [`chain!`] macro front end
//! - [`bind`] / [`bind_two_way`] and the [`bind!`] / [`bind_two_way!`] macros
//! - [`BindingLock`] sibling locks that keep two-way bindings from echoing
//! - [`Dispatcher`] marshaling with [`WorkerDispatcher`] and [`QueueDispatcher`]
//! - [`BindingScope`] for tying many bindings to one owner's lifetime

pub mod binding;
pub mod container;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod lock;
mod observer;
pub mod path;
pub mod value;

pub use binding::{BindMode, BindOptions, BindingScope, PropertyBinding, bind, bind_two_way};
pub use container::{Container, Notifications, NotifyStyle, ObjectRef, PropertyBag};
pub use convert::{Converter, change_type, convert};
pub use dispatch::{Dispatcher, Job, QueueDispatcher, WorkerDispatcher};
pub use error::{BindError, ConvertError, WriteError};
pub use event::{ChangeEvent, PropertyEvents, Subscription, changed_event_name};
pub use lock::{BindingLock, Direction, SiblingGuard};
pub use path::{PropertyChain, PropertyDescriptor, PropertyPath};
pub use value::{Value, ValueKind, ValueType};
