#![forbid(unsafe_code)]

//! Virtual objects whose behaviour is supplied by an untrusted backing
//! handler, with the object-model invariants enforced by a per-object
//! shadow record.
//!
//! A consumer wraps a backing object with [`VirtualProxy`]; every essential
//! internal method on the resulting handle (reached through [`Reflect`])
//! delegates to the [`BackingHandler`] and is validated by
//! [`operations`] before the answer is returned.

pub mod carrier;
pub mod config;
pub mod descriptor;
pub mod events;
pub mod handler;
pub mod object_model;
pub mod operations;
pub mod shadow;
pub mod violation;
pub mod virtual_object;

pub use carrier::CarrierShape;
pub use config::VirtualProxyConfig;
pub use events::{EventOutcome, VirtualProxyEvent};
pub use handler::{BackingHandler, ReflectHandler};
pub use object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey, Reflect,
    SymbolId,
};
pub use shadow::{Extensibility, ShadowRecord};
pub use violation::{InvariantViolation, Operation};
pub use virtual_object::{Revoker, VirtualProxy};
