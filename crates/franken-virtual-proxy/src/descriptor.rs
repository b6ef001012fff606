//! Descriptor utilities: shape classification and the redefinition
//! compatibility rule for non-configurable properties.

use serde::{Deserialize, Serialize};

use crate::object_model::{JsValue, PropertyDescriptor};

/// Which half of the descriptor union a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Data,
    Accessor,
}

pub fn kind(desc: &PropertyDescriptor) -> DescriptorKind {
    match desc {
        PropertyDescriptor::Data { .. } => DescriptorKind::Data,
        PropertyDescriptor::Accessor { .. } => DescriptorKind::Accessor,
    }
}

/// A descriptor that can never change again: non-configurable, and either an
/// accessor or a non-writable data property.
pub fn is_frozen(desc: &PropertyDescriptor) -> bool {
    match desc {
        PropertyDescriptor::Data {
            writable,
            configurable,
            ..
        } => !configurable && !writable,
        PropertyDescriptor::Accessor { configurable, .. } => !configurable,
    }
}

/// Can a property currently described by `current` be redefined to `next`?
///
/// Configurable properties accept anything.  Non-configurable ones require
/// `next` to stay non-configurable with identical enumerability and the same
/// kind; a non-writable data property additionally keeps `writable: false`
/// and its value, and an accessor keeps its getter/setter identities.
pub fn is_compatible_redefinition(current: &PropertyDescriptor, next: &PropertyDescriptor) -> bool {
    if current.is_configurable() {
        return true;
    }
    if next.is_configurable() || next.is_enumerable() != current.is_enumerable() {
        return false;
    }
    match (current, next) {
        (
            PropertyDescriptor::Data {
                value: current_value,
                writable: current_writable,
                ..
            },
            PropertyDescriptor::Data {
                value: next_value,
                writable: next_writable,
                ..
            },
        ) => *current_writable || (!next_writable && current_value.same_value(next_value)),
        (
            PropertyDescriptor::Accessor {
                get: current_get,
                set: current_set,
                ..
            },
            PropertyDescriptor::Accessor {
                get: next_get,
                set: next_set,
                ..
            },
        ) => current_get == next_get && current_set == next_set,
        _ => false,
    }
}

/// Permissive descriptor pinned for keys discovered at seal time.
pub fn placeholder() -> PropertyDescriptor {
    PropertyDescriptor::data(JsValue::Null)
}
