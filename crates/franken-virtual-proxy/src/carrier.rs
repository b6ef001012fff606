//! Carrier shapes: the kind of thing a virtual object presents itself as.
//!
//! The operation set is shape-agnostic; the shape only decides whether the
//! virtual object may be called or constructed, and how it is tagged.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object_model::{ManagedObject, ObjectError, ObjectHandle, ObjectHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierShape {
    /// Plain record-like object.
    Record,
    /// List-like (array) object.
    List,
    /// Callable and constructable function.
    Function,
    /// Callable, non-constructable function.
    Arrow,
}

impl CarrierShape {
    pub const fn is_callable(self) -> bool {
        matches!(self, Self::Function | Self::Arrow)
    }

    pub const fn is_constructor(self) -> bool {
        matches!(self, Self::Function)
    }

    /// Class name reported for objects of this shape.
    pub const fn class_tag(self) -> &'static str {
        match self {
            Self::Record => "Object",
            Self::List => "Array",
            Self::Function | Self::Arrow => "Function",
        }
    }

    /// Pick the shape matching `backing`: arrays are lists, constructors are
    /// functions, other callables are arrows, everything else is a record.
    /// A virtual backing object lends its own shape.
    pub fn select(heap: &ObjectHeap, backing: ObjectHandle) -> Result<Self, ObjectError> {
        Ok(match heap.get(backing)? {
            ManagedObject::Virtual(v) => v.shape(),
            ManagedObject::Ordinary(o) if o.class_tag.as_deref() == Some("Array") => Self::List,
            ManagedObject::Ordinary(o) if o.constructable => Self::Function,
            ManagedObject::Ordinary(o) if o.callable => Self::Arrow,
            ManagedObject::Ordinary(_) => Self::Record,
        })
    }
}

impl fmt::Display for CarrierShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Record => "record",
            Self::List => "list",
            Self::Function => "function",
            Self::Arrow => "arrow",
        };
        f.write_str(name)
    }
}
