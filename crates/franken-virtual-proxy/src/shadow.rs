//! Shadow record: the per-virtual-object store of pinned facts.
//!
//! The shadow holds everything that has ever been pinned down about a
//! virtual object: non-configurable descriptors, the Open/Sealed
//! extensibility state, the prototype frozen at the seal, and (once sealed)
//! the exact key set.  It enforces its own invariants, so every mutation
//! returns `false` instead of applying a change that would contradict an
//! earlier fact.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor;
use crate::object_model::{ObjectHandle, PropertyDescriptor, PropertyKey, properties_as_seq};

/// Extensibility state.  `Open → Sealed` is the only transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extensibility {
    #[default]
    Open,
    Sealed,
}

impl fmt::Display for Extensibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Sealed => write!(f, "sealed"),
        }
    }
}

/// Facts about a virtual object that have been observed and pinned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowRecord {
    #[serde(with = "properties_as_seq")]
    properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    extensibility: Extensibility,
    /// Meaningful only once sealed.
    prototype: Option<ObjectHandle>,
}

impl ShadowRecord {
    /// An empty, extensible record.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pinned descriptor for `key`, if any.
    pub fn get(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    /// Whether `key` has a pinned descriptor.
    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// The pinned descriptor for `key` if it is non-configurable.
    pub fn non_configurable(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.get(key).filter(|d| !d.is_configurable())
    }

    /// The pinned descriptor for `key` if it can never change again.
    pub fn frozen(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.get(key).filter(|d| descriptor::is_frozen(d))
    }

    /// Pinned keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.properties.keys()
    }

    /// Number of pinned properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Current extensibility state.
    pub fn extensibility(&self) -> Extensibility {
        self.extensibility
    }

    /// Whether extensibility and prototype are fixed.
    pub fn is_sealed(&self) -> bool {
        self.extensibility == Extensibility::Sealed
    }

    /// The pinned prototype.  Meaningful only once sealed.
    pub fn prototype(&self) -> Option<ObjectHandle> {
        self.prototype
    }

    /// Record `desc` for `key`.  Refused when `key` is new and the shadow is
    /// sealed, or when `key` is non-configurable and `desc` is not a
    /// compatible redefinition.
    pub fn pin(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        match self.properties.get(&key) {
            Some(current) if !descriptor::is_compatible_redefinition(current, &desc) => false,
            None if self.is_sealed() => false,
            _ => {
                self.properties.insert(key, desc);
                true
            }
        }
    }

    /// Forget `key`.  Refused for non-configurable entries; absent keys are
    /// vacuously removed.
    pub fn remove(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            None => true,
        }
    }

    /// Record the prototype.  Once sealed, only the identical prototype is
    /// accepted.
    pub fn set_prototype(&mut self, prototype: Option<ObjectHandle>) -> bool {
        if self.is_sealed() {
            return self.prototype == prototype;
        }
        self.prototype = prototype;
        true
    }

    /// Irreversibly seal the shadow.
    pub fn seal(&mut self) {
        self.extensibility = Extensibility::Sealed;
    }
}
