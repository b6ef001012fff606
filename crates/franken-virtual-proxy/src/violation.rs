//! Operation names and the fatal invariant-violation error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object_model::PropertyKey;

/// The thirteen intercepted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Call,
    Construct,
    DefineProperty,
    GetOwnPropertyDescriptor,
    DeleteProperty,
    OwnKeys,
    IsExtensible,
    PreventExtensions,
    GetPrototypeOf,
    SetPrototypeOf,
    Has,
    Get,
    Set,
}

impl Operation {
    pub const ALL: [Self; 13] = [
        Self::Call,
        Self::Construct,
        Self::DefineProperty,
        Self::GetOwnPropertyDescriptor,
        Self::DeleteProperty,
        Self::OwnKeys,
        Self::IsExtensible,
        Self::PreventExtensions,
        Self::GetPrototypeOf,
        Self::SetPrototypeOf,
        Self::Has,
        Self::Get,
        Self::Set,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "apply",
            Self::Construct => "construct",
            Self::DefineProperty => "defineProperty",
            Self::GetOwnPropertyDescriptor => "getOwnPropertyDescriptor",
            Self::DeleteProperty => "deleteProperty",
            Self::OwnKeys => "ownKeys",
            Self::IsExtensible => "isExtensible",
            Self::PreventExtensions => "preventExtensions",
            Self::GetPrototypeOf => "getPrototypeOf",
            Self::SetPrototypeOf => "setPrototypeOf",
            Self::Has => "has",
            Self::Get => "get",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backing handler contradicted a fact recorded in the shadow.
///
/// Not recoverable: the virtual object should be treated as corrupted for
/// the key (or aspect) involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub operation: Operation,
    pub key: Option<PropertyKey>,
    pub reason: String,
}

impl InvariantViolation {
    pub fn new(operation: Operation, key: Option<&PropertyKey>, reason: impl Into<String>) -> Self {
        Self {
            operation,
            key: key.cloned(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "invariant violation in {} handler ({:?}): {}",
                self.operation,
                key.to_string(),
                self.reason
            ),
            None => write!(
                f,
                "invariant violation in {} handler: {}",
                self.operation, self.reason
            ),
        }
    }
}

impl std::error::Error for InvariantViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_distinct() {
        let names: std::collections::BTreeSet<&str> =
            Operation::ALL.iter().map(|op| op.as_str()).collect();
        assert_eq!(names.len(), 13);
    }

    #[test]
    fn operation_serde_uses_camel_case() {
        let json = serde_json::to_string(&Operation::GetOwnPropertyDescriptor).unwrap();
        assert_eq!(json, "\"getOwnPropertyDescriptor\"");
    }

    #[test]
    fn violation_display_with_and_without_key() {
        let keyed = InvariantViolation::new(
            Operation::DefineProperty,
            Some(&PropertyKey::from("x")),
            "shadow rejected descriptor",
        );
        assert_eq!(
            keyed.to_string(),
            "invariant violation in defineProperty handler (\"x\"): shadow rejected descriptor"
        );
        let bare = InvariantViolation::new(Operation::IsExtensible, None, "cannot undo preventExtensions");
        assert_eq!(
            bare.to_string(),
            "invariant violation in isExtensible handler: cannot undo preventExtensions"
        );
    }
}
