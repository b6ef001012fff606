//! Structured evidence emitted by the virtual object operation set.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::object_model::{ObjectHandle, PropertyKey};

pub const COMPONENT: &str = "virtual_proxy";

/// What happened to shadow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// A descriptor was pinned into the shadow.
    Pinned,
    /// The shadow transitioned Open → Sealed.
    Sealed,
    /// A shadow entry was removed to mirror the backing handler.
    Purged,
    /// A request or answer was refused or normalized without error.
    Refused,
    /// A fatal invariant violation was raised.
    Violation,
    /// The virtual object was revoked.
    Revoked,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pinned => "pinned",
            Self::Sealed => "sealed",
            Self::Purged => "purged",
            Self::Refused => "refused",
            Self::Violation => "violation",
            Self::Revoked => "revoked",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualProxyEvent {
    pub trace_id: String,
    pub component: String,
    pub proxy: ObjectHandle,
    pub event: String,
    pub outcome: EventOutcome,
    pub key: Option<String>,
    pub error_code: Option<String>,
    pub detail: Option<String>,
}

impl VirtualProxyEvent {
    pub fn new(
        trace_id: &str,
        proxy: ObjectHandle,
        event: impl Into<String>,
        outcome: EventOutcome,
    ) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            component: COMPONENT.to_string(),
            proxy,
            event: event.into(),
            outcome,
            key: None,
            error_code: None,
            detail: None,
        }
    }

    pub fn with_key(mut self, key: Option<&PropertyKey>) -> Self {
        self.key = key.map(ToString::to_string);
        self
    }

    pub fn with_error_code(mut self, error_code: &str) -> Self {
        self.error_code = Some(error_code.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Digest of a key set, in iteration order.
pub fn key_set_digest<'a>(keys: impl IntoIterator<Item = &'a PropertyKey>) -> String {
    let mut hasher = Sha256::new();
    for key in keys {
        match key {
            PropertyKey::String(s) => {
                hasher.update(b"s:");
                hasher.update(s.as_bytes());
            }
            PropertyKey::Symbol(id) => {
                hasher.update(b"y:");
                hasher.update(id.0.to_be_bytes());
            }
        }
        hasher.update(b"\n");
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
