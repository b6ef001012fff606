//! Heap-wide configuration for virtual objects.

use serde::{Deserialize, Serialize};

/// Maximum nested dispatch depth (prototype walks, getter chains, nested
/// virtual objects).
pub const DEFAULT_MAX_DISPATCH_DEPTH: u32 = 1024;

/// Events kept in the heap's log before the oldest are dropped.
pub const DEFAULT_MAX_EVENTS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualProxyConfig {
    /// Trace id stamped on every structured event.
    pub trace_id: String,
    /// When false, no events are recorded.
    pub record_events: bool,
    pub max_dispatch_depth: u32,
    /// Capacity of the event log.  Once full, recording an event drops the
    /// oldest one; drain with `ObjectHeap::drain_events` to keep them all.
    pub max_events: usize,
}

impl Default for VirtualProxyConfig {
    fn default() -> Self {
        Self {
            trace_id: "virtual-proxy".to_string(),
            record_events: true,
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl VirtualProxyConfig {
    /// Parse a configuration; missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}
