//! Core types shared by the bridge library
//!
//! The raw descriptor and the exported boundary functions have no error path:
//! a bad address or a use-after-teardown is a contract violation, not a value.
//! `BridgeError` is only produced by the layers that add checking on top of the
//! raw mechanism (guarded descriptors, the context registry, configuration).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// The four machine-word integers a foreign caller hands over to build a descriptor
///
/// The entry values are addresses of functions compiled on the other side of the
/// boundary. The context value is opaque and only meaningful to those functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawEntryPoints {
    /// Address of `fn(args..., context)`
    pub success: usize,
    /// Address of `fn(error, context)`
    pub error: usize,
    /// Address of `fn(context)`
    pub teardown: usize,
    /// Opaque context handle owned by the foreign side
    pub context: usize,
}

impl RawEntryPoints {
    /// Bundle four integer handles
    pub fn new(success: usize, error: usize, teardown: usize, context: usize) -> Self {
        Self {
            success,
            error,
            teardown,
            context,
        }
    }
}

impl fmt::Display for RawEntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok=0x{:x} err=0x{:x} drop=0x{:x} ctx=0x{:x}",
            self.success, self.error, self.teardown, self.context
        )
    }
}

/// Which of the three entry points an invocation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
    Teardown,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Error => write!(f, "error"),
            Outcome::Teardown => write!(f, "teardown"),
        }
    }
}

/// Errors reported by the checked layers of the bridge
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("callback already completed, {0} rejected")]
    AlreadyCompleted(Outcome),

    #[error("callback already torn down, {0} rejected")]
    AlreadyTornDown(Outcome),

    #[error("stale context handle 0x{0:x} (generation mismatch)")]
    StaleContext(usize),

    #[error("unknown context handle 0x{0:x}")]
    UnknownContext(usize),

    #[error("context registry full (capacity {0})")]
    RegistryFull(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_entry_points_display() {
        let raw = RawEntryPoints::new(0x10, 0x20, 0x30, 0xdead);
        assert_eq!(raw.to_string(), "ok=0x10 err=0x20 drop=0x30 ctx=0xdead");
    }

    #[test]
    fn test_error_messages() {
        let err = BridgeError::AlreadyTornDown(Outcome::Success);
        assert_eq!(err.to_string(), "callback already torn down, success rejected");

        let err = BridgeError::RegistryFull(4);
        assert_eq!(err.to_string(), "context registry full (capacity 4)");
    }

    #[test]
    fn test_raw_entry_points_serde() {
        let raw = RawEntryPoints::new(1, 2, 3, 4);
        let json = serde_json::to_string(&raw).unwrap();
        assert_eq!(json, r#"{"success":1,"error":2,"teardown":3,"context":4}"#);
        let back: RawEntryPoints = serde_json::from_str(&json).unwrap();
        assert_eq!(back, raw);
    }
}
