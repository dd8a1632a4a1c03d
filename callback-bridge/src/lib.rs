//! Callback Bridge Library
//!
//! Type-erased success/error/teardown callbacks across a foreign-function
//! boundary between a garbage-collected runtime and manually managed native
//! code.
//!
//! # Architecture
//!
//! The foreign side registers three entry points and one opaque context as four
//! machine-word integers. The native side keeps them in a [`CallBack`]
//! descriptor and later calls exactly one of:
//! - success, with the success payload followed by the context,
//! - error, with one error payload followed by the context,
//! - teardown, with the context alone, to release the foreign state.
//!
//! The descriptor is generic over the payload shapes; [`SimpleCallBack`] is the
//! instantiation exported by the C ABI in [`ffi`] (two strings on success, one
//! on error).
//!
//! The library does NOT:
//! - Validate entry-point addresses (there is no way to)
//! - Own or inspect the memory behind a context handle
//! - Serialize arbitrary messages
//!
//! Checking is opt-in: [`GuardedCallBack`] enforces at-most-once delivery with an
//! atomic state machine, and [`ContextRegistry`] turns a use-after-teardown into
//! an error instead of a dangling read.
//!
//! # Example Usage
//!
//! ```no_run
//! use callback_bridge::{BridgeString, SimpleCallBack};
//!
//! unsafe extern "C" fn on_ok(a: BridgeString, b: BridgeString, ctx: usize) {
//!     println!("OK {}{} (ctx {ctx})", a.to_string_lossy(), b.to_string_lossy());
//! }
//! unsafe extern "C" fn on_err(e: BridgeString, _ctx: usize) {
//!     eprintln!("ERR {}", e.to_string_lossy());
//! }
//! unsafe extern "C" fn on_drop(_ctx: usize) {}
//!
//! let cb = SimpleCallBack::from_fns(on_ok, on_err, on_drop, 7);
//! unsafe {
//!     cb.success((BridgeString::from("test"), BridgeString::from("test")));
//!     cb.teardown();
//! }
//! ```

// Public modules
pub mod config;
pub mod context;
pub mod descriptor;
pub mod ffi;
pub mod guard;
pub mod payload;
pub mod types;

// Re-export main types for convenience
pub use config::BridgeConfig;
pub use context::{ContextHandle, ContextRegistry};
pub use descriptor::{CallBack, ErrorEntry, SimpleCallBack, SuccessArgs, TeardownEntry};
pub use ffi::GuardedSimpleCallBack;
pub use guard::{CallbackState, GuardedCallBack};
pub use payload::{BridgeStr, BridgeString, FfiSafe};
pub use types::{BridgeError, Outcome, RawEntryPoints, Result};

#[cfg(test)]
mod testing;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a descriptor is exactly its four words
        let cb = SimpleCallBack::from_raw(RawEntryPoints::new(1, 2, 3, 4));
        assert_eq!(cb.context(), 4);
        assert_eq!(ffi::callback_bridge_simple_sizeof(), 4 * std::mem::size_of::<usize>());
    }
}
