//! C ABI exported to the foreign side
//!
//! Every function here is a thin forwarder. The foreign side builds descriptors
//! from four integers, invokes them through a pointer it received from
//! `callback_bridge_simple_create`, and hands that pointer back to be freed.
//!
//! Memory ownership across the boundary:
//!
//! - Descriptors are allocated by this library and freed only by
//!   `callback_bridge_simple_destroy` (or `callback_bridge_simple_dealloc` for
//!   storage that never held a descriptor).
//! - String payloads are copied into `BridgeString` buffers allocated here; the
//!   receiving entry point owns them and returns them through
//!   `callback_bridge_string_free`.
//! - The context behind the context handle belongs to the foreign side and is
//!   released by its own teardown entry point.
//!
//! # Safety
//!
//! The raw functions perform no validation. Null or dangling descriptor
//! pointers, entry points of the wrong shape, and any call after
//! `callback_bridge_simple_call_drop` are undefined behavior. Null pointers are
//! caught by `debug_assert!` in debug builds only. The `guarded_*` family
//! trades that for an atomic state check and reports rejected calls as status
//! codes instead.
//!
//! The C declarations live in `include/callback_bridge.h`.

use std::alloc::{self, Layout};
use std::mem;

use crate::descriptor::SimpleCallBack;
use crate::guard::{CallbackState, GuardedCallBack};
use crate::payload::{BridgeStr, BridgeString};
use crate::types::{BridgeError, Result};

/// Guarded form of [`SimpleCallBack`]
pub type GuardedSimpleCallBack = GuardedCallBack<BridgeString, (BridgeString, BridgeString)>;

/// The call was delivered
pub const CALLBACK_BRIDGE_DELIVERED: i32 = 0;
/// Rejected: success or error was already delivered
pub const CALLBACK_BRIDGE_ALREADY_COMPLETED: i32 = 1;
/// Rejected: teardown was already delivered
pub const CALLBACK_BRIDGE_ALREADY_TORN_DOWN: i32 = 2;

/// Values returned by `callback_bridge_guarded_state`
pub const CALLBACK_BRIDGE_STATE_PENDING: i32 = 0;
pub const CALLBACK_BRIDGE_STATE_DELIVERING: i32 = 1;
pub const CALLBACK_BRIDGE_STATE_COMPLETED: i32 = 2;
pub const CALLBACK_BRIDGE_STATE_TORN_DOWN: i32 = 3;
pub const CALLBACK_BRIDGE_STATE_TEARDOWN_PENDING: i32 = 4;

fn status_code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => CALLBACK_BRIDGE_DELIVERED,
        Err(BridgeError::AlreadyCompleted(_)) => CALLBACK_BRIDGE_ALREADY_COMPLETED,
        Err(BridgeError::AlreadyTornDown(_)) => CALLBACK_BRIDGE_ALREADY_TORN_DOWN,
        Err(e) => {
            log::error!("unexpected bridge error at boundary: {}", e);
            -1
        }
    }
}

fn simple_layout() -> Layout {
    Layout::new::<SimpleCallBack>()
}

// ============================================================================
// Raw descriptor
// ============================================================================

/// Build a descriptor from four integer handles and transfer it to the caller.
#[no_mangle]
pub extern "C" fn callback_bridge_simple_create(
    ok: usize,
    err: usize,
    drop: usize,
    data: usize,
) -> *mut SimpleCallBack {
    let cb = Box::new(SimpleCallBack::from_raw_parts(ok, err, drop, data));
    log::debug!("created descriptor {:?}", cb);
    Box::into_raw(cb)
}

/// Invoke the success entry point with copies of `a` and `b`.
///
/// # Safety
///
/// `cb` must come from `callback_bridge_simple_create` (or `_alloc` + `_init`),
/// must not be destroyed, and its teardown must not have run. `a` and `b` must
/// be readable for their lengths.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_simple_call_ok(
    cb: *mut SimpleCallBack,
    a: BridgeStr,
    b: BridgeStr,
) {
    debug_assert!(!cb.is_null(), "null callback descriptor");
    let cb = &*cb;
    cb.success((a.to_owned_string(), b.to_owned_string()));
}

/// Invoke the error entry point with a copy of `a`.
///
/// # Safety
///
/// Same contract as [`callback_bridge_simple_call_ok`].
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_simple_call_err(cb: *mut SimpleCallBack, a: BridgeStr) {
    debug_assert!(!cb.is_null(), "null callback descriptor");
    let cb = &*cb;
    cb.error(a.to_owned_string());
}

/// Invoke the teardown entry point, releasing the foreign context.
///
/// Does not free the descriptor; call `callback_bridge_simple_destroy` for that.
///
/// # Safety
///
/// `cb` must be a live descriptor whose teardown has not run. A second call is
/// undefined behavior.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_simple_call_drop(cb: *mut SimpleCallBack) {
    debug_assert!(!cb.is_null(), "null callback descriptor");
    let cb = &*cb;
    cb.teardown();
}

/// Free a descriptor's own storage.
///
/// Independent of `callback_bridge_simple_call_drop`, which releases the
/// foreign context rather than the descriptor.
///
/// # Safety
///
/// `cb` must come from `callback_bridge_simple_create` or `_alloc` + `_init`,
/// and must not be used afterwards. Null is ignored.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_simple_destroy(cb: *mut SimpleCallBack) {
    if cb.is_null() {
        return;
    }
    log::debug!("destroying descriptor {:?}", &*cb);
    drop(Box::from_raw(cb));
}

/// Size in bytes of a descriptor.
#[no_mangle]
pub extern "C" fn callback_bridge_simple_sizeof() -> usize {
    mem::size_of::<SimpleCallBack>()
}

/// Alignment in bytes of a descriptor.
#[no_mangle]
pub extern "C" fn callback_bridge_simple_alignof() -> usize {
    mem::align_of::<SimpleCallBack>()
}

/// Reserve uninitialized storage for one descriptor from the native allocator.
///
/// Fill it with `callback_bridge_simple_init`, then release it with
/// `callback_bridge_simple_destroy`; release it with
/// `callback_bridge_simple_dealloc` if it was never initialized.
#[no_mangle]
pub extern "C" fn callback_bridge_simple_alloc() -> *mut SimpleCallBack {
    let layout = simple_layout();
    // SAFETY: the descriptor has non-zero size.
    let ptr = unsafe { alloc::alloc(layout) } as *mut SimpleCallBack;
    if ptr.is_null() {
        alloc::handle_alloc_error(layout);
    }
    ptr
}

/// Return storage from `callback_bridge_simple_alloc` without running a
/// destructor.
///
/// # Safety
///
/// `slot` must come from `callback_bridge_simple_alloc` and must not be freed
/// twice. Null is ignored.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_simple_dealloc(slot: *mut SimpleCallBack) {
    if slot.is_null() {
        return;
    }
    alloc::dealloc(slot as *mut u8, simple_layout());
}

/// Write a descriptor into storage from `callback_bridge_simple_alloc`.
///
/// # Safety
///
/// `slot` must come from `callback_bridge_simple_alloc` and not be freed.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_simple_init(
    slot: *mut SimpleCallBack,
    ok: usize,
    err: usize,
    drop: usize,
    data: usize,
) {
    debug_assert!(!slot.is_null(), "null descriptor slot");
    slot.write(SimpleCallBack::from_raw_parts(ok, err, drop, data));
}

// ============================================================================
// Payload buffers
// ============================================================================

/// Copy `len` bytes at `ptr` into a buffer owned by the caller.
///
/// # Safety
///
/// `ptr` must be readable for `len` bytes (or `len` must be zero).
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_string_alloc(ptr: *const u8, len: usize) -> BridgeString {
    BridgeStr { ptr, len }.to_owned_string()
}

/// Release a buffer received by an entry point or from
/// `callback_bridge_string_alloc`.
#[no_mangle]
pub extern "C" fn callback_bridge_string_free(s: BridgeString) {
    drop(s);
}

// ============================================================================
// Guarded descriptor
// ============================================================================

/// Build a guarded descriptor. Dropping it without teardown tears it down.
///
/// # Safety
///
/// `ok`, `err` and `drop` must be entry points of the agreed shapes, and must
/// stay callable until the descriptor is torn down.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_guarded_create(
    ok: usize,
    err: usize,
    drop: usize,
    data: usize,
) -> *mut GuardedSimpleCallBack {
    let cb = SimpleCallBack::from_raw_parts(ok, err, drop, data);
    log::debug!("created guarded descriptor {:?}", cb);
    Box::into_raw(Box::new(GuardedCallBack::new(cb)))
}

/// Deliver success unless an outcome or teardown was already delivered.
///
/// Returns `CALLBACK_BRIDGE_DELIVERED` or the rejection status.
///
/// # Safety
///
/// `cb` must come from `callback_bridge_guarded_create` and not be destroyed.
/// `a` and `b` must be readable for their lengths.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_guarded_call_ok(
    cb: *const GuardedSimpleCallBack,
    a: BridgeStr,
    b: BridgeStr,
) -> i32 {
    debug_assert!(!cb.is_null(), "null guarded descriptor");
    status_code((*cb).succeed((a.to_owned_string(), b.to_owned_string())))
}

/// Deliver an error unless an outcome or teardown was already delivered.
///
/// # Safety
///
/// Same contract as [`callback_bridge_guarded_call_ok`].
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_guarded_call_err(
    cb: *const GuardedSimpleCallBack,
    a: BridgeStr,
) -> i32 {
    debug_assert!(!cb.is_null(), "null guarded descriptor");
    status_code((*cb).fail(a.to_owned_string()))
}

/// Deliver teardown once; later calls return `CALLBACK_BRIDGE_ALREADY_TORN_DOWN`.
///
/// Called from inside this descriptor's own success or error entry point, the
/// teardown is deferred: the call returns `CALLBACK_BRIDGE_DELIVERED` at once
/// and the teardown entry point runs right after that entry point returns.
///
/// # Safety
///
/// `cb` must come from `callback_bridge_guarded_create` and not be destroyed.
/// An entry point may call this on the descriptor it was invoked through, but
/// must not call `callback_bridge_guarded_destroy` on it.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_guarded_call_drop(cb: *const GuardedSimpleCallBack) -> i32 {
    debug_assert!(!cb.is_null(), "null guarded descriptor");
    status_code((*cb).teardown())
}

/// Current state: 0 pending, 1 delivering, 2 completed, 3 torn down,
/// 4 teardown deferred until the running entry point returns.
///
/// # Safety
///
/// `cb` must come from `callback_bridge_guarded_create` and not be destroyed.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_guarded_state(cb: *const GuardedSimpleCallBack) -> i32 {
    debug_assert!(!cb.is_null(), "null guarded descriptor");
    match (*cb).state() {
        CallbackState::Pending => CALLBACK_BRIDGE_STATE_PENDING,
        CallbackState::Delivering => CALLBACK_BRIDGE_STATE_DELIVERING,
        CallbackState::Completed => CALLBACK_BRIDGE_STATE_COMPLETED,
        CallbackState::TornDown => CALLBACK_BRIDGE_STATE_TORN_DOWN,
        CallbackState::TeardownPending => CALLBACK_BRIDGE_STATE_TEARDOWN_PENDING,
    }
}

/// Free a guarded descriptor, tearing it down first if nobody did.
///
/// # Safety
///
/// `cb` must come from `callback_bridge_guarded_create`, must not be used
/// afterwards, and no other thread may be using it. Null is ignored.
#[no_mangle]
pub unsafe extern "C" fn callback_bridge_guarded_destroy(cb: *mut GuardedSimpleCallBack) {
    if cb.is_null() {
        return;
    }
    drop(Box::from_raw(cb));
}
