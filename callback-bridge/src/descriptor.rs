//! The callback descriptor
//!
//! A `CallBack<E, A>` stores three entry-point addresses and one context handle,
//! all received as plain integers from the foreign side. Invoking it casts the
//! stored address back to the function-pointer shape fixed by `E` and `A` and
//! calls it with the context appended as the last argument.
//!
//! This module is the only place in the crate where an integer is reinterpreted
//! as a function pointer. Nothing checks that the address really is a function
//! of that shape: the shape is a convention between the two codebases, and
//! every invocation is `unsafe` for that reason.
//!
//! # Contract
//!
//! - The three addresses point to live functions with the signatures
//!   `fn(args..., usize)`, `fn(E, usize)` and `fn(usize)`, C calling convention.
//! - `teardown` is called exactly once per descriptor, on every exit path.
//! - Nothing is invoked after `teardown`.
//! - At most one of `success`/`error` per logical operation is a caller policy;
//!   the descriptor does not track it. See [`crate::GuardedCallBack`] for a
//!   variant that enforces these rules at runtime.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;

use crate::payload::{BridgeString, FfiSafe};
use crate::types::RawEntryPoints;

/// Shape of the error entry point
pub type ErrorEntry<E> = unsafe extern "C" fn(E, usize);

/// Shape of the teardown entry point
pub type TeardownEntry = unsafe extern "C" fn(usize);

/// Argument list of a success entry point
///
/// Implemented for tuples of [`FfiSafe`] values up to four elements. The tuple
/// is spread into the call, followed by the context handle.
pub trait SuccessArgs: Sized {
    /// `unsafe extern "C" fn(args..., usize)`
    type Entry: Copy;

    /// Number of payload values (context excluded)
    const ARITY: usize;

    /// Address of a typed entry point
    fn entry_addr(entry: Self::Entry) -> usize;

    /// Call the function at `entry` with these arguments and `context`
    ///
    /// # Safety
    ///
    /// `entry` must be the address of a function of shape `Self::Entry`.
    unsafe fn call(self, entry: usize, context: usize);
}

macro_rules! count {
    () => { 0 };
    ($head:ident $($tail:ident)*) => { 1 + count!($($tail)*) };
}

macro_rules! impl_success_args {
    ($($arg:ident),*) => {
        impl<$($arg: FfiSafe),*> SuccessArgs for ($($arg,)*) {
            type Entry = unsafe extern "C" fn($($arg,)* usize);

            const ARITY: usize = count!($($arg)*);

            fn entry_addr(entry: Self::Entry) -> usize {
                entry as usize
            }

            #[allow(non_snake_case)]
            unsafe fn call(self, entry: usize, context: usize) {
                let f = mem::transmute::<usize, Self::Entry>(entry);
                let ($($arg,)*) = self;
                f($($arg,)* context)
            }
        }
    };
}

impl_success_args!();
impl_success_args!(A);
impl_success_args!(A, B);
impl_success_args!(A, B, C);
impl_success_args!(A, B, C, D);

/// The instantiation exported across the boundary: two string payloads on
/// success, one on error.
pub type SimpleCallBack = CallBack<BridgeString, (BridgeString, BridgeString)>;

/// Three raw entry points plus an opaque context
///
/// Single owner: the descriptor can move to another thread (`Send`) but cannot
/// be invoked from two threads at once (`!Sync`).
#[repr(C)]
pub struct CallBack<E, A> {
    success: usize,
    error: usize,
    teardown: usize,
    context: usize,
    _shape: PhantomData<(fn(E, A), Cell<()>)>,
}

impl<E: FfiSafe, A: SuccessArgs> CallBack<E, A> {
    /// Build a descriptor from four integer handles
    ///
    /// No validation is possible here. Passing anything other than entry points
    /// of the agreed shapes makes the later invocations undefined behavior.
    pub fn from_raw_parts(success: usize, error: usize, teardown: usize, context: usize) -> Self {
        Self {
            success,
            error,
            teardown,
            context,
            _shape: PhantomData,
        }
    }

    pub fn from_raw(raw: RawEntryPoints) -> Self {
        Self::from_raw_parts(raw.success, raw.error, raw.teardown, raw.context)
    }

    /// Build a descriptor from typed entry points, checked by the compiler
    pub fn from_fns(
        success: A::Entry,
        error: ErrorEntry<E>,
        teardown: TeardownEntry,
        context: usize,
    ) -> Self {
        Self::from_raw_parts(
            A::entry_addr(success),
            error as usize,
            teardown as usize,
            context,
        )
    }

    /// The opaque context handle, exactly as supplied
    pub fn context(&self) -> usize {
        self.context
    }

    pub fn raw_parts(&self) -> RawEntryPoints {
        RawEntryPoints::new(self.success, self.error, self.teardown, self.context)
    }

    /// Invoke the success entry point with `args` followed by the context
    ///
    /// # Safety
    ///
    /// The success address must be a function of shape `A::Entry`, and
    /// `teardown` must not have been called on this descriptor.
    pub unsafe fn success(&self, args: A) {
        log::trace!(
            "callback success: entry=0x{:x} arity={} ctx=0x{:x}",
            self.success,
            A::ARITY,
            self.context
        );
        args.call(self.success, self.context);
    }

    /// Invoke the error entry point with `(error, context)`
    ///
    /// # Safety
    ///
    /// The error address must be a function of shape [`ErrorEntry<E>`], and
    /// `teardown` must not have been called on this descriptor.
    pub unsafe fn error(&self, error: E) {
        log::trace!(
            "callback error: entry=0x{:x} ctx=0x{:x}",
            self.error,
            self.context
        );
        let f = mem::transmute::<usize, ErrorEntry<E>>(self.error);
        f(error, self.context);
    }

    /// Invoke the teardown entry point with the context alone
    ///
    /// This releases the foreign side's resources tied to the context. It does
    /// not free the descriptor itself.
    ///
    /// # Safety
    ///
    /// The teardown address must be a function of shape [`TeardownEntry`], and
    /// this must be the first and only teardown call for this descriptor.
    /// Calling it twice is undefined behavior (typically a double free on the
    /// foreign side).
    pub unsafe fn teardown(&self) {
        log::trace!(
            "callback teardown: entry=0x{:x} ctx=0x{:x}",
            self.teardown,
            self.context
        );
        let f = mem::transmute::<usize, TeardownEntry>(self.teardown);
        f(self.context);
    }
}

impl<E, A> fmt::Debug for CallBack<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallBack")
            .field("success", &format_args!("0x{:x}", self.success))
            .field("error", &format_args!("0x{:x}", self.error))
            .field("teardown", &format_args!("0x{:x}", self.teardown))
            .field("context", &format_args!("0x{:x}", self.context))
            .finish()
    }
}
