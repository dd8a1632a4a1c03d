//! Payload values that cross the boundary
//!
//! Entry points receive their payload by value through the C calling convention,
//! so only types with a stable C layout may appear in an entry-point signature.
//! Strings travel as length-prefixed byte buffers: no NUL terminator is written
//! or expected, and embedded NUL bytes are carried unchanged.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::slice;

/// Marker for types that may be passed by value to an `extern "C"` entry point.
///
/// # Safety
///
/// Implementors must have a layout the foreign side can receive through the C
/// calling convention (`#[repr(C)]` structs or primitive scalars).
pub unsafe trait FfiSafe: Sized {}

macro_rules! impl_ffi_safe {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl FfiSafe for $ty {})*
    };
}

impl_ffi_safe!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool);

unsafe impl<T> FfiSafe for *const T {}
unsafe impl<T> FfiSafe for *mut T {}

/// Borrowed byte view handed *into* the native side
///
/// The view is only valid for the duration of the call that received it. The
/// native side copies the bytes before they leave its hands again.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BridgeStr {
    pub ptr: *const u8,
    pub len: usize,
}

unsafe impl FfiSafe for BridgeStr {}

impl BridgeStr {
    /// View a byte slice. The caller keeps `bytes` alive while the view is in use.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// View a string slice
    pub fn from_text(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Borrow the viewed bytes
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the returned lifetime, or
    /// `len` must be zero.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.len == 0 || self.ptr.is_null() {
            return &[];
        }
        slice::from_raw_parts(self.ptr, self.len)
    }

    /// Copy the viewed bytes into an owned buffer
    ///
    /// # Safety
    ///
    /// Same contract as [`BridgeStr::as_bytes`].
    pub unsafe fn to_owned_string(&self) -> BridgeString {
        BridgeString::from_bytes(self.as_bytes())
    }
}

impl fmt::Debug for BridgeStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeStr")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Owned byte buffer allocated by the native side
///
/// Whoever holds a `BridgeString` owns it. Passing one to an entry point moves
/// ownership to the receiver: a Rust receiver releases it by dropping it, a
/// foreign receiver copies what it needs and hands the buffer back through
/// `callback_bridge_string_free`, so the allocator that produced the block is
/// the one that frees it.
#[repr(C)]
pub struct BridgeString {
    ptr: *mut u8,
    len: usize,
}

unsafe impl FfiSafe for BridgeString {}

// Uniquely owns its buffer.
unsafe impl Send for BridgeString {}
unsafe impl Sync for BridgeString {}

impl BridgeString {
    /// Copy `bytes` into a fresh native allocation
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }

    /// Number of payload bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        // SAFETY: ptr/len come from a leaked Box<[u8]> owned by self.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Decode as UTF-8, replacing invalid sequences
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    /// Take the buffer back as a `Vec<u8>` without copying
    pub fn into_vec(self) -> Vec<u8> {
        let this = ManuallyDrop::new(self);
        if this.ptr.is_null() {
            return Vec::new();
        }
        // SAFETY: ptr/len come from Box::<[u8]>::into_raw in `From<Vec<u8>>`.
        let boxed = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(this.ptr, this.len)) };
        boxed.into_vec()
    }

    /// Release ownership of the buffer as its raw parts
    pub fn into_raw_parts(self) -> (*mut u8, usize) {
        let this = ManuallyDrop::new(self);
        (this.ptr, this.len)
    }

    /// Rebuild a buffer from [`BridgeString::into_raw_parts`]
    ///
    /// # Safety
    ///
    /// `ptr`/`len` must come from `into_raw_parts` (or from a `BridgeString`
    /// received through an entry point) and must not be reused afterwards.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }
}

impl From<Vec<u8>> for BridgeString {
    fn from(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        let ptr = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        Self { ptr, len }
    }
}

impl From<String> for BridgeString {
    fn from(s: String) -> Self {
        Self::from(s.into_bytes())
    }
}

impl From<&str> for BridgeString {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl Clone for BridgeString {
    fn clone(&self) -> Self {
        Self::from_bytes(self.as_bytes())
    }
}

impl PartialEq for BridgeString {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for BridgeString {}

impl PartialEq<str> for BridgeString {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for BridgeString {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for BridgeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BridgeString({:?})", self.to_string_lossy())
    }
}

impl Drop for BridgeString {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        // SAFETY: ptr/len come from Box::<[u8]>::into_raw and are dropped once.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, self.len)));
        }
        self.ptr = ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_string_keeps_embedded_nul() {
        let s = BridgeString::from_bytes(b"a\0b");
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_bytes(), b"a\0b");
    }

    #[test]
    fn test_bridge_string_empty() {
        let s = BridgeString::from("");
        assert!(s.is_empty());
        assert_eq!(s.as_bytes(), b"");
        assert_eq!(s.into_vec(), Vec::<u8>::new());
    }

    #[test]
    fn test_bridge_string_raw_parts() {
        let s = BridgeString::from("payload");
        let (ptr, len) = s.into_raw_parts();
        let back = unsafe { BridgeString::from_raw_parts(ptr, len) };
        assert_eq!(back, "payload");
    }

    #[test]
    fn test_bridge_str_copy_is_independent() {
        let source = String::from("borrowed");
        let view = BridgeStr::from_text(&source);
        let owned = unsafe { view.to_owned_string() };
        drop(source);
        assert_eq!(owned.to_string_lossy(), "borrowed");
    }

    #[test]
    fn test_null_view_reads_empty() {
        let view = BridgeStr {
            ptr: std::ptr::null(),
            len: 0,
        };
        assert!(unsafe { view.as_bytes() }.is_empty());
    }
}
