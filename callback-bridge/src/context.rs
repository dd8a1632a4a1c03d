//! Context handles owned by the side that created them
//!
//! The descriptor never looks inside its context handle. Whoever creates the
//! handle decides what it means. Two schemes are provided:
//!
//! - [`ContextRegistry`]: an arena of values addressed by `(index, generation)`
//!   packed into a `usize`. Teardown maps to [`ContextRegistry::remove`], and a
//!   handle used after removal is detected by its stale generation instead of
//!   touching freed memory.
//! - Raw boxed contexts ([`into_raw_context`] / [`from_raw_context`]): the
//!   handle is the address of a leaked `Box<T>`. Cheaper, but a use after
//!   teardown is undefined behavior.

use std::fmt;

use parking_lot::Mutex;

use crate::config::BridgeConfig;
use crate::types::{BridgeError, Result};

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: usize = usize::MAX >> INDEX_BITS;

/// A registry handle: slot index in the low half, generation in the high half
///
/// Generations start at 1, so no live handle is ever 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(usize);

impl ContextHandle {
    fn new(index: usize, generation: usize) -> Self {
        Self((generation << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Reinterpret a context value received from an entry point
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The value to hand to a descriptor as its context
    pub fn into_raw(self) -> usize {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 & INDEX_MASK
    }

    pub fn generation(&self) -> usize {
        self.0 >> INDEX_BITS
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextHandle({}v{})", self.index(), self.generation())
    }
}

struct Slot<T> {
    generation: usize,
    value: Option<T>,
}

struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

impl<T> Slab<T> {
    fn lookup(&self, handle: ContextHandle) -> Result<usize> {
        let index = handle.index();
        let slot = self
            .slots
            .get(index)
            .ok_or(BridgeError::UnknownContext(handle.into_raw()))?;
        if slot.generation != handle.generation() || slot.value.is_none() {
            return Err(BridgeError::StaleContext(handle.into_raw()));
        }
        Ok(index)
    }
}

/// Arena of foreign-side contexts
///
/// All operations take `&self`; the registry can be shared between the thread
/// that creates contexts and the threads whose entry points receive them.
pub struct ContextRegistry<T> {
    inner: Mutex<Slab<T>>,
    capacity: Option<usize>,
}

impl<T> ContextRegistry<T> {
    /// Create an unbounded registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slab {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
            capacity: None,
        }
    }

    /// Create a registry holding at most `capacity` live contexts
    pub fn with_capacity(capacity: usize) -> Self {
        let mut registry = Self::new();
        registry.capacity = Some(capacity);
        registry
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(match config.registry_capacity {
            Some(capacity) => Self::with_capacity(capacity),
            None => Self::new(),
        })
    }

    /// Register a context and return its handle
    pub fn insert(&self, value: T) -> Result<ContextHandle> {
        let mut slab = self.inner.lock();

        if let Some(capacity) = self.capacity {
            if slab.live >= capacity {
                return Err(BridgeError::RegistryFull(capacity));
            }
        }

        let index = match slab.free.pop() {
            Some(index) => index,
            None => {
                let index = slab.slots.len();
                if index > INDEX_MASK {
                    return Err(BridgeError::RegistryFull(INDEX_MASK + 1));
                }
                slab.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                index
            }
        };

        let slot = &mut slab.slots[index];
        slot.value = Some(value);
        let handle = ContextHandle::new(index, slot.generation);
        slab.live += 1;

        log::debug!("registered context {:?}", handle);
        Ok(handle)
    }

    /// Run `f` against a live context
    ///
    /// The registry stays locked while `f` runs, so `f` must not call back into
    /// this registry (a `remove` from inside `f` deadlocks). An entry point that
    /// tears down its own descriptor should read what it needs here and make
    /// that call after `with` returns.
    pub fn with<R>(&self, handle: ContextHandle, f: impl FnOnce(&T) -> R) -> Result<R> {
        let slab = self.inner.lock();
        let index = slab.lookup(handle)?;
        match &slab.slots[index].value {
            Some(value) => Ok(f(value)),
            None => Err(BridgeError::StaleContext(handle.into_raw())),
        }
    }

    /// Run `f` against a live context, mutably
    ///
    /// Same locking rule as [`ContextRegistry::with`].
    pub fn with_mut<R>(&self, handle: ContextHandle, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut slab = self.inner.lock();
        let index = slab.lookup(handle)?;
        match &mut slab.slots[index].value {
            Some(value) => Ok(f(value)),
            None => Err(BridgeError::StaleContext(handle.into_raw())),
        }
    }

    /// Deregister a context and hand back its value
    ///
    /// This is what a teardown entry point calls. The slot's generation moves
    /// on, so every copy of `handle` becomes stale.
    pub fn remove(&self, handle: ContextHandle) -> Result<T> {
        let mut slab = self.inner.lock();
        let index = slab.lookup(handle)?;

        let slot = &mut slab.slots[index];
        let value = slot.value.take();
        slot.generation = next_generation(slot.generation);
        slab.free.push(index);
        slab.live -= 1;

        log::debug!("released context {:?}", handle);
        value.ok_or(BridgeError::StaleContext(handle.into_raw()))
    }

    pub fn contains(&self, handle: ContextHandle) -> bool {
        self.inner.lock().lookup(handle).is_ok()
    }

    /// Number of live contexts
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for ContextRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn next_generation(generation: usize) -> usize {
    match (generation + 1) & GENERATION_MASK {
        0 => 1,
        next => next,
    }
}

/// Leak `value` and use its address as a context handle
pub fn into_raw_context<T>(value: Box<T>) -> usize {
    Box::into_raw(value) as usize
}

/// Take back a context created by [`into_raw_context`]
///
/// # Safety
///
/// `handle` must come from `into_raw_context::<T>` and must not have been
/// reclaimed already. This is the teardown path; call it once.
pub unsafe fn from_raw_context<T>(handle: usize) -> Box<T> {
    Box::from_raw(handle as *mut T)
}

/// Borrow a context created by [`into_raw_context`]
///
/// # Safety
///
/// `handle` must come from `into_raw_context::<T>` and must not have been
/// reclaimed while the borrow is in use.
pub unsafe fn borrow_raw_context<'a, T>(handle: usize) -> &'a T {
    &*(handle as *const T)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_with_remove() {
        let registry = ContextRegistry::new();
        let handle = registry.insert(String::from("Flutter")).unwrap();

        assert_ne!(handle.into_raw(), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.with(handle, |s| s.len()).unwrap(), 7);

        registry.with_mut(handle, |s| s.push('!')).unwrap();
        assert_eq!(registry.remove(handle).unwrap(), "Flutter!");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_use_after_remove_is_detected() {
        let registry = ContextRegistry::new();
        let handle = registry.insert(1u32).unwrap();
        registry.remove(handle).unwrap();

        let raw = handle.into_raw();
        assert_eq!(registry.remove(handle), Err(BridgeError::StaleContext(raw)));
        assert_eq!(
            registry.with(handle, |v| *v),
            Err(BridgeError::StaleContext(raw))
        );
        assert!(!registry.contains(handle));
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let registry = ContextRegistry::new();
        let old = registry.insert("a").unwrap();
        registry.remove(old).unwrap();
        let new = registry.insert("b").unwrap();

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(registry.with(old, |_| ()).is_err());
        assert_eq!(registry.with(new, |v| *v).unwrap(), "b");
    }

    #[test]
    fn test_unknown_handle() {
        let registry: ContextRegistry<u8> = ContextRegistry::new();
        let forged = ContextHandle::from_raw(42);
        assert_eq!(
            registry.with(forged, |v| *v),
            Err(BridgeError::UnknownContext(42))
        );
    }

    #[test]
    fn test_capacity_limit() {
        let config = BridgeConfig::new().with_registry_capacity(2);
        let registry = ContextRegistry::from_config(&config).unwrap();
        let first = registry.insert(1).unwrap();
        registry.insert(2).unwrap();
        assert_eq!(registry.insert(3), Err(BridgeError::RegistryFull(2)));

        registry.remove(first).unwrap();
        assert!(registry.insert(3).is_ok());
    }

    #[test]
    fn test_generation_wraps_past_zero() {
        assert_eq!(next_generation(GENERATION_MASK), 1);
        assert_eq!(next_generation(1), 2);
    }

    #[test]
    fn test_raw_context_roundtrip() {
        let handle = into_raw_context(Box::new(vec![1u8, 2, 3]));
        let borrowed: &Vec<u8> = unsafe { borrow_raw_context(handle) };
        assert_eq!(borrowed.len(), 3);
        let back: Box<Vec<u8>> = unsafe { from_raw_context(handle) };
        assert_eq!(*back, vec![1, 2, 3]);
    }
}
