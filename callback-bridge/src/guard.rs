//! Guarded descriptor: the raw descriptor plus a completion state machine
//!
//! The raw [`CallBack`] trusts its caller completely. `GuardedCallBack` wraps it
//! in a single atomic state so that, even with several threads racing:
//!
//! - at most one of success/error is delivered,
//! - teardown is delivered at most once,
//! - teardown happens after any success/error delivery that already started,
//! - nothing is delivered after teardown.
//!
//! ```text
//! Pending ──succeed/fail──▶ Delivering ──▶ Completed ──teardown──▶ TornDown
//!    │                          │                                    ▲
//!    │                          └─teardown from the entry point─▶ TeardownPending
//!    └──────────────────────────teardown─────────────────────────────┘
//! ```
//!
//! An entry point may tear down the descriptor it was invoked through. That
//! teardown is deferred: it is reported as delivered, and the teardown entry
//! point runs once the success/error entry point has returned.
//!
//! Rejected calls return a [`BridgeError`] and drop their payload on the native
//! side. This is a stricter posture than the raw descriptor, where the same
//! calls are undefined behavior.

use std::hint;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::descriptor::{CallBack, SuccessArgs};
use crate::payload::FfiSafe;
use crate::types::{BridgeError, Outcome, Result};

const PENDING: u8 = 0;
const DELIVERING: u8 = 1;
const COMPLETED: u8 = 2;
const TORN_DOWN: u8 = 3;
const TEARDOWN_PENDING: u8 = 4;

/// Observable lifecycle state of a guarded descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackState {
    /// Nothing delivered yet
    Pending,
    /// A success or error call is running right now
    Delivering,
    /// Success or error was delivered; teardown still owed
    Completed,
    /// Teardown was delivered; the descriptor is inert
    TornDown,
    /// Torn down from inside the running entry point; delivered when it returns
    TeardownPending,
}

impl CallbackState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => CallbackState::Pending,
            DELIVERING => CallbackState::Delivering,
            COMPLETED => CallbackState::Completed,
            TEARDOWN_PENDING => CallbackState::TeardownPending,
            _ => CallbackState::TornDown,
        }
    }
}

pub struct GuardedCallBack<E: FfiSafe, A: SuccessArgs> {
    inner: CallBack<E, A>,
    state: AtomicU8,
    // Thread running the success/error entry point while Delivering.
    deliverer: Mutex<Option<ThreadId>>,
    teardown_on_drop: bool,
    trace: bool,
}

// Every entry-point call is serialized by `state`, so sharing is sound even
// though the raw descriptor is !Sync.
unsafe impl<E: FfiSafe, A: SuccessArgs> Sync for GuardedCallBack<E, A> {}

impl<E: FfiSafe, A: SuccessArgs> GuardedCallBack<E, A> {
    /// Guard a raw descriptor with the default configuration
    ///
    /// # Safety
    ///
    /// The descriptor's entry points must be live functions of the agreed shapes
    /// and its teardown must not have been called yet. From then on the guard
    /// upholds the remaining invariants, which is why its methods are safe.
    pub unsafe fn new(inner: CallBack<E, A>) -> Self {
        Self::with_config(inner, &BridgeConfig::default())
    }

    /// Guard a raw descriptor
    ///
    /// # Safety
    ///
    /// Same contract as [`GuardedCallBack::new`].
    pub unsafe fn with_config(inner: CallBack<E, A>, config: &BridgeConfig) -> Self {
        Self {
            inner,
            state: AtomicU8::new(PENDING),
            deliverer: Mutex::new(None),
            teardown_on_drop: config.teardown_on_drop,
            trace: config.trace_invocations,
        }
    }

    pub fn state(&self) -> CallbackState {
        CallbackState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn context(&self) -> usize {
        self.inner.context()
    }

    /// Deliver success, unless an outcome was already delivered
    pub fn succeed(&self, args: A) -> Result<()> {
        self.begin_delivery(Outcome::Success)?;
        // SAFETY: entry points vouched for in `new`; state was Pending.
        unsafe { self.inner.success(args) };
        self.finish_delivery(Outcome::Success);
        Ok(())
    }

    /// Deliver an error, unless an outcome was already delivered
    pub fn fail(&self, error: E) -> Result<()> {
        self.begin_delivery(Outcome::Error)?;
        // SAFETY: entry points vouched for in `new`; state was Pending.
        unsafe { self.inner.error(error) };
        self.finish_delivery(Outcome::Error);
        Ok(())
    }

    /// Deliver `Ok` as success and `Err` as error
    pub fn complete(&self, result: std::result::Result<A, E>) -> Result<()> {
        match result {
            Ok(args) => self.succeed(args),
            Err(error) => self.fail(error),
        }
    }

    /// Deliver teardown once
    ///
    /// If a success or error delivery is in flight on another thread, this waits
    /// for it to return first. Called from inside that entry point, it returns
    /// `Ok` at once and the teardown entry point runs after the entry point
    /// returns.
    pub fn teardown(&self) -> Result<()> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match current {
                TORN_DOWN | TEARDOWN_PENDING => {
                    log::warn!(
                        "rejected second teardown for ctx=0x{:x}",
                        self.inner.context()
                    );
                    return Err(BridgeError::AlreadyTornDown(Outcome::Teardown));
                }
                DELIVERING if self.is_delivering_thread() => {
                    match self.state.compare_exchange(
                        DELIVERING,
                        TEARDOWN_PENDING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            log::debug!(
                                "deferring teardown for ctx=0x{:x} until the entry point returns",
                                self.inner.context()
                            );
                            return Ok(());
                        }
                        Err(actual) => current = actual,
                    }
                }
                DELIVERING => {
                    hint::spin_loop();
                    thread::yield_now();
                    current = self.state.load(Ordering::Acquire);
                }
                _ => match self.state.compare_exchange_weak(
                    current,
                    TORN_DOWN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                },
            }
        }

        self.deliver_teardown();
        Ok(())
    }

    fn deliver_teardown(&self) {
        // SAFETY: entry points vouched for in `new`; the caller won the only
        // transition into TornDown.
        unsafe { self.inner.teardown() };
        if self.trace {
            log::debug!("delivered teardown for ctx=0x{:x}", self.inner.context());
        }
    }

    fn is_delivering_thread(&self) -> bool {
        *self.deliverer.lock() == Some(thread::current().id())
    }

    fn begin_delivery(&self, outcome: Outcome) -> Result<()> {
        match self
            .state
            .compare_exchange(PENDING, DELIVERING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                *self.deliverer.lock() = Some(thread::current().id());
                Ok(())
            }
            Err(TORN_DOWN) | Err(TEARDOWN_PENDING) => {
                log::warn!(
                    "rejected {} after teardown for ctx=0x{:x}",
                    outcome,
                    self.inner.context()
                );
                Err(BridgeError::AlreadyTornDown(outcome))
            }
            Err(_) => {
                log::warn!(
                    "rejected {}: outcome already delivered for ctx=0x{:x}",
                    outcome,
                    self.inner.context()
                );
                Err(BridgeError::AlreadyCompleted(outcome))
            }
        }
    }

    fn finish_delivery(&self, outcome: Outcome) {
        *self.deliverer.lock() = None;
        if self.trace {
            log::debug!(
                "delivered {} for ctx=0x{:x}",
                outcome,
                self.inner.context()
            );
        }

        // Only the delivering thread can have moved Delivering to TeardownPending.
        if self
            .state
            .compare_exchange(DELIVERING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.state.store(TORN_DOWN, Ordering::Release);
            self.deliver_teardown();
        }
    }
}

impl<E: FfiSafe, A: SuccessArgs> Drop for GuardedCallBack<E, A> {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state == TORN_DOWN || !self.teardown_on_drop {
            return;
        }
        log::warn!(
            "guarded callback dropped without teardown, tearing down ctx=0x{:x}",
            self.inner.context()
        );
        *self.state.get_mut() = TORN_DOWN;
        // SAFETY: exclusive access; teardown was never delivered.
        unsafe { self.inner.teardown() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SimpleCallBack;
    use crate::payload::BridgeString;
    use crate::testing::{context_for, record_drop, record_err, record_ok, Event, Recorder};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    type SimpleGuard = GuardedCallBack<BridgeString, (BridgeString, BridgeString)>;

    fn guarded(rec: &Arc<Recorder>) -> SimpleGuard {
        let cb = SimpleCallBack::from_fns(record_ok, record_err, record_drop, context_for(rec));
        unsafe { GuardedCallBack::new(cb) }
    }

    fn pair(a: &str, b: &str) -> (BridgeString, BridgeString) {
        (BridgeString::from(a), BridgeString::from(b))
    }

    #[test]
    fn test_success_then_teardown() {
        let rec = Arc::new(Recorder::default());
        let cb = guarded(&rec);
        let ctx = cb.context();

        assert_eq!(cb.state(), CallbackState::Pending);
        cb.succeed(pair("a", "b")).unwrap();
        assert_eq!(cb.state(), CallbackState::Completed);
        cb.teardown().unwrap();
        assert_eq!(cb.state(), CallbackState::TornDown);

        assert_eq!(
            rec.events(),
            vec![
                Event::Success("a".into(), "b".into(), ctx),
                Event::Teardown(ctx)
            ]
        );
    }

    #[test]
    fn test_second_outcome_rejected() {
        let rec = Arc::new(Recorder::default());
        let cb = guarded(&rec);

        cb.fail(BridgeString::from("first")).unwrap();
        assert_eq!(
            cb.succeed(pair("late", "late")),
            Err(BridgeError::AlreadyCompleted(Outcome::Success))
        );
        assert_eq!(
            cb.fail(BridgeString::from("again")),
            Err(BridgeError::AlreadyCompleted(Outcome::Error))
        );
        cb.teardown().unwrap();

        let events = rec.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Error(msg, _) if msg == "first"));
    }

    #[test]
    fn test_nothing_delivered_after_teardown() {
        let rec = Arc::new(Recorder::default());
        let cb = guarded(&rec);

        cb.teardown().unwrap();
        assert_eq!(
            cb.teardown(),
            Err(BridgeError::AlreadyTornDown(Outcome::Teardown))
        );
        assert_eq!(
            cb.succeed(pair("a", "b")),
            Err(BridgeError::AlreadyTornDown(Outcome::Success))
        );
        assert_eq!(
            cb.complete(Err(BridgeString::from("x"))),
            Err(BridgeError::AlreadyTornDown(Outcome::Error))
        );

        assert_eq!(rec.events().len(), 1);
        assert_eq!(Arc::strong_count(&rec), 1);
    }

    #[test]
    fn test_abandoned_descriptor_torn_down_on_drop() {
        let rec = Arc::new(Recorder::default());
        let ctx;
        {
            let cb = guarded(&rec);
            ctx = cb.context();
            cb.succeed(pair("only", "success")).unwrap();
        }
        assert_eq!(rec.events().last(), Some(&Event::Teardown(ctx)));
        assert_eq!(Arc::strong_count(&rec), 1);
    }

    #[test]
    fn test_drop_without_teardown_when_disabled() {
        let rec = Arc::new(Recorder::default());
        let ctx = context_for(&rec);
        {
            let cb = SimpleCallBack::from_fns(record_ok, record_err, record_drop, ctx);
            let config = BridgeConfig::new().with_teardown_on_drop(false);
            let _guard = unsafe { GuardedCallBack::with_config(cb, &config) };
        }
        assert!(rec.events().is_empty());
        assert_eq!(Arc::strong_count(&rec), 2);

        // Release the reference ourselves.
        unsafe { record_drop(ctx) };
        assert_eq!(Arc::strong_count(&rec), 1);
    }

    static DELIVERED: AtomicUsize = AtomicUsize::new(0);
    static TORN: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_ok(_a: u64, _ctx: usize) {
        DELIVERED.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn count_err(_e: u64, _ctx: usize) {
        DELIVERED.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn count_drop(_ctx: usize) {
        TORN.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_racing_threads_deliver_once() {
        const ROUNDS: usize = 50;
        const THREADS: u64 = 8;

        for round in 0..ROUNDS {
            let delivered_before = DELIVERED.load(Ordering::SeqCst);
            let torn_before = TORN.load(Ordering::SeqCst);

            let cb = CallBack::<u64, (u64,)>::from_fns(count_ok, count_err, count_drop, 0);
            let cb = Arc::new(unsafe { GuardedCallBack::new(cb) });

            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let cb = Arc::clone(&cb);
                    thread::spawn(move || {
                        let _ = if i % 2 == 0 {
                            cb.succeed((i,))
                        } else {
                            cb.fail(i)
                        };
                        let _ = cb.teardown();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(cb.state(), CallbackState::TornDown);

            let delivered = DELIVERED.load(Ordering::SeqCst) - delivered_before;
            let torn = TORN.load(Ordering::SeqCst) - torn_before;
            assert!(delivered <= 1, "round {} delivered {} outcomes", round, delivered);
            assert_eq!(torn, 1, "round {} torn down {} times", round, torn);
        }
    }

    /// Context for entry points that tear down their own descriptor
    struct SelfRelease {
        cb: AtomicUsize,
        log: Mutex<Vec<String>>,
    }

    type U64Guard = GuardedCallBack<u64, (u64,)>;

    unsafe extern "C" fn release_self_ok(value: u64, ctx: usize) {
        let me = &*(ctx as *const SelfRelease);
        let cb = &*(me.cb.load(Ordering::SeqCst) as *const U64Guard);
        me.log.lock().push(format!("ok {}", value));

        let first = cb.teardown();
        let second = cb.teardown();
        let late = cb.fail(7);
        me.log
            .lock()
            .push(format!("{:?} {:?} {:?} {:?}", first, second, late, cb.state()));
    }

    unsafe extern "C" fn release_self_err(value: u64, ctx: usize) {
        let me = &*(ctx as *const SelfRelease);
        me.log.lock().push(format!("err {}", value));
    }

    unsafe extern "C" fn release_self_drop(ctx: usize) {
        let me = &*(ctx as *const SelfRelease);
        me.log.lock().push("drop".to_string());
    }

    #[test]
    fn test_teardown_from_inside_entry_point_is_deferred() {
        let context = Box::new(SelfRelease {
            cb: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        });
        let ctx = &*context as *const SelfRelease as usize;
        let cb = CallBack::<u64, (u64,)>::from_fns(
            release_self_ok,
            release_self_err,
            release_self_drop,
            ctx,
        );
        let guarded = Arc::new(unsafe { GuardedCallBack::new(cb) });
        context
            .cb
            .store(Arc::as_ptr(&guarded) as usize, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&guarded);
        thread::spawn(move || {
            let _ = tx.send(worker.succeed((5,)));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("success entry point never returned");

        assert_eq!(result, Ok(()));
        assert_eq!(guarded.state(), CallbackState::TornDown);
        assert_eq!(
            *context.log.lock(),
            vec![
                "ok 5",
                "Ok(()) Err(AlreadyTornDown(Teardown)) Err(AlreadyTornDown(Error)) TeardownPending",
                "drop",
            ]
        );
        assert_eq!(
            guarded.teardown(),
            Err(BridgeError::AlreadyTornDown(Outcome::Teardown))
        );
    }

    #[test]
    fn test_teardown_from_other_thread_after_completion() {
        let rec = Arc::new(Recorder::default());
        let cb = guarded(&rec);
        let ctx = cb.context();

        cb.succeed(pair("a", "b")).unwrap();
        thread::scope(|s| {
            s.spawn(|| cb.teardown().unwrap());
        });

        assert_eq!(rec.events().last(), Some(&Event::Teardown(ctx)));
        assert_eq!(cb.state(), CallbackState::TornDown);
    }
}
