//! Recording entry points shared by the unit tests
//!
//! The context handed to these handlers is `Arc::into_raw(Arc<Recorder>)`. The
//! teardown handler takes that reference back, so after teardown the test's own
//! `Arc` is the last one standing.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::payload::BridgeString;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Success(String, String, usize),
    Error(String, usize),
    Teardown(usize),
}

#[derive(Debug, Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Hand one reference to `rec` over as a context handle
pub(crate) fn context_for(rec: &Arc<Recorder>) -> usize {
    Arc::into_raw(Arc::clone(rec)) as usize
}

pub(crate) unsafe extern "C" fn record_ok(a: BridgeString, b: BridgeString, ctx: usize) {
    let rec = &*(ctx as *const Recorder);
    rec.push(Event::Success(a.to_string_lossy(), b.to_string_lossy(), ctx));
}

pub(crate) unsafe extern "C" fn record_err(e: BridgeString, ctx: usize) {
    let rec = &*(ctx as *const Recorder);
    rec.push(Event::Error(e.to_string_lossy(), ctx));
}

pub(crate) unsafe extern "C" fn record_drop(ctx: usize) {
    let rec = Arc::from_raw(ctx as *const Recorder);
    rec.push(Event::Teardown(ctx));
}
