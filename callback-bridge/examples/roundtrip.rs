// Example: play both sides of the boundary in one process
//
// The "foreign" side owns a boxed context and exposes three C entry points. The
// native side only ever sees four integers.
//
// Usage:
//   RUST_LOG=trace cargo run --example roundtrip

use callback_bridge::context::{borrow_raw_context, from_raw_context, into_raw_context};
use callback_bridge::ffi::*;
use callback_bridge::{BridgeStr, BridgeString};

struct Flutter {
    data: String,
}

unsafe extern "C" fn fn_ok(a: BridgeString, b: BridgeString, ctx: usize) {
    let f: &Flutter = borrow_raw_context(ctx);
    println!("OK {}{}{}", a.to_string_lossy(), b.to_string_lossy(), f.data);
}

unsafe extern "C" fn fn_err(a: BridgeString, ctx: usize) {
    let f: &Flutter = borrow_raw_context(ctx);
    println!("ERR {}{}", a.to_string_lossy(), f.data);
}

unsafe extern "C" fn fn_drop(ctx: usize) {
    let f: Box<Flutter> = from_raw_context(ctx);
    println!("released {}", f.data);
}

fn main() {
    env_logger::init();

    for round in 0..3 {
        let ctx = into_raw_context(Box::new(Flutter {
            data: format!("Flutter#{round}"),
        }));

        unsafe {
            let cb = callback_bridge_simple_create(
                fn_ok as usize,
                fn_err as usize,
                fn_drop as usize,
                ctx,
            );
            if round % 2 == 0 {
                callback_bridge_simple_call_ok(cb, BridgeStr::from_text("test"), BridgeStr::from_text("test"));
            } else {
                callback_bridge_simple_call_err(cb, BridgeStr::from_text("failed"));
            }
            callback_bridge_simple_call_drop(cb);
            callback_bridge_simple_destroy(cb);
        }
    }
}
