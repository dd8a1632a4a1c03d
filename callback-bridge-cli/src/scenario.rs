//! Scenario driver
//!
//! Each scenario walks descriptors through one path of the callback lifecycle.
//! The single-owner scenarios go through the exported C functions exactly as a
//! foreign caller would; the stress scenario races guarded descriptors across a
//! rayon pool and checks that each one delivered at most one outcome and
//! exactly one teardown.

use anyhow::{anyhow, Context, Result};
use callback_bridge::ffi::{
    callback_bridge_simple_call_drop, callback_bridge_simple_call_err,
    callback_bridge_simple_call_ok, callback_bridge_simple_create,
    callback_bridge_simple_destroy,
};
use callback_bridge::{
    BridgeConfig, BridgeError, BridgeStr, BridgeString, GuardedSimpleCallBack, Outcome,
    SimpleCallBack,
};
use rayon::prelude::*;

use crate::config::{AppConfig, DemoConfig, Scenario};
use crate::handlers::{self, HandlerSet};
use crate::report::{DemoReport, OutcomeCounts};

/// Run the configured scenario against `handlers`
pub fn run(config: &AppConfig, handlers: &HandlerSet) -> Result<DemoReport> {
    let demo = &config.demo;
    let mut report = DemoReport::new(demo.scenario, handlers.describe(), demo.iterations);

    log::info!(
        "Running {} scenario: {} iteration(s) with {} handlers",
        demo.scenario,
        demo.iterations,
        report.handlers
    );

    let contexts = match demo.scenario {
        Scenario::Stress => run_stress(demo, &config.bridge, handlers, &mut report)?,
        _ => {
            let mut contexts = Vec::with_capacity(demo.iterations);
            for seq in 0..demo.iterations {
                let ctx = handlers.new_context(seq)?;
                contexts.push(ctx);
                run_single(demo, handlers, ctx, &mut report)?;
            }
            contexts
        }
    };

    if handlers.is_builtin() {
        verify_builtin(demo.scenario, &contexts, &mut report);
    }

    report.finish();
    Ok(report)
}

/// One raw descriptor through the exported C ABI
fn run_single(
    demo: &DemoConfig,
    handlers: &HandlerSet,
    ctx: usize,
    report: &mut DemoReport,
) -> Result<()> {
    let cb = callback_bridge_simple_create(handlers.success, handlers.error, handlers.teardown, ctx);
    log::debug!("descriptor {:p} for ctx=0x{:x}", cb, ctx);

    match demo.scenario {
        Scenario::Success => {
            // SAFETY: `cb` is live and the entry points were resolved for these shapes.
            unsafe {
                callback_bridge_simple_call_ok(
                    cb,
                    BridgeStr::from_text(&demo.payload_a),
                    BridgeStr::from_text(&demo.payload_b),
                );
            }
            report.delivered.add(Outcome::Success);
        }
        Scenario::Error => {
            // SAFETY: as above.
            unsafe {
                callback_bridge_simple_call_err(cb, BridgeStr::from_text(&demo.error_message));
            }
            report.delivered.add(Outcome::Error);
        }
        Scenario::Abandon => {}
        Scenario::Transfer => {
            let addr = cb as usize;
            let a = demo.payload_a.clone();
            let b = demo.payload_b.clone();
            std::thread::spawn(move || {
                let cb = addr as *mut SimpleCallBack;
                // SAFETY: ownership of the descriptor moved to this thread; the
                // creating thread never touches it again.
                unsafe {
                    callback_bridge_simple_call_ok(cb, BridgeStr::from_text(&a), BridgeStr::from_text(&b));
                    callback_bridge_simple_call_drop(cb);
                    callback_bridge_simple_destroy(cb);
                }
            })
            .join()
            .map_err(|_| anyhow!("transfer worker panicked"))?;

            report.delivered.add(Outcome::Success);
            report.delivered.add(Outcome::Teardown);
            return Ok(());
        }
        Scenario::Stress => anyhow::bail!("stress descriptors are driven by run_stress"),
    }

    // SAFETY: `cb` is live; teardown is delivered once and the storage freed once.
    unsafe {
        callback_bridge_simple_call_drop(cb);
        callback_bridge_simple_destroy(cb);
    }
    report.delivered.add(Outcome::Teardown);
    Ok(())
}

/// Race guarded descriptors across a worker pool
fn run_stress(
    demo: &DemoConfig,
    bridge: &BridgeConfig,
    handlers: &HandlerSet,
    report: &mut DemoReport,
) -> Result<Vec<usize>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(demo.threads)
        .build()
        .context("Failed to build worker pool")?;
    let racers = demo.threads * 2;
    let mut contexts = Vec::with_capacity(demo.iterations);

    for seq in 0..demo.iterations {
        let ctx = handlers.new_context(seq)?;
        contexts.push(ctx);

        let inner = SimpleCallBack::from_raw_parts(handlers.success, handlers.error, handlers.teardown, ctx);
        // SAFETY: the entry points were resolved for these shapes and outlive the run.
        let guarded = unsafe { GuardedSimpleCallBack::with_config(inner, bridge) };

        let attempts: Vec<(Outcome, Result<(), BridgeError>)> = pool.install(|| {
            (0..racers)
                .into_par_iter()
                .flat_map_iter(|worker| {
                    let outcome = if worker % 2 == 0 {
                        let a = BridgeString::from(demo.payload_a.as_str());
                        let b = BridgeString::from(format!("{}#{}", demo.payload_b, worker));
                        (Outcome::Success, guarded.succeed((a, b)))
                    } else {
                        let e = BridgeString::from(demo.error_message.as_str());
                        (Outcome::Error, guarded.fail(e))
                    };
                    [outcome, (Outcome::Teardown, guarded.teardown())]
                })
                .collect()
        });
        drop(guarded);

        let mut delivered = OutcomeCounts::default();
        for (outcome, result) in attempts {
            match result {
                Ok(()) => delivered.add(outcome),
                Err(BridgeError::AlreadyCompleted(_)) | Err(BridgeError::AlreadyTornDown(_)) => {
                    report.rejected.add(outcome)
                }
                Err(e) => report.violation(format!("descriptor {}: unexpected error: {}", seq, e)),
            }
        }

        if delivered.success + delivered.error > 1 {
            report.violation(format!(
                "descriptor {} delivered {} outcomes",
                seq,
                delivered.success + delivered.error
            ));
        }
        if delivered.teardown != 1 {
            report.violation(format!(
                "descriptor {} torn down {} times",
                seq, delivered.teardown
            ));
        }

        report.delivered.success += delivered.success;
        report.delivered.error += delivered.error;
        report.delivered.teardown += delivered.teardown;
    }

    Ok(contexts)
}

/// Cross-check what the built-in entry points saw against what was sent
fn verify_builtin(
    scenario: Scenario,
    contexts: &[usize],
    report: &mut DemoReport,
) {
    let released = handlers::take_released(contexts);
    report.contexts_released = Some(released.len());

    for &ctx in contexts {
        let count = released.iter().filter(|r| r.handle == ctx).count();
        if count != 1 {
            report.violation(format!("context 0x{:x} released {} times", ctx, count));
        }
        if handlers::is_live(ctx) {
            report.violation(format!("context 0x{:x} still registered", ctx));
        }
    }

    for r in &released {
        let d = &r.deliveries;
        let expected = match scenario {
            Scenario::Success | Scenario::Transfer => d.success == 1 && d.error == 0,
            Scenario::Error => d.success == 0 && d.error == 1,
            Scenario::Abandon => d.success == 0 && d.error == 0,
            Scenario::Stress => d.success + d.error <= 1,
        };
        if !expected {
            report.violation(format!(
                "context {} (0x{:x}) saw success={} error={}",
                r.label, r.handle, d.success, d.error
            ));
        }
    }

    let faults = handlers::take_faults(contexts);
    if faults > 0 {
        report.violation(format!("{} entry point call(s) hit a dead context", faults));
    }
}
