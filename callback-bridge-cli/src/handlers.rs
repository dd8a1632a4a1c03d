//! Foreign-side entry points
//!
//! The CLI plays the foreign runtime. By default it supplies its own C entry
//! points that keep their state in a [`ContextRegistry`]; alternatively the
//! three entry points (and an optional context constructor) are resolved from a
//! shared library with `libloading`, so handlers compiled in another language
//! can be driven through the same boundary.

use std::path::PathBuf;
use std::sync::OnceLock;

use callback_bridge::{BridgeConfig, BridgeError, BridgeString, ContextHandle, ContextRegistry};
use libloading::{Library, Symbol};
use parking_lot::{const_mutex, Mutex};
use serde::Serialize;

use crate::config::HandlersConfig;

/// Errors while preparing entry points
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("failed to load handler library {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol `{symbol}` not found in {path:?}: {source}")]
    Symbol {
        symbol: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("context registry: {0}")]
    Registry(#[from] BridgeError),
}

/// What the built-in entry points observed for one context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Deliveries {
    pub success: usize,
    pub error: usize,
}

/// State behind a built-in context handle
#[derive(Debug)]
pub struct DemoContext {
    pub label: String,
    pub deliveries: Deliveries,
}

/// A context after its teardown entry point ran
#[derive(Debug, Clone)]
pub struct ReleasedContext {
    pub handle: usize,
    pub label: String,
    pub deliveries: Deliveries,
}

static CONTEXTS: OnceLock<ContextRegistry<Mutex<DemoContext>>> = OnceLock::new();
static RELEASED: Mutex<Vec<ReleasedContext>> = const_mutex(Vec::new());
static FAULTS: Mutex<Vec<usize>> = const_mutex(Vec::new());

/// Create the built-in context registry from the `[bridge]` settings
///
/// Only the first call takes effect.
pub fn install_registry(config: &BridgeConfig) -> Result<(), HandlerError> {
    let registry = ContextRegistry::from_config(config)?;
    if CONTEXTS.set(registry).is_err() {
        log::debug!("context registry already installed");
    }
    Ok(())
}

fn contexts() -> &'static ContextRegistry<Mutex<DemoContext>> {
    CONTEXTS.get_or_init(ContextRegistry::new)
}

/// Remove and count the entry-point calls that hit one of `handles` after it
/// was released (or before it existed)
pub fn take_faults(handles: &[usize]) -> usize {
    let mut faults = FAULTS.lock();
    let before = faults.len();
    faults.retain(|h| !handles.contains(h));
    before - faults.len()
}

/// Remove and return the released records for `handles`
pub fn take_released(handles: &[usize]) -> Vec<ReleasedContext> {
    let mut released = RELEASED.lock();
    let (mine, rest): (Vec<_>, Vec<_>) = released
        .drain(..)
        .partition(|r| handles.contains(&r.handle));
    *released = rest;
    mine
}

/// Whether a built-in context is still registered
pub fn is_live(handle: usize) -> bool {
    contexts().contains(ContextHandle::from_raw(handle))
}

fn record_fault(entry: &str, ctx: usize, err: BridgeError) {
    FAULTS.lock().push(ctx);
    log::error!("{} entry point called with ctx=0x{:x}: {}", entry, ctx, err);
}

extern "C" fn demo_ok(a: BridgeString, b: BridgeString, ctx: usize) {
    let result = contexts().with(ContextHandle::from_raw(ctx), |c| {
        let mut c = c.lock();
        c.deliveries.success += 1;
        log::info!("OK {}{}{}", a.to_string_lossy(), b.to_string_lossy(), c.label);
    });
    if let Err(e) = result {
        record_fault("success", ctx, e);
    }
}

extern "C" fn demo_err(e: BridgeString, ctx: usize) {
    let result = contexts().with(ContextHandle::from_raw(ctx), |c| {
        let mut c = c.lock();
        c.deliveries.error += 1;
        log::info!("ERR {}{}", e.to_string_lossy(), c.label);
    });
    if let Err(err) = result {
        record_fault("error", ctx, err);
    }
}

extern "C" fn demo_drop(ctx: usize) {
    match contexts().remove(ContextHandle::from_raw(ctx)) {
        Ok(context) => {
            let context = context.into_inner();
            log::debug!("released context {} (0x{:x})", context.label, ctx);
            RELEASED.lock().push(ReleasedContext {
                handle: ctx,
                label: context.label,
                deliveries: context.deliveries,
            });
        }
        Err(e) => record_fault("teardown", ctx, e),
    }
}

type ContextConstructor = unsafe extern "C" fn() -> usize;

enum HandlerSource {
    Builtin {
        label: String,
    },
    Library {
        path: PathBuf,
        new_context: Option<ContextConstructor>,
        // Keeps the resolved addresses valid.
        _library: Library,
    },
}

/// Addresses of the three entry points plus where contexts come from
pub struct HandlerSet {
    pub success: usize,
    pub error: usize,
    pub teardown: usize,
    source: HandlerSource,
}

impl HandlerSet {
    /// The CLI's own entry points, with contexts labelled `label`
    pub fn builtin(label: impl Into<String>) -> Self {
        Self {
            success: demo_ok as usize,
            error: demo_err as usize,
            teardown: demo_drop as usize,
            source: HandlerSource::Builtin {
                label: label.into(),
            },
        }
    }

    /// Resolve entry points from the configured shared library, or fall back to
    /// the built-in ones when no library is configured
    pub fn from_config(config: &HandlersConfig, label: &str) -> Result<Self, HandlerError> {
        match &config.library {
            Some(path) => Self::load(path.clone(), config),
            None => Ok(Self::builtin(label)),
        }
    }

    fn load(path: PathBuf, config: &HandlersConfig) -> Result<Self, HandlerError> {
        log::info!("Loading handler library: {:?}", path);

        // SAFETY: loading runs the library's initializers; the user chose it.
        let library = unsafe { Library::new(&path) }.map_err(|source| HandlerError::Load {
            path: path.clone(),
            source,
        })?;

        let resolve = |symbol: &str| -> Result<usize, HandlerError> {
            // SAFETY: only the address is taken here; its shape is the user's
            // promise, checked by nothing.
            let sym: Symbol<unsafe extern "C" fn()> = unsafe { library.get(symbol.as_bytes()) }
                .map_err(|source| HandlerError::Symbol {
                    symbol: symbol.to_string(),
                    path: path.clone(),
                    source,
                })?;
            Ok(*sym as usize)
        };

        let success = resolve(&config.success_symbol)?;
        let error = resolve(&config.error_symbol)?;
        let teardown = resolve(&config.teardown_symbol)?;

        let new_context = match &config.context_symbol {
            Some(symbol) => {
                // SAFETY: declared as `size_t fn(void)` in the configuration.
                let sym: Symbol<ContextConstructor> = unsafe { library.get(symbol.as_bytes()) }
                    .map_err(|source| HandlerError::Symbol {
                        symbol: symbol.clone(),
                        path: path.clone(),
                        source,
                    })?;
                Some(*sym)
            }
            None => None,
        };

        log::debug!(
            "resolved entry points ok=0x{:x} err=0x{:x} drop=0x{:x}",
            success,
            error,
            teardown
        );

        Ok(Self {
            success,
            error,
            teardown,
            source: HandlerSource::Library {
                path,
                new_context,
                _library: library,
            },
        })
    }

    /// Whether the built-in entry points (and their bookkeeping) are in use
    pub fn is_builtin(&self) -> bool {
        matches!(self.source, HandlerSource::Builtin { .. })
    }

    pub fn describe(&self) -> String {
        match &self.source {
            HandlerSource::Builtin { .. } => "builtin".to_string(),
            HandlerSource::Library { path, .. } => path.display().to_string(),
        }
    }

    /// Produce the context handle for descriptor number `seq`
    pub fn new_context(&self, seq: usize) -> Result<usize, HandlerError> {
        match &self.source {
            HandlerSource::Builtin { label } => {
                let context = DemoContext {
                    label: label.clone(),
                    deliveries: Deliveries::default(),
                };
                Ok(contexts().insert(Mutex::new(context))?.into_raw())
            }
            // SAFETY: the constructor's shape is the user's promise.
            HandlerSource::Library {
                new_context: Some(constructor),
                ..
            } => Ok(unsafe { constructor() }),
            HandlerSource::Library {
                new_context: None, ..
            } => Ok(seq),
        }
    }
}
