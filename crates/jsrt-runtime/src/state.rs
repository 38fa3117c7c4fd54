//! Per-runtime host state and the context registry.
//!
//! Host callbacks (class statics included) reach their runtime through a
//! thread-local map keyed by the raw context pointer. The runtime registers
//! itself at construction and unregisters during teardown.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use rquickjs::{Ctx, Function, Persistent, Value};

use crate::event_loop::LoopShared;

/// Promise settlement callables for an in-flight `fetch`, plus the request
/// URL echoed back on the response object.
pub struct FetchWaiter {
    pub resolve: Persistent<Function<'static>>,
    pub reject: Persistent<Function<'static>>,
    pub url: String,
}

/// State shared between the runtime host and its JS-facing callbacks.
pub struct HostState {
    pub loop_shared: Rc<LoopShared>,
    pub pending_fetches: RefCell<HashMap<u64, FetchWaiter>>,
    next_fetch_id: Cell<u64>,
    /// Unhandled job and callback errors, drained between reactor turns.
    pub exceptions: RefCell<Vec<String>>,
    /// CommonJS cache: canonical path -> exports. Append-only during a run.
    pub require_cache: RefCell<HashMap<String, Persistent<Value<'static>>>>,
    pub started: Instant,
    pub argv: Vec<String>,
}

impl HostState {
    pub fn new(loop_shared: Rc<LoopShared>, argv: Vec<String>) -> Self {
        Self {
            loop_shared,
            pending_fetches: RefCell::new(HashMap::new()),
            next_fetch_id: Cell::new(1),
            exceptions: RefCell::new(Vec::new()),
            require_cache: RefCell::new(HashMap::new()),
            started: Instant::now(),
            argv,
        }
    }

    pub fn next_fetch_id(&self) -> u64 {
        let id = self.next_fetch_id.get();
        self.next_fetch_id.set(id + 1);
        id
    }

    pub fn push_exception(&self, formatted: String) {
        self.exceptions.borrow_mut().push(formatted);
    }

    /// Drop every saved engine value. Must run while the engine is alive.
    pub fn release_values(&self) {
        self.pending_fetches.borrow_mut().clear();
        self.require_cache.borrow_mut().clear();
    }
}

thread_local! {
    static STATE_MAP: RefCell<HashMap<usize, Rc<HostState>>> = RefCell::new(HashMap::new());
}

fn ctx_key(ctx: &Ctx<'_>) -> usize {
    ctx.as_raw().as_ptr() as usize
}

pub fn register(ctx: &Ctx<'_>, state: Rc<HostState>) {
    STATE_MAP.with(|map| {
        map.borrow_mut().insert(ctx_key(ctx), state);
    });
}

pub fn unregister(ctx: &Ctx<'_>) {
    STATE_MAP.with(|map| {
        map.borrow_mut().remove(&ctx_key(ctx));
    });
}

/// Host state for the given context. Panics only if a callback outlives its
/// runtime, which the teardown ordering rules out.
pub fn host_state(ctx: &Ctx<'_>) -> Rc<HostState> {
    STATE_MAP
        .with(|map| map.borrow().get(&ctx_key(ctx)).cloned())
        .expect("host state registered for context")
}
