//! Runtime host: binds one engine instance to one event loop and drives
//! them to quiescence.
//!
//! The convergence loop alternates engine-job draining with reactor turns
//! and stops when the job queue is empty and the loop holds no live work.
//! Script failures are reported, never fatal; only reactor construction can
//! abort the host.

use std::rc::Rc;
use std::time::Instant;

use rquickjs::function::Rest;
use rquickjs::{Context, Function, Module, Persistent, Promise, Runtime, Value};

use crate::error::{Result, RuntimeError};
use crate::event_loop::{EventLoop, IoEvent};
use crate::state::{self, HostState};
use crate::value::{catch_and_format, display_value, format_call_error};
use crate::web;
use crate::{builtins, bytecode, modules, require};

/// A saved engine value that outlives `Context::with` scopes.
pub type SavedValue = Persistent<Value<'static>>;

pub struct JsRuntime {
    // Field order is drop order: queued callbacks and saved values must be
    // released while the engine is still alive.
    event_loop: EventLoop,
    state: Rc<HostState>,
    context: Context,
    runtime: Runtime,
    freed: bool,
}

impl JsRuntime {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;
        runtime.set_loader(modules::JsrtResolver, modules::JsrtLoader);

        let event_loop = EventLoop::new()?;
        let state = Rc::new(HostState::new(event_loop.shared(), argv));

        let install = context.with(|ctx| -> rquickjs::Result<()> {
            state::register(&ctx, Rc::clone(&state));
            builtins::register(&ctx)?;
            web::register_all(&ctx)?;
            builtins::process::register(&ctx)?;
            require::register(&ctx)?;
            Ok(())
        });
        if let Err(err) = install {
            let message = context.with(|ctx| format_call_error(&ctx, err));
            return Err(RuntimeError::fatal(format!(
                "failed to install host APIs: {message}"
            )));
        }

        tracing::debug!("runtime ready");
        Ok(Self {
            event_loop,
            state,
            context,
            runtime,
            freed: false,
        })
    }

    /// Evaluate a file's source. `.mjs` or top-level import/export selects
    /// module evaluation; everything else runs as a classic script. The
    /// result may be an unsettled promise handle.
    pub fn eval(&mut self, filename: &str, source: &str) -> Result<SavedValue> {
        let as_module = filename.ends_with(".mjs") || modules::detect_module(source);
        tracing::debug!(filename, as_module, "eval");
        self.context.with(|ctx| {
            let evaluated: rquickjs::Result<Value> = if as_module {
                (|| {
                    let module = Module::declare(ctx.clone(), filename, source)?;
                    modules::set_import_meta(&module, filename)?;
                    let (_, promise) = module.eval()?;
                    Ok(promise.into_value())
                })()
            } else {
                ctx.eval(source)
            };
            match evaluated {
                Ok(value) => Ok(Persistent::save(&ctx, value)),
                Err(err) => Err(RuntimeError::script(format_call_error(&ctx, err))),
            }
        })
    }

    /// Pump the loop until `value` settles. Non-promise values come back
    /// unchanged; a rejection surfaces as a formatted script error.
    pub fn await_value(&mut self, value: SavedValue) -> Result<SavedValue> {
        loop {
            enum Step {
                Done(SavedValue),
                Failed(String),
                Pending,
            }
            let step = self.context.with(|ctx| -> rquickjs::Result<Step> {
                use rquickjs::FromJs;
                let restored = value.clone().restore(&ctx)?;
                let Ok(promise) = Promise::from_js(&ctx, restored.clone()) else {
                    return Ok(Step::Done(Persistent::save(&ctx, restored)));
                };
                match promise.finish::<Value>() {
                    Ok(settled) => Ok(Step::Done(Persistent::save(&ctx, settled))),
                    Err(rquickjs::Error::WouldBlock) => Ok(Step::Pending),
                    Err(rquickjs::Error::Exception) => {
                        Ok(Step::Failed(catch_and_format(&ctx)))
                    }
                    Err(other) => Ok(Step::Failed(other.to_string())),
                }
            })?;
            match step {
                Step::Done(saved) => return Ok(saved),
                Step::Failed(message) => return Err(RuntimeError::script(message)),
                Step::Pending => {
                    self.drain_jobs();
                    let fired = self.turn();
                    if fired == 0 && !self.runtime.is_job_pending() {
                        if self.event_loop.alive() {
                            self.event_loop.park();
                        } else {
                            return Err(RuntimeError::script(
                                "promise cannot settle: the event loop is empty",
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Drive until both the job queue and the reactor are quiet.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.drain_jobs();
            self.flush_exceptions();
            let fired = self.turn();
            self.drain_jobs();
            self.flush_exceptions();

            if self.runtime.is_job_pending() {
                continue;
            }
            if !self.event_loop.alive() {
                break;
            }
            if fired == 0 {
                self.event_loop.park();
            }
        }
        Ok(())
    }

    /// Drain the engine job queue. A throwing job is recorded on the
    /// unhandled-exception queue and draining continues.
    pub fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => {
                    let formatted = self.context.with(|ctx| catch_and_format(&ctx));
                    self.state.push_exception(formatted);
                }
            }
        }
    }

    /// One reactor turn: deliver I/O completions, fire due timers, then run
    /// the immediate (check) queue. Jobs drain after every callback.
    /// Returns the number of callbacks handled.
    fn turn(&mut self) -> usize {
        let mut fired = 0usize;

        for event in self.event_loop.pump_events() {
            fired += 1;
            match event {
                IoEvent::FetchDone { id, result } => {
                    let completed = self
                        .context
                        .with(|ctx| web::fetch::complete(&ctx, id, result));
                    if let Err(err) = completed {
                        let formatted = self.context.with(|ctx| format_call_error(&ctx, err));
                        self.state.push_exception(formatted);
                    }
                }
            }
            self.drain_jobs();
        }

        let shared = self.state.loop_shared.clone();
        let now = Instant::now();
        for timer in shared.take_due_timers(now) {
            if shared.was_cancelled(timer.id) {
                continue;
            }
            fired += 1;
            self.invoke_saved(&timer.callback, &timer.args);
            self.drain_jobs();
            if let Some(interval) = timer.interval {
                if !shared.was_cancelled(timer.id) {
                    shared.rearm(timer, interval);
                }
            }
        }

        for immediate in shared.take_immediates() {
            fired += 1;
            self.invoke_saved(&immediate.callback, &immediate.args);
            self.drain_jobs();
        }

        fired
    }

    fn invoke_saved(
        &self,
        callback: &Persistent<Function<'static>>,
        args: &[Persistent<Value<'static>>],
    ) {
        let invoked = self.context.with(|ctx| -> rquickjs::Result<()> {
            let callback = callback.clone().restore(&ctx)?;
            let mut restored = Vec::with_capacity(args.len());
            for arg in args {
                restored.push(arg.clone().restore(&ctx)?);
            }
            callback.call::<_, ()>((Rest(restored),))
        });
        if let Err(err) = invoked {
            let formatted = self.context.with(|ctx| format_call_error(&ctx, err));
            self.state.push_exception(formatted);
        }
    }

    /// Print and drop queued unhandled errors.
    pub fn flush_exceptions(&self) {
        for message in self.state.exceptions.borrow_mut().drain(..) {
            eprintln!("{message}");
        }
    }

    /// Evaluate one snippet and render its settled result for display.
    /// Used by the REPL.
    pub fn eval_display(&mut self, source: &str) -> Result<String> {
        let value = self.eval("<repl>", source)?;
        let settled = self.await_value(value)?;
        Ok(self.context.with(|ctx| {
            let restored = settled
                .clone()
                .restore(&ctx)
                .unwrap_or_else(|_| Value::new_undefined(ctx.clone()));
            display_value(&ctx, restored)
        }))
    }

    /// Compile a classic script to engine bytecode without executing it.
    pub fn compile_to_bytecode(&self, filename: &str, source: &str) -> Result<Vec<u8>> {
        self.context
            .with(|ctx| bytecode::compile(&ctx, filename, source))
    }

    /// Execute an embedded bytecode payload, then return; the caller drives
    /// `run` afterwards.
    pub fn eval_bytecode(&mut self, bytes: &[u8]) -> Result<()> {
        self.context.with(|ctx| bytecode::execute(&ctx, bytes))
    }

    /// Tear down: close reactor handles, release saved values, unhook the
    /// context registry, and collect. Also runs on drop.
    pub fn free(&mut self) {
        if self.freed {
            return;
        }
        self.freed = true;
        self.event_loop.close_all_and_drain();
        self.state.release_values();
        self.flush_exceptions();
        self.context.with(|ctx| {
            state::unregister(&ctx);
            ctx.run_gc();
        });
        tracing::debug!("runtime freed");
    }
}

impl Drop for JsRuntime {
    fn drop(&mut self) {
        self.free();
    }
}
