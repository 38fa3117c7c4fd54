//! `AbortController` and `AbortSignal`.
//!
//! A signal composes over an internal `EventTarget` and forwards the
//! listener API to it. The aborted transition is one-way: the first abort
//! records the reason and fires the `abort` event, later aborts are no-ops.

use rquickjs::class::Trace;
use rquickjs::function::{Opt, This};
use rquickjs::{Class, Ctx, Exception, Function, IntoJs, JsLifetime, Persistent, Value};
use std::time::Duration;

use crate::state;
use crate::web::event::{self, Event, EventTarget};

const DEFAULT_REASON: &str = "AbortError";

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "AbortSignal")]
pub struct AbortSignal<'js> {
    #[qjs(skip_trace)]
    pub(crate) aborted: bool,
    pub(crate) reason: Option<Value<'js>>,
    pub(crate) target: Class<'js, EventTarget<'js>>,
}

impl<'js> AbortSignal<'js> {
    pub(crate) fn create(ctx: &Ctx<'js>) -> rquickjs::Result<Class<'js, Self>> {
        let target = Class::instance(ctx.clone(), EventTarget::default())?;
        Class::instance(
            ctx.clone(),
            Self {
                aborted: false,
                reason: None,
                target,
            },
        )
    }

    /// Transition to aborted and dispatch `abort` on the signal. Idempotent.
    pub(crate) fn do_abort(
        ctx: &Ctx<'js>,
        signal: &Class<'js, Self>,
        reason: Option<Value<'js>>,
    ) -> rquickjs::Result<()> {
        let target = {
            let mut this = signal.borrow_mut();
            if this.aborted {
                return Ok(());
            }
            this.aborted = true;
            let reason = match reason {
                Some(value) if !value.is_undefined() => value,
                _ => DEFAULT_REASON.into_js(ctx)?,
            };
            this.reason = Some(reason);
            this.target.clone()
        };
        let event = Class::instance(ctx.clone(), Event::with_kind("abort"))?;
        let signal_value = signal.clone().into_js(ctx)?;
        event::dispatch(ctx, &target, &event, signal_value)?;
        Ok(())
    }
}

#[rquickjs::methods]
impl<'js> AbortSignal<'js> {
    #[qjs(get)]
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    #[qjs(get)]
    pub fn reason(&self, ctx: Ctx<'js>) -> Value<'js> {
        self.reason
            .clone()
            .unwrap_or_else(|| Value::new_undefined(ctx))
    }

    #[qjs(rename = "addEventListener")]
    pub fn add_event_listener(
        &self,
        ctx: Ctx<'js>,
        kind: String,
        callback: Value<'js>,
        options: Opt<Value<'js>>,
    ) -> rquickjs::Result<()> {
        self.target
            .borrow_mut()
            .add_listener(&ctx, kind, callback, options.0)
    }

    #[qjs(rename = "removeEventListener")]
    pub fn remove_event_listener(
        &self,
        ctx: Ctx<'js>,
        kind: String,
        callback: Value<'js>,
        _options: Opt<Value<'js>>,
    ) -> rquickjs::Result<()> {
        self.target.borrow_mut().remove_listener(&ctx, &kind, &callback)
    }

    #[qjs(rename = "dispatchEvent")]
    pub fn dispatch_event(
        this: This<Class<'js, AbortSignal<'js>>>,
        ctx: Ctx<'js>,
        event: Class<'js, Event<'js>>,
    ) -> rquickjs::Result<bool> {
        let target = this.0.borrow().target.clone();
        let signal_value = this.0.clone().into_js(&ctx)?;
        event::dispatch(&ctx, &target, &event, signal_value)
    }

    /// Already-aborted signal carrying `reason`.
    #[qjs(static)]
    pub fn abort(
        ctx: Ctx<'js>,
        reason: Opt<Value<'js>>,
    ) -> rquickjs::Result<Class<'js, AbortSignal<'js>>> {
        let signal = Self::create(&ctx)?;
        Self::do_abort(&ctx, &signal, reason.0)?;
        Ok(signal)
    }

    /// Signal aborted by a reactor timer after `ms` milliseconds.
    #[qjs(static)]
    pub fn timeout(ctx: Ctx<'js>, ms: f64) -> rquickjs::Result<Class<'js, AbortSignal<'js>>> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(Exception::throw_range(&ctx, "timeout must be non-negative"));
        }
        let signal = Self::create(&ctx)?;
        let saved = Persistent::save(&ctx, signal.clone().into_js(&ctx)?);
        let callback = Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
            let value = saved.clone().restore(&ctx)?;
            let signal = Class::<AbortSignal>::from_value(&value)?;
            AbortSignal::do_abort(&ctx, &signal, None)
        })?;
        let host = state::host_state(&ctx);
        host.loop_shared.schedule_timer(
            Persistent::save(&ctx, callback),
            Vec::new(),
            Duration::from_millis(ms as u64),
            None,
        );
        Ok(signal)
    }

    /// First input signal to abort propagates its reason to the result.
    #[qjs(static)]
    pub fn any(
        ctx: Ctx<'js>,
        signals: Value<'js>,
    ) -> rquickjs::Result<Class<'js, AbortSignal<'js>>> {
        let Some(list) = signals.as_array() else {
            return Err(Exception::throw_type(
                &ctx,
                "AbortSignal.any() argument must be iterable",
            ));
        };
        let mut sources: Vec<Class<'js, AbortSignal<'js>>> = Vec::with_capacity(list.len());
        for item in list.iter::<Value>() {
            let item = item?;
            let Ok(signal) = Class::<AbortSignal>::from_value(&item) else {
                return Err(Exception::throw_type(
                    &ctx,
                    "AbortSignal.any() all elements must be AbortSignal objects",
                ));
            };
            sources.push(signal);
        }

        for source in &sources {
            if source.borrow().aborted {
                let result = Self::create(&ctx)?;
                let reason = source.borrow().reason.clone();
                Self::do_abort(&ctx, &result, reason)?;
                return Ok(result);
            }
        }

        let result = Self::create(&ctx)?;
        let saved_result = Persistent::save(&ctx, result.clone().into_js(&ctx)?);
        for source in &sources {
            let saved_result = saved_result.clone();
            let saved_source = Persistent::save(&ctx, source.clone().into_js(&ctx)?);
            let relay = Function::new(ctx.clone(), move |ctx: Ctx<'_>| -> rquickjs::Result<()> {
                let result = Class::<AbortSignal>::from_value(
                    &saved_result.clone().restore(&ctx)?,
                )?;
                if result.borrow().aborted {
                    return Ok(());
                }
                let source = Class::<AbortSignal>::from_value(
                    &saved_source.clone().restore(&ctx)?,
                )?;
                let reason = source.borrow().reason.clone();
                AbortSignal::do_abort(&ctx, &result, reason)
            })?
            .into_value();
            let once = rquickjs::Object::new(ctx.clone())?;
            once.set("once", true)?;
            source
                .borrow()
                .target
                .borrow_mut()
                .add_listener(&ctx, "abort".into(), relay, Some(once.into_value()))?;
        }
        Ok(result)
    }
}

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "AbortController")]
pub struct AbortController<'js> {
    pub(crate) signal: Class<'js, AbortSignal<'js>>,
}

#[rquickjs::methods]
impl<'js> AbortController<'js> {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'js>) -> rquickjs::Result<Self> {
        Ok(Self {
            signal: AbortSignal::create(&ctx)?,
        })
    }

    #[qjs(get)]
    pub fn signal(&self) -> Class<'js, AbortSignal<'js>> {
        self.signal.clone()
    }

    pub fn abort(&self, ctx: Ctx<'js>, reason: Opt<Value<'js>>) -> rquickjs::Result<()> {
        AbortSignal::do_abort(&ctx, &self.signal, reason.0)
    }
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    Class::<AbortSignal>::define(&globals)?;
    Class::<AbortController>::define(&globals)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    // Behaviour is exercised end to end by the JS suite in
    // tests/web_apis.rs; nothing here is meaningful without an engine.
}
