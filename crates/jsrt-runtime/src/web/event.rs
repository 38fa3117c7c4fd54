//! `Event` and `EventTarget`.
//!
//! Listener bookkeeping follows the DOM model trimmed to a single phase:
//! insertion order is preserved, duplicates (same type and callback
//! identity) are dropped on add, dispatch walks a snapshot, and `once`
//! listeners are removed after their first invocation.

use rquickjs::class::Trace;
use rquickjs::function::{Opt, This};
use rquickjs::{Class, Ctx, Exception, Function, IntoJs, JsLifetime, Object, Value};

use crate::state;
use crate::value::{format_call_error, values_identical};

#[derive(Trace, JsLifetime)]
#[rquickjs::class(rename = "Event")]
pub struct Event<'js> {
    #[qjs(skip_trace)]
    pub(crate) kind: String,
    #[qjs(skip_trace)]
    pub(crate) bubbles: bool,
    #[qjs(skip_trace)]
    pub(crate) cancelable: bool,
    #[qjs(skip_trace)]
    pub(crate) default_prevented: bool,
    #[qjs(skip_trace)]
    pub(crate) stop_flag: bool,
    #[qjs(skip_trace)]
    pub(crate) stop_immediate: bool,
    pub(crate) target: Option<Value<'js>>,
    pub(crate) current_target: Option<Value<'js>>,
}

impl<'js> Event<'js> {
    pub(crate) fn with_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            bubbles: false,
            cancelable: false,
            default_prevented: false,
            stop_flag: false,
            stop_immediate: false,
            target: None,
            current_target: None,
        }
    }
}

#[rquickjs::methods]
impl<'js> Event<'js> {
    #[qjs(constructor)]
    pub fn new(kind: String, options: Opt<Object<'js>>) -> rquickjs::Result<Self> {
        let mut event = Self::with_kind(kind);
        if let Some(options) = options.0 {
            event.bubbles = options.get::<_, Option<bool>>("bubbles")?.unwrap_or(false);
            event.cancelable = options
                .get::<_, Option<bool>>("cancelable")?
                .unwrap_or(false);
        }
        Ok(event)
    }

    #[qjs(get, rename = "type")]
    pub fn kind(&self) -> String {
        self.kind.clone()
    }

    #[qjs(get)]
    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    #[qjs(get)]
    pub fn cancelable(&self) -> bool {
        self.cancelable
    }

    #[qjs(get, rename = "defaultPrevented")]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    #[qjs(get)]
    pub fn target(&self, ctx: Ctx<'js>) -> Value<'js> {
        self.target
            .clone()
            .unwrap_or_else(|| Value::new_null(ctx))
    }

    #[qjs(get, rename = "currentTarget")]
    pub fn current_target(&self, ctx: Ctx<'js>) -> Value<'js> {
        self.current_target
            .clone()
            .unwrap_or_else(|| Value::new_null(ctx))
    }

    #[qjs(rename = "preventDefault")]
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    #[qjs(rename = "stopPropagation")]
    pub fn stop_propagation(&mut self) {
        self.stop_flag = true;
    }

    #[qjs(rename = "stopImmediatePropagation")]
    pub fn stop_immediate_propagation(&mut self) {
        self.stop_flag = true;
        self.stop_immediate = true;
    }
}

#[derive(Clone, Trace, JsLifetime)]
pub(crate) struct Listener<'js> {
    #[qjs(skip_trace)]
    pub kind: String,
    pub callback: Function<'js>,
    #[qjs(skip_trace)]
    pub capture: bool,
    #[qjs(skip_trace)]
    pub once: bool,
    #[qjs(skip_trace)]
    pub passive: bool,
}

#[derive(Default, Trace, JsLifetime)]
#[rquickjs::class(rename = "EventTarget")]
pub struct EventTarget<'js> {
    pub(crate) listeners: Vec<Listener<'js>>,
}

impl<'js> EventTarget<'js> {
    /// Shared add path, also used by `AbortSignal` delegation.
    pub(crate) fn add_listener(
        &mut self,
        ctx: &Ctx<'js>,
        kind: String,
        callback: Value<'js>,
        options: Option<Value<'js>>,
    ) -> rquickjs::Result<()> {
        let Some(callback) = callback.into_function() else {
            return Err(Exception::throw_type(
                ctx,
                "addEventListener: listener is not a function",
            ));
        };
        let (capture, once, passive) = parse_listener_options(options)?;
        for existing in &self.listeners {
            if existing.kind == kind
                && values_identical(
                    ctx,
                    &existing.callback.clone().into_value(),
                    &callback.clone().into_value(),
                )?
            {
                return Ok(());
            }
        }
        tracing::trace!(kind, capture, once, passive, "listener added");
        self.listeners.push(Listener {
            kind,
            callback,
            capture,
            once,
            passive,
        });
        Ok(())
    }

    pub(crate) fn remove_listener(
        &mut self,
        ctx: &Ctx<'js>,
        kind: &str,
        callback: &Value<'js>,
    ) -> rquickjs::Result<()> {
        let mut found = None;
        for (index, existing) in self.listeners.iter().enumerate() {
            if existing.kind == kind
                && values_identical(ctx, &existing.callback.clone().into_value(), callback)?
            {
                found = Some(index);
                break;
            }
        }
        if let Some(index) = found {
            self.listeners.remove(index);
        }
        Ok(())
    }
}

/// Dispatch `event` on `target`, reporting `target_value` as both `target`
/// and `currentTarget`. Returns `!defaultPrevented`.
///
/// Listener exceptions are recorded on the runtime's unhandled queue and do
/// not stop the walk; `stopImmediatePropagation` does.
pub(crate) fn dispatch<'js>(
    ctx: &Ctx<'js>,
    target: &Class<'js, EventTarget<'js>>,
    event: &Class<'js, Event<'js>>,
    target_value: Value<'js>,
) -> rquickjs::Result<bool> {
    let kind = {
        let mut ev = event.borrow_mut();
        ev.target = Some(target_value.clone());
        ev.current_target = Some(target_value.clone());
        ev.stop_flag = false;
        ev.stop_immediate = false;
        ev.kind.clone()
    };

    let snapshot: Vec<Listener<'js>> = target
        .borrow()
        .listeners
        .iter()
        .filter(|listener| listener.kind == kind)
        .cloned()
        .collect();

    for listener in snapshot {
        if event.borrow().stop_immediate {
            break;
        }
        // A listener removed by an earlier callback must not fire.
        let callback_value = listener.callback.clone().into_value();
        let mut still_registered = false;
        for existing in &target.borrow().listeners {
            if existing.kind == kind
                && values_identical(ctx, &existing.callback.clone().into_value(), &callback_value)?
            {
                still_registered = true;
                break;
            }
        }
        if !still_registered {
            continue;
        }
        let result: rquickjs::Result<()> = listener
            .callback
            .call((This(target_value.clone()), event.clone()));
        if let Err(err) = result {
            state::host_state(ctx).push_exception(format_call_error(ctx, err));
        }
        if listener.once {
            target
                .borrow_mut()
                .remove_listener(ctx, &kind, &callback_value)?;
        }
    }

    let prevented = event.borrow().default_prevented;
    {
        let mut ev = event.borrow_mut();
        ev.current_target = None;
    }
    Ok(!prevented)
}

fn parse_listener_options(options: Option<Value<'_>>) -> rquickjs::Result<(bool, bool, bool)> {
    let Some(options) = options else {
        return Ok((false, false, false));
    };
    if let Some(capture) = options.as_bool() {
        return Ok((capture, false, false));
    }
    if let Some(object) = options.as_object() {
        let capture = object.get::<_, Option<bool>>("capture")?.unwrap_or(false);
        let once = object.get::<_, Option<bool>>("once")?.unwrap_or(false);
        let passive = object.get::<_, Option<bool>>("passive")?.unwrap_or(false);
        return Ok((capture, once, passive));
    }
    Ok((false, false, false))
}

#[rquickjs::methods]
impl<'js> EventTarget<'js> {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self::default()
    }

    #[qjs(rename = "addEventListener")]
    pub fn add_event_listener(
        &mut self,
        ctx: Ctx<'js>,
        kind: String,
        callback: Value<'js>,
        options: Opt<Value<'js>>,
    ) -> rquickjs::Result<()> {
        self.add_listener(&ctx, kind, callback, options.0)
    }

    #[qjs(rename = "removeEventListener")]
    pub fn remove_event_listener(
        &mut self,
        ctx: Ctx<'js>,
        kind: String,
        callback: Value<'js>,
        _options: Opt<Value<'js>>,
    ) -> rquickjs::Result<()> {
        self.remove_listener(&ctx, &kind, &callback)
    }

    #[qjs(rename = "dispatchEvent")]
    pub fn dispatch_event(
        this: This<Class<'js, EventTarget<'js>>>,
        ctx: Ctx<'js>,
        event: Class<'js, Event<'js>>,
    ) -> rquickjs::Result<bool> {
        let target_value = this.0.clone().into_js(&ctx)?;
        dispatch(&ctx, &this.0, &event, target_value)
    }
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    Class::<Event>::define(&globals)?;
    Class::<EventTarget>::define(&globals)?;
    Ok(())
}
