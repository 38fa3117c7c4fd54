//! Engine value helpers shared across host APIs.

use rquickjs::function::Constructor;
use rquickjs::{Ctx, Function, Object, Value};

/// A pending promise plus its settlement callables.
pub fn promise_capability<'js>(
    ctx: &Ctx<'js>,
) -> rquickjs::Result<(Value<'js>, Function<'js>, Function<'js>)> {
    let capability: Object = ctx.eval(
        "(() => { const c = {}; \
          c.promise = new Promise((resolve, reject) => { c.resolve = resolve; c.reject = reject; }); \
          return c; })()",
    )?;
    Ok((
        capability.get("promise")?,
        capability.get("resolve")?,
        capability.get("reject")?,
    ))
}

/// Construct an `Error` instance carrying `message`.
pub fn new_error<'js>(ctx: &Ctx<'js>, message: &str) -> rquickjs::Result<Value<'js>> {
    let ctor: Constructor = ctx.globals().get("Error")?;
    ctor.construct((message,))
}

/// Coerce any value to a string the way `String(v)` does.
pub fn coerce_string<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<String> {
    let to_string: Function = ctx.globals().get("String")?;
    to_string.call((value,))
}

/// `Object.is` identity. Used wherever reference equality of engine values
/// matters (listener removal, clone cycle detection).
pub fn values_identical<'js>(
    ctx: &Ctx<'js>,
    a: &Value<'js>,
    b: &Value<'js>,
) -> rquickjs::Result<bool> {
    let object: Object = ctx.globals().get("Object")?;
    let is: Function = object.get("is")?;
    is.call((a.clone(), b.clone()))
}

/// Format a thrown value as `message\nstack`, matching what lands on stderr
/// for uncaught errors. The first line is the `String(...)` rendering, e.g.
/// `ReferenceError: x is not defined`.
pub fn format_error_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    let stack: Option<String> = value
        .as_object()
        .and_then(|obj| obj.get::<_, Option<String>>("stack").ok())
        .flatten();
    let message =
        coerce_string(ctx, value).unwrap_or_else(|_| "unknown error".to_string());
    match stack {
        Some(stack) if !stack.is_empty() => format!("{message}\n{stack}"),
        _ => message,
    }
}

/// Take the pending exception off the context and format it.
pub fn catch_and_format(ctx: &Ctx<'_>) -> String {
    let caught = ctx.catch();
    format_error_value(ctx, caught)
}

/// Format the failure of a host-to-JS call. A pending engine exception is
/// consumed; other engine errors render through their own Display.
pub fn format_call_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        catch_and_format(ctx)
    } else {
        err.to_string()
    }
}

/// Render a value for console output: strings verbatim, everything else via
/// the engine's JSON serializer with a `String(v)` fallback for values JSON
/// cannot express (functions, undefined, cycles).
pub fn display_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_default();
    }
    if value.is_undefined() {
        return "undefined".to_string();
    }
    if value.is_null() {
        return "null".to_string();
    }
    if let Ok(Some(json)) = ctx.json_stringify(value.clone()) {
        if let Ok(text) = json.to_string() {
            return text;
        }
    }
    coerce_string(ctx, value).unwrap_or_default()
}
