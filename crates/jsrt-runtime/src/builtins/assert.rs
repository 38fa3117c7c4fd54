//! `std:assert`: a callable assert with the usual comparison helpers.

use rquickjs::function::{Func, Opt, Rest};
use rquickjs::function::Constructor;
use rquickjs::{Ctx, Function, Object, Value};

use crate::value::coerce_string;

fn assertion_error<'js>(ctx: &Ctx<'js>, message: &str) -> rquickjs::Error {
    let build = || -> rquickjs::Result<rquickjs::Error> {
        let ctor: Constructor = ctx.globals().get("Error")?;
        let error: Value = ctor.construct((message,))?;
        if let Some(object) = error.as_object() {
            object.set("name", "AssertionError")?;
        }
        Ok(ctx.throw(error))
    };
    build().unwrap_or_else(|err| err)
}

fn is_truthy(value: &Value<'_>) -> bool {
    if value.is_undefined() || value.is_null() {
        return false;
    }
    if let Some(flag) = value.as_bool() {
        return flag;
    }
    if let Some(number) = value.as_number() {
        return number != 0.0 && !number.is_nan();
    }
    if let Some(text) = value.as_string() {
        return !text.to_string().map(|s| s.is_empty()).unwrap_or(true);
    }
    true
}

fn loose_equal<'js>(ctx: &Ctx<'js>, a: &Value<'js>, b: &Value<'js>) -> rquickjs::Result<bool> {
    let compare: Function = ctx.eval("(a, b) => a == b")?;
    compare.call((a.clone(), b.clone()))
}

fn strict_equal<'js>(ctx: &Ctx<'js>, a: &Value<'js>, b: &Value<'js>) -> rquickjs::Result<bool> {
    let compare: Function = ctx.eval("(a, b) => a === b")?;
    compare.call((a.clone(), b.clone()))
}

fn deep_equal<'js>(ctx: &Ctx<'js>, a: &Value<'js>, b: &Value<'js>) -> rquickjs::Result<bool> {
    if strict_equal(ctx, a, b)? {
        return Ok(true);
    }
    match (a.as_array(), b.as_array()) {
        (Some(left), Some(right)) => {
            if left.len() != right.len() {
                return Ok(false);
            }
            for index in 0..left.len() {
                let left_item: Value = left.get(index)?;
                let right_item: Value = right.get(index)?;
                if !deep_equal(ctx, &left_item, &right_item)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        (Some(_), None) | (None, Some(_)) => return Ok(false),
        (None, None) => {}
    }
    match (a.as_object(), b.as_object()) {
        (Some(left), Some(right)) => {
            let left_keys: Vec<String> = left
                .keys::<String>()
                .collect::<rquickjs::Result<Vec<_>>>()?;
            let right_keys: Vec<String> = right
                .keys::<String>()
                .collect::<rquickjs::Result<Vec<_>>>()?;
            if left_keys.len() != right_keys.len() {
                return Ok(false);
            }
            for key in left_keys {
                let left_item: Value = left.get(key.as_str())?;
                let right_item: Value = right.get(key.as_str())?;
                if !deep_equal(ctx, &left_item, &right_item)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn fail_message<'js>(
    ctx: &Ctx<'js>,
    message: Option<Value<'js>>,
    fallback: String,
) -> rquickjs::Result<String> {
    match message {
        Some(value) if !value.is_undefined() => coerce_string(ctx, value),
        _ => Ok(fallback),
    }
}

fn assert_ok<'js>(
    ctx: Ctx<'js>,
    value: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if is_truthy(&value) {
        return Ok(());
    }
    let rendered = coerce_string(&ctx, value)?;
    let text = fail_message(
        &ctx,
        message.0,
        format!("expected truthy value, got {rendered}"),
    )?;
    Err(assertion_error(&ctx, &text))
}

fn assert_equal<'js>(
    ctx: Ctx<'js>,
    a: Value<'js>,
    b: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if loose_equal(&ctx, &a, &b)? {
        return Ok(());
    }
    let text = fail_message(
        &ctx,
        message.0,
        format!(
            "{} == {}",
            coerce_string(&ctx, a)?,
            coerce_string(&ctx, b)?
        ),
    )?;
    Err(assertion_error(&ctx, &text))
}

fn assert_not_equal<'js>(
    ctx: Ctx<'js>,
    a: Value<'js>,
    b: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if !loose_equal(&ctx, &a, &b)? {
        return Ok(());
    }
    let text = fail_message(
        &ctx,
        message.0,
        format!("{} != {}", coerce_string(&ctx, a)?, coerce_string(&ctx, b)?),
    )?;
    Err(assertion_error(&ctx, &text))
}

fn assert_strict_equal<'js>(
    ctx: Ctx<'js>,
    a: Value<'js>,
    b: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if strict_equal(&ctx, &a, &b)? {
        return Ok(());
    }
    let text = fail_message(
        &ctx,
        message.0,
        format!(
            "{} === {}",
            coerce_string(&ctx, a)?,
            coerce_string(&ctx, b)?
        ),
    )?;
    Err(assertion_error(&ctx, &text))
}

fn assert_not_strict_equal<'js>(
    ctx: Ctx<'js>,
    a: Value<'js>,
    b: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if !strict_equal(&ctx, &a, &b)? {
        return Ok(());
    }
    let text = fail_message(
        &ctx,
        message.0,
        format!(
            "{} !== {}",
            coerce_string(&ctx, a)?,
            coerce_string(&ctx, b)?
        ),
    )?;
    Err(assertion_error(&ctx, &text))
}

fn assert_deep_equal<'js>(
    ctx: Ctx<'js>,
    a: Value<'js>,
    b: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if deep_equal(&ctx, &a, &b)? {
        return Ok(());
    }
    let text = fail_message(&ctx, message.0, "values are not deeply equal".into())?;
    Err(assertion_error(&ctx, &text))
}

fn assert_not_deep_equal<'js>(
    ctx: Ctx<'js>,
    a: Value<'js>,
    b: Value<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    if !deep_equal(&ctx, &a, &b)? {
        return Ok(());
    }
    let text = fail_message(&ctx, message.0, "values are deeply equal".into())?;
    Err(assertion_error(&ctx, &text))
}

fn assert_throws<'js>(
    ctx: Ctx<'js>,
    callback: Function<'js>,
    message: Opt<Value<'js>>,
) -> rquickjs::Result<()> {
    let result: rquickjs::Result<Value> = callback.call(());
    match result {
        Ok(_) => {
            let text = fail_message(&ctx, message.0, "missing expected exception".into())?;
            Err(assertion_error(&ctx, &text))
        }
        Err(_) => {
            // Swallow the thrown value; throwing was the point.
            let _ = ctx.catch();
            Ok(())
        }
    }
}

fn assert_does_not_throw<'js>(
    _ctx: Ctx<'js>,
    callback: Function<'js>,
    _args: Rest<Value<'js>>,
) -> rquickjs::Result<()> {
    let result: rquickjs::Result<Value> = callback.call(());
    match result {
        Ok(_) => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn create<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
    let assert = Function::new(ctx.clone(), assert_ok)?;
    let object: &Object = assert.as_ref();

    object.set("ok", Func::from(assert_ok))?;
    object.set("equal", Func::from(assert_equal))?;
    object.set("notEqual", Func::from(assert_not_equal))?;
    object.set("strictEqual", Func::from(assert_strict_equal))?;
    object.set("notStrictEqual", Func::from(assert_not_strict_equal))?;
    object.set("deepEqual", Func::from(assert_deep_equal))?;
    object.set("notDeepEqual", Func::from(assert_not_deep_equal))?;
    object.set("throws", Func::from(assert_throws))?;
    object.set("doesNotThrow", Func::from(assert_does_not_throw))?;

    Ok(assert.into_value())
}
