//! Timer globals and `queueMicrotask`.
//!
//! Timers and immediates go to the event loop; `queueMicrotask` enqueues an
//! engine job (a resolved-promise reaction), never a reactor callback.

use std::time::Duration;

use rquickjs::function::{Func, Opt, Rest, This};
use rquickjs::{Ctx, Exception, Function, Object, Persistent, Value};

use crate::state;

fn delay_from(ms: Option<f64>) -> Duration {
    Duration::from_millis(ms.unwrap_or(0.0).max(0.0) as u64)
}

fn save_args<'js>(
    ctx: &Ctx<'js>,
    args: Vec<Value<'js>>,
) -> Vec<Persistent<Value<'static>>> {
    args.into_iter()
        .map(|value| Persistent::save(ctx, value))
        .collect()
}

fn set_timeout<'js>(
    ctx: Ctx<'js>,
    callback: Function<'js>,
    ms: Opt<f64>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<f64> {
    let host = state::host_state(&ctx);
    let id = host.loop_shared.schedule_timer(
        Persistent::save(&ctx, callback),
        save_args(&ctx, args.0),
        delay_from(ms.0),
        None,
    );
    Ok(id as f64)
}

fn set_interval<'js>(
    ctx: Ctx<'js>,
    callback: Function<'js>,
    ms: Opt<f64>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<f64> {
    let host = state::host_state(&ctx);
    let delay = delay_from(ms.0);
    let id = host.loop_shared.schedule_timer(
        Persistent::save(&ctx, callback),
        save_args(&ctx, args.0),
        delay,
        Some(delay),
    );
    Ok(id as f64)
}

fn clear_timer(ctx: Ctx<'_>, id: Opt<f64>) {
    if let Some(id) = id.0 {
        state::host_state(&ctx).loop_shared.clear_timer(id as u64);
    }
}

fn set_immediate<'js>(
    ctx: Ctx<'js>,
    callback: Function<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<f64> {
    let host = state::host_state(&ctx);
    let id = host
        .loop_shared
        .schedule_immediate(Persistent::save(&ctx, callback), save_args(&ctx, args.0));
    Ok(id as f64)
}

fn clear_immediate(ctx: Ctx<'_>, id: Opt<f64>) {
    if let Some(id) = id.0 {
        state::host_state(&ctx)
            .loop_shared
            .clear_immediate(id as u64);
    }
}

fn queue_microtask<'js>(ctx: Ctx<'js>, callback: Value<'js>) -> rquickjs::Result<()> {
    let Some(callback) = callback.into_function() else {
        return Err(Exception::throw_type(
            &ctx,
            "queueMicrotask argument must be a function",
        ));
    };
    let resolved: Object = ctx.eval("Promise.resolve()")?;
    let then: Function = resolved.get("then")?;
    then.call::<_, ()>((This(resolved.clone()), callback))?;
    Ok(())
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("setTimeout", Func::from(set_timeout))?;
    globals.set("setInterval", Func::from(set_interval))?;
    globals.set("clearTimeout", Func::from(clear_timer))?;
    globals.set("clearInterval", Func::from(clear_timer))?;
    globals.set("setImmediate", Func::from(set_immediate))?;
    globals.set("clearImmediate", Func::from(clear_immediate))?;
    globals.set("queueMicrotask", Func::from(queue_microtask))?;
    Ok(())
}
