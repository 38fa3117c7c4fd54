//! `performance.now()` relative to runtime start, plus `timeOrigin`.

use rquickjs::function::Func;
use rquickjs::{Ctx, Object};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::state;

fn now(ctx: Ctx<'_>) -> f64 {
    state::host_state(&ctx).started.elapsed().as_secs_f64() * 1000.0
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let performance = Object::new(ctx.clone())?;
    performance.set("now", Func::from(now))?;
    let origin = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
        - state::host_state(ctx).started.elapsed().as_secs_f64() * 1000.0;
    performance.set("timeOrigin", origin)?;
    ctx.globals().set("performance", performance)?;
    Ok(())
}
