//! `console`: log/info/debug to stdout, warn/error to stderr. Arguments are
//! joined with single spaces; non-strings render through the engine's JSON
//! serializer with a `String(v)` fallback.

use rquickjs::function::{Func, Rest};
use rquickjs::{Ctx, Object, Value};

use crate::value::display_value;

fn join_args<'js>(ctx: &Ctx<'js>, args: Vec<Value<'js>>) -> String {
    args.into_iter()
        .map(|value| display_value(ctx, value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_stdout<'js>(ctx: Ctx<'js>, args: Rest<Value<'js>>) {
    println!("{}", join_args(&ctx, args.0));
}

fn log_stderr<'js>(ctx: Ctx<'js>, args: Rest<Value<'js>>) {
    eprintln!("{}", join_args(&ctx, args.0));
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    console.set("log", Func::from(log_stdout))?;
    console.set("info", Func::from(log_stdout))?;
    console.set("debug", Func::from(log_stdout))?;
    console.set("warn", Func::from(log_stderr))?;
    console.set("error", Func::from(log_stderr))?;
    ctx.globals().set("console", console)?;
    Ok(())
}
