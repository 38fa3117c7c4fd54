//! Builtin `std:` modules, shared by `require` and the ES loader.

use rquickjs::function::Func;
use rquickjs::{Ctx, Exception, Value};

pub mod assert;
pub mod ffi;
pub mod process;

const NAMES: &[&str] = &["assert", "process", "ffi"];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Build the named builtin's export. `None` for unknown names; the caller
/// decides how to report that.
pub fn create<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Option<Value<'js>>> {
    match name {
        "assert" => assert::create(ctx).map(Some),
        "process" => process::create(ctx).map(Some),
        "ffi" => ffi::create(ctx).map(Some),
        _ => Ok(None),
    }
}

fn builtin_hook<'js>(ctx: Ctx<'js>, name: String) -> rquickjs::Result<Value<'js>> {
    match create(&ctx, &name)? {
        Some(module) => Ok(module),
        None => Err(Exception::throw_reference(
            &ctx,
            &format!("Unknown std module '{name}'"),
        )),
    }
}

/// Install the loader hook the `std:` ES module shims call into.
pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.globals()
        .set("__jsrt_builtin", Func::from(builtin_hook))?;
    Ok(())
}
