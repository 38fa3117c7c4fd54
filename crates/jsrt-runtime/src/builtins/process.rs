//! `std:process` and the `process` global.

use rquickjs::function::{Func, Opt};
use rquickjs::{Array, Ctx, Object, Value};

use crate::state;

fn platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

fn arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    }
}

fn exit(code: Opt<i32>) {
    std::process::exit(code.0.unwrap_or(0));
}

fn cwd() -> String {
    std::env::current_dir()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_string())
}

fn uptime(ctx: Ctx<'_>) -> f64 {
    state::host_state(&ctx).started.elapsed().as_secs_f64()
}

pub fn create<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
    let host = state::host_state(ctx);
    let process = Object::new(ctx.clone())?;

    let argv = Array::new(ctx.clone())?;
    for (index, arg) in host.argv.iter().enumerate() {
        argv.set(index, arg.clone())?;
    }
    process.set("argv", argv)?;
    process.set(
        "argv0",
        host.argv.first().cloned().unwrap_or_default(),
    )?;
    process.set("platform", platform())?;
    process.set("arch", arch())?;
    process.set("pid", std::process::id())?;
    process.set("version", concat!("v", env!("CARGO_PKG_VERSION")))?;

    let versions = Object::new(ctx.clone())?;
    versions.set("jsrt", env!("CARGO_PKG_VERSION"))?;
    process.set("versions", versions)?;

    let env = Object::new(ctx.clone())?;
    for (name, value) in std::env::vars() {
        env.set(name, value)?;
    }
    process.set("env", env)?;

    process.set("exit", Func::from(exit))?;
    process.set("cwd", Func::from(cwd))?;
    process.set("uptime", Func::from(uptime))?;

    Ok(process.into_value())
}

/// The `process` global is the same shape as the `std:process` module.
pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let process = create(ctx)?;
    ctx.globals().set("process", process)?;
    Ok(())
}
