//! CommonJS `require`.
//!
//! Synchronous wrapper-function evaluation with a per-runtime cache keyed by
//! canonical path. The in-progress `exports` object is cached before the
//! wrapper runs, so circular requires observe partial exports instead of
//! recursing forever.

use std::path::Path;

use rquickjs::function::{Func, Opt};
use rquickjs::{Ctx, Exception, Function, Object, Persistent, Value};

use crate::builtins;
use crate::modules::{BUILTIN_PREFIX, probe_suffixes, resolve_request};
use crate::state;

/// The global `require`. Nested modules receive a variant with `base` bound
/// to their own directory so relative requests resolve against the
/// requiring module.
fn require<'js>(
    ctx: Ctx<'js>,
    name: String,
    base: Opt<String>,
) -> rquickjs::Result<Value<'js>> {
    if let Some(builtin) = name.strip_prefix(BUILTIN_PREFIX) {
        return match builtins::create(&ctx, builtin)? {
            Some(module) => Ok(module),
            None => Err(Exception::throw_reference(
                &ctx,
                &format!("Unknown std module '{builtin}'"),
            )),
        };
    }

    let base_dir = base.0.clone();
    let candidate = resolve_request(base_dir.as_deref().map(Path::new), &name);
    let Some(found) = probe_suffixes(&candidate) else {
        return Err(Exception::throw_reference(
            &ctx,
            &format!("Cannot find module '{name}'"),
        ));
    };
    let canonical = found.canonicalize().unwrap_or(found);
    let key = canonical.to_string_lossy().into_owned();

    let host = state::host_state(&ctx);
    if let Some(cached) = host.require_cache.borrow().get(&key) {
        return cached.clone().restore(&ctx);
    }

    let source = std::fs::read_to_string(&canonical).map_err(|err| {
        Exception::throw_reference(&ctx, &format!("Cannot find module '{name}': {err}"))
    })?;

    let filename = key.clone();
    let dirname = canonical
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());

    let wrapper: Function = ctx.eval(format!(
        "(function(exports, require, module, __filename, __dirname) {{\n{source}\n}})"
    ))?;

    let module = Object::new(ctx.clone())?;
    let exports = Object::new(ctx.clone())?;
    module.set("exports", exports.clone())?;

    // Visible to cycles from this point on.
    host.require_cache.borrow_mut().insert(
        key.clone(),
        Persistent::save(&ctx, exports.clone().into_value()),
    );

    let global_require: Function = ctx.globals().get("require")?;
    let bind: Function = ctx.eval("(req, base) => (name) => req(name, base)")?;
    let scoped_require: Function = bind.call((global_require, dirname.clone()))?;

    let invoked: rquickjs::Result<()> = wrapper.call((
        exports.clone(),
        scoped_require,
        module.clone(),
        filename,
        dirname,
    ));
    if let Err(err) = invoked {
        host.require_cache.borrow_mut().remove(&key);
        return Err(err);
    }

    let final_exports: Value = module.get("exports")?;
    host.require_cache
        .borrow_mut()
        .insert(key, Persistent::save(&ctx, final_exports.clone()));
    Ok(final_exports)
}

pub fn register(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.globals().set("require", Func::from(require))?;
    Ok(())
}
