//! Web-platform host APIs registered on the global object.
//!
//! Each submodule owns one API family and exposes a `register` entry point;
//! `register_all` installs them in dependency order.

use rquickjs::Ctx;

pub mod abort;
pub mod blob;
pub mod clone;
pub mod console;
pub mod encoding;
pub mod event;
pub mod fetch;
pub mod formdata;
pub mod http_client;
pub mod performance;
pub mod timers;
pub mod url;

pub fn register_all(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    console::register(ctx)?;
    timers::register(ctx)?;
    encoding::register(ctx)?;
    performance::register(ctx)?;
    event::register(ctx)?;
    abort::register(ctx)?;
    formdata::register(ctx)?;
    url::register(ctx)?;
    clone::register(ctx)?;
    blob::register(ctx)?;
    fetch::register(ctx)?;
    Ok(())
}
