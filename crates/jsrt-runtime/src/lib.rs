//! jsrt-runtime: a small general-purpose JavaScript runtime.
//!
//! QuickJS (via `rquickjs`) bound to a single-threaded event loop, with a
//! curated web-platform global surface, ES + CommonJS module loading, an
//! event-loop-driven HTTP client behind `fetch`, and a bytecode packager
//! for self-contained executables.
//!
//! # Example
//!
//! ```no_run
//! use jsrt_runtime::JsRuntime;
//!
//! let mut runtime = JsRuntime::new(std::env::args().collect()).unwrap();
//! let result = runtime.eval("demo.js", "console.log('hello')").unwrap();
//! let _ = runtime.await_value(result).unwrap();
//! runtime.run().unwrap();
//! runtime.free();
//! ```

pub mod builtins;
pub mod bytecode;
pub mod error;
pub mod event_loop;
pub mod modules;
pub mod require;
pub mod runtime;
pub mod state;
pub mod value;
pub mod web;

pub use bytecode::{BOUNDARY, embedded_payload};
pub use error::{Result, RuntimeError};
pub use runtime::{JsRuntime, SavedValue};
