//! Error types for jsrt-runtime.

use thiserror::Error;

/// Errors that can occur while driving the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Engine-level failure (allocation, conversion, pending exception).
    #[error(transparent)]
    Engine(#[from] rquickjs::Error),

    /// A script failed; the payload is the formatted `message\nstack` text.
    #[error("{message}")]
    Script { message: String },

    /// Filesystem or socket failure outside the engine.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Reactor construction or teardown failure. Not recoverable.
    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl RuntimeError {
    /// Wrap a formatted JavaScript error string.
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// True for errors that should abort the process rather than be reported
    /// as a script failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
