//! Sandboxed Lua execution for scripts, interfaces and modules.

mod access;
mod config;
mod runtime;
mod sandbox;
mod types;

pub use config::{LuaConfig, StandardModule};
pub use runtime::{CompiledModule, CompiledScript, LuaRuntime};

pub(crate) use sandbox::ChunkKind;

/// Script failures, split by where they happened.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Loading, `init()` or `interface()` failed.
    #[error("{name}: {message}")]
    Compile { name: String, message: String },
    /// The script touched state outside its sandbox.
    #[error("{name}: {message}")]
    Isolation { name: String, message: String },
    /// `run()` raised an error.
    #[error("{name}: {message}")]
    Runtime { name: String, message: String },
}

impl ScriptError {
    pub(crate) fn compile(name: &str, message: impl Into<String>) -> Self {
        ScriptError::Compile {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ScriptError::Compile { message, .. }
            | ScriptError::Isolation { message, .. }
            | ScriptError::Runtime { message, .. } => message,
        }
    }
}
