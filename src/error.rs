use crate::animation::AnimationError;
use crate::binding::BindingError;
use crate::graph::GraphError;
use crate::id::NodeId;
use crate::property::PropertyError;
use crate::scripting::ScriptError;
use crate::serialize::SerializationError;

/// Every error the engine API can return.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogicError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Animation(#[from] AnimationError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("module '{module}' is still used by '{user}'")]
    ModuleInUse { module: String, user: String },
    #[error("'{0}' is not a Lua module")]
    NotAModule(String),
    #[error("duplicate module alias '{0}' in LuaConfig")]
    DuplicateAlias(String),
    #[error("Lua interpreter error: {0}")]
    Interpreter(String),
}

impl From<mlua::Error> for LogicError {
    fn from(err: mlua::Error) -> Self {
        LogicError::Interpreter(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    Isolation,
    Runtime,
    Property,
    Graph,
    Animation,
    Binding,
    Serialization,
    Usage,
}

impl From<&LogicError> for ErrorKind {
    fn from(err: &LogicError) -> Self {
        match err {
            LogicError::Script(ScriptError::Compile { .. }) => ErrorKind::Compile,
            LogicError::Script(ScriptError::Isolation { .. }) => ErrorKind::Isolation,
            LogicError::Script(ScriptError::Runtime { .. }) => ErrorKind::Runtime,
            LogicError::Property(_) => ErrorKind::Property,
            LogicError::Graph(_) => ErrorKind::Graph,
            LogicError::Animation(_) => ErrorKind::Animation,
            LogicError::Binding(_) => ErrorKind::Binding,
            LogicError::Serialization(_) => ErrorKind::Serialization,
            LogicError::ModuleInUse { .. }
            | LogicError::NotAModule(_)
            | LogicError::DuplicateAlias(_)
            | LogicError::Interpreter(_) => ErrorKind::Usage,
        }
    }
}

/// One entry of [`LogicEngine::errors`](crate::engine::LogicEngine::errors).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    pub node: Option<NodeId>,
    pub node_name: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}
