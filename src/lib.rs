//! Logic graph runtime for Crystal scenes.
//!
//! A [`LogicEngine`] owns a graph of logic nodes (sandboxed Lua scripts,
//! interfaces, scene bindings, animations and timers) connected by typed
//! property links, and re-executes only the nodes whose inputs changed.
//! The scene itself stays outside of the crate behind [`SceneBackend`];
//! [`DataModel`] is the in-memory implementation used by the binary and
//! the tests.

pub mod animation;
pub mod binding;
pub mod config;
pub mod data_model;
pub mod engine;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod property;
pub mod scene;
pub mod scripting;
pub mod serialize;
pub mod timer;

pub use animation::{AnimationChannel, AnimationError, AnimationNode, Interpolation};
pub use binding::{BindingError, BindingKind, BindingNode, SceneBackend};
pub use config::EngineConfig;
pub use data_model::DataModel;
pub use engine::{LogicEngine, UpdateReport, Warning};
pub use error::{ErrorEntry, ErrorKind, LogicError};
pub use graph::{GraphError, Link, LinkKind};
pub use id::{LinkId, NodeId, ObjectId};
pub use node::{LogicNode, NodeKind, PropertyHandle, Side};
pub use property::{FromPropertyValue, Property, PropertyError, PropertyType, PropertyValue};
pub use scene::{Frustum, Scene, SceneObject, Uniform, Viewport};
pub use scripting::{LuaConfig, ScriptError, StandardModule};
pub use serialize::SerializationError;
pub use timer::TimerNode;
