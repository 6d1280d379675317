use serde::{Deserialize, Serialize};

use crate::animation::AnimationNode;
use crate::binding::BindingNode;
use crate::id::{NodeId, ObjectId};
use crate::property::Property;
use crate::scripting::{CompiledModule, CompiledScript, LuaConfig};
use crate::timer::TimerNode;

/// Which of a node's two property trees a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Input,
    Output,
}

/// Addresses one property inside a node: the node, the tree and the child
/// index path from that tree's root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyHandle {
    pub node: NodeId,
    pub side: Side,
    pub path: Vec<usize>,
}

impl PropertyHandle {
    pub fn new(node: NodeId, side: Side, path: Vec<usize>) -> Self {
        Self { node, side, path }
    }
}

pub struct ScriptNode {
    pub source: String,
    pub config: LuaConfig,
    pub(crate) compiled: CompiledScript,
}

pub struct ModuleNode {
    pub source: String,
    pub config: LuaConfig,
    pub(crate) compiled: CompiledModule,
}

pub struct InterfaceNode {
    pub source: String,
}

pub enum NodeKind {
    Script(ScriptNode),
    Module(ModuleNode),
    Interface(InterfaceNode),
    Binding(BindingNode),
    Animation(AnimationNode),
    Timer(TimerNode),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Script(_) => "LuaScript",
            NodeKind::Module(_) => "LuaModule",
            NodeKind::Interface(_) => "LuaInterface",
            NodeKind::Binding(binding) => binding.kind().type_name(),
            NodeKind::Animation(_) => "AnimationNode",
            NodeKind::Timer(_) => "TimerNode",
        }
    }

    /// Modules are libraries; every other kind takes part in `update()`.
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, NodeKind::Module(_))
    }
}

/// A node in the logic graph.
pub struct LogicNode {
    pub(crate) object_id: ObjectId,
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) inputs: Property,
    pub(crate) outputs: Property,
    /// Forced re-execution: set on creation, on link and after load.
    pub(crate) pending: bool,
    pub(crate) failed: bool,
}

impl LogicNode {
    pub(crate) fn new(
        object_id: ObjectId,
        name: impl Into<String>,
        kind: NodeKind,
        inputs: Property,
        outputs: Property,
    ) -> Self {
        // bindings start clean; their inputs mirror the scene already
        let pending = !matches!(kind, NodeKind::Binding(_) | NodeKind::Module(_));
        Self {
            object_id,
            name: name.into(),
            kind,
            inputs,
            outputs,
            pending,
            failed: false,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn inputs(&self) -> &Property {
        &self.inputs
    }

    /// Output tree. Interfaces expose their single tree on both sides.
    pub fn outputs(&self) -> &Property {
        self.root(Side::Output)
    }

    pub fn root(&self, side: Side) -> &Property {
        match (&self.kind, side) {
            (NodeKind::Interface(_), _) | (_, Side::Input) => &self.inputs,
            (_, Side::Output) => &self.outputs,
        }
    }

    pub(crate) fn root_mut(&mut self, side: Side) -> &mut Property {
        match (&self.kind, side) {
            (NodeKind::Interface(_), _) | (_, Side::Input) => &mut self.inputs,
            (_, Side::Output) => &mut self.outputs,
        }
    }

    /// Whether `side` of this node may act as a link source (outputs) or
    /// target (inputs).
    pub fn accepts(&self, side: Side, as_source: bool) -> bool {
        match &self.kind {
            NodeKind::Interface(_) => true,
            NodeKind::Module(_) => false,
            _ => (side == Side::Output) == as_source,
        }
    }

    pub fn is_dirty(&self) -> bool {
        let ticking = matches!(&self.kind, NodeKind::Timer(timer) if timer.is_auto(&self.inputs));
        self.pending || self.failed || self.inputs.is_dirty() || ticking
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn mark_executed(&mut self) {
        self.pending = false;
        self.failed = false;
        self.inputs.clear_dirty();
    }
}
