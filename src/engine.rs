//! The [`LogicEngine`] owns every node, link and the interpreter of one
//! logic graph, and drives incremental updates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use slotmap::{SecondaryMap, SlotMap};

use crate::animation::{AnimationChannel, AnimationNode};
use crate::binding::{BindingKind, BindingNode, SceneBackend};
use crate::config::EngineConfig;
use crate::error::{ErrorEntry, ErrorKind, LogicError};
use crate::graph::{GraphError, Link, LinkGraph, LinkKind};
use crate::id::{LinkId, NodeId, ObjectId};
use crate::node::{
    InterfaceNode, LogicNode, ModuleNode, NodeKind, PropertyHandle, ScriptNode, Side,
};
use crate::property::{FromPropertyValue, Property, PropertyValue};
use crate::scripting::{ChunkKind, CompiledModule, LuaConfig, LuaRuntime};
use crate::timer::TimerNode;

/// Timings collected by `update()` when enabled in [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub executed: Vec<(NodeId, Duration)>,
    pub skipped: Vec<NodeId>,
    pub total: Duration,
}

/// Result of [`LogicEngine::validate`]. Not an error, but usually a mistake.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub node: NodeId,
    pub message: String,
}

pub struct LogicEngine {
    pub(crate) config: EngineConfig,
    pub(crate) runtime: LuaRuntime,
    pub(crate) scene: Option<Arc<dyn SceneBackend>>,
    pub(crate) nodes: SlotMap<NodeId, LogicNode>,
    pub(crate) graph: LinkGraph,
    /// Source values captured at the end of the previous update.
    weak_values: SecondaryMap<LinkId, PropertyValue>,
    errors: Vec<ErrorEntry>,
    pub(crate) next_object_id: u64,
    last_report: Option<UpdateReport>,
}

impl LogicEngine {
    pub fn new() -> Result<Self, LogicError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, LogicError> {
        let runtime = LuaRuntime::new(config.instruction_limit)?;
        Ok(Self {
            config,
            runtime,
            scene: None,
            nodes: SlotMap::with_key(),
            graph: LinkGraph::new(),
            weak_values: SecondaryMap::new(),
            errors: Vec::new(),
            next_object_id: 1,
            last_report: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Attaches the scene bindings push to and read their initial state from.
    pub fn set_scene(&mut self, scene: Arc<dyn SceneBackend>) {
        self.scene = Some(scene);
    }

    pub fn scene(&self) -> Option<&Arc<dyn SceneBackend>> {
        self.scene.as_ref()
    }

    /// Errors of the last failing operation or `update()`.
    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn last_update_report(&self) -> Option<&UpdateReport> {
        self.last_report.as_ref()
    }

    // ---- creation ---------------------------------------------------------

    pub fn create_lua_script(
        &mut self,
        source: &str,
        config: LuaConfig,
        name: &str,
    ) -> Result<NodeId, LogicError> {
        self.errors.clear();
        let result = self
            .build_script(source, config, name, ChunkKind::Script, None)
            .map(|(kind, inputs, outputs)| self.insert_node(None, name, kind, inputs, outputs));
        self.record(None, name, result)
    }

    pub fn create_lua_module(
        &mut self,
        source: &str,
        config: LuaConfig,
        name: &str,
    ) -> Result<NodeId, LogicError> {
        self.errors.clear();
        let result = self
            .build_module(source, config, name)
            .map(|kind| self.insert_node(None, name, kind, empty("IN"), empty("OUT")));
        self.record(None, name, result)
    }

    pub fn create_lua_interface(&mut self, source: &str, name: &str) -> Result<NodeId, LogicError> {
        self.errors.clear();
        let result = self
            .build_script(source, LuaConfig::new(), name, ChunkKind::Interface, None)
            .map(|(kind, inputs, outputs)| self.insert_node(None, name, kind, inputs, outputs));
        self.record(None, name, result)
    }

    pub fn create_node_binding(&mut self, target: &str, name: &str) -> Result<NodeId, LogicError> {
        self.create_binding(BindingKind::Node, target, name)
    }

    pub fn create_appearance_binding(
        &mut self,
        target: &str,
        name: &str,
    ) -> Result<NodeId, LogicError> {
        self.create_binding(BindingKind::Appearance, target, name)
    }

    pub fn create_camera_binding(&mut self, target: &str, name: &str) -> Result<NodeId, LogicError> {
        self.create_binding(BindingKind::Camera, target, name)
    }

    fn create_binding(
        &mut self,
        kind: BindingKind,
        target: &str,
        name: &str,
    ) -> Result<NodeId, LogicError> {
        self.errors.clear();
        let result = self
            .build_binding(kind, target)
            .map(|(kind, inputs)| self.insert_node(None, name, kind, inputs, empty("OUT")));
        self.record(None, name, result)
    }

    pub fn create_animation_node(
        &mut self,
        channels: Vec<AnimationChannel>,
        name: &str,
    ) -> Result<NodeId, LogicError> {
        self.errors.clear();
        let result = AnimationNode::new(channels)
            .map_err(LogicError::from)
            .map(|animation| {
                let (inputs, outputs) = animation.interface();
                self.insert_node(None, name, NodeKind::Animation(animation), inputs, outputs)
            });
        self.record(None, name, result)
    }

    pub fn create_timer_node(&mut self, name: &str) -> NodeId {
        let (inputs, outputs) = TimerNode::interface();
        self.insert_node(None, name, NodeKind::Timer(TimerNode::new()), inputs, outputs)
    }

    pub(crate) fn resolve_modules(
        &self,
        config: &LuaConfig,
    ) -> Result<Vec<(String, &CompiledModule)>, LogicError> {
        let mut resolved: Vec<(String, &CompiledModule)> = Vec::new();
        for (alias, id) in config.modules() {
            if resolved.iter().any(|(existing, _)| existing == alias) {
                return Err(LogicError::DuplicateAlias(alias.clone()));
            }
            let node = self
                .nodes
                .get(*id)
                .ok_or(GraphError::NodeNotFound(*id))?;
            let NodeKind::Module(module) = &node.kind else {
                return Err(LogicError::NotAModule(node.name.clone()));
            };
            resolved.push((alias.clone(), &module.compiled));
        }
        Ok(resolved)
    }

    /// Compiles a script or interface. `declared` holds property trees
    /// restored from a saved file; without them `interface()` is run.
    pub(crate) fn build_script(
        &self,
        source: &str,
        config: LuaConfig,
        name: &str,
        kind: ChunkKind,
        declared: Option<(Property, Property)>,
    ) -> Result<(NodeKind, Property, Property), LogicError> {
        let modules = self.resolve_modules(&config)?;
        let compiled = self
            .runtime
            .compile_script(name, source, kind, &config, &modules)?;
        let (inputs, outputs) = match declared {
            Some(trees) => trees,
            None => self.runtime.declare_interface(&compiled)?,
        };
        let source = source.to_string();
        let kind = match kind {
            // interfaces never run, only their declared tree is kept
            ChunkKind::Interface => NodeKind::Interface(InterfaceNode { source }),
            _ => NodeKind::Script(ScriptNode {
                source,
                config,
                compiled,
            }),
        };
        Ok((kind, inputs, outputs))
    }

    pub(crate) fn build_module(
        &self,
        source: &str,
        config: LuaConfig,
        name: &str,
    ) -> Result<NodeKind, LogicError> {
        let modules = self.resolve_modules(&config)?;
        let compiled = self
            .runtime
            .compile_module(name, source, &config, &modules)?;
        Ok(NodeKind::Module(ModuleNode {
            source: source.to_string(),
            config,
            compiled,
        }))
    }

    pub(crate) fn build_binding(
        &self,
        kind: BindingKind,
        target: &str,
    ) -> Result<(NodeKind, Property), LogicError> {
        let binding = BindingNode::new(kind, target);
        let object = match &self.scene {
            Some(scene) => Some(
                scene
                    .object(target)
                    .ok_or_else(|| crate::binding::BindingError::UnknownObject(target.to_string()))?,
            ),
            None => None,
        };
        let inputs = binding.interface(object.as_ref())?;
        Ok((NodeKind::Binding(binding), inputs))
    }

    /// Inserts a node. `object_id` is only given when restoring a saved
    /// graph; new nodes take the next free id.
    pub(crate) fn insert_node(
        &mut self,
        object_id: Option<ObjectId>,
        name: &str,
        kind: NodeKind,
        inputs: Property,
        outputs: Property,
    ) -> NodeId {
        let object_id = object_id.unwrap_or_else(|| {
            let id = ObjectId(self.next_object_id);
            self.next_object_id += 1;
            id
        });
        let scheduled = kind.is_scheduled();
        let node = LogicNode::new(object_id, name, kind, inputs, outputs);
        log::info!("created {} '{}'", node.type_name(), name);
        let id = self.nodes.insert(node);
        self.graph.add_node(id, object_id, scheduled);
        id
    }

    /// Destroys a node and every link touching it. Modules still used by a
    /// script or another module cannot be destroyed.
    pub fn destroy(&mut self, node: NodeId) -> Result<(), LogicError> {
        self.errors.clear();
        let name = self
            .nodes
            .get(node)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        let result = self.destroy_inner(node);
        self.record(Some(node), &name, result)
    }

    fn destroy_inner(&mut self, node: NodeId) -> Result<(), LogicError> {
        let target = self.nodes.get(node).ok_or(GraphError::NodeNotFound(node))?;
        if let NodeKind::Module(_) = target.kind {
            let user = self.nodes.values().find(|other| match &other.kind {
                NodeKind::Script(script) => script.config.uses_module(node),
                NodeKind::Module(module) => module.config.uses_module(node),
                _ => false,
            });
            if let Some(user) = user {
                return Err(LogicError::ModuleInUse {
                    module: target.name.clone(),
                    user: user.name.clone(),
                });
            }
        }

        for (link_id, link) in self.graph.remove_node(node) {
            self.weak_values.remove(link_id);
            if link.target.node != node {
                if let Some(target) = self.nodes.get_mut(link.target.node) {
                    target
                        .root_mut(link.target.side)
                        .set_incoming_at(&link.target.path, None);
                }
            }
        }
        if let Some(removed) = self.nodes.remove(node) {
            log::info!("destroyed {} '{}'", removed.type_name(), removed.name);
        }
        self.runtime.collect_garbage();
        Ok(())
    }

    // ---- lookup -----------------------------------------------------------

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.name == name)
            .min_by_key(|(_, node)| node.object_id)
            .map(|(id, _)| id)
    }

    pub fn node(&self, id: NodeId) -> Option<&LogicNode> {
        self.nodes.get(id)
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> Vec<(NodeId, &LogicNode)> {
        let mut nodes: Vec<_> = self.nodes.iter().collect();
        nodes.sort_by_key(|(_, node)| node.object_id);
        nodes
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.graph.links()
    }

    pub fn input(&self, node: NodeId, path: &str) -> Option<PropertyHandle> {
        self.handle(node, Side::Input, path)
    }

    pub fn output(&self, node: NodeId, path: &str) -> Option<PropertyHandle> {
        self.handle(node, Side::Output, path)
    }

    fn handle(&self, node: NodeId, side: Side, path: &str) -> Option<PropertyHandle> {
        let indices = self.nodes.get(node)?.root(side).resolve_path(path)?;
        Some(PropertyHandle::new(node, side, indices))
    }

    pub fn property(&self, handle: &PropertyHandle) -> Option<&Property> {
        self.nodes
            .get(handle.node)?
            .root(handle.side)
            .at(&handle.path)
    }

    pub fn get_property<T: FromPropertyValue>(&self, handle: &PropertyHandle) -> Option<T> {
        self.property(handle).and_then(Property::get::<T>)
    }

    /// Sets an input value. Outputs are written by their nodes only.
    pub fn set_property(
        &mut self,
        handle: &PropertyHandle,
        value: impl Into<PropertyValue>,
    ) -> Result<bool, LogicError> {
        self.errors.clear();
        let value = value.into();
        let (name, result) = match self.nodes.get_mut(handle.node) {
            None => (String::new(), Err(GraphError::NodeNotFound(handle.node).into())),
            Some(node) => {
                let result = if node.accepts(handle.side, false) {
                    node.root_mut(handle.side)
                        .set_at(&handle.path, value)
                        .map_err(LogicError::from)
                } else {
                    let property = node.root(handle.side).path_name(&handle.path);
                    Err(GraphError::NotAnInput(property).into())
                };
                (node.name.clone(), result)
            }
        };
        self.record(Some(handle.node), &name, result)
    }

    /// Whether `handle` is the source or target of any link.
    pub fn is_linked(&self, handle: &PropertyHandle) -> bool {
        let handle = self.canonical(handle);
        self.graph
            .incoming(handle.node)
            .iter()
            .chain(self.graph.outgoing(handle.node))
            .filter_map(|&id| self.graph.link(id))
            .any(|link| link.source == handle || link.target == handle)
    }

    /// Interfaces expose one tree on both sides; links always refer to it
    /// as the input side.
    fn canonical(&self, handle: &PropertyHandle) -> PropertyHandle {
        match self.nodes.get(handle.node).map(|node| &node.kind) {
            Some(NodeKind::Interface(_)) => {
                PropertyHandle::new(handle.node, Side::Input, handle.path.clone())
            }
            _ => handle.clone(),
        }
    }

    fn describe(&self, handle: &PropertyHandle) -> String {
        match self.nodes.get(handle.node) {
            Some(node) => format!(
                "{}:{}",
                node.name,
                node.root(handle.side).path_name(&handle.path)
            ),
            None => format!("{:?}", handle.node),
        }
    }

    // ---- links ------------------------------------------------------------

    pub fn link(
        &mut self,
        source: &PropertyHandle,
        target: &PropertyHandle,
    ) -> Result<LinkId, LogicError> {
        self.link_with_kind(source, target, LinkKind::Strong)
    }

    /// Links without ordering: the target receives the source value of the
    /// previous update. Allowed to close cycles.
    pub fn link_weak(
        &mut self,
        source: &PropertyHandle,
        target: &PropertyHandle,
    ) -> Result<LinkId, LogicError> {
        self.link_with_kind(source, target, LinkKind::Weak)
    }

    fn link_with_kind(
        &mut self,
        source: &PropertyHandle,
        target: &PropertyHandle,
        kind: LinkKind,
    ) -> Result<LinkId, LogicError> {
        self.errors.clear();
        let source = self.canonical(source);
        let target = self.canonical(target);
        let result = self
            .check_link(&source, &target, kind)
            .map_err(LogicError::from)
            .map(|()| self.insert_link(source.clone(), target.clone(), kind));
        let name = self
            .nodes
            .get(target.node)
            .map(|node| node.name.clone())
            .unwrap_or_default();
        self.record(Some(target.node), &name, result)
    }

    /// Every rule a new link must satisfy. Nothing is modified.
    pub(crate) fn check_link(
        &self,
        source: &PropertyHandle,
        target: &PropertyHandle,
        kind: LinkKind,
    ) -> Result<(), GraphError> {
        let source_node = self
            .nodes
            .get(source.node)
            .ok_or(GraphError::NodeNotFound(source.node))?;
        let target_node = self
            .nodes
            .get(target.node)
            .ok_or(GraphError::NodeNotFound(target.node))?;
        let source_property = source_node
            .root(source.side)
            .at(&source.path)
            .ok_or_else(|| GraphError::PropertyNotFound(self.describe(source)))?;
        let target_property = target_node
            .root(target.side)
            .at(&target.path)
            .ok_or_else(|| GraphError::PropertyNotFound(self.describe(target)))?;

        if !source_node.accepts(source.side, true) {
            return Err(GraphError::NotAnOutput(self.describe(source)));
        }
        if !target_node.accepts(target.side, false) {
            return Err(GraphError::NotAnInput(self.describe(target)));
        }
        if !source_property.is_primitive() {
            return Err(GraphError::ComplexProperty(self.describe(source)));
        }
        if !target_property.is_primitive() {
            return Err(GraphError::ComplexProperty(self.describe(target)));
        }
        if source_property.property_type() != target_property.property_type() {
            return Err(GraphError::TypeMismatch {
                source_name: self.describe(source),
                source_type: source_property.property_type().to_string(),
                target: self.describe(target),
                target_type: target_property.property_type().to_string(),
            });
        }
        if source.node == target.node {
            return Err(GraphError::SelfLink(self.describe(target)));
        }
        if self.graph.incoming_link(target).is_some() {
            return Err(GraphError::AlreadyLinked(self.describe(target)));
        }
        if kind == LinkKind::Strong && self.graph.would_create_cycle(source.node, target.node) {
            return Err(GraphError::CycleDetected {
                source_name: self.describe(source),
                target: self.describe(target),
            });
        }
        Ok(())
    }

    /// Inserts an already checked link and marks both endpoints dirty.
    pub(crate) fn insert_link(
        &mut self,
        source: PropertyHandle,
        target: PropertyHandle,
        kind: LinkKind,
    ) -> LinkId {
        log::debug!(
            "link {} -> {} ({kind:?})",
            self.describe(&source),
            self.describe(&target)
        );
        if let Some(node) = self.nodes.get_mut(target.node) {
            node.root_mut(target.side)
                .set_incoming_at(&target.path, Some(kind));
            node.pending = true;
        }
        if let Some(node) = self.nodes.get_mut(source.node) {
            node.pending = true;
        }
        self.graph.insert_link(Link {
            source,
            target,
            kind,
        })
    }

    /// Removes the link between `source` and `target`. Neither node is
    /// marked dirty.
    pub fn unlink(
        &mut self,
        source: &PropertyHandle,
        target: &PropertyHandle,
    ) -> Result<(), LogicError> {
        self.errors.clear();
        let source = self.canonical(source);
        let target = self.canonical(target);
        let result = match self.graph.find_link(&source, &target) {
            Some(id) => {
                self.graph.remove_link(id);
                self.weak_values.remove(id);
                if let Some(node) = self.nodes.get_mut(target.node) {
                    node.root_mut(target.side)
                        .set_incoming_at(&target.path, None);
                }
                Ok(())
            }
            None => Err(GraphError::NotLinked {
                source_name: self.describe(&source),
                target: self.describe(&target),
            }
            .into()),
        };
        let name = self
            .nodes
            .get(target.node)
            .map(|node| node.name.clone())
            .unwrap_or_default();
        self.record(Some(target.node), &name, result)
    }

    // ---- update -----------------------------------------------------------

    /// Executes every dirty node once, in link order. Returns `false` if any
    /// node failed; see [`errors`](Self::errors).
    pub fn update(&mut self) -> bool {
        self.errors.clear();
        let started = Instant::now();
        let mut report = UpdateReport::default();

        self.deliver_weak_values();

        let order = match self.graph.execution_order().map(<[NodeId]>::to_vec) {
            Ok(order) => order,
            Err(err) => {
                self.push_error(None, None, LogicError::from(err));
                return false;
            }
        };

        for id in order {
            let dirty = self.nodes.get(id).is_some_and(LogicNode::is_dirty);
            if !dirty {
                report.skipped.push(id);
                continue;
            }
            let node_started = Instant::now();
            match self.execute(id) {
                Ok(()) => {
                    self.propagate(id);
                    if let Some(node) = self.nodes.get_mut(id) {
                        node.mark_executed();
                    }
                }
                Err(err) => {
                    let name = self.nodes.get_mut(id).map(|node| {
                        node.failed = true;
                        node.name.clone()
                    });
                    self.push_error(Some(id), name, err);
                }
            }
            report.executed.push((id, node_started.elapsed()));
        }

        self.capture_weak_values();
        for node in self.nodes.values_mut() {
            node.outputs.clear_dirty();
        }

        report.total = started.elapsed();
        log::debug!(
            "update: {} executed, {} skipped, {} error(s) in {:?}",
            report.executed.len(),
            report.skipped.len(),
            self.errors.len(),
            report.total
        );
        self.last_report = self.config.collect_update_report.then_some(report);
        self.errors.is_empty()
    }

    fn execute(&mut self, id: NodeId) -> Result<(), LogicError> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(());
        };
        match &mut node.kind {
            NodeKind::Script(script) => {
                let updated = self
                    .runtime
                    .run(&script.compiled, &node.inputs, &node.outputs)?;
                node.outputs.assign_from(&updated)?;
            }
            NodeKind::Interface(_) | NodeKind::Module(_) => {}
            NodeKind::Binding(binding) => match &self.scene {
                Some(scene) => {
                    binding.push(&node.inputs, scene.as_ref())?;
                }
                None => log::debug!("no scene attached, '{}' pushes nothing", node.name),
            },
            NodeKind::Animation(animation) => {
                animation.evaluate(&node.inputs, &mut node.outputs)?;
            }
            NodeKind::Timer(timer) => {
                timer.tick(&node.inputs, &mut node.outputs)?;
            }
        }
        Ok(())
    }

    /// Copies the values behind every strong link leaving `id` into their
    /// targets. Equal values leave the target clean.
    fn propagate(&mut self, id: NodeId) {
        let Some(source) = self.nodes.get(id) else {
            return;
        };
        let deliveries: Vec<(PropertyHandle, PropertyValue)> = self
            .graph
            .outgoing(id)
            .iter()
            .filter_map(|&link_id| self.graph.link(link_id))
            .filter(|link| link.kind == LinkKind::Strong)
            .filter_map(|link| {
                let value = source.root(link.source.side).at(&link.source.path)?.value()?;
                Some((link.target.clone(), value.clone()))
            })
            .collect();
        for (target, value) in deliveries {
            self.deliver(&target, value);
        }
    }

    fn deliver(&mut self, target: &PropertyHandle, value: PropertyValue) {
        if let Some(node) = self.nodes.get_mut(target.node) {
            if let Err(err) = node.root_mut(target.side).deliver_at(&target.path, value) {
                log::warn!("link delivery into '{}' failed: {err}", node.name);
            }
        }
    }

    fn deliver_weak_values(&mut self) {
        let deliveries: Vec<(PropertyHandle, PropertyValue)> = self
            .graph
            .links()
            .filter(|(_, link)| link.is_weak())
            .filter_map(|(id, link)| {
                self.weak_values
                    .get(id)
                    .map(|value| (link.target.clone(), value.clone()))
            })
            .collect();
        for (target, value) in deliveries {
            self.deliver(&target, value);
        }
    }

    fn capture_weak_values(&mut self) {
        let captured: Vec<(LinkId, PropertyValue)> = self
            .graph
            .links()
            .filter(|(_, link)| link.is_weak())
            .filter_map(|(id, link)| {
                let value = self
                    .nodes
                    .get(link.source.node)?
                    .root(link.source.side)
                    .at(&link.source.path)?
                    .value()?;
                Some((id, value.clone()))
            })
            .collect();
        for (id, value) in captured {
            self.weak_values.insert(id, value);
        }
    }

    // ---- diagnostics ------------------------------------------------------

    /// Reports likely mistakes: interface outputs nobody reads and bindings
    /// nothing drives.
    pub fn validate(&self) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for (id, node) in self.nodes() {
            match &node.kind {
                NodeKind::Interface(_) => {
                    node.inputs.for_each_leaf(&mut |path, _| {
                        let handle = PropertyHandle::new(id, Side::Input, path.to_vec());
                        let has_outgoing = self.graph.outgoing(id).iter().any(|&link| {
                            self.graph
                                .link(link)
                                .is_some_and(|link| link.source == handle)
                        });
                        if !has_outgoing {
                            warnings.push(Warning {
                                node: id,
                                message: format!(
                                    "interface '{}' output '{}' is not linked",
                                    node.name,
                                    node.inputs.path_name(path)
                                ),
                            });
                        }
                    });
                }
                NodeKind::Binding(binding) if self.graph.incoming(id).is_empty() => {
                    warnings.push(Warning {
                        node: id,
                        message: format!(
                            "{} '{}' has no incoming links",
                            binding.kind().type_name(),
                            node.name
                        ),
                    });
                }
                _ => {}
            }
        }
        for warning in &warnings {
            log::warn!("{}", warning.message);
        }
        warnings
    }

    fn push_error(&mut self, node: Option<NodeId>, node_name: Option<String>, err: LogicError) {
        log::warn!(
            "{}{err}",
            node_name
                .as_deref()
                .map(|name| format!("'{name}': "))
                .unwrap_or_default()
        );
        self.errors.push(ErrorEntry {
            node,
            node_name,
            kind: ErrorKind::from(&err),
            message: err.to_string(),
        });
    }

    /// Records a failed API call in `errors()` and passes the result on.
    pub(crate) fn record<T>(
        &mut self,
        node: Option<NodeId>,
        name: &str,
        result: Result<T, LogicError>,
    ) -> Result<T, LogicError> {
        if let Err(err) = &result {
            let name = (!name.is_empty()).then(|| name.to_string());
            let node = node.filter(|id| self.nodes.contains_key(*id));
            self.push_error(node, name, err.clone());
        }
        result
    }

    pub(crate) fn clear_errors(&mut self) {
        self.errors.clear();
    }
}

fn empty(name: &str) -> Property {
    Property::new_struct(name, Vec::new())
}
