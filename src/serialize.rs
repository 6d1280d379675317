//! Saved logic files.
//!
//! A file is a fixed header followed by a `bitcode` payload:
//!
//! ```text
//! "CLGC" | major: u16 | minor: u16 | payload length: u32 | payload
//! ```
//!
//! All header integers are little endian. The payload holds one record per
//! node grouped by type in creation order, the link table and the next
//! free object id. Nodes reference each other by [`ObjectId`] only.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::animation::{AnimationChannel, AnimationNode};
use crate::binding::BindingKind;
use crate::engine::LogicEngine;
use crate::error::LogicError;
use crate::graph::LinkKind;
use crate::id::{NodeId, ObjectId};
use crate::node::{NodeKind, PropertyHandle, Side};
use crate::property::Property;
use crate::scripting::{ChunkKind, LuaConfig, StandardModule};
use crate::timer::TimerNode;

pub const MAGIC: [u8; 4] = *b"CLGC";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SerializationError {
    #[error("invalid magic: expected \"CLGC\", found {0:?}")]
    InvalidMagic([u8; 4]),
    #[error(
        "unsupported file version {major}.{minor} (this build reads {VERSION_MAJOR}.0 to {VERSION_MAJOR}.{VERSION_MINOR})"
    )]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("data truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("reference to unknown object {0:?}")]
    DanglingReference(ObjectId),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{path}: {message}")]
    Io { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ObjectCounts {
    modules: u32,
    scripts: u32,
    interfaces: u32,
    bindings: u32,
    animations: u32,
    timers: u32,
    links: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigRecord {
    modules: Vec<(String, ObjectId)>,
    standard_modules: Vec<StandardModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModuleRecord {
    id: ObjectId,
    name: String,
    source: String,
    config: ConfigRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScriptRecord {
    id: ObjectId,
    name: String,
    source: String,
    source_hash: u64,
    config: ConfigRecord,
    inputs: Property,
    outputs: Property,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InterfaceRecord {
    id: ObjectId,
    name: String,
    source: String,
    source_hash: u64,
    properties: Property,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BindingRecord {
    id: ObjectId,
    name: String,
    kind: BindingKind,
    target: String,
    inputs: Property,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnimationRecord {
    id: ObjectId,
    name: String,
    channels: Vec<AnimationChannel>,
    inputs: Property,
    outputs: Property,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimerRecord {
    id: ObjectId,
    name: String,
    inputs: Property,
    outputs: Property,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EndpointRecord {
    object: ObjectId,
    side: Side,
    path: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinkRecord {
    source: EndpointRecord,
    target: EndpointRecord,
    weak: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogicFile {
    counts: ObjectCounts,
    modules: Vec<ModuleRecord>,
    scripts: Vec<ScriptRecord>,
    interfaces: Vec<InterfaceRecord>,
    bindings: Vec<BindingRecord>,
    animations: Vec<AnimationRecord>,
    timers: Vec<TimerRecord>,
    links: Vec<LinkRecord>,
    next_object_id: u64,
}

impl LogicFile {
    fn actual_counts(&self) -> ObjectCounts {
        let count = |len: usize| u32::try_from(len).unwrap_or(u32::MAX);
        ObjectCounts {
            modules: count(self.modules.len()),
            scripts: count(self.scripts.len()),
            interfaces: count(self.interfaces.len()),
            bindings: count(self.bindings.len()),
            animations: count(self.animations.len()),
            timers: count(self.timers.len()),
            links: count(self.links.len()),
        }
    }
}

/// FNV-1a over the script source. Stored next to each script so a changed
/// source can be detected on load.
pub fn source_hash(source: &str) -> u64 {
    source.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn encode(file: &LogicFile) -> Result<Vec<u8>, SerializationError> {
    let payload =
        bitcode::serialize(file).map_err(|e| SerializationError::Encode(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| SerializationError::Encode(format!("payload of {} bytes", payload.len())))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&VERSION_MAJOR.to_le_bytes());
    bytes.extend_from_slice(&VERSION_MINOR.to_le_bytes());
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode(data: &[u8]) -> Result<LogicFile, SerializationError> {
    if data.len() < HEADER_LEN {
        return Err(SerializationError::Truncated {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let magic = [data[0], data[1], data[2], data[3]];
    if magic != MAGIC {
        return Err(SerializationError::InvalidMagic(magic));
    }
    let major = u16::from_le_bytes([data[4], data[5]]);
    let minor = u16::from_le_bytes([data[6], data[7]]);
    if major != VERSION_MAJOR || minor > VERSION_MINOR {
        return Err(SerializationError::UnsupportedVersion { major, minor });
    }
    let length = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let expected = HEADER_LEN.saturating_add(length);
    let payload = data
        .get(HEADER_LEN..expected)
        .ok_or(SerializationError::Truncated {
            expected,
            actual: data.len(),
        })?;
    bitcode::deserialize(payload).map_err(|e| SerializationError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

impl LogicEngine {
    /// Encodes the whole graph. Captured weak-link values and dirty state are
    /// not part of the file.
    pub fn save_to_buffer(&self) -> Result<Vec<u8>, LogicError> {
        Ok(encode(&self.to_logic_file())?)
    }

    /// Writes the graph to `path`. With `validate` set, saving is refused
    /// while [`validate`](Self::validate) reports warnings.
    pub fn save_to_file(&self, path: impl AsRef<Path>, validate: bool) -> Result<(), LogicError> {
        let path = path.as_ref();
        if validate {
            if let Some(warning) = self.validate().into_iter().next() {
                return Err(SerializationError::Validation(warning.message).into());
            }
        }
        let bytes = self.save_to_buffer()?;
        std::fs::write(path, bytes).map_err(|e| SerializationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        log::info!("saved {} node(s) to {}", self.nodes.len(), path.display());
        Ok(())
    }

    fn object_id_of(&self, node: NodeId) -> ObjectId {
        self.nodes
            .get(node)
            .map(|node| node.object_id)
            .unwrap_or(ObjectId(0))
    }

    fn config_record(&self, config: &LuaConfig) -> ConfigRecord {
        ConfigRecord {
            modules: config
                .modules()
                .iter()
                .map(|(alias, id)| (alias.clone(), self.object_id_of(*id)))
                .collect(),
            standard_modules: config.standard_modules().to_vec(),
        }
    }

    fn endpoint_record(&self, handle: &PropertyHandle) -> EndpointRecord {
        EndpointRecord {
            object: self.object_id_of(handle.node),
            side: handle.side,
            path: handle.path.iter().map(|&index| index as u32).collect(),
        }
    }

    fn to_logic_file(&self) -> LogicFile {
        let mut file = LogicFile {
            counts: ObjectCounts::default(),
            modules: Vec::new(),
            scripts: Vec::new(),
            interfaces: Vec::new(),
            bindings: Vec::new(),
            animations: Vec::new(),
            timers: Vec::new(),
            links: Vec::new(),
            next_object_id: self.next_object_id,
        };
        for (_, node) in self.nodes() {
            let id = node.object_id;
            let name = node.name.clone();
            match &node.kind {
                NodeKind::Module(module) => file.modules.push(ModuleRecord {
                    id,
                    name,
                    source: module.source.clone(),
                    config: self.config_record(&module.config),
                }),
                NodeKind::Script(script) => file.scripts.push(ScriptRecord {
                    id,
                    name,
                    source: script.source.clone(),
                    source_hash: source_hash(&script.source),
                    config: self.config_record(&script.config),
                    inputs: node.inputs.clone(),
                    outputs: node.outputs.clone(),
                }),
                NodeKind::Interface(interface) => file.interfaces.push(InterfaceRecord {
                    id,
                    name,
                    source: interface.source.clone(),
                    source_hash: source_hash(&interface.source),
                    properties: node.inputs.clone(),
                }),
                NodeKind::Binding(binding) => file.bindings.push(BindingRecord {
                    id,
                    name,
                    kind: binding.kind(),
                    target: binding.target().to_string(),
                    inputs: node.inputs.clone(),
                }),
                NodeKind::Animation(animation) => file.animations.push(AnimationRecord {
                    id,
                    name,
                    channels: animation.channels().to_vec(),
                    inputs: node.inputs.clone(),
                    outputs: node.outputs.clone(),
                }),
                NodeKind::Timer(_) => file.timers.push(TimerRecord {
                    id,
                    name,
                    inputs: node.inputs.clone(),
                    outputs: node.outputs.clone(),
                }),
            }
        }

        let mut links: Vec<LinkRecord> = self
            .graph
            .links()
            .map(|(_, link)| LinkRecord {
                source: self.endpoint_record(&link.source),
                target: self.endpoint_record(&link.target),
                weak: link.is_weak(),
            })
            .collect();
        links.sort_by(|a, b| {
            (a.target.object, &a.target.path).cmp(&(b.target.object, &b.target.path))
        });
        file.links = links;
        file.counts = file.actual_counts();
        file
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

impl LogicEngine {
    /// Replaces the current graph with the one stored in `bytes`. On any
    /// error the engine is left untouched.
    pub fn load_from_buffer(&mut self, bytes: &[u8], validate: bool) -> Result<(), LogicError> {
        self.clear_errors();
        let result = decode(bytes)
            .map_err(LogicError::from)
            .and_then(|file| self.restore(file, validate));
        match self.record(None, "", result) {
            Ok(engine) => {
                log::info!("loaded {} node(s)", engine.nodes.len());
                *self = engine;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn load_from_file(&mut self, path: impl AsRef<Path>, validate: bool) -> Result<(), LogicError> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => self.load_from_buffer(&bytes, validate),
            Err(e) => {
                self.clear_errors();
                let err = SerializationError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                };
                self.record(None, "", Err(err.into()))
            }
        }
    }

    /// Builds a fresh engine from `file`, sharing this engine's
    /// configuration and scene.
    fn restore(&self, file: LogicFile, validate: bool) -> Result<LogicEngine, LogicError> {
        if validate && file.counts != file.actual_counts() {
            return Err(SerializationError::Validation(format!(
                "object counts {:?} do not match the stored records {:?}",
                file.counts,
                file.actual_counts()
            ))
            .into());
        }

        let mut engine = LogicEngine::with_config(self.config.clone())?;
        engine.scene = self.scene.clone();
        let mut seen = HashSet::new();
        let all_ids = file
            .modules
            .iter()
            .map(|r| r.id)
            .chain(file.scripts.iter().map(|r| r.id))
            .chain(file.interfaces.iter().map(|r| r.id))
            .chain(file.bindings.iter().map(|r| r.id))
            .chain(file.animations.iter().map(|r| r.id))
            .chain(file.timers.iter().map(|r| r.id));
        for id in all_ids {
            if !seen.insert(id) {
                return Err(SerializationError::Validation(format!(
                    "object id {} is used twice",
                    id.0
                ))
                .into());
            }
        }
        let mut ids: HashMap<ObjectId, NodeId> = HashMap::new();

        // pass 1: objects
        engine.restore_modules(file.modules, &mut ids)?;

        for record in file.scripts {
            let config = resolve_config(&record.config, &ids)?;
            let (kind, inputs, outputs) = if record.source_hash == source_hash(&record.source) {
                let declared = Some((record.inputs, record.outputs));
                engine.build_script(&record.source, config, &record.name, ChunkKind::Script, declared)?
            } else {
                log::info!("source of '{}' changed, declaring its interface again", record.name);
                let (kind, mut inputs, mut outputs) =
                    engine.build_script(&record.source, config, &record.name, ChunkKind::Script, None)?;
                inputs.copy_matching(&record.inputs);
                outputs.copy_matching(&record.outputs);
                (kind, inputs, outputs)
            };
            let id = engine.insert_node(Some(record.id), &record.name, kind, inputs, outputs);
            ids.insert(record.id, id);
        }

        for record in file.interfaces {
            let config = LuaConfig::new();
            let (kind, properties, outputs) = if record.source_hash == source_hash(&record.source) {
                let mirror = Property::new_struct("OUT", record.properties.children().to_vec());
                let declared = Some((record.properties, mirror));
                engine.build_script(&record.source, config, &record.name, ChunkKind::Interface, declared)?
            } else {
                log::info!("source of '{}' changed, declaring its interface again", record.name);
                let (kind, mut properties, outputs) =
                    engine.build_script(&record.source, config, &record.name, ChunkKind::Interface, None)?;
                properties.copy_matching(&record.properties);
                (kind, properties, outputs)
            };
            let id = engine.insert_node(Some(record.id), &record.name, kind, properties, outputs);
            ids.insert(record.id, id);
        }

        for record in file.bindings {
            let (kind, mut inputs) = engine.build_binding(record.kind, &record.target)?;
            inputs.copy_matching(&record.inputs);
            // push the restored state on the first update
            inputs.mark_all_dirty();
            let outputs = Property::new_struct("OUT", Vec::new());
            let id = engine.insert_node(Some(record.id), &record.name, kind, inputs, outputs);
            ids.insert(record.id, id);
        }

        for record in file.animations {
            let animation = AnimationNode::new(record.channels)?;
            let (mut inputs, mut outputs) = animation.interface();
            inputs.copy_matching(&record.inputs);
            outputs.copy_matching(&record.outputs);
            let kind = NodeKind::Animation(animation);
            let id = engine.insert_node(Some(record.id), &record.name, kind, inputs, outputs);
            ids.insert(record.id, id);
        }

        for record in file.timers {
            let (mut inputs, mut outputs) = TimerNode::interface();
            inputs.copy_matching(&record.inputs);
            outputs.copy_matching(&record.outputs);
            let kind = NodeKind::Timer(TimerNode::new());
            let id = engine.insert_node(Some(record.id), &record.name, kind, inputs, outputs);
            ids.insert(record.id, id);
        }

        // pass 2: links
        for record in file.links {
            let source = resolve_endpoint(&record.source, &ids)?;
            let target = resolve_endpoint(&record.target, &ids)?;
            let kind = if record.weak {
                LinkKind::Weak
            } else {
                LinkKind::Strong
            };
            if validate {
                engine
                    .check_link(&source, &target, kind)
                    .map_err(|e| SerializationError::Validation(e.to_string()))?;
            } else if engine.property(&source).is_none() || engine.property(&target).is_none() {
                return Err(SerializationError::Validation(format!(
                    "link endpoint path {:?} -> {:?} does not exist",
                    record.source.path, record.target.path
                ))
                .into());
            }
            engine.insert_link(source, target, kind);
        }

        let highest = engine
            .nodes
            .values()
            .map(|node| node.object_id.0)
            .max()
            .unwrap_or(0);
        engine.next_object_id = file.next_object_id.max(highest + 1);
        for node in engine.nodes.values_mut() {
            node.pending = !matches!(node.kind, NodeKind::Module(_));
        }
        engine.clear_errors();
        Ok(engine)
    }

    /// Compiles module records so that every module is built after the
    /// modules it depends on.
    fn restore_modules(
        &mut self,
        records: Vec<ModuleRecord>,
        ids: &mut HashMap<ObjectId, NodeId>,
    ) -> Result<(), LogicError> {
        let mut pending = records;
        while !pending.is_empty() {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|record| {
                record
                    .config
                    .modules
                    .iter()
                    .all(|(_, dependency)| ids.contains_key(dependency))
            });
            if ready.is_empty() {
                let missing = waiting
                    .iter()
                    .flat_map(|record| record.config.modules.iter())
                    .map(|(_, dependency)| *dependency)
                    .find(|dependency| !ids.contains_key(dependency))
                    .unwrap_or(ObjectId(0));
                return Err(SerializationError::DanglingReference(missing).into());
            }
            for record in ready {
                let config = resolve_config(&record.config, ids)?;
                let kind = self.build_module(&record.source, config, &record.name)?;
                let inputs = Property::new_struct("IN", Vec::new());
                let outputs = Property::new_struct("OUT", Vec::new());
                let id = self.insert_node(Some(record.id), &record.name, kind, inputs, outputs);
                ids.insert(record.id, id);
            }
            pending = waiting;
        }
        Ok(())
    }
}

fn resolve_config(
    record: &ConfigRecord,
    ids: &HashMap<ObjectId, NodeId>,
) -> Result<LuaConfig, SerializationError> {
    let mut config = LuaConfig::new();
    for (alias, object) in &record.modules {
        let id = ids
            .get(object)
            .ok_or(SerializationError::DanglingReference(*object))?;
        config = config.with_module(alias.clone(), *id);
    }
    for module in &record.standard_modules {
        config = config.with_standard_module(*module);
    }
    Ok(config)
}

fn resolve_endpoint(
    record: &EndpointRecord,
    ids: &HashMap<ObjectId, NodeId>,
) -> Result<PropertyHandle, SerializationError> {
    let node = ids
        .get(&record.object)
        .ok_or(SerializationError::DanglingReference(record.object))?;
    Ok(PropertyHandle::new(
        *node,
        record.side,
        record.path.iter().map(|&index| index as usize).collect(),
    ))
}
