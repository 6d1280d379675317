//! Link graph between node properties.
//!
//! Links live in a `SlotMap` and per-node adjacency in a `SecondaryMap`
//! keyed by [`NodeId`]. The execution order is a Kahn topological sort over
//! strong links only, cached until the next shape change.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};

use crate::id::{LinkId, NodeId, ObjectId};
use crate::node::PropertyHandle;

/// Errors raised by link operations. A failed operation leaves the graph
/// unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("linking '{source_name}' to '{target}' would create a cycle")]
    CycleDetected { source_name: String, target: String },
    #[error("cycle detected in link graph")]
    CyclicOrder,
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),
    #[error("property not found: {0}")]
    PropertyNotFound(String),
    #[error("'{0}' already has an incoming link")]
    AlreadyLinked(String),
    #[error("cannot link '{0}' to a property of the same node")]
    SelfLink(String),
    #[error("type mismatch: '{source_name}' is {source_type}, '{target}' is {target_type}")]
    TypeMismatch {
        source_name: String,
        source_type: String,
        target: String,
        target_type: String,
    },
    #[error("'{0}' is a struct or array; only primitive properties can be linked")]
    ComplexProperty(String),
    #[error("'{0}' is not an output and cannot be a link source")]
    NotAnOutput(String),
    #[error("'{0}' is not an input and cannot be a link target")]
    NotAnInput(String),
    #[error("no link from '{source_name}' to '{target}'")]
    NotLinked { source_name: String, target: String },
}

/// Strong links order execution and propagate within a tick; weak links
/// deliver the previous tick's value and are ignored by cycle checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Strong,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub source: PropertyHandle,
    pub target: PropertyHandle,
    pub kind: LinkKind,
}

impl Link {
    pub fn is_weak(&self) -> bool {
        self.kind == LinkKind::Weak
    }
}

#[derive(Debug, Clone, Default)]
struct Adjacency {
    incoming: Vec<LinkId>,
    outgoing: Vec<LinkId>,
}

#[derive(Debug, Default)]
pub struct LinkGraph {
    links: SlotMap<LinkId, Link>,
    adjacency: SecondaryMap<NodeId, Adjacency>,
    /// Executable nodes and their creation order.
    scheduled: SecondaryMap<NodeId, ObjectId>,
    order: Vec<NodeId>,
    order_dirty: bool,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self {
            order_dirty: true,
            ..Self::default()
        }
    }

    /// Registers a node. Only `scheduled` nodes appear in the execution order.
    pub fn add_node(&mut self, node: NodeId, object_id: ObjectId, scheduled: bool) {
        self.adjacency.insert(node, Adjacency::default());
        if scheduled {
            self.scheduled.insert(node, object_id);
        }
        self.order_dirty = true;
    }

    /// Removes a node and returns every link that touched it.
    pub fn remove_node(&mut self, node: NodeId) -> Vec<(LinkId, Link)> {
        let touching: Vec<LinkId> = match self.adjacency.get(node) {
            Some(adj) => adj.incoming.iter().chain(adj.outgoing.iter()).copied().collect(),
            None => return Vec::new(),
        };
        let removed = touching
            .into_iter()
            .filter_map(|id| self.remove_link(id).map(|link| (id, link)))
            .collect();
        self.adjacency.remove(node);
        self.scheduled.remove(node);
        self.order_dirty = true;
        removed
    }

    pub fn insert_link(&mut self, link: Link) -> LinkId {
        let source = link.source.node;
        let target = link.target.node;
        let id = self.links.insert(link);
        if let Some(adj) = self.adjacency.get_mut(source) {
            adj.outgoing.push(id);
        }
        if let Some(adj) = self.adjacency.get_mut(target) {
            adj.incoming.push(id);
        }
        self.order_dirty = true;
        id
    }

    pub fn remove_link(&mut self, id: LinkId) -> Option<Link> {
        let link = self.links.remove(id)?;
        if let Some(adj) = self.adjacency.get_mut(link.source.node) {
            adj.outgoing.retain(|&other| other != id);
        }
        if let Some(adj) = self.adjacency.get_mut(link.target.node) {
            adj.incoming.retain(|&other| other != id);
        }
        self.order_dirty = true;
        Some(link)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links.iter()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn find_link(&self, source: &PropertyHandle, target: &PropertyHandle) -> Option<LinkId> {
        self.adjacency.get(target.node).and_then(|adj| {
            adj.incoming.iter().copied().find(|&id| {
                self.links
                    .get(id)
                    .is_some_and(|link| link.source == *source && link.target == *target)
            })
        })
    }

    /// The link currently driving `target`, if any.
    pub fn incoming_link(&self, target: &PropertyHandle) -> Option<LinkId> {
        self.adjacency.get(target.node).and_then(|adj| {
            adj.incoming
                .iter()
                .copied()
                .find(|&id| self.links.get(id).is_some_and(|link| link.target == *target))
        })
    }

    pub fn incoming(&self, node: NodeId) -> &[LinkId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.incoming.as_slice())
            .unwrap_or(&[])
    }

    pub fn outgoing(&self, node: NodeId) -> &[LinkId] {
        self.adjacency
            .get(node)
            .map(|adj| adj.outgoing.as_slice())
            .unwrap_or(&[])
    }

    fn strong_successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing(node).iter().filter_map(|&id| {
            self.links
                .get(id)
                .filter(|link| link.kind == LinkKind::Strong)
                .map(|link| link.target.node)
        })
    }

    /// Depth-first search over strong links.
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited: SecondaryMap<NodeId, ()> = SecondaryMap::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if visited.insert(node, ()).is_some() {
                continue;
            }
            stack.extend(self.strong_successors(node));
        }
        false
    }

    /// Returns `true` if a strong link from `source` to `target` would close
    /// a cycle.
    pub fn would_create_cycle(&self, source: NodeId, target: NodeId) -> bool {
        source == target || self.is_reachable(target, source)
    }

    pub fn is_order_cached(&self) -> bool {
        !self.order_dirty
    }

    /// Cached topological order of the scheduled nodes.
    pub fn execution_order(&mut self) -> Result<&[NodeId], GraphError> {
        if self.order_dirty {
            self.recompute_order()?;
            self.order_dirty = false;
        }
        Ok(&self.order)
    }

    /// Kahn's algorithm over strong links. Ready nodes are released in
    /// creation order so independent nodes run deterministically.
    fn recompute_order(&mut self) -> Result<(), GraphError> {
        let mut in_degree: SecondaryMap<NodeId, usize> = SecondaryMap::new();
        for (node, _) in &self.scheduled {
            in_degree.insert(node, 0);
        }
        for (_, link) in &self.links {
            if link.kind != LinkKind::Strong || !self.scheduled.contains_key(link.source.node) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(link.target.node) {
                *degree += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<(ObjectId, NodeId)>> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .filter_map(|(node, _)| self.scheduled.get(node).map(|&id| Reverse((id, node))))
            .collect();

        let mut order = Vec::with_capacity(self.scheduled.len());
        while let Some(Reverse((_, node))) = ready.pop() {
            order.push(node);
            let successors: Vec<NodeId> = self.strong_successors(node).collect();
            for next in successors {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        if let Some(&id) = self.scheduled.get(next) {
                            ready.push(Reverse((id, next)));
                        }
                    }
                }
            }
        }

        if order.len() != self.scheduled.len() {
            return Err(GraphError::CyclicOrder);
        }
        log::debug!("recomputed execution order for {} nodes", order.len());
        self.order = order;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Side;

    fn make_graph(count: usize) -> (LinkGraph, Vec<NodeId>) {
        let mut keys: SlotMap<NodeId, ()> = SlotMap::with_key();
        let mut graph = LinkGraph::new();
        let nodes: Vec<NodeId> = (0..count)
            .map(|index| {
                let node = keys.insert(());
                graph.add_node(node, ObjectId(index as u64 + 1), true);
                node
            })
            .collect();
        (graph, nodes)
    }

    fn link(graph: &mut LinkGraph, from: NodeId, to: NodeId, kind: LinkKind) -> LinkId {
        graph.insert_link(Link {
            source: PropertyHandle::new(from, Side::Output, vec![0]),
            target: PropertyHandle::new(to, Side::Input, vec![0]),
            kind,
        })
    }

    #[test]
    fn order_follows_strong_links() {
        let (mut graph, nodes) = make_graph(3);
        let [a, b, c] = [nodes[0], nodes[1], nodes[2]];
        link(&mut graph, c, b, LinkKind::Strong);
        link(&mut graph, b, a, LinkKind::Strong);

        assert_eq!(graph.execution_order().unwrap(), &[c, b, a]);
    }

    #[test]
    fn independent_nodes_keep_creation_order() {
        let (mut graph, nodes) = make_graph(4);
        assert_eq!(graph.execution_order().unwrap(), nodes.as_slice());
    }

    #[test]
    fn weak_links_do_not_constrain_order() {
        let (mut graph, nodes) = make_graph(2);
        link(&mut graph, nodes[1], nodes[0], LinkKind::Weak);
        assert_eq!(graph.execution_order().unwrap(), &[nodes[0], nodes[1]]);
    }

    #[test]
    fn order_is_cached_until_shape_changes() {
        let (mut graph, nodes) = make_graph(2);
        graph.execution_order().unwrap();
        assert!(graph.is_order_cached());

        let id = link(&mut graph, nodes[1], nodes[0], LinkKind::Strong);
        assert!(!graph.is_order_cached());
        assert_eq!(graph.execution_order().unwrap(), &[nodes[1], nodes[0]]);

        graph.remove_link(id);
        assert!(!graph.is_order_cached());
        assert_eq!(graph.execution_order().unwrap(), &[nodes[0], nodes[1]]);
    }

    #[test]
    fn cycle_check_ignores_weak_links() {
        let (mut graph, nodes) = make_graph(3);
        let [a, b, c] = [nodes[0], nodes[1], nodes[2]];
        link(&mut graph, a, b, LinkKind::Strong);
        link(&mut graph, b, c, LinkKind::Strong);
        assert!(graph.would_create_cycle(c, a));
        assert!(!graph.would_create_cycle(a, c));

        let (mut graph, nodes) = make_graph(2);
        link(&mut graph, nodes[0], nodes[1], LinkKind::Weak);
        assert!(!graph.would_create_cycle(nodes[1], nodes[0]));
    }

    #[test]
    fn removing_node_drops_its_links() {
        let (mut graph, nodes) = make_graph(3);
        link(&mut graph, nodes[0], nodes[1], LinkKind::Strong);
        link(&mut graph, nodes[1], nodes[2], LinkKind::Weak);
        let removed = graph.remove_node(nodes[1]);
        assert_eq!(removed.len(), 2);
        assert_eq!(graph.link_count(), 0);
        assert!(graph.outgoing(nodes[0]).is_empty());
        assert_eq!(graph.execution_order().unwrap(), &[nodes[0], nodes[2]]);
    }

    #[test]
    fn cyclic_graph_reports_error() {
        let (mut graph, nodes) = make_graph(2);
        link(&mut graph, nodes[0], nodes[1], LinkKind::Strong);
        link(&mut graph, nodes[1], nodes[0], LinkKind::Strong);
        assert_eq!(graph.execution_order().unwrap_err(), GraphError::CyclicOrder);
    }

    #[test]
    fn finds_links_by_endpoints() {
        let (mut graph, nodes) = make_graph(2);
        let id = link(&mut graph, nodes[0], nodes[1], LinkKind::Strong);
        let source = PropertyHandle::new(nodes[0], Side::Output, vec![0]);
        let target = PropertyHandle::new(nodes[1], Side::Input, vec![0]);
        assert_eq!(graph.find_link(&source, &target), Some(id));
        assert_eq!(graph.incoming_link(&target), Some(id));
        assert_eq!(graph.find_link(&target, &source), None);
    }
}
