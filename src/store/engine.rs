//! In-memory skeleton graph backed by petgraph.
//!
//! Nodes are addressed by [`NodeHandle`]; the handle index makes upsert
//! and endpoint lookup O(1). Batches are validated in full before the
//! first mutation so a rejected batch leaves the graph untouched.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::types::*;
use super::StoreError;

/// The skeleton graph: nodes, edges and the key index.
#[derive(Debug, Default)]
pub struct CodeGraph {
    graph: DiGraph<NodeData, EdgeKind>,
    index: HashMap<NodeHandle, NodeIndex>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from snapshot parts. Edges refer to node positions.
    pub(crate) fn from_parts(
        nodes: Vec<NodeData>,
        edges: Vec<(u32, u32, EdgeKind)>,
    ) -> Result<Self, StoreError> {
        let mut graph = CodeGraph::new();
        for node in nodes {
            if graph.index.contains_key(&node.handle) {
                return Err(StoreError::Unavailable(format!(
                    "snapshot holds {} twice",
                    node.handle
                )));
            }
            let handle = node.handle.clone();
            let idx = graph.graph.add_node(node);
            graph.index.insert(handle, idx);
        }
        let count = graph.graph.node_count();
        for (from, to, kind) in edges {
            if from as usize >= count || to as usize >= count {
                return Err(StoreError::Unavailable(format!(
                    "snapshot edge {} -> {} out of range",
                    from, to
                )));
            }
            graph
                .graph
                .add_edge(NodeIndex::new(from as usize), NodeIndex::new(to as usize), kind);
        }
        Ok(graph)
    }

    /// Nodes in index order and edges as node positions.
    pub(crate) fn to_parts(&self) -> (Vec<NodeData>, Vec<(u32, u32, EdgeKind)>) {
        let nodes = self.graph.node_weights().cloned().collect();
        let edges = self
            .graph
            .edge_references()
            .map(|e| (e.source().index() as u32, e.target().index() as u32, *e.weight()))
            .collect();
        (nodes, edges)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, handle: &NodeHandle) -> bool {
        self.index.contains_key(handle)
    }

    pub fn find(&self, handle: &NodeHandle) -> Option<&NodeData> {
        self.index.get(handle).map(|&idx| &self.graph[idx])
    }

    /// Every node of one kind, in insertion order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &NodeData> {
        self.graph.node_weights().filter(move |n| n.kind() == kind)
    }

    /// Targets of `handle`'s outgoing edges of `kind`.
    pub fn outgoing(&self, handle: &NodeHandle, kind: EdgeKind) -> Vec<&NodeData> {
        self.neighbors(handle, kind, Direction::Outgoing)
    }

    /// Sources of `handle`'s incoming edges of `kind`.
    pub fn incoming(&self, handle: &NodeHandle, kind: EdgeKind) -> Vec<&NodeData> {
        self.neighbors(handle, kind, Direction::Incoming)
    }

    fn neighbors(&self, handle: &NodeHandle, kind: EdgeKind, dir: Direction) -> Vec<&NodeData> {
        let Some(&idx) = self.index.get(handle) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, dir)
            .filter(|e| *e.weight() == kind)
            .map(|e| {
                let other = match dir {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                &self.graph[other]
            })
            .collect()
    }

    /// Incoming containment edges of any kind, for closure checks.
    pub fn containment_parents(&self, handle: &NodeHandle) -> Vec<(&NodeData, EdgeKind)> {
        let Some(&idx) = self.index.get(handle) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|e| e.weight().is_containment())
            .map(|e| (&self.graph[e.source()], *e.weight()))
            .collect()
    }

    /// Check a batch against the current graph without changing it.
    pub fn validate(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut staged: HashSet<&NodeHandle> = HashSet::new();
        for op in batch.ops() {
            match op {
                WriteOp::Upsert { handle, .. } => {
                    staged.insert(handle);
                }
                WriteOp::Connect { from, to, .. } => {
                    if from == to {
                        return Err(StoreError::SelfLoop(from.clone()));
                    }
                    for end in [from, to] {
                        if !staged.contains(end) && !self.index.contains_key(end) {
                            return Err(StoreError::MissingEndpoint(end.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate then apply every operation of `batch`.
    pub fn apply(&mut self, batch: WriteBatch) -> Result<CommitStats, StoreError> {
        self.validate(&batch)?;

        let mut stats = CommitStats::default();
        for op in batch.into_ops() {
            match op {
                WriteOp::Upsert { handle, props } => {
                    if self.upsert(handle, props) {
                        stats.nodes_created += 1;
                    } else {
                        stats.nodes_updated += 1;
                    }
                }
                WriteOp::Connect { from, to, kind } => {
                    if self.connect(&from, &to, kind) {
                        stats.edges_created += 1;
                    } else {
                        stats.edges_existing += 1;
                    }
                }
            }
        }
        debug!(
            created = stats.nodes_created,
            updated = stats.nodes_updated,
            edges = stats.edges_created,
            "batch applied"
        );
        Ok(stats)
    }

    /// Returns true when a new node was created.
    fn upsert(&mut self, handle: NodeHandle, props: Props) -> bool {
        if let Some(&idx) = self.index.get(&handle) {
            self.graph[idx].props = props;
            return false;
        }
        let idx = self.graph.add_node(NodeData {
            handle: handle.clone(),
            props,
        });
        self.index.insert(handle, idx);
        true
    }

    /// Returns true when a new edge was created. Endpoints are validated.
    fn connect(&mut self, from: &NodeHandle, to: &NodeHandle, kind: EdgeKind) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if self.graph.edges_connecting(a, b).any(|e| *e.weight() == kind) {
            return false;
        }
        self.graph.add_edge(a, b, kind);
        true
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_nodes: self.graph.node_count(),
            total_edges: self.graph.edge_count(),
            ..GraphStats::default()
        };
        for node in self.graph.node_weights() {
            *stats.nodes.entry(node.kind()).or_insert(0) += 1;
        }
        for edge in self.graph.edge_weights() {
            *stats.edges.entry(*edge).or_insert(0) += 1;
        }
        stats
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(batch: &mut WriteBatch, path: &str, name: &str) -> NodeHandle {
        batch.upsert_node(NodeKind::Module, path, props([("name", name)]))
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut graph = CodeGraph::new();

        let mut batch = WriteBatch::new();
        let m = module(&mut batch, "/p/a.py", "a");
        let c = batch.upsert_node(NodeKind::Class, "a.Foo", props([("name", "Foo")]));
        batch.connect(&m, &c, EdgeKind::ContainsClass);
        let first = graph.apply(batch.clone()).unwrap();
        assert_eq!(first.nodes_created, 2);
        assert_eq!(first.edges_created, 1);

        let second = graph.apply(batch).unwrap();
        assert_eq!(second.nodes_created, 0);
        assert_eq!(second.nodes_updated, 2);
        assert_eq!(second.edges_created, 0);
        assert_eq!(second.edges_existing, 1);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_upsert_updates_properties_in_place() {
        let mut graph = CodeGraph::new();
        let mut batch = WriteBatch::new();
        batch.upsert_node(NodeKind::Method, "a.Foo.bar", props([("params", vec!["x".to_string()])]));
        graph.apply(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.upsert_node(
            NodeKind::Method,
            "a.Foo.bar",
            props([("params", vec!["x".to_string(), "y".to_string()])]),
        );
        graph.apply(batch).unwrap();

        let node = graph.find(&NodeHandle::method("a.Foo.bar")).unwrap();
        assert_eq!(node.prop_list("params").unwrap(), ["x", "y"]);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_rejected_batch_changes_nothing() {
        let mut graph = CodeGraph::new();
        let mut batch = WriteBatch::new();
        let m = module(&mut batch, "/p/a.py", "a");
        batch.connect(&m, &NodeHandle::module(std::path::Path::new("/p/ghost.py")), EdgeKind::Imports);

        let err = graph.apply(batch).unwrap_err();
        assert!(matches!(err, StoreError::MissingEndpoint(_)));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = CodeGraph::new();
        let mut batch = WriteBatch::new();
        let m = module(&mut batch, "/p/a.py", "a");
        batch.connect(&m, &m, EdgeKind::Imports);
        assert!(matches!(graph.apply(batch), Err(StoreError::SelfLoop(_))));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_endpoint_from_prior_commit() {
        let mut graph = CodeGraph::new();
        let mut batch = WriteBatch::new();
        let a = module(&mut batch, "/p/a.py", "a");
        let b = module(&mut batch, "/p/b.py", "b");
        graph.apply(batch).unwrap();

        let mut edges = WriteBatch::new();
        edges.connect(&b, &a, EdgeKind::Imports);
        graph.apply(edges).unwrap();

        assert_eq!(graph.outgoing(&b, EdgeKind::Imports)[0].name(), "a");
        assert_eq!(graph.incoming(&a, EdgeKind::Imports)[0].name(), "b");
        assert!(graph.outgoing(&a, EdgeKind::Imports).is_empty());
    }

    #[test]
    fn test_parts_roundtrip_preserves_edges() {
        let mut graph = CodeGraph::new();
        let mut batch = WriteBatch::new();
        let a = module(&mut batch, "/p/a.py", "a");
        let c = batch.upsert_node(NodeKind::Class, "a.Foo", Props::new());
        batch.connect(&a, &c, EdgeKind::ContainsClass);
        graph.apply(batch).unwrap();

        let (nodes, edges) = graph.to_parts();
        let rebuilt = CodeGraph::from_parts(nodes, edges).unwrap();
        assert_eq!(rebuilt.stats(), graph.stats());
        assert_eq!(rebuilt.containment_parents(&c).len(), 1);
    }

    #[test]
    fn test_from_parts_rejects_bad_edges() {
        let nodes = vec![NodeData {
            handle: NodeHandle::class("a.Foo"),
            props: Props::new(),
        }];
        let result = CodeGraph::from_parts(nodes, vec![(0, 7, EdgeKind::HasMethod)]);
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_stats_by_kind() {
        let mut graph = CodeGraph::new();
        let mut batch = WriteBatch::new();
        let m = module(&mut batch, "/p/a.py", "a");
        let c = batch.upsert_node(NodeKind::Class, "a.Foo", Props::new());
        let f = batch.upsert_node(NodeKind::Method, "a.Foo.bar", Props::new());
        batch.connect(&m, &c, EdgeKind::ContainsClass);
        batch.connect(&c, &f, EdgeKind::HasMethod);
        graph.apply(batch).unwrap();

        let stats = graph.stats();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.nodes_of(NodeKind::Class), 1);
        assert_eq!(stats.edges_of(EdgeKind::HasMethod), 1);
        assert_eq!(stats.edges_of(EdgeKind::Imports), 0);

        graph.clear();
        assert_eq!(graph.node_count(), 0);
        assert!(!graph.contains(&m));
    }
}
