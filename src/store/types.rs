//! Node and edge vocabulary of the skeleton graph, plus write batches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// The kind of a node in the skeleton graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A source file; keyed by absolute path.
    Module,
    /// Keyed by `module.Class`.
    Class,
    /// Keyed by `module.Class.method`.
    Method,
    /// Keyed by `module.Class.attr`.
    Attribute,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Module => write!(f, "module"),
            NodeKind::Class => write!(f, "class"),
            NodeKind::Method => write!(f, "method"),
            NodeKind::Attribute => write!(f, "attribute"),
        }
    }
}

/// The kind of an edge in the skeleton graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Module -> Class
    ContainsClass,
    /// Class -> Method
    HasMethod,
    /// Class -> Attribute
    HasAttribute,
    /// Module -> Module (source imports target)
    Imports,
}

impl EdgeKind {
    pub fn is_containment(&self) -> bool {
        !matches!(self, EdgeKind::Imports)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::ContainsClass => write!(f, "contains_class"),
            EdgeKind::HasMethod => write!(f, "has_method"),
            EdgeKind::HasAttribute => write!(f, "has_attribute"),
            EdgeKind::Imports => write!(f, "imports"),
        }
    }
}

/// Stable identity of a node: its kind plus its uniqueness key.
///
/// Handles survive across runs because they carry no storage index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle {
    pub kind: NodeKind,
    pub key: String,
}

impl NodeHandle {
    pub fn new(kind: NodeKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn module(path: &Path) -> Self {
        Self::new(NodeKind::Module, path.to_string_lossy().into_owned())
    }

    pub fn class(full_name: &str) -> Self {
        Self::new(NodeKind::Class, full_name)
    }

    pub fn method(full_name: &str) -> Self {
        Self::new(NodeKind::Method, full_name)
    }

    pub fn attribute(full_name: &str) -> Self {
        Self::new(NodeKind::Attribute, full_name)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.key)
    }
}

/// A non-key property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropValue {
    Str(String),
    List(Vec<String>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            PropValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PropValue::List(items) => Some(items),
            PropValue::Str(_) => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Str(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Str(s)
    }
}

impl From<Vec<String>> for PropValue {
    fn from(items: Vec<String>) -> Self {
        PropValue::List(items)
    }
}

pub type Props = BTreeMap<String, PropValue>;

/// A stored node: identity plus properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub handle: NodeHandle,
    pub props: Props,
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        self.handle.kind
    }

    pub fn key(&self) -> &str {
        &self.handle.key
    }

    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(PropValue::as_str)
    }

    pub fn prop_list(&self, name: &str) -> Option<&[String]> {
        self.props.get(name).and_then(PropValue::as_list)
    }

    /// The `name` property, falling back to the key.
    pub fn name(&self) -> &str {
        self.prop_str("name").unwrap_or(&self.handle.key)
    }
}

/// One staged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Upsert { handle: NodeHandle, props: Props },
    Connect {
        from: NodeHandle,
        to: NodeHandle,
        kind: EdgeKind,
    },
}

/// Operations applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a create-or-update and return the node's handle.
    pub fn upsert_node(&mut self, kind: NodeKind, key: impl Into<String>, props: Props) -> NodeHandle {
        let handle = NodeHandle::new(kind, key);
        self.ops.push(WriteOp::Upsert {
            handle: handle.clone(),
            props,
        });
        handle
    }

    pub fn connect(&mut self, from: &NodeHandle, to: &NodeHandle, kind: EdgeKind) {
        self.ops.push(WriteOp::Connect {
            from: from.clone(),
            to: to.clone(),
            kind,
        });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What one commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
}

impl std::ops::AddAssign for CommitStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.edges_created += other.edges_created;
        self.edges_existing += other.edges_existing;
    }
}

/// Node and edge counts per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes: BTreeMap<NodeKind, usize>,
    pub edges: BTreeMap<EdgeKind, usize>,
}

impl GraphStats {
    pub fn nodes_of(&self, kind: NodeKind) -> usize {
        self.nodes.get(&kind).copied().unwrap_or(0)
    }

    pub fn edges_of(&self, kind: EdgeKind) -> usize {
        self.edges.get(&kind).copied().unwrap_or(0)
    }
}

/// Build a property map from `(name, value)` pairs.
pub fn props<I, K, V>(pairs: I) -> Props
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<PropValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
