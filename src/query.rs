//! Read-only questions over a loaded skeleton graph.
//!
//! Results are sorted by name so output is stable between runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::{CodeGraph, EdgeKind, NodeData, NodeHandle, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassRef {
    pub full_name: String,
    pub name: String,
    pub module: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodOutline {
    pub name: String,
    pub full_name: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassOutline {
    pub class: ClassRef,
    pub methods: Vec<MethodOutline>,
    pub attributes: Vec<String>,
}

fn module_ref(node: &NodeData) -> ModuleRef {
    ModuleRef {
        name: node.name().to_string(),
        path: node.key().to_string(),
    }
}

fn class_ref(graph: &CodeGraph, node: &NodeData) -> ClassRef {
    let module = graph
        .incoming(&node.handle, EdgeKind::ContainsClass)
        .first()
        .map(|m| m.name().to_string());
    ClassRef {
        full_name: node.key().to_string(),
        name: node.name().to_string(),
        module,
    }
}

/// Module nodes whose dotted name is `name`.
fn modules_named<'g>(graph: &'g CodeGraph, name: &'g str) -> impl Iterator<Item = &'g NodeData> {
    graph
        .nodes_of_kind(NodeKind::Module)
        .filter(move |m| m.prop_str("name") == Some(name))
}

fn import_neighbors(graph: &CodeGraph, module_name: &str, incoming: bool) -> Vec<ModuleRef> {
    let mut found: BTreeMap<String, ModuleRef> = BTreeMap::new();
    for module in modules_named(graph, module_name) {
        let neighbors = if incoming {
            graph.incoming(&module.handle, EdgeKind::Imports)
        } else {
            graph.outgoing(&module.handle, EdgeKind::Imports)
        };
        for neighbor in neighbors {
            found.insert(neighbor.key().to_string(), module_ref(neighbor));
        }
    }
    let mut refs: Vec<ModuleRef> = found.into_values().collect();
    refs.sort();
    refs
}

/// Modules that import `module_name` ("what depends on X").
pub fn dependents(graph: &CodeGraph, module_name: &str) -> Vec<ModuleRef> {
    import_neighbors(graph, module_name, true)
}

/// Modules that `module_name` imports.
pub fn imports_of(graph: &CodeGraph, module_name: &str) -> Vec<ModuleRef> {
    import_neighbors(graph, module_name, false)
}

/// Classes that define a method named `method_name`.
pub fn classes_defining(graph: &CodeGraph, method_name: &str) -> Vec<ClassRef> {
    let mut classes: BTreeMap<String, ClassRef> = BTreeMap::new();
    for method in graph
        .nodes_of_kind(NodeKind::Method)
        .filter(|m| m.name() == method_name)
    {
        for class in graph.incoming(&method.handle, EdgeKind::HasMethod) {
            classes
                .entry(class.key().to_string())
                .or_insert_with(|| class_ref(graph, class));
        }
    }
    classes.into_values().collect()
}

/// A class with its methods and attributes, by full name.
pub fn class_outline(graph: &CodeGraph, full_name: &str) -> Option<ClassOutline> {
    let class = graph.find(&NodeHandle::class(full_name))?;

    let mut methods: Vec<MethodOutline> = graph
        .outgoing(&class.handle, EdgeKind::HasMethod)
        .into_iter()
        .map(|m| MethodOutline {
            name: m.name().to_string(),
            full_name: m.key().to_string(),
            params: m.prop_list("params").map(<[String]>::to_vec).unwrap_or_default(),
        })
        .collect();
    methods.sort_by(|a, b| a.name.cmp(&b.name));

    let mut attributes: Vec<String> = graph
        .outgoing(&class.handle, EdgeKind::HasAttribute)
        .into_iter()
        .map(|a| a.name().to_string())
        .collect();
    attributes.sort();

    Some(ClassOutline {
        class: class_ref(graph, class),
        methods,
        attributes,
    })
}
