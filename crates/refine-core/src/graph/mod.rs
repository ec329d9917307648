//! Grafo de proceso de un Flow.
//!
//! `FlowGraph` es una vista indexada (orden de declaración preservado vía
//! `IndexMap`) sobre un `Flow` inmutable. Responde "qué nodos siguen a N" y
//! "cuál es la entrada". Las funciones libres `next_nodes` / `is_terminal`
//! son atajos para llamadores que sólo tienen el `Flow`.
//!
//! Invariantes que asume el resto del core tras `validate`:
//! - ids únicos, aristas sin extremos colgantes y sin duplicados;
//! - DAG (progreso monótono de los batches);
//! - una única entrada desde la que todos los nodos son alcanzables.

mod validate;

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use refine_domain::{Flow, FlowNode};
use serde_json::json;

use crate::constants::DEFINITION_HASH_VERSION;
use crate::errors::GraphError;
use crate::hashing::hash_value;

pub use validate::validate;

pub struct FlowGraph<'a> {
    flow: &'a Flow,
    nodes: IndexMap<&'a str, &'a FlowNode>,
    successors: IndexMap<&'a str, Vec<&'a str>>,
    in_degree: IndexMap<&'a str, usize>,
}

impl<'a> FlowGraph<'a> {
    /// Indexa el Flow. Aristas que referencian nodos inexistentes se ignoran
    /// aquí (`validate` las reporta); con ids duplicados gana el primero.
    pub fn new(flow: &'a Flow) -> Self {
        let mut nodes: IndexMap<&'a str, &'a FlowNode> = IndexMap::with_capacity(flow.nodes.len());
        let mut successors: IndexMap<&'a str, Vec<&'a str>> = IndexMap::with_capacity(flow.nodes.len());
        let mut in_degree: IndexMap<&'a str, usize> = IndexMap::with_capacity(flow.nodes.len());
        for n in &flow.nodes {
            nodes.entry(n.id.as_str()).or_insert(n);
            successors.entry(n.id.as_str()).or_default();
            in_degree.entry(n.id.as_str()).or_insert(0);
        }
        for e in &flow.edges {
            let (src, tgt) = (e.source_node_id.as_str(), e.target_node_id.as_str());
            if !nodes.contains_key(src) || !nodes.contains_key(tgt) {
                continue;
            }
            successors.entry(src).or_default().push(tgt);
            *in_degree.entry(tgt).or_insert(0) += 1;
        }
        Self { flow,
               nodes,
               successors,
               in_degree }
    }

    pub fn flow(&self) -> &'a Flow {
        self.flow
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&'a FlowNode> {
        self.nodes.get(node_id).copied()
    }

    /// Ids de los sucesores de `node_id`, en orden de declaración de aristas.
    /// Vacío si el nodo es terminal o desconocido.
    pub fn next_ids(&self, node_id: &str) -> &[&'a str] {
        self.successors.get(node_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn next_nodes(&self, node_id: &str) -> Vec<&'a FlowNode> {
        self.next_ids(node_id).iter().filter_map(|id| self.node(id)).collect()
    }

    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.next_ids(node_id).is_empty()
    }

    /// Nodos sin aristas entrantes, en orden de declaración.
    pub fn roots(&self) -> Vec<&'a str> {
        self.in_degree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect()
    }

    /// Nodo de entrada: el declarado en el Flow o, si no hay, el único nodo
    /// sin aristas entrantes.
    pub fn entry(&self) -> Result<&'a str, GraphError> {
        if let Some(declared) = self.flow.entry_node_id.as_deref() {
            let (id, _) = self.nodes
                              .get_key_value(declared)
                              .ok_or_else(|| GraphError::UnknownEntry(declared.to_string()))?;
            if self.in_degree.get(declared).copied().unwrap_or(0) > 0 {
                return Err(GraphError::EntryHasIncoming(declared.to_string()));
            }
            return Ok(*id);
        }
        let roots = self.roots();
        match roots.as_slice() {
            [] => Err(GraphError::NoEntry),
            [single] => Ok(*single),
            many => Err(GraphError::AmbiguousEntry(many.iter().map(|s| s.to_string()).collect())),
        }
    }

    /// Orden topológico (Kahn) estable respecto al orden de declaración.
    pub fn topological_order(&self) -> Result<Vec<&'a str>, GraphError> {
        let mut remaining = self.in_degree.clone();
        let mut queue: VecDeque<&'a str> = self.roots().into_iter().collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for next in self.next_ids(id) {
                if let Some(d) = remaining.get_mut(*next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }
        if order.len() < self.nodes.len() {
            let stuck = remaining.iter().filter(|(_, d)| **d > 0).map(|(id, _)| id.to_string()).collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Conjunto de nodos alcanzables desde `start` (incluido), en orden BFS.
    pub fn reachable_from(&self, start: &str) -> IndexSet<&'a str> {
        let mut seen: IndexSet<&'a str> = IndexSet::new();
        let Some((first, _)) = self.nodes.get_key_value(start) else {
            return seen;
        };
        let mut queue = VecDeque::from([*first]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            queue.extend(self.next_ids(id).iter().copied());
        }
        seen
    }
}

/// Nodos que siguen a `node_id` en `flow`. Vacío = terminal.
pub fn next_nodes<'a>(flow: &'a Flow, node_id: &str) -> Vec<&'a FlowNode> {
    FlowGraph::new(flow).next_nodes(node_id)
}

pub fn is_terminal(flow: &Flow, node_id: &str) -> bool {
    FlowGraph::new(flow).is_terminal(node_id)
}

pub fn entry_node(flow: &Flow) -> Result<&str, GraphError> {
    FlowGraph::new(flow).entry()
}

/// Hash estable de la forma del proceso (pipeline, entrada declarada, nodos y
/// aristas). `layout_hint` queda fuera: mover cajas en el editor no cambia el
/// proceso.
pub fn definition_hash(flow: &Flow) -> String {
    let nodes: Vec<_> = flow.nodes
                            .iter()
                            .map(|n| json!({"id": n.id, "kind": n.kind, "template_id": n.template_id}))
                            .collect();
    let edges: Vec<_> = flow.edges
                            .iter()
                            .map(|e| json!([e.source_node_id, e.target_node_id]))
                            .collect();
    hash_value(&json!({
        "hash_version": DEFINITION_HASH_VERSION,
        "pipeline": flow.pipeline.as_str(),
        "entry_node_id": flow.entry_node_id,
        "nodes": nodes,
        "edges": edges,
    }))
}
