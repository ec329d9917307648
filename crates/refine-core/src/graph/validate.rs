//! Validación estructural de un Flow antes de activarlo.
//!
//! Se ejecuta en `activate` (no al editar): un borrador puede pasar por
//! formas inválidas mientras se edita.

use std::collections::HashSet;

use refine_domain::Flow;

use super::FlowGraph;
use crate::errors::GraphError;

pub fn validate(flow: &Flow) -> Result<(), GraphError> {
    if flow.nodes.is_empty() {
        return Err(GraphError::Empty);
    }

    let mut ids: HashSet<&str> = HashSet::with_capacity(flow.nodes.len());
    for n in &flow.nodes {
        if !ids.insert(n.id.as_str()) {
            return Err(GraphError::DuplicateNode(n.id.clone()));
        }
    }

    let mut edges: HashSet<(&str, &str)> = HashSet::with_capacity(flow.edges.len());
    for e in &flow.edges {
        let (src, tgt) = (e.source_node_id.as_str(), e.target_node_id.as_str());
        if !ids.contains(src) || !ids.contains(tgt) {
            return Err(GraphError::DanglingEdge { source_node: src.to_string(),
                                                  target_node: tgt.to_string() });
        }
        if !edges.insert((src, tgt)) {
            return Err(GraphError::DuplicateEdge { source_node: src.to_string(),
                                                   target_node: tgt.to_string() });
        }
    }

    let graph = FlowGraph::new(flow);
    // ciclo antes que entrada: un ciclo puro no tiene raíces y el error útil
    // es el ciclo
    graph.topological_order()?;
    let entry = graph.entry()?;

    let reachable = graph.reachable_from(entry);
    let unreachable: Vec<String> = flow.nodes
                                       .iter()
                                       .filter(|n| !reachable.contains(n.id.as_str()))
                                       .map(|n| n.id.clone())
                                       .collect();
    if !unreachable.is_empty() {
        return Err(GraphError::Unreachable(unreachable));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refine_domain::{NodeKind, Pipeline};

    fn draft() -> Flow {
        Flow::new_draft("t", Pipeline::Copper, "admin", Utc::now())
    }

    #[test]
    fn accepts_linear_flow() {
        let flow = draft().with_node("a", NodeKind::Station, "t")
                          .with_node("b", NodeKind::Check, "t")
                          .with_edge("a", "b");
        assert_eq!(validate(&flow), Ok(()));
    }

    #[test]
    fn rejects_empty_flow() {
        assert_eq!(validate(&draft()), Err(GraphError::Empty));
    }

    #[test]
    fn rejects_duplicate_node() {
        let flow = draft().with_node("a", NodeKind::Station, "t").with_node("a", NodeKind::Check, "t");
        assert_eq!(validate(&flow), Err(GraphError::DuplicateNode("a".into())));
    }

    #[test]
    fn rejects_dangling_edge() {
        let flow = draft().with_node("a", NodeKind::Station, "t").with_edge("a", "zz");
        assert!(matches!(validate(&flow), Err(GraphError::DanglingEdge { target_node, .. }) if target_node == "zz"));
    }

    #[test]
    fn rejects_duplicate_edge() {
        let flow = draft().with_node("a", NodeKind::Station, "t")
                          .with_node("b", NodeKind::Station, "t")
                          .with_edge("a", "b")
                          .with_edge("a", "b");
        assert!(matches!(validate(&flow), Err(GraphError::DuplicateEdge { .. })));
    }

    #[test]
    fn rejects_cycle() {
        let flow = draft().with_node("a", NodeKind::Station, "t")
                          .with_node("b", NodeKind::Station, "t")
                          .with_node("c", NodeKind::Station, "t")
                          .with_edge("a", "b")
                          .with_edge("b", "c")
                          .with_edge("c", "b");
        assert_eq!(validate(&flow), Err(GraphError::Cycle(vec!["b".into(), "c".into()])));
    }

    #[test]
    fn rejects_self_loop() {
        let flow = draft().with_node("a", NodeKind::Station, "t").with_edge("a", "a");
        assert!(matches!(validate(&flow), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn rejects_two_roots_without_declared_entry() {
        let flow = draft().with_node("a", NodeKind::Station, "t")
                          .with_node("b", NodeKind::Station, "t")
                          .with_node("c", NodeKind::Station, "t")
                          .with_edge("a", "c")
                          .with_edge("b", "c");
        assert_eq!(validate(&flow), Err(GraphError::AmbiguousEntry(vec!["a".into(), "b".into()])));
    }

    #[test]
    fn declared_entry_leaves_other_roots_unreachable() {
        let flow = draft().with_node("a", NodeKind::Station, "t")
                          .with_node("b", NodeKind::Station, "t")
                          .with_node("c", NodeKind::Station, "t")
                          .with_edge("a", "c")
                          .with_edge("b", "c")
                          .with_entry("a");
        assert_eq!(validate(&flow), Err(GraphError::Unreachable(vec!["b".into()])));
    }

    #[test]
    fn rejects_unknown_declared_entry() {
        let flow = draft().with_node("a", NodeKind::Station, "t").with_entry("nope");
        assert_eq!(validate(&flow), Err(GraphError::UnknownEntry("nope".into())));
    }
}
