//! Derived supplier dependency graph.
//!
//! Not persisted: rebuilt from the store on demand and cached behind a version
//! counter, deriving this read-side structure from the canonical store rather than
//! keeping a second mutable copy in sync. Built on `petgraph::DiGraph` with a
//! name-to-`NodeIndex` map, the same wrapping pattern `dashflow-memory`'s
//! `NetworkxEntityGraph` (`kg.rs`) uses.

use crate::models::Supplier;
use crate::store::EventStore;
use anyhow::Result;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const COMPANY_NODE: &str = "__company__";

/// Directed graph: edges run from upstream supplier toward the company, with weight
/// `supply_volume_pct / 100`. Node weights are supplier ids, or
/// [`COMPANY_NODE`] for the sink.
pub struct SupplierGraph {
    graph: DiGraph<String, f64>,
    node_index: HashMap<String, NodeIndex>,
}

impl SupplierGraph {
    fn build(suppliers: &[Supplier]) -> Self {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        let company_idx = graph.add_node(COMPANY_NODE.to_string());
        node_index.insert(COMPANY_NODE.to_string(), company_idx);

        for s in suppliers {
            let idx = graph.add_node(s.id.clone());
            node_index.insert(s.id.clone(), idx);
        }

        for s in suppliers {
            let from = node_index[&s.id];
            let to = match &s.supplies_to {
                Some(target) => node_index.get(target).copied().unwrap_or(company_idx),
                None => company_idx,
            };
            let weight = (s.supply_volume_pct / 100.0).clamp(0.0, 1.0);
            graph.add_edge(from, to, weight);
        }

        Self { graph, node_index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn successors(&self, supplier_id: &str) -> Vec<(String, f64)> {
        let Some(&idx) = self.node_index.get(supplier_id) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (self.graph[e.target()].clone(), *e.weight()))
            .collect()
    }

    /// Breadth-first propagation from `origin_supplier_id` with initial score
    /// `origin_score`. Returns `supplier-id -> propagated-score` for every node
    /// reached, excluding [`COMPANY_NODE`] as a map key but including its
    /// contribution in the traversal (callers can look it up separately if needed).
    ///
    /// Re-enqueues a node only on strict improvement, which bounds visits to
    /// `O(|V|*|E|)` and guarantees termination on any finite graph.
    pub fn propagate(
        &self,
        origin_supplier_id: &str,
        origin_score: f64,
        vulnerability_of: impl Fn(&str) -> f64,
        propagation_threshold: f64,
    ) -> HashMap<String, f64> {
        let mut best: HashMap<String, f64> = HashMap::new();
        best.insert(origin_supplier_id.to_string(), origin_score);

        let mut queue = VecDeque::new();
        queue.push_back(origin_supplier_id.to_string());

        while let Some(u) = queue.pop_front() {
            let propagated_u = *best.get(&u).unwrap_or(&0.0);
            for (v, weight) in self.successors(&u) {
                if v == COMPANY_NODE {
                    let candidate = propagated_u * weight;
                    if candidate <= propagation_threshold {
                        continue;
                    }
                    let entry = best.entry(COMPANY_NODE.to_string()).or_insert(0.0);
                    if candidate > *entry {
                        *entry = candidate;
                    }
                    continue;
                }
                let vulnerability_v = vulnerability_of(&v);
                let candidate = propagated_u * weight * (0.5 + vulnerability_v);
                if candidate <= propagation_threshold {
                    continue;
                }
                let improved = match best.get(&v) {
                    Some(existing) => candidate > *existing,
                    None => true,
                };
                if improved {
                    best.insert(v.clone(), candidate);
                    queue.push_back(v);
                }
            }
        }

        best
    }
}

/// Single-writer/multi-reader cache invalidated by [`crate::store::SupplierVersion`].
pub struct GraphCache {
    store: Arc<EventStore>,
    inner: RwLock<Option<(u64, Arc<SupplierGraph>)>>,
}

impl GraphCache {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            inner: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Result<Arc<SupplierGraph>> {
        let current_version = self.store.supplier_version.get();
        if let Some((cached_version, graph)) = self.inner.read().as_ref() {
            if *cached_version == current_version {
                return Ok(graph.clone());
            }
        }

        let suppliers = self.store.list_suppliers()?;
        let graph = Arc::new(SupplierGraph::build(&suppliers));
        *self.inner.write() = Some((current_version, graph.clone()));
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SupplierStatus;

    fn supplier(id: &str, supplies_to: Option<&str>, pct: f64) -> Supplier {
        Supplier {
            id: id.to_string(),
            name: id.to_string(),
            country: "DE".to_string(),
            region: "EU".to_string(),
            tier: if supplies_to.is_some() { 2 } else { 1 },
            materials: vec!["copper".to_string()],
            supply_volume_pct: pct,
            status: SupplierStatus::Active,
            approved_vendor: true,
            esg_score: 50.0,
            credit_rating: "A".to_string(),
            max_capacity: 100.0,
            lead_time_weeks: 4.0,
            switching_cost: 2.0,
            risk_score_current: 0.0,
            supplies_to: supplies_to.map(str::to_string),
        }
    }

    #[test]
    fn two_tier_propagation_matches_worked_example() {
        let suppliers = vec![supplier("x", None, 65.0), supplier("y", Some("x"), 100.0)];
        let graph = SupplierGraph::build(&suppliers);

        let propagated = graph.propagate("y", 8.0, |_| 0.5, 1.0);
        assert!((propagated["y"] - 8.0).abs() < 1e-9);
        assert!((propagated["x"] - 8.0).abs() < 1e-9);
        assert!((propagated[COMPANY_NODE] - 5.2).abs() < 1e-9);
    }

    #[test]
    fn propagation_threshold_excludes_nodes_at_or_below_cutoff() {
        let suppliers = vec![supplier("x", None, 1.0)];
        let graph = SupplierGraph::build(&suppliers);
        // x -> company weight 0.01; propagated to company = 10.0*0.01 = 0.1 < threshold.
        let propagated = graph.propagate("x", 10.0, |_| 0.5, 1.0);
        assert!(!propagated.contains_key(COMPANY_NODE));
    }

    #[test]
    fn propagation_terminates_on_a_cyclic_looking_chain() {
        let suppliers = vec![
            supplier("a", Some("b"), 50.0),
            supplier("b", Some("c"), 50.0),
            supplier("c", None, 50.0),
        ];
        let graph = SupplierGraph::build(&suppliers);
        let propagated = graph.propagate("a", 10.0, |_| 0.5, 1.0);
        assert!(propagated.contains_key("a"));
        assert!(propagated.contains_key("b"));
        assert!(propagated.contains_key("c"));
    }
}
