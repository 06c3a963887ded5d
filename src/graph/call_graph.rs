// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use petgraph::graph::{DefaultIx, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::{Direction, Graph};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::ssa::analysis_context::{synthetic_method, AnalysisContext, SynthId};
use crate::ssa::function::FuncId;
use crate::ssa::value::ValueId;
use crate::util::chunked_queue::ChunkedQueue;

/// Unique identifiers for call graph nodes.
pub type CgNodeId = NodeIndex<DefaultIx>;
/// Unique identifiers for call graph edges.
pub type CgEdgeId = EdgeIndex<DefaultIx>;

/// A function as the call graph knows it: a program function, or a synthetic
/// placeholder interned for an unresolved invoke target.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CgFunc {
    Func(FuncId),
    Synthetic(SynthId),
}

impl CgFunc {
    /// The qualified name used for matching and display.
    pub fn qualified_name(&self, ctx: &AnalysisContext) -> String {
        match self {
            CgFunc::Func(f) => ctx.func_qualified_name(*f).to_string(),
            CgFunc::Synthetic(s) => synthetic_method(*s).qualified,
        }
    }

    pub fn func_id(&self) -> Option<FuncId> {
        match self {
            CgFunc::Func(f) => Some(*f),
            CgFunc::Synthetic(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct CallGraphNode {
    pub func: CgFunc,
}

impl CallGraphNode {
    pub fn new(func: CgFunc) -> Self {
        CallGraphNode { func }
    }
}

/// An edge from caller to callee. `callsite` is the call value at which the
/// invocation happens; `None` denotes a synthetic root edge.
#[derive(Debug)]
pub struct CallGraphEdge {
    pub callsite: Option<ValueId>,
}

impl CallGraphEdge {
    pub fn new(callsite: Option<ValueId>) -> Self {
        CallGraphEdge { callsite }
    }
}

/// The call graph: nodes are functions, edges are `(caller, callsite,
/// callee)` triples. At most one node exists per function; duplicate
/// `(callee, callsite)` edges are removed by [`CallGraph::dedup_edges`].
pub struct CallGraph {
    /// The graph structure capturing call relationships.
    pub graph: Graph<CallGraphNode, CallGraphEdge>,
    /// A map from functions to their corresponding call graph nodes.
    pub func_nodes: HashMap<CgFunc, CgNodeId>,
    /// A map from call sites to call graph edges.
    pub callsite_to_edges: HashMap<Option<ValueId>, HashSet<CgEdgeId>>,
    /// The distinguished root, if one was designated.
    pub root: Option<CgNodeId>,
    /// A queue of reachable functions, in insertion order.
    pub(crate) reach_funcs: ChunkedQueue<CgFunc>,
}

impl Default for CallGraph {
    fn default() -> Self {
        CallGraph::new()
    }
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph {
            graph: Graph::<CallGraphNode, CallGraphEdge>::new(),
            func_nodes: HashMap::new(),
            callsite_to_edges: HashMap::new(),
            root: None,
            reach_funcs: ChunkedQueue::new(),
        }
    }

    /// Adds a new node to the call graph. Inserting the same function twice
    /// returns the existing node.
    pub fn add_node(&mut self, func: CgFunc) -> CgNodeId {
        self.get_or_insert_node(func)
    }

    /// Designates the root node, creating it if needed.
    pub fn set_root(&mut self, func: CgFunc) -> CgNodeId {
        let node = self.get_or_insert_node(func);
        self.root = Some(node);
        node
    }

    fn get_or_insert_node(&mut self, func: CgFunc) -> CgNodeId {
        match self.func_nodes.entry(func) {
            Entry::Occupied(o) => o.get().to_owned(),
            Entry::Vacant(v) => {
                self.reach_funcs.push(func);
                let node_id = self.graph.add_node(CallGraphNode::new(func));
                *v.insert(node_id)
            }
        }
    }

    pub fn node(&self, func: CgFunc) -> Option<CgNodeId> {
        self.func_nodes.get(&func).copied()
    }

    pub fn node_func(&self, node: CgNodeId) -> CgFunc {
        self.graph[node].func
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = CgNodeId> {
        self.graph.node_indices()
    }

    pub fn edge_callsite(&self, edge: CgEdgeId) -> Option<ValueId> {
        self.graph[edge].callsite
    }

    pub fn edge_endpoints(&self, edge: CgEdgeId) -> Option<(CgNodeId, CgNodeId)> {
        self.graph.edge_endpoints(edge)
    }

    /// The callee functions reached from a callsite.
    pub fn get_callees(&self, callsite: &Option<ValueId>) -> HashSet<CgFunc> {
        if let Some(edges) = self.callsite_to_edges.get(callsite) {
            edges
                .iter()
                .filter_map(|edge_id| match self.graph.edge_endpoints(*edge_id) {
                    Some((_, target)) => Some(self.graph[target].func),
                    None => None,
                })
                .collect::<HashSet<CgFunc>>()
        } else {
            HashSet::new()
        }
    }

    /// Returns true if an edge to the callee already exists for the callsite.
    pub fn has_edge(&self, callsite: &Option<ValueId>, callee: CgFunc) -> bool {
        self.get_callees(callsite).contains(&callee)
    }

    /// Adds a new edge for a call from `caller` to `callee` at `callsite`.
    /// Returns false if the edge already existed, and true otherwise.
    pub fn add_edge(&mut self, callsite: Option<ValueId>, caller: CgFunc, callee: CgFunc) -> bool {
        let caller_node = self.get_or_insert_node(caller);
        let callee_node = self.get_or_insert_node(callee);

        if self.has_edge(&callsite, callee) {
            return false;
        }
        let edge_id = self
            .graph
            .add_edge(caller_node, callee_node, CallGraphEdge::new(callsite));
        self.callsite_to_edges
            .entry(callsite)
            .or_default()
            .insert(edge_id);
        true
    }

    /// Adds a synthetic root edge (no callsite) from the root to `callee`,
    /// connecting an otherwise disconnected entry point.
    pub fn add_root_edge(&mut self, callee: CgFunc) -> bool {
        let root = match self.root {
            Some(root) => root,
            None => return false,
        };
        let caller = self.graph[root].func;
        self.add_edge(None, caller, callee)
    }

    pub fn out_edges(&self, node: CgNodeId) -> Vec<(CgEdgeId, CgNodeId)> {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect()
    }

    pub fn in_edges(&self, node: CgNodeId) -> Vec<(CgEdgeId, CgNodeId)> {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| (e.id(), e.source()))
            .collect()
    }

    /// Construction finaliser: for each node with two or more outgoing
    /// edges, drops edges duplicating an existing `(callee, callsite)` pair,
    /// preserving the first occurrence. Distinct callsites to the same
    /// callee survive as distinct edges.
    pub fn dedup_edges(&mut self) {
        let mut to_remove: Vec<CgEdgeId> = Vec::new();
        for node in self.graph.node_indices() {
            let mut seen: HashSet<(CgNodeId, Option<ValueId>)> = HashSet::new();
            // Edge ids ascend in insertion order within the iteration.
            let mut out: Vec<_> = self
                .graph
                .edges_directed(node, Direction::Outgoing)
                .map(|e| (e.id(), e.target(), e.weight().callsite))
                .collect();
            out.sort_by_key(|(id, _, _)| *id);
            for (id, target, callsite) in out {
                if !seen.insert((target, callsite)) {
                    to_remove.push(id);
                }
            }
        }
        // Removal swaps the last edge into the removed slot, so remove in
        // descending index order to keep the collected ids valid.
        to_remove.sort();
        for edge in to_remove.into_iter().rev() {
            self.graph.remove_edge(edge);
        }
        self.rebuild_callsite_index();
    }

    /// Checks the structural invariants: every edge is listed by both of its
    /// endpoints, and no node's outgoing edges duplicate a
    /// `(callee, callsite)` pair.
    pub fn verify(&self) -> Result<(), crate::error::AnalysisError> {
        use crate::error::AnalysisError;
        for node in self.graph.node_indices() {
            let mut seen: HashSet<(CgNodeId, Option<ValueId>)> = HashSet::new();
            for (edge, target) in self.out_edges(node) {
                let (from, to) = self.graph.edge_endpoints(edge).ok_or_else(|| {
                    AnalysisError::InternalInvariant(format!("edge {:?} has no endpoints", edge))
                })?;
                if from != node || to != target {
                    return Err(AnalysisError::InternalInvariant(format!(
                        "edge {:?} endpoint mismatch",
                        edge
                    )));
                }
                if !self.in_edges(target).iter().any(|(e, _)| *e == edge) {
                    return Err(AnalysisError::InternalInvariant(format!(
                        "edge {:?} missing from callee's in-edges",
                        edge
                    )));
                }
                if !seen.insert((target, self.graph[edge].callsite)) {
                    return Err(AnalysisError::InternalInvariant(format!(
                        "duplicate (callee, callsite) edge at node {:?}",
                        node
                    )));
                }
            }
        }
        Ok(())
    }

    fn rebuild_callsite_index(&mut self) {
        self.callsite_to_edges.clear();
        for edge in self.graph.edge_indices() {
            let callsite = self.graph[edge].callsite;
            self.callsite_to_edges
                .entry(callsite)
                .or_default()
                .insert(edge);
        }
    }

    /// Returns an iterator over the reachable functions, in first-insertion
    /// order.
    pub fn reach_funcs_iter(&self) -> impl Iterator<Item = &CgFunc> {
        self.reach_funcs.iter()
    }

    /// Produce a dot file representation of the call graph
    /// for displaying with Graphviz.
    pub fn to_dot(&self, ctx: &AnalysisContext, dot_path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(dot_path, crate::util::dot::render(self, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssa::builder::ProgramBuilder;
    use crate::util::options::AnalysisOptions;

    fn two_func_fixture() -> (AnalysisContext, FuncId, FuncId, ValueId) {
        let mut pb = ProgramBuilder::new();
        let callee = pb.function("main", "main.callee");
        let main = pb.function("main", "main.main");
        let call = {
            let mut f = pb.func_builder(main);
            let call = f.call_fn(callee, &[], "()");
            f.ret(vec![]);
            call
        };
        let ctx = AnalysisContext::new(pb.finish().unwrap(), AnalysisOptions::default());
        (ctx, main, callee, call)
    }

    #[test]
    fn one_node_per_function() {
        let (_, main, _, _) = two_func_fixture();
        let mut graph = CallGraph::new();
        let a = graph.add_node(CgFunc::Func(main));
        let b = graph.add_node(CgFunc::Func(main));
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn edges_join_both_endpoint_lists() {
        let (_, main, callee, call) = two_func_fixture();
        let mut graph = CallGraph::new();
        assert!(graph.add_edge(Some(call), CgFunc::Func(main), CgFunc::Func(callee)));
        let caller_node = graph.node(CgFunc::Func(main)).unwrap();
        let callee_node = graph.node(CgFunc::Func(callee)).unwrap();
        let out = graph.out_edges(caller_node);
        let inn = graph.in_edges(callee_node);
        assert_eq!(out.len(), 1);
        assert_eq!(inn.len(), 1);
        assert_eq!(out[0].0, inn[0].0);
    }

    #[test]
    fn duplicate_callsite_edges_are_rejected_then_deduped() {
        let (_, main, callee, call) = two_func_fixture();
        let mut graph = CallGraph::new();
        assert!(graph.add_edge(Some(call), CgFunc::Func(main), CgFunc::Func(callee)));
        assert!(!graph.add_edge(Some(call), CgFunc::Func(main), CgFunc::Func(callee)));
        // Force a duplicate past the insertion check, as concurrent batch
        // merging can, then verify the finaliser restores the invariant.
        let caller_node = graph.node(CgFunc::Func(main)).unwrap();
        let callee_node = graph.node(CgFunc::Func(callee)).unwrap();
        graph
            .graph
            .add_edge(caller_node, callee_node, CallGraphEdge::new(Some(call)));
        assert_eq!(graph.edge_count(), 2);
        graph.dedup_edges();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn distinct_callsites_to_same_callee_survive_dedup() {
        let mut pb = ProgramBuilder::new();
        let callee = pb.function("main", "main.callee");
        let main = pb.function("main", "main.main");
        let (call1, call2) = {
            let mut f = pb.func_builder(main);
            let c1 = f.call_fn(callee, &[], "()");
            let c2 = f.call_fn(callee, &[], "()");
            f.ret(vec![]);
            (c1, c2)
        };
        let mut graph = CallGraph::new();
        graph.add_edge(Some(call1), CgFunc::Func(main), CgFunc::Func(callee));
        graph.add_edge(Some(call2), CgFunc::Func(main), CgFunc::Func(callee));
        graph.dedup_edges();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn verify_accepts_deduped_graphs_and_flags_duplicates() {
        let (_, main, callee, call) = two_func_fixture();
        let mut graph = CallGraph::new();
        graph.add_edge(Some(call), CgFunc::Func(main), CgFunc::Func(callee));
        assert!(graph.verify().is_ok());
        let caller_node = graph.node(CgFunc::Func(main)).unwrap();
        let callee_node = graph.node(CgFunc::Func(callee)).unwrap();
        graph
            .graph
            .add_edge(caller_node, callee_node, CallGraphEdge::new(Some(call)));
        assert!(graph.verify().is_err());
        graph.dedup_edges();
        assert!(graph.verify().is_ok());
    }

    #[test]
    fn root_edges_carry_no_callsite() {
        let (_, main, callee, _) = two_func_fixture();
        let mut graph = CallGraph::new();
        graph.set_root(CgFunc::Func(main));
        assert!(graph.add_root_edge(CgFunc::Func(callee)));
        let root = graph.root.unwrap();
        let out = graph.out_edges(root);
        assert_eq!(out.len(), 1);
        assert_eq!(graph.edge_callsite(out[0].0), None);
    }
}
