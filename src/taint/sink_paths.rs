// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Enumerates call-graph paths ending at callsites of a sink.

use std::collections::HashSet;

use crate::graph::call_graph::{CallGraph, CgEdgeId, CgNodeId};
use crate::graph::matcher::{MatchStrategy, Matcher};
use crate::graph::path::paths_search;
use crate::ssa::analysis_context::AnalysisContext;
use crate::ssa::value::{CallCommon, ValueKind};
use crate::util;

// Reverse exploration stays shallow; deeper context comes from the
// root-originated search.
const REVERSE_HOPS: usize = 4;

/// For one sink descriptor, produces every path whose last edge's callsite
/// resolves to the sink. Paths are not deduplicated here; that is the
/// result layer's job.
pub fn sink_paths(ctx: &AnalysisContext, graph: &CallGraph, sink: &str) -> Vec<Vec<CgEdgeId>> {
    let mut found = Vec::new();
    let mut nodes: Vec<CgNodeId> = graph.nodes().collect();
    nodes.sort();
    for node in nodes {
        if ctx.cancelled() {
            break;
        }
        let mut out = graph.out_edges(node);
        out.sort_by_key(|(edge, _)| *edge);
        for (edge, _) in out {
            if edge_matches_sink(ctx, graph, edge, sink) {
                assemble_paths(ctx, graph, node, edge, &mut found);
            }
        }
    }
    found
}

/// Decides whether an edge's callsite resolves to the sink descriptor, by
/// callee name, by statically resolved callee (with method-on-receiver
/// synthesis, pointer and pointer-stripped), by closure target, or by invoke
/// receiver and method name.
pub fn edge_matches_sink(
    ctx: &AnalysisContext,
    graph: &CallGraph,
    edge: CgEdgeId,
    sink: &str,
) -> bool {
    let program = &ctx.program;
    let (_, callee_node) = match graph.edge_endpoints(edge) {
        Some(endpoints) => endpoints,
        None => return false,
    };

    if graph.node_func(callee_node).qualified_name(ctx) == sink {
        return true;
    }

    let callsite = match graph.edge_callsite(edge) {
        Some(callsite) => callsite,
        None => return false,
    };
    let cc = match &program.value(callsite).kind {
        ValueKind::Call(cc) => cc,
        _ => return false,
    };

    if let Some(op) = cc.value {
        let target = match &program.value(op).kind {
            ValueKind::FunctionRef(f) => Some(*f),
            ValueKind::MakeClosure { func, .. } => Some(*func),
            _ => None,
        };
        if let Some(f) = target {
            let func = program.func(f);
            if func.qualified == sink {
                return true;
            }
            if let Some(recv) = func.sig.recv {
                let recv = program.type_str(recv);
                if util::method_descriptor(recv, &func.name) == sink
                    || util::method_descriptor(util::strip_pointer(recv), &func.name) == sink
                {
                    return true;
                }
            }
        }
    }

    if let CallCommon {
        method: Some(method),
        recv_ty: Some(recv_ty),
        ..
    } = cc
    {
        let recv = program.type_str(*recv_ty);
        if util::method_descriptor(recv, method) == sink
            || util::method_descriptor(util::strip_pointer(recv), method) == sink
        {
            return true;
        }
    }
    false
}

/// Path production for a matched edge at node `node`, in order: immediate
/// caller pairs, root-originated DFS paths, shallow reverse-BFS chains, and
/// the singleton fallback.
fn assemble_paths(
    ctx: &AnalysisContext,
    graph: &CallGraph,
    node: CgNodeId,
    edge: CgEdgeId,
    found: &mut Vec<Vec<CgEdgeId>>,
) {
    let before = found.len();

    // 1. Immediate callers.
    let mut in_edges = graph.in_edges(node);
    in_edges.sort_by_key(|(e, _)| *e);
    for (caller_edge, _) in &in_edges {
        found.push(vec![*caller_edge, edge]);
    }

    // 2. Root-originated paths.
    if let Some(root) = graph.root {
        let qualified = graph.node_func(node).qualified_name(ctx);
        if let Ok(matcher) = Matcher::new(MatchStrategy::Exact, &qualified) {
            for path in paths_search(graph, ctx, root, &matcher) {
                let mut full = path;
                full.push(edge);
                found.push(full);
            }
        }
    }

    // 3. Reverse BFS chains.
    let mut frontier: Vec<(CgNodeId, Vec<CgEdgeId>)> = vec![(node, Vec::new())];
    let mut visited: HashSet<CgNodeId> = HashSet::new();
    visited.insert(node);
    for _ in 0..REVERSE_HOPS {
        let mut next = Vec::new();
        for (n, chain) in frontier {
            let mut in_edges = graph.in_edges(n);
            in_edges.sort_by_key(|(e, _)| *e);
            for (in_edge, caller) in in_edges {
                if !visited.insert(caller) {
                    continue;
                }
                let mut assembled = vec![in_edge];
                assembled.extend(chain.iter().copied());
                let mut full = assembled.clone();
                full.push(edge);
                found.push(full);
                next.push((caller, assembled));
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    // 4. Fallback: the callsite is still evaluated on its own.
    if found.len() == before {
        found.push(vec![edge]);
    }
}
