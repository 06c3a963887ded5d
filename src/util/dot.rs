// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! DOT rendering of the call graph, and a line-oriented parser for it.

use crate::graph::call_graph::CallGraph;
use crate::ssa::analysis_context::AnalysisContext;

/// Renders the call graph for displaying with Graphviz: one node per
/// call-graph node, one edge per call-graph edge.
pub fn render(graph: &CallGraph, ctx: &AnalysisContext) -> String {
    let mut out = String::from("digraph callgraph {\n");
    out.push_str("    node [shape=box];\n");
    let mut nodes: Vec<_> = graph.nodes().collect();
    nodes.sort();
    for node in &nodes {
        out.push_str(&format!(
            "    {} [label=\"{}\"];\n",
            node.index(),
            graph.node_func(*node).qualified_name(ctx)
        ));
    }
    let mut edges: Vec<_> = graph.graph.edge_indices().collect();
    edges.sort();
    for edge in edges {
        let (from, to) = graph.edge_endpoints(edge).unwrap();
        out.push_str(&format!("    {} -> {};\n", from.index(), to.index()));
    }
    out.push_str("}\n");
    out
}

/// A parsed DOT graph: labelled nodes and directed edges, as written by
/// [`render`]. Used for round-trip verification and by tooling that
/// re-imports dumped graphs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedDot {
    pub nodes: Vec<(usize, String)>,
    pub edges: Vec<(usize, usize)>,
}

/// Parses the line-oriented subset of DOT that [`render`] emits.
pub fn parse(input: &str) -> ParsedDot {
    let mut parsed = ParsedDot::default();
    for line in input.lines() {
        let line = line.trim().trim_end_matches(';');
        if let Some((from, to)) = line.split_once("->") {
            if let (Ok(from), Ok(to)) = (from.trim().parse(), to.trim().parse()) {
                parsed.edges.push((from, to));
            }
        } else if let Some(open) = line.find("[label=\"") {
            if let Ok(id) = line[..open].trim().parse() {
                let rest = &line[open + "[label=\"".len()..];
                if let Some(close) = rest.rfind("\"]") {
                    parsed.nodes.push((id, rest[..close].to_string()));
                }
            }
        }
    }
    parsed
}
