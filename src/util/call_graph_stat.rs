// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashSet;
use std::io::{BufWriter, Write};

use crate::graph::call_graph::{CallGraph, CgFunc, CgNodeId};
use crate::ssa::analysis_context::AnalysisContext;

/// Writes summary statistics of a built call graph.
pub fn call_graph_stat<W: Write>(
    ctx: &AnalysisContext,
    graph: &CallGraph,
    stat_writer: &mut BufWriter<W>,
) {
    let num_nodes = graph.node_count();
    let num_edges = graph.edge_count();
    let num_synthetic = graph
        .reach_funcs_iter()
        .filter(|f| matches!(f, CgFunc::Synthetic(_)))
        .count();
    let reachable = graph.root.map_or(0, |root| reachable_from(graph, root));

    let mut max_out_degree = 0;
    let mut busiest: Option<CgNodeId> = None;
    for node in graph.nodes() {
        let degree = graph.out_edges(node).len();
        if degree > max_out_degree {
            max_out_degree = degree;
            busiest = Some(node);
        }
    }

    stat_writer
        .write_all("Call Graph Statistics: \n".as_bytes())
        .expect("Unable to write data");
    stat_writer
        .write_all(format!("#Nodes: {}\n", num_nodes).as_bytes())
        .expect("Unable to write data");
    stat_writer
        .write_all(format!("#Edges: {}\n", num_edges).as_bytes())
        .expect("Unable to write data");
    stat_writer
        .write_all(format!("#Synthetic nodes: {}\n", num_synthetic).as_bytes())
        .expect("Unable to write data");
    stat_writer
        .write_all(format!("#Reachable from root: {}\n", reachable).as_bytes())
        .expect("Unable to write data");
    if let Some(node) = busiest {
        stat_writer
            .write_all(
                format!(
                    "#Max out-degree: {} ({})\n",
                    max_out_degree,
                    graph.node_func(node).qualified_name(ctx)
                )
                .as_bytes(),
            )
            .expect("Unable to write data");
    }
}

fn reachable_from(graph: &CallGraph, root: CgNodeId) -> usize {
    let mut visited: HashSet<CgNodeId> = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        for (_, target) in graph.out_edges(node) {
            stack.push(target);
        }
    }
    visited.len()
}
