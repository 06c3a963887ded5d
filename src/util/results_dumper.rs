// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Options-driven emitters for graphs and check reports.

use log::*;
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::graph::call_graph::CallGraph;
use crate::ssa::analysis_context::AnalysisContext;
use crate::taint::CheckResult;
use crate::util::dot;

fn make_writer(path: &str) -> BufWriter<Box<dyn Write>> {
    BufWriter::new(match path {
        "stdout" => Box::new(std::io::stdout()) as Box<dyn Write>,
        _ => Box::new(File::create(path).expect("Unable to create file")) as Box<dyn Write>,
    })
}

/// Writes every dump the options ask for.
pub fn dump_results(ctx: &AnalysisContext, call_graph: &CallGraph, results: &[CheckResult]) {
    if let Some(cg_output) = &ctx.options.call_graph_output {
        info!("Dumping call graph...");
        let mut writer = make_writer(cg_output);
        writer
            .write_all(dot::render(call_graph, ctx).as_bytes())
            .expect("Unable to write data");
    }

    if let Some(csv_output) = &ctx.options.graph_csv_output {
        info!("Dumping call graph CSV...");
        let mut writer = make_writer(csv_output);
        dump_graph_csv(ctx, call_graph, &mut writer);
    }

    if let Some(meta_output) = &ctx.options.metadata_csv_output {
        info!("Dumping node metadata CSV...");
        let mut writer = make_writer(meta_output);
        dump_metadata_csv(ctx, call_graph, &mut writer);
    }

    if let Some(results_output) = &ctx.options.results_output {
        info!("Dumping check report...");
        let mut writer = make_writer(results_output);
        dump_check_report(ctx, call_graph, results, &mut writer);
    }
}

/// One row per edge: `source,target,site`.
pub fn dump_graph_csv<W: Write>(ctx: &AnalysisContext, graph: &CallGraph, writer: &mut BufWriter<W>) {
    writer
        .write_all("source,target,site\n".as_bytes())
        .expect("Unable to write data");
    let mut edges: Vec<_> = graph.graph.edge_indices().collect();
    edges.sort();
    for edge in edges {
        let (from, to) = graph.edge_endpoints(edge).unwrap();
        let site = match graph.edge_callsite(edge) {
            Some(callsite) => ctx.program.value(callsite).pos.to_string(),
            None => "root".to_string(),
        };
        writer
            .write_all(format!("{},{},\"{}\"\n", from.index(), to.index(), site).as_bytes())
            .expect("Unable to write data");
    }
}

/// One row per node: `id,pkg,func`. Package-less nodes report `shared`.
pub fn dump_metadata_csv<W: Write>(
    ctx: &AnalysisContext,
    graph: &CallGraph,
    writer: &mut BufWriter<W>,
) {
    writer
        .write_all("id,pkg,func\n".as_bytes())
        .expect("Unable to write data");
    let mut nodes: Vec<_> = graph.nodes().collect();
    nodes.sort();
    for node in nodes {
        let func = graph.node_func(node);
        let pkg = func
            .func_id()
            .and_then(|f| ctx.program.func(f).package.clone())
            .unwrap_or_else(|| "shared".to_string());
        writer
            .write_all(
                format!("{},{},{}\n", node.index(), pkg, func.qualified_name(ctx)).as_bytes(),
            )
            .expect("Unable to write data");
    }
}

/// The human-readable check report: the sink position, the matched
/// descriptors, and the witness path rendered as a call chain.
pub fn dump_check_report<W: Write>(
    ctx: &AnalysisContext,
    graph: &CallGraph,
    results: &[CheckResult],
    writer: &mut BufWriter<W>,
) {
    for result in results {
        let chain = result
            .path
            .iter()
            .filter_map(|edge| {
                let (from, _) = graph.edge_endpoints(*edge)?;
                Some(graph.node_func(from).qualified_name(ctx))
            })
            .chain(std::iter::once(result.sink.clone()))
            .collect::<Vec<String>>()
            .join(" -> ");
        writer
            .write_all(
                format!(
                    "{}: {} reaches {} via {}\n",
                    result.sink_pos(ctx),
                    result.source,
                    result.sink,
                    chain,
                )
                .as_bytes(),
            )
            .expect("Unable to write data");
    }
    writer
        .write_all(format!("{} finding(s)\n", results.len()).as_bytes())
        .expect("Unable to write data");
}
