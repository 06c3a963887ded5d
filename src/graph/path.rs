// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Depth-first path enumeration over the call graph.

use std::collections::HashSet;

use crate::graph::call_graph::{CallGraph, CgEdgeId, CgNodeId};
use crate::graph::matcher::Matcher;
use crate::ssa::analysis_context::AnalysisContext;

/// Returns the first DFS path from `start` to a node matching `matcher`.
/// The path is a caller-to-callee edge sequence; it is not necessarily the
/// shortest. A match at `start` itself yields the empty path.
pub fn path_search(
    graph: &CallGraph,
    ctx: &AnalysisContext,
    start: CgNodeId,
    matcher: &Matcher,
) -> Option<Vec<CgEdgeId>> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    if dfs_first(graph, ctx, start, matcher, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn dfs_first(
    graph: &CallGraph,
    ctx: &AnalysisContext,
    node: CgNodeId,
    matcher: &Matcher,
    visited: &mut HashSet<CgNodeId>,
    path: &mut Vec<CgEdgeId>,
) -> bool {
    if ctx.cancelled() || !visited.insert(node) {
        return false;
    }
    if matcher.is_match(&graph.node_func(node).qualified_name(ctx)) {
        return true;
    }
    let mut out = graph.out_edges(node);
    out.sort_by_key(|(edge, _)| *edge);
    for (edge, target) in out {
        path.push(edge);
        if dfs_first(graph, ctx, target, matcher, visited, path) {
            return true;
        }
        path.pop();
    }
    false
}

/// Enumerates every DFS path from `start` to a matching node. The visited
/// set is reset each time a match is recorded, so matches in sibling
/// branches remain reachable; as a consequence the same edge may appear in
/// several returned paths. Deduplication is the caller's job.
pub fn paths_search(
    graph: &CallGraph,
    ctx: &AnalysisContext,
    start: CgNodeId,
    matcher: &Matcher,
) -> Vec<Vec<CgEdgeId>> {
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    let mut found = Vec::new();
    dfs_all(graph, ctx, start, matcher, &mut visited, &mut path, &mut found);
    found
}

fn dfs_all(
    graph: &CallGraph,
    ctx: &AnalysisContext,
    node: CgNodeId,
    matcher: &Matcher,
    visited: &mut HashSet<CgNodeId>,
    path: &mut Vec<CgEdgeId>,
    found: &mut Vec<Vec<CgEdgeId>>,
) {
    if ctx.cancelled() || !visited.insert(node) {
        return;
    }
    if matcher.is_match(&graph.node_func(node).qualified_name(ctx)) {
        found.push(path.clone());
        visited.clear();
        visited.insert(node);
        return;
    }
    let mut out = graph.out_edges(node);
    out.sort_by_key(|(edge, _)| *edge);
    for (edge, target) in out {
        path.push(edge);
        dfs_all(graph, ctx, target, matcher, visited, path, found);
        path.pop();
    }
}

/// The scan-all-nodes fallback: every node whose qualified name matches
/// yields one singleton path per direct caller, or the empty path if nothing
/// refers to it.
pub fn scan_paths(
    graph: &CallGraph,
    ctx: &AnalysisContext,
    matcher: &Matcher,
) -> Vec<Vec<CgEdgeId>> {
    let mut found = Vec::new();
    for node in graph.nodes() {
        if ctx.cancelled() {
            break;
        }
        if !matcher.is_match(&graph.node_func(node).qualified_name(ctx)) {
            continue;
        }
        let mut in_edges = graph.in_edges(node);
        in_edges.sort_by_key(|(edge, _)| *edge);
        if in_edges.is_empty() {
            found.push(Vec::new());
        } else {
            for (edge, _) in in_edges {
                found.push(vec![edge]);
            }
        }
    }
    found
}

/// Path enumeration for tooling: all root-originated paths to nodes matching
/// `pattern`, falling back to the node scan when the root search yields
/// nothing.
pub fn paths_to(
    graph: &CallGraph,
    ctx: &AnalysisContext,
    pattern: &str,
) -> Result<Vec<Vec<CgEdgeId>>, crate::error::AnalysisError> {
    let matcher = Matcher::parse(pattern)?;
    let mut paths = match graph.root {
        Some(root) => paths_search(graph, ctx, root, &matcher),
        None => Vec::new(),
    };
    if paths.is_empty() {
        paths = scan_paths(graph, ctx, &matcher);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::call_graph::CgFunc;
    use crate::graph::matcher::MatchStrategy;
    use crate::ssa::builder::ProgramBuilder;
    use crate::util::options::AnalysisOptions;

    // main -> handler -> business ; main -> logger
    fn chain_fixture() -> (AnalysisContext, CallGraph) {
        let mut pb = ProgramBuilder::new();
        let business = pb.function("main", "main.business");
        let handler = pb.function("main", "main.handler");
        let logger = pb.function("main", "main.logger");
        let main = pb.function("main", "main.main");
        let (c1, c2, c3) = {
            let mut f = pb.func_builder(main);
            let c1 = f.call_fn(handler, &[], "()");
            let c3 = f.call_fn(logger, &[], "()");
            f.ret(vec![]);
            let mut h = pb.func_builder(handler);
            let c2 = h.call_fn(business, &[], "()");
            h.ret(vec![]);
            (c1, c2, c3)
        };
        let ctx = AnalysisContext::new(pb.finish().unwrap(), AnalysisOptions::default());
        let mut graph = CallGraph::new();
        graph.set_root(CgFunc::Func(main));
        graph.add_edge(Some(c1), CgFunc::Func(main), CgFunc::Func(handler));
        graph.add_edge(Some(c2), CgFunc::Func(handler), CgFunc::Func(business));
        graph.add_edge(Some(c3), CgFunc::Func(main), CgFunc::Func(logger));
        (ctx, graph)
    }

    #[test]
    fn first_path_reaches_transitive_callee() {
        let (ctx, graph) = chain_fixture();
        let matcher = Matcher::new(MatchStrategy::Exact, "main.business").unwrap();
        let path = path_search(&graph, &ctx, graph.root.unwrap(), &matcher).unwrap();
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn matching_the_start_yields_the_empty_path() {
        let (ctx, graph) = chain_fixture();
        let matcher = Matcher::new(MatchStrategy::Exact, "main.main").unwrap();
        let path = path_search(&graph, &ctx, graph.root.unwrap(), &matcher).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn all_paths_finds_matches_in_sibling_branches() {
        let (ctx, graph) = chain_fixture();
        let matcher = Matcher::new(MatchStrategy::Fuzzy, "main.").unwrap();
        let paths = paths_search(&graph, &ctx, graph.root.unwrap(), &matcher);
        // Root itself matches immediately with the empty path.
        assert!(!paths.is_empty());
    }

    #[test]
    fn glob_paths_reach_both_leaves() {
        let (ctx, graph) = chain_fixture();
        let matcher = Matcher::new(MatchStrategy::Glob, "main.{business,logger}").unwrap();
        let paths = paths_search(&graph, &ctx, graph.root.unwrap(), &matcher);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn scan_fallback_reports_callers_and_unreferenced_matches() {
        let (ctx, graph) = chain_fixture();
        // business has one caller: a singleton path.
        let matcher = Matcher::new(MatchStrategy::Exact, "main.business").unwrap();
        let paths = scan_paths(&graph, &ctx, &matcher);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 1);
        // main has no caller: the empty path.
        let matcher = Matcher::new(MatchStrategy::Exact, "main.main").unwrap();
        let paths = scan_paths(&graph, &ctx, &matcher);
        assert_eq!(paths, vec![Vec::new()]);
    }

    #[test]
    fn paths_to_falls_back_to_the_scan() {
        let (ctx, graph) = chain_fixture();
        // The logger is reachable from root, so the root search wins.
        let via_root = paths_to(&graph, &ctx, "main.logger").unwrap();
        assert_eq!(via_root.len(), 1);
        // A pattern only matching the root yields its empty path.
        let root_only = paths_to(&graph, &ctx, "main.main").unwrap();
        assert_eq!(root_only, vec![Vec::new()]);
    }
}
