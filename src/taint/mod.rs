// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Source-to-sink taint checking over a built call graph.

use log::*;
use std::time::Instant;

use crate::descriptor::{SinkSet, SourceSet};
use crate::error::AnalysisError;
use crate::graph::call_graph::CallGraph;
use crate::ssa::analysis_context::AnalysisContext;
use crate::util::progress::ProgressTracker;

pub mod propagator;
pub mod result;
pub mod sink_paths;

pub use propagator::{Propagator, Taint, PROTO_MESSAGE_MARKER};
pub use result::{dedup_results, CheckResult};
pub use sink_paths::sink_paths;

/// Reports every sink callsite whose arguments transitively derive from a
/// source, each with its best witness path. Returns the deduplicated results
/// together with a `Cancelled` indicator when the check was aborted; the
/// results accumulated so far remain valid.
pub fn check(
    ctx: &AnalysisContext,
    graph: &CallGraph,
    sources: &SourceSet,
    sinks: &SinkSet,
) -> (Vec<CheckResult>, Option<AnalysisError>) {
    if sources.is_empty() || sinks.is_empty() {
        return (Vec::new(), None);
    }
    let started = Instant::now();
    let mut results = Vec::new();
    let mut error = None;

    // Fixed sink order keeps the result scan, and with it deduplication,
    // deterministic.
    let mut sink_list: Vec<&str> = sinks.iter().collect();
    sink_list.sort_unstable();

    let mut tracker = ProgressTracker::new("taint check", sink_list.len());
    'sinks: for sink in sink_list {
        let paths = sink_paths(ctx, graph, sink);
        debug!("sink {}: {} candidate paths", sink, paths.len());
        for path in paths {
            if ctx.cancelled() {
                error = Some(AnalysisError::Cancelled);
                break 'sinks;
            }
            let sink_value = match path.last().and_then(|e| graph.edge_callsite(*e)) {
                Some(value) => value,
                None => continue,
            };
            let mut propagator = Propagator::new(ctx, graph, &path, sources);
            if let Some(taint) = propagator.check() {
                results.push(CheckResult {
                    path,
                    source: taint.source,
                    source_value: taint.value,
                    sink: sink.to_string(),
                    sink_value,
                });
            }
        }
        tracker.step();
    }
    tracker.finish();

    let results = dedup_results(ctx, results);
    info!(
        "taint check: {} results in {}",
        results.len(),
        humantime::format_duration(std::time::Duration::from_millis(
            started.elapsed().as_millis() as u64
        ))
    );
    (results, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CallGraphBuilder;
    use crate::descriptor::DescriptorSet;
    use crate::ssa::builder::ProgramBuilder;
    use crate::ssa::function::FuncId;
    use crate::ssa::value::ValueKind;
    use crate::ssa::walker::{walk, Walk};
    use crate::util::options::AnalysisOptions;

    fn context(program: crate::ssa::program::Program) -> AnalysisContext {
        AnalysisContext::new(program, AnalysisOptions::default())
    }

    fn build(ctx: &AnalysisContext, root: FuncId) -> CallGraph {
        let (graph, err) = CallGraphBuilder::new(ctx).build(root, &[root]);
        assert!(err.is_none());
        graph
    }

    // func main() { r := get_request(); db.Query(r.query) }
    #[test]
    fn direct_source_to_sink() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let q_addr = f.field_addr(r, "query", "*string");
            let q = f.deref(q_addr, "string");
            let db = f.alloc("db", "*database/sql.DB");
            f.call_fn(query, &[db, q], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, err) = check(&ctx, &graph, &sources, &sinks);
        assert!(err.is_none());
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.sink, "(*database/sql.DB).Query");
        assert_eq!(result.source, "*net/http.Request");
        assert!(sources.contains(&result.source));
        assert!(sinks.contains(&result.sink));
        // The last edge targets the sink at the callsite position.
        let last = *result.path.last().unwrap();
        assert_eq!(graph.edge_callsite(last), Some(result.sink_value));
    }

    // main -> handler(r) -> business(r.query) -> db.Query(q)
    #[test]
    fn wrapper_chain_keeps_the_longest_path() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let get_request = pb.function("main", "main.get_request");
        let business = pb.function("main", "main.business");
        let handler = pb.function("main", "main.handler");
        let main = pb.function("main", "main.main");
        {
            let mut b = pb.func_builder(business);
            let q = b.param("q", "string");
            let db = b.alloc("db", "*database/sql.DB");
            b.call_fn(query, &[db, q], "*database/sql.Rows");
            b.ret(vec![]);
        }
        {
            let mut h = pb.func_builder(handler);
            let r = h.param("r", "*net/http.Request");
            let q_addr = h.field_addr(r, "query", "*string");
            let q = h.deref(q_addr, "string");
            h.call_fn(business, &[q], "()");
            h.ret(vec![]);
        }
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            f.call_fn(handler, &[r], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
        // Dedup chose the main -> handler -> business -> Query witness over
        // any shorter alternative to the same sink position.
        assert_eq!(results[0].path.len(), 3);
    }

    // q := fmt.Sprintf("... %s ...", r.query); db.Query(q)
    #[test]
    fn sprintf_propagates_argument_taint() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let sprintf = pb.function("fmt", "fmt.Sprintf");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let q_addr = f.field_addr(r, "query", "*string");
            let tainted = f.deref(q_addr, "string");
            let format = f.const_str("\"select %s\"");
            let q = f.call_fn(sprintf, &[format, tainted], "string");
            let db = f.alloc("db", "*database/sql.DB");
            f.call_fn(query, &[db, q], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
    }

    // q := html.EscapeString(r.query); w.Write([]byte(q))
    // The core reports the flow; the embedder's post-filter spots the
    // sanitiser on the witness and drops it.
    #[test]
    fn sanitised_flow_is_reported_then_post_filtered() {
        let mut pb = ProgramBuilder::new();
        let escape = pb.function("html", "html.EscapeString");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let q_addr = f.field_addr(r, "query", "*string");
            let raw = f.deref(q_addr, "string");
            let q = f.call_fn(escape, &[raw], "string");
            let w = f.alloc("w", "net/http.ResponseWriter");
            let bytes = f.convert(q, "[]byte");
            f.invoke(w, "Write", &[bytes], "(int, error)");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(net/http.ResponseWriter).Write"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);

        // Post-filter: walk the sink value looking for the sanitiser call.
        let mut sanitised = false;
        walk(&ctx, results[0].sink_value, &mut |v| {
            if let ValueKind::Call(cc) = &ctx.program.value(v).kind {
                if let Some(op) = cc.value {
                    if let ValueKind::FunctionRef(f) = &ctx.program.value(op).kind {
                        if ctx.program.func(*f).qualified == "html.EscapeString" {
                            sanitised = true;
                            return Walk::Stop;
                        }
                    }
                }
            }
            Walk::Continue
        });
        assert!(sanitised);
    }

    // Type Req has func (Req) ProtoMessage(); sources include the proto
    // marker; Handle(ctx, req *Req) { db.Query(req.Query) }
    #[test]
    fn proto_message_types_are_sources() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        pb.method("main", "main.Req", "ProtoMessage");
        let handle = pb.function("main", "main.Handle");
        let main = pb.function("main", "main.main");
        {
            let mut h = pb.func_builder(handle);
            let _ctx_param = h.param("ctx", "context.Context");
            let req = h.param("req", "*main.Req");
            let q_addr = h.field_addr(req, "Query", "*string");
            let q = h.deref(q_addr, "string");
            let db = h.alloc("db", "*database/sql.DB");
            h.call_fn(query, &[db, q], "*database/sql.Rows");
            h.ret(vec![]);
        }
        {
            let mut f = pb.func_builder(main);
            let req = f.alloc("req", "*main.Req");
            let ctx_val = f.alloc("ctx", "context.Context");
            f.call_fn(handle, &[ctx_val, req], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new([PROTO_MESSAGE_MARKER]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, PROTO_MESSAGE_MARKER);
    }

    // struct { run func(args) error } stored behind a field; main calls
    // c.run(args) with args from os.Args.
    #[test]
    fn function_in_field_flows_to_the_stored_target() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let run_cmd = pb.function("main", "main.runCmd");
        let main = pb.function("main", "main.main");
        {
            let mut rc = pb.func_builder(run_cmd);
            let args = rc.param("args", "[]string");
            let i = rc.const_("0", "int");
            let q = rc.lookup(args, i, "string");
            let db = rc.alloc("db", "*database/sql.DB");
            rc.call_fn(query, &[db, q], "*database/sql.Rows");
            rc.ret(vec![]);
        }
        {
            let mut f = pb.func_builder(main);
            let os_args = f.global("os.Args", "*[]string");
            let args = f.deref(os_args, "[]string");
            let cmd = f.alloc("cmd", "*main.command");
            let slot = f.field_addr(cmd, "run", "*func([]string) error");
            let target = f.func_ref(run_cmd);
            f.store(slot, target);
            let fnval = f.deref(slot, "func([]string) error");
            f.call(fnval, &[args], "error");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        // The field-address rule discovered the stored function.
        assert!(graph
            .nodes()
            .any(|n| graph.node_func(n).qualified_name(&ctx) == "main.runCmd"));

        let sources = DescriptorSet::new(["[]string"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "[]string");
    }

    // A closure captures a variable holding request data; the sink sits
    // inside the closure body.
    #[test]
    fn captured_variables_cross_into_closures() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        let anon = {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let q_slot = f.alloc("q", "*string");
            let q_addr = f.field_addr(r, "query", "*string");
            let raw = f.deref(q_addr, "string");
            f.store(q_slot, raw);
            let anon = f.anon_func("main.main$1");
            let closure = f.make_closure(anon, &[q_slot], "func()");
            f.call(closure, &[], "()");
            f.ret(vec![]);
            anon
        };
        {
            let mut c = pb.func_builder(anon);
            let captured = c.free_var("q", "*string");
            let q = c.deref(captured, "string");
            let db = c.alloc("db", "*database/sql.DB");
            c.call_fn(query, &[db, q], "*database/sql.Rows");
            c.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
    }

    // Tainted data stored into a map taints later lookups.
    #[test]
    fn map_updates_taint_lookups() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let q_addr = f.field_addr(r, "query", "*string");
            let raw = f.deref(q_addr, "string");
            let m = f.make_map("map[string]string");
            let key = f.const_str("\"q\"");
            f.map_update(m, key, raw);
            let fetched = f.lookup(m, key, "string");
            let db = f.alloc("db", "*database/sql.DB");
            f.call_fn(query, &[db, fetched], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
    }

    // body, _ := io.ReadAll(r.Body); db.Query(string(body))
    #[test]
    fn read_all_taints_its_result() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let read_all = pb.function("io", "io.ReadAll");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let body_addr = f.field_addr(r, "Body", "*io.ReadCloser");
            let body = f.deref(body_addr, "io.ReadCloser");
            let tuple = f.call_fn(read_all, &[body], "([]byte, error)");
            let bytes = f.extract(tuple, 0, "[]byte");
            let q = f.convert(bytes, "string");
            let db = f.alloc("db", "*database/sql.DB");
            f.call_fn(query, &[db, q], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn empty_descriptor_sets_yield_no_results() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &DescriptorSet::default(), &sinks);
        assert!(results.is_empty());
        let (results, _) = check(&ctx, &graph, &sources, &DescriptorSet::default());
        assert!(results.is_empty());
    }

    #[test]
    fn constant_arguments_are_not_tainted() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let db = f.alloc("db", "*database/sql.DB");
            let q = f.const_str("\"select 1\"");
            f.call_fn(query, &[db, q], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert!(results.is_empty());
    }

    #[test]
    fn source_typed_receivers_taint_their_sinks() {
        let mut pb = ProgramBuilder::new();
        let exec = pb.method("main", "*main.store", "Exec");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let store = f.alloc("store", "*main.store");
            let q = f.const_str("\"select 1\"");
            f.call_fn(exec, &[store, q], "error");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*main.store"]);
        let sinks = DescriptorSet::new(["(*main.store).Exec"]);
        let (results, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn check_is_idempotent() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let get_request = pb.function("main", "main.get_request");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let r = f.call_fn(get_request, &[], "*net/http.Request");
            let q_addr = f.field_addr(r, "query", "*string");
            let q = f.deref(q_addr, "string");
            let db = f.alloc("db", "*database/sql.DB");
            f.call_fn(query, &[db, q], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let graph = build(&ctx, main);

        let sources = DescriptorSet::new(["*net/http.Request"]);
        let sinks = DescriptorSet::new(["(*database/sql.DB).Query"]);
        let (first, _) = check(&ctx, &graph, &sources, &sinks);
        let (second, _) = check(&ctx, &graph, &sources, &sinks);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.path, b.path);
            assert_eq!(a.source, b.source);
            assert_eq!(a.sink, b.sink);
            assert_eq!(a.sink_value, b.sink_value);
        }
    }
}
