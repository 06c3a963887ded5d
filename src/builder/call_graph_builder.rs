// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! This module provides essential functions for resolving call targets.
//!
//! Construction runs in two passes: a parallel pre-pass resolving the
//! callsites of every function in the program, and a depth-limited priority
//! walk descending from the supplied source functions. Resolution misses
//! (missing package SSA, universe-scope methods, unresolvable operands)
//! elide the edge rather than erroring.

use log::*;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::AnalysisError;
use crate::graph::call_graph::{CallGraph, CgFunc};
use crate::ssa::analysis_context::{intern_synthetic_method, AnalysisContext};
use crate::ssa::function::FuncId;
use crate::ssa::instruction::Instruction;
use crate::ssa::value::{CallCommon, TypeId, UnOpKind, ValueId, ValueKind};
use crate::util;
use crate::util::progress::ProgressTracker;

/// One resolved call edge: `(caller, callsite, callee)`.
type EdgeSpec = (CgFunc, Option<ValueId>, CgFunc);

pub struct CallGraphBuilder<'a> {
    ctx: &'a AnalysisContext,
}

impl<'a> CallGraphBuilder<'a> {
    pub fn new(ctx: &'a AnalysisContext) -> Self {
        CallGraphBuilder { ctx }
    }

    /// Builds the call graph rooted at `root`, additionally walking every
    /// supplied source function. Returns the graph together with a
    /// `Cancelled` indicator when construction was aborted; the graph is
    /// valid as far as it was built.
    pub fn build(&self, root: FuncId, sources: &[FuncId]) -> (CallGraph, Option<AnalysisError>) {
        let all = self.ctx.program.all_functions();
        let mut graph = CallGraph::new();
        graph.set_root(CgFunc::Func(root));

        // Pre-pass: resolve every function's callsites in parallel, then
        // merge the batches on one thread.
        let batches: Vec<Vec<EdgeSpec>> = all
            .par_iter()
            .map(|&func| {
                if self.ctx.cancelled() {
                    return Vec::new();
                }
                self.resolve_function_edges(func)
            })
            .collect();

        let mut tracker = ProgressTracker::new("call graph pre-pass", batches.len());
        let mut error = None;
        for batch in batches {
            if self.ctx.cancelled() {
                error = Some(AnalysisError::Cancelled);
                break;
            }
            for (caller, callsite, callee) in batch {
                graph.add_edge(callsite, caller, callee);
            }
            tracker.step();
        }
        tracker.finish();

        if error.is_none() {
            // Priority walk from the source functions, the root first.
            let mut walk_roots = Vec::with_capacity(sources.len() + 1);
            walk_roots.push(root);
            walk_roots.extend_from_slice(sources);

            let shared_graph = Mutex::new(graph);
            let visited: Mutex<HashSet<FuncId>> = Mutex::new(HashSet::new());
            walk_roots
                .par_iter()
                .for_each(|&func| self.walk(func, 0, &shared_graph, &visited));
            graph = shared_graph.into_inner().unwrap();
            if self.ctx.cancelled() {
                error = Some(AnalysisError::Cancelled);
            }
        }

        graph.dedup_edges();
        if error.is_none() {
            error = graph.verify().err();
        }
        debug!(
            "call graph built: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        (graph, error)
    }

    /// Walks one function, adding its edges and recursively descending into
    /// direct callees up to the configured depth. Walking an already visited
    /// function is a no-op.
    fn walk(
        &self,
        func: FuncId,
        depth: u32,
        graph: &Mutex<CallGraph>,
        visited: &Mutex<HashSet<FuncId>>,
    ) {
        if self.ctx.cancelled() || depth > self.ctx.options.max_walk_depth {
            return;
        }
        if !visited.lock().unwrap().insert(func) {
            return;
        }
        trace!("walking {}", self.ctx.func_qualified_name(func));

        let edges = self.resolve_function_edges(func);
        let caller = CgFunc::Func(func);
        let mut callees: Vec<FuncId> = Vec::new();
        {
            let mut graph = graph.lock().unwrap();
            for (edge_caller, callsite, callee) in &edges {
                graph.add_edge(*callsite, *edge_caller, *callee);
                if *edge_caller == caller {
                    if let Some(f) = callee.func_id() {
                        callees.push(f);
                    }
                }
            }
        }
        for callee in callees {
            self.walk(callee, depth + 1, graph, visited);
        }
    }

    /// Resolves every call-like instruction of a function into edge specs.
    fn resolve_function_edges(&self, func: FuncId) -> Vec<EdgeSpec> {
        let program = &self.ctx.program;
        let f = program.func(func);
        let mut out = Vec::new();
        for block in &f.blocks {
            for instr in &block.instrs {
                if let Instruction::Def(v) = program.instr(*instr) {
                    if let ValueKind::Call(cc) = &program.value(*v).kind {
                        self.resolve_callsite(func, *v, cc, &mut out);
                    }
                }
            }
        }
        out
    }

    /// Resolution rules for a single callsite.
    fn resolve_callsite(
        &self,
        caller: FuncId,
        call_value: ValueId,
        cc: &CallCommon,
        out: &mut Vec<EdgeSpec>,
    ) {
        let program = &self.ctx.program;
        let caller_cg = CgFunc::Func(caller);
        let callsite = Some(call_value);

        let callee = if cc.is_invoke() {
            self.resolve_invoke(cc.recv_ty, cc.method.as_deref().unwrap_or_default())
        } else if let Some(op) = cc.value {
            match &program.value(op).kind {
                ValueKind::FunctionRef(f) => Some(CgFunc::Func(*f)),
                ValueKind::MakeClosure { func, .. } => Some(CgFunc::Func(*func)),
                // An interface-typed parameter invoked with a method behaves
                // like an invoke, using the call's signature receiver when it
                // carries one.
                ValueKind::Parameter { .. } if cc.method.is_some() => self.resolve_invoke(
                    cc.recv_ty.or(Some(program.value(op).ty)),
                    cc.method.as_deref().unwrap_or_default(),
                ),
                ValueKind::UnOp {
                    op: UnOpKind::Deref,
                    x,
                } => match &program.value(*x).kind {
                    ValueKind::FieldAddr { base, field } => {
                        self.scan_field_stores(*base, field)
                    }
                    _ => None,
                },
                ValueKind::FieldAddr { base, field } => self.scan_field_stores(*base, field),
                _ => None,
            }
        } else {
            None
        };

        let callee = match callee {
            Some(callee) => callee,
            None => return,
        };
        out.push((caller_cg, callsite, callee));

        // Function-valued arguments flow into the callee: record them as
        // edges from the callee at this callsite.
        for &arg in &cc.args {
            match &program.value(arg).kind {
                ValueKind::FunctionRef(f) => out.push((callee, callsite, CgFunc::Func(*f))),
                ValueKind::MakeClosure { func, .. } => {
                    out.push((callee, callsite, CgFunc::Func(*func)))
                }
                ValueKind::ChangeInterface { x } | ValueKind::MakeInterface { x } => {
                    self.expand_interface_argument(arg, *x, callee, callsite, out)
                }
                _ => {}
            }
        }
    }

    /// Interface-conversion arguments expand to the interface's declared
    /// methods, resolved against the operand type's method set. This
    /// over-approximates: methods never called at runtime still get edges.
    fn expand_interface_argument(
        &self,
        arg: ValueId,
        operand: ValueId,
        callee: CgFunc,
        callsite: Option<ValueId>,
        out: &mut Vec<EdgeSpec>,
    ) {
        let program = &self.ctx.program;
        let interface_ty = program.value_type(arg);
        let concrete_ty = util::strip_pointer(program.value_type(operand));
        for method in program.interface_methods(interface_ty) {
            let resolved = program
                .method_set(concrete_ty)
                .iter()
                .find(|m| program.func(**m).name == *method);
            if let Some(target) = resolved {
                out.push((callee, callsite, CgFunc::Func(*target)));
            }
        }
    }

    /// Binds an invoke to the named function of the receiver's package when
    /// that package's SSA is available, otherwise to an interned synthetic
    /// placeholder. Universe-scope receivers (`error`) yield no edge.
    fn resolve_invoke(&self, recv_ty: Option<TypeId>, method: &str) -> Option<CgFunc> {
        let program = &self.ctx.program;
        let recv = program.type_str(recv_ty?);
        let pkg_path = util::package_of_type(recv)?;
        match program.package(pkg_path) {
            Some(package) => package.members.get(method).copied().map(CgFunc::Func),
            None => Some(CgFunc::Synthetic(intern_synthetic_method(recv, method))),
        }
    }

    /// The documented approximation for function-typed struct fields: scan
    /// every function for stores into `(struct type, field)` and take the
    /// first function-valued store.
    fn scan_field_stores(&self, field_base: ValueId, field: &str) -> Option<CgFunc> {
        let program = &self.ctx.program;
        let struct_ty = util::strip_pointer(program.value_type(field_base)).to_string();

        for &func in program.all_functions().iter() {
            for block in &program.func(func).blocks {
                for instr in &block.instrs {
                    match program.instr(*instr) {
                        Instruction::Def(v) => {
                            if let ValueKind::MakeInterface { x } = &program.value(*v).kind {
                                if util::strip_pointer(program.value_type(*x)) == struct_ty {
                                    // TODO: returning here abandons the scan of
                                    // every remaining function and drops later
                                    // store candidates; continue with the next
                                    // function instead.
                                    return None;
                                }
                            }
                        }
                        Instruction::Store { addr, val } => {
                            if let ValueKind::FieldAddr { base, field: f } =
                                &program.value(*addr).kind
                            {
                                if f == field
                                    && util::strip_pointer(program.value_type(*base)) == struct_ty
                                {
                                    match &program.value(*val).kind {
                                        ValueKind::FunctionRef(target) => {
                                            return Some(CgFunc::Func(*target))
                                        }
                                        ValueKind::MakeClosure { func: target, .. } => {
                                            return Some(CgFunc::Func(*target))
                                        }
                                        _ => {}
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssa::builder::ProgramBuilder;
    use crate::util::options::AnalysisOptions;

    fn context(program: crate::ssa::program::Program) -> AnalysisContext {
        AnalysisContext::new(program, AnalysisOptions::default())
    }

    fn edge_triples(graph: &CallGraph, ctx: &AnalysisContext) -> Vec<(String, Option<ValueId>, String)> {
        let mut triples: Vec<_> = graph
            .graph
            .edge_indices()
            .map(|e| {
                let (from, to) = graph.edge_endpoints(e).unwrap();
                (
                    graph.node_func(from).qualified_name(ctx),
                    graph.edge_callsite(e),
                    graph.node_func(to).qualified_name(ctx),
                )
            })
            .collect();
        triples.sort();
        triples
    }

    #[test]
    fn direct_calls_resolve() {
        let mut pb = ProgramBuilder::new();
        let callee = pb.function("main", "main.callee");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            f.call_fn(callee, &[], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, err) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        assert!(err.is_none());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn root_without_callees_is_a_single_node() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[]);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn closures_resolve_to_their_function() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let anon = f.anon_func("main.main$1");
            let closure = f.make_closure(anon, &[], "func()");
            f.call(closure, &[], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        let triples = edge_triples(&graph, &ctx);
        assert!(triples
            .iter()
            .any(|(from, _, to)| from == "main.main" && to == "main.main$1"));
    }

    #[test]
    fn function_arguments_get_callee_edges() {
        let mut pb = ProgramBuilder::new();
        let run = pb.function("main", "main.run");
        let worker = pb.function("main", "main.worker");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let arg = f.func_ref(worker);
            f.call_fn(run, &[arg], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        let triples = edge_triples(&graph, &ctx);
        assert!(triples
            .iter()
            .any(|(from, _, to)| from == "main.main" && to == "main.run"));
        assert!(triples
            .iter()
            .any(|(from, _, to)| from == "main.run" && to == "main.worker"));
    }

    #[test]
    fn invokes_bind_to_available_package_members() {
        let mut pb = ProgramBuilder::new();
        let query = pb.method("database/sql", "*database/sql.DB", "Query");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let db = f.alloc("db", "*database/sql.DB");
            f.invoke(db, "Query", &[], "*database/sql.Rows");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        assert!(graph.node(CgFunc::Func(query)).is_some());
    }

    #[test]
    fn unavailable_packages_yield_synthetic_callees() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let w = f.alloc("w", "vendor/logging.Logger");
            f.invoke(w, "Log", &[], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        let synthetic = graph
            .nodes()
            .map(|n| graph.node_func(n))
            .find(|f| matches!(f, CgFunc::Synthetic(_)))
            .expect("synthetic callee");
        assert_eq!(
            synthetic.qualified_name(&ctx),
            "(vendor/logging.Logger).Log"
        );
    }

    #[test]
    fn universe_scope_methods_are_skipped() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let err = f.alloc("err", "error");
            f.invoke(err, "Error", &[], "string");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn field_stores_resolve_function_typed_fields() {
        let mut pb = ProgramBuilder::new();
        let runner = pb.function("main", "main.runner");
        let setup = pb.function("main", "main.setup");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(setup);
            let cmd = f.alloc("cmd", "*main.command");
            let slot = f.field_addr(cmd, "run", "*func()");
            let target = f.func_ref(runner);
            f.store(slot, target);
            f.ret(vec![]);
        }
        {
            let mut f = pb.func_builder(main);
            let cmd = f.alloc("cmd", "*main.command");
            let slot = f.field_addr(cmd, "run", "*func()");
            let fnval = f.deref(slot, "func()");
            f.call(fnval, &[], "()");
            f.ret(vec![]);
        }
        let _ = setup;
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        let triples = edge_triples(&graph, &ctx);
        assert!(triples
            .iter()
            .any(|(from, _, to)| from == "main.main" && to == "main.runner"));
    }

    #[test]
    fn interface_conversion_arguments_expand_method_sets() {
        let mut pb = ProgramBuilder::new();
        pb.declare_interface("io.Reader", &["Read"]);
        let read = pb.method("main", "*main.body", "Read");
        let consume = pb.function("io", "io.Copy");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let body = f.alloc("body", "*main.body");
            let reader = f.change_interface(body, "io.Reader");
            f.call_fn(consume, &[reader], "(int64, error)");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        let triples = edge_triples(&graph, &ctx);
        assert!(triples
            .iter()
            .any(|(from, _, to)| from == "io.Copy" && to == "(*main.body).Read"));
    }

    #[test]
    fn make_interface_quirk_aborts_the_field_scan() {
        let mut pb = ProgramBuilder::new();
        let runner = pb.function("main", "main.runner");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            let cmd = f.alloc("cmd", "*main.command");
            // The conversion of the struct type aborts the store scan before
            // the function-valued store below is seen.
            f.make_interface(cmd, "interface{}");
            let slot = f.field_addr(cmd, "run", "*func()");
            let target = f.func_ref(runner);
            f.store(slot, target);
            let fnval = f.deref(slot, "func()");
            f.call(fnval, &[], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (graph, _) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        let triples = edge_triples(&graph, &ctx);
        assert!(!triples
            .iter()
            .any(|(from, _, to)| from == "main.main" && to == "main.runner"));
    }

    #[test]
    fn rebuilds_are_deterministic() {
        let mut pb = ProgramBuilder::new();
        let a = pb.function("main", "main.a");
        let b = pb.function("main", "main.b");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            f.call_fn(a, &[], "()");
            f.call_fn(b, &[], "()");
            f.ret(vec![]);
            let mut fa = pb.func_builder(a);
            fa.call_fn(b, &[], "()");
            fa.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        let (g1, _) = CallGraphBuilder::new(&ctx).build(main, &[main, a, b]);
        let (g2, _) = CallGraphBuilder::new(&ctx).build(main, &[main, a, b]);
        assert_eq!(g1.node_count(), g2.node_count());
        assert_eq!(g1.edge_count(), g2.edge_count());
        assert_eq!(edge_triples(&g1, &ctx), edge_triples(&g2, &ctx));
    }

    #[test]
    fn cancellation_returns_partial_graph() {
        let mut pb = ProgramBuilder::new();
        let callee = pb.function("main", "main.callee");
        let main = pb.function("main", "main.main");
        {
            let mut f = pb.func_builder(main);
            f.call_fn(callee, &[], "()");
            f.ret(vec![]);
        }
        let ctx = context(pb.finish().unwrap());
        ctx.cancel.cancel();
        let (_, err) = CallGraphBuilder::new(&ctx).build(main, &[main]);
        assert!(matches!(err, Some(AnalysisError::Cancelled)));
    }
}
