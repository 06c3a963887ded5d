// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The backward taint propagator.
//!
//! Starting at a sink callsite's value, the propagator walks operand and
//! referrer chains backwards, crossing function boundaries through the
//! enclosing call-graph path, and reports the first value at which a source
//! descriptor is recognised. Taint is coarse: a value is derived from some
//! source or it is not.

use std::collections::{HashSet, VecDeque};

use crate::descriptor::SourceSet;
use crate::graph::call_graph::{CallGraph, CgEdgeId, CgFunc};
use crate::ssa::analysis_context::AnalysisContext;
use crate::ssa::instruction::{InstrId, Instruction};
use crate::ssa::value::{CallCommon, Referrer, ValueId, ValueKind};
use crate::util;

/// The marker descriptor enabling protobuf message recognition.
pub const PROTO_MESSAGE_MARKER: &str = "google.golang.org/protobuf/proto.Message";

/// A recognised source: the matched descriptor and the witness value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Taint {
    pub source: String,
    pub value: ValueId,
}

/// One propagation run over a single path. The visited set is
/// per-invocation and strictly monotonic, which bounds the traversal on any
/// finite SSA.
pub struct Propagator<'a> {
    ctx: &'a AnalysisContext,
    graph: &'a CallGraph,
    path: &'a [CgEdgeId],
    sources: &'a SourceSet,
    visited: HashSet<ValueId>,
}

impl<'a> Propagator<'a> {
    pub fn new(
        ctx: &'a AnalysisContext,
        graph: &'a CallGraph,
        path: &'a [CgEdgeId],
        sources: &'a SourceSet,
    ) -> Self {
        Propagator {
            ctx,
            graph,
            path,
            sources,
            visited: HashSet::new(),
        }
    }

    /// Checks the path's final callsite. Returns the recognised source, if
    /// any argument (or receiver, or captured state) derives from one.
    pub fn check(&mut self) -> Option<Taint> {
        let last = *self.path.last()?;
        let callsite = self.graph.edge_callsite(last)?;
        self.visit(callsite)
    }

    fn visit(&mut self, value: ValueId) -> Option<Taint> {
        if !self.visited.insert(value) {
            return None;
        }
        let program = &self.ctx.program;
        let v = program.value(value);

        match &v.kind {
            // Never taint producers on their own.
            ValueKind::Const { .. } | ValueKind::FunctionRef(_) | ValueKind::Global => {
                return None
            }
            _ => {}
        }

        if let Some(taint) = self.type_taint(value) {
            return Some(taint);
        }

        match v.kind.clone() {
            ValueKind::Parameter { .. } => {
                if let Some(t) = self.visit_referrers(value) {
                    return Some(t);
                }
                self.cross_boundary(value)
            }
            ValueKind::Call(cc) => self.visit_call(value, &cc),
            ValueKind::Alloc | ValueKind::IndexAddr { .. } | ValueKind::MakeMap => {
                self.visit_referrers(value)
            }
            ValueKind::FieldAddr { base, .. } => {
                if let Some(t) = self.type_taint_of(base, value) {
                    return Some(t);
                }
                if let Some(t) = self.visit(base) {
                    return Some(t);
                }
                if let Some(t) = self.visit_referrers(value) {
                    return Some(t);
                }
                self.visit_referrers(base)
            }
            ValueKind::FreeVar => {
                if let Some(t) = self.visit_referrers(value) {
                    return Some(t);
                }
                self.visit_captured_alloc(value)
            }
            ValueKind::BinOp { x, y, .. } => self.visit(x).or_else(|| self.visit(y)),
            ValueKind::UnOp { x, .. }
            | ValueKind::Slice { x, .. }
            | ValueKind::MakeInterface { x }
            | ValueKind::TypeAssert { x }
            | ValueKind::Convert { x } => self.visit(x),
            ValueKind::ChangeInterface { x } => {
                if let Some(t) = self.visit(x) {
                    return Some(t);
                }
                self.visit_referrers(x)
            }
            ValueKind::Extract { tuple, .. } => self.visit(tuple),
            ValueKind::Lookup { x, index } => {
                if let Some(t) = self.visit(x) {
                    return Some(t);
                }
                self.visit_referrers(index)
            }
            ValueKind::MakeClosure { bindings, .. } => {
                // The closure's function itself is a function reference and
                // never tainted; the captured bindings are.
                for binding in bindings {
                    if let Some(t) = self.visit(binding) {
                        return Some(t);
                    }
                }
                None
            }
            // Unknown variants are conservatively not tainted.
            _ => None,
        }
    }

    fn visit_call(&mut self, value: ValueId, cc: &CallCommon) -> Option<Taint> {
        // A call of a source function taints its result.
        if let Some(callee) = self.static_callee_name(cc) {
            if let Some(matched) = self.sources.matches(&callee) {
                return Some(Taint {
                    source: matched.to_string(),
                    value,
                });
            }

            // First-class sink propagations: formatting taints the result
            // when any argument is tainted, reading taints the result when
            // the reader is.
            match callee.as_str() {
                "fmt.Sprintf" => {
                    for &arg in &cc.args {
                        if let Some(t) = self.visit(arg) {
                            return Some(t);
                        }
                    }
                }
                "io.ReadAll" => {
                    if let Some(&reader) = cc.args.first() {
                        if let Some(t) = self.visit(reader) {
                            return Some(t);
                        }
                    }
                }
                _ => {}
            }
        }

        // Method receivers: check whether the receiver or its base
        // expression derives from a source.
        if self.call_has_receiver(cc) {
            if let Some(&recv) = cc.args.first() {
                if let Some(t) = self.expr_derived_from_source(recv) {
                    return Some(t);
                }
                if let Some(t) = self.derived_from_source(recv) {
                    return Some(t);
                }
            }
        }

        for &arg in &cc.args {
            if let Some(t) = self.visit(arg) {
                return Some(t);
            }
        }
        // Closures capturing tainted state surface through the callee value.
        if let Some(op) = cc.value {
            return self.visit(op);
        }
        None
    }

    fn call_has_receiver(&self, cc: &CallCommon) -> bool {
        if cc.is_invoke() {
            return true;
        }
        if let Some(op) = cc.value {
            if let ValueKind::FunctionRef(f) = &self.ctx.program.value(op).kind {
                return self.ctx.program.func(*f).sig.recv.is_some();
            }
        }
        false
    }

    /// The statically resolved callee name, if the callsite has one.
    fn static_callee_name(&self, cc: &CallCommon) -> Option<String> {
        let program = &self.ctx.program;
        if let Some(op) = cc.value {
            return match &program.value(op).kind {
                ValueKind::FunctionRef(f) => Some(program.func(*f).qualified.clone()),
                ValueKind::MakeClosure { func, .. } => Some(program.func(*func).qualified.clone()),
                _ => None,
            };
        }
        match (&cc.method, cc.recv_ty) {
            (Some(method), Some(recv)) => Some(util::method_descriptor(
                program.type_str(recv),
                method,
            )),
            _ => None,
        }
    }

    fn visit_referrers(&mut self, value: ValueId) -> Option<Taint> {
        let referrers: Vec<Referrer> = self.ctx.program.referrers(value).to_vec();
        for referrer in referrers {
            let taint = match referrer {
                Referrer::Value(user) => self.visit(user),
                Referrer::Instr(instr) => self.visit_instr(instr),
            };
            if taint.is_some() {
                return taint;
            }
        }
        None
    }

    fn visit_instr(&mut self, instr: InstrId) -> Option<Taint> {
        match self.ctx.program.instr(instr).clone() {
            Instruction::Store { addr, val } => {
                self.visit(val).or_else(|| self.visit(addr))
            }
            Instruction::MapUpdate { key, val, .. } => {
                self.visit(key).or_else(|| self.visit(val))
            }
            Instruction::Def(v) => self.visit(v),
            _ => None,
        }
    }

    /// Walks the enclosing path backwards: wherever an edge's callee is the
    /// parameter's parent function, maps the parameter to the callsite's
    /// positional argument by parameter name and continues there.
    fn cross_boundary(&mut self, param: ValueId) -> Option<Taint> {
        let program = &self.ctx.program;
        let parent = program.value(param).parent?;
        let name = program.value(param).name.clone()?;
        let index = program
            .func(parent)
            .param_index_by_name(&name, &program.values)?;

        for &edge in self.path.iter().rev() {
            let (_, callee_node) = self.graph.edge_endpoints(edge)?;
            if self.graph.node_func(callee_node) != CgFunc::Func(parent) {
                continue;
            }
            let callsite = match self.graph.edge_callsite(edge) {
                Some(callsite) => callsite,
                None => continue,
            };
            if let ValueKind::Call(cc) = &program.value(callsite).kind {
                if let Some(&arg) = cc.args.get(index) {
                    if let Some(t) = self.visit(arg) {
                        return Some(t);
                    }
                }
            }
        }
        None
    }

    /// For a free variable, locates an alloc of the same debug name in the
    /// enclosing function and continues there.
    fn visit_captured_alloc(&mut self, free_var: ValueId) -> Option<Taint> {
        let program = &self.ctx.program;
        let name = program.value(free_var).name.clone()?;
        let closure = program.value(free_var).parent?;
        let enclosing = program.func(closure).enclosing?;

        let mut allocs = Vec::new();
        for block in &program.func(enclosing).blocks {
            for instr in &block.instrs {
                if let Instruction::Def(v) = program.instr(*instr) {
                    if matches!(program.value(*v).kind, ValueKind::Alloc)
                        && program.value(*v).name.as_deref() == Some(name.as_str())
                    {
                        allocs.push(*v);
                    }
                }
            }
        }
        for alloc in allocs {
            if let Some(t) = self.visit(alloc) {
                return Some(t);
            }
        }
        None
    }

    /// Source recognition on a value's static type: the descriptor set, or
    /// the protobuf marker against the possibly-dereferenced named type's
    /// method set.
    fn type_taint(&self, value: ValueId) -> Option<Taint> {
        self.type_taint_of(value, value)
    }

    fn type_taint_of(&self, typed: ValueId, witness: ValueId) -> Option<Taint> {
        let program = &self.ctx.program;
        let ty = program.value_type(typed);
        if let Some(matched) = self.sources.matches(ty) {
            return Some(Taint {
                source: matched.to_string(),
                value: witness,
            });
        }
        if self.sources.contains(PROTO_MESSAGE_MARKER) {
            let named = util::strip_pointer(ty);
            let is_message = program.method_set(named).iter().any(|m| {
                let f = program.func(*m);
                f.name == "ProtoMessage" && f.sig.params.is_empty() && f.sig.results.is_empty()
            });
            if is_message {
                return Some(Taint {
                    source: PROTO_MESSAGE_MARKER.to_string(),
                    value: witness,
                });
            }
        }
        None
    }

    /// Operand-inward derivation: BFS over operand fields, returning the
    /// first sub-expression whose type matches a source.
    pub fn expr_derived_from_source(&self, value: ValueId) -> Option<Taint> {
        let mut queue = VecDeque::from([value]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(t) = self.type_taint(current) {
                return Some(t);
            }
            queue.extend(self.derivation_operands(current));
        }
        None
    }

    /// Referrer-outward derivation: the operand BFS extended with referrer
    /// chasing, catching values written into address locations.
    pub fn derived_from_source(&self, value: ValueId) -> Option<Taint> {
        let program = &self.ctx.program;
        let mut queue = VecDeque::from([value]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(t) = self.type_taint(current) {
                return Some(t);
            }
            queue.extend(self.derivation_operands(current));
            for referrer in program.referrers(current) {
                match referrer {
                    Referrer::Value(user) => queue.push_back(*user),
                    Referrer::Instr(instr) => {
                        if let Instruction::Store { addr, val } = program.instr(*instr) {
                            queue.push_back(*val);
                            queue.push_back(*addr);
                        }
                    }
                }
            }
        }
        None
    }

    /// The operand fields both derivation walks follow.
    fn derivation_operands(&self, value: ValueId) -> Vec<ValueId> {
        match &self.ctx.program.value(value).kind {
            ValueKind::FieldAddr { base, .. } => vec![*base],
            ValueKind::IndexAddr { base, index } => vec![*base, *index],
            ValueKind::Slice { x, low, high } => {
                let mut ops = vec![*x];
                ops.extend(low.iter().copied());
                ops.extend(high.iter().copied());
                ops
            }
            ValueKind::BinOp { x, y, .. } => vec![*x, *y],
            ValueKind::UnOp { x, .. }
            | ValueKind::Convert { x }
            | ValueKind::MakeInterface { x }
            | ValueKind::ChangeInterface { x }
            | ValueKind::TypeAssert { x } => vec![*x],
            ValueKind::Extract { tuple, .. } => vec![*tuple],
            ValueKind::Lookup { x, index } => vec![*x, *index],
            ValueKind::Call(cc) => {
                let mut ops: Vec<ValueId> = cc.args.clone();
                ops.extend(cc.value.iter().copied());
                ops
            }
            _ => Vec::new(),
        }
    }
}
