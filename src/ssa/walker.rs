// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! A generic, cycle-safe visitor over SSA values.
//!
//! Embedders use this to inspect values around a reported result, e.g. to
//! recognise sanitiser calls on a witness path before deciding whether to
//! keep the finding.

use std::collections::HashSet;

use crate::ssa::analysis_context::AnalysisContext;
use crate::ssa::instruction::Instruction;
use crate::ssa::value::{Referrer, ValueId, ValueKind};

/// The visitor's verdict after each value.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Walk {
    Continue,
    /// Stop the entire walk.
    Stop,
}

/// Applies `visit` to every value reachable from `seed` through operands and
/// referrers. Function references and closures are entered: every
/// instruction of the target function's blocks is walked as well. Returns
/// `Walk::Stop` if the visitor requested early termination.
pub fn walk<F>(ctx: &AnalysisContext, seed: ValueId, visit: &mut F) -> Walk
where
    F: FnMut(ValueId) -> Walk,
{
    let program = &ctx.program;
    let mut visited: HashSet<ValueId> = HashSet::new();
    let mut stack = vec![seed];

    while let Some(value) = stack.pop() {
        if !visited.insert(value) {
            continue;
        }
        if visit(value) == Walk::Stop {
            return Walk::Stop;
        }

        let v = program.value(value);
        match &v.kind {
            ValueKind::Call(cc) => {
                if let Some(callee) = cc.value {
                    stack.push(callee);
                }
                stack.extend(cc.args.iter().copied());
            }
            ValueKind::ChangeInterface { x }
            | ValueKind::Convert { x }
            | ValueKind::MakeInterface { x }
            | ValueKind::UnOp { x, .. } => stack.push(*x),
            ValueKind::Phi { edges } => stack.extend(edges.iter().copied()),
            ValueKind::FunctionRef(func) => push_function_body(ctx, *func, &mut stack),
            ValueKind::MakeClosure { func, bindings } => {
                push_function_body(ctx, *func, &mut stack);
                stack.extend(bindings.iter().copied());
            }
            _ => stack.extend(v.operands()),
        }

        for referrer in program.referrers(value) {
            match referrer {
                Referrer::Value(user) => stack.push(*user),
                Referrer::Instr(instr) => {
                    if let Instruction::Store { addr, val } = program.instr(*instr) {
                        stack.push(*val);
                        stack.push(*addr);
                    }
                }
            }
        }
    }
    Walk::Continue
}

fn push_function_body(ctx: &AnalysisContext, func: crate::ssa::function::FuncId, stack: &mut Vec<ValueId>) {
    let f = ctx.program.func(func);
    for block in &f.blocks {
        for instr in &block.instrs {
            match ctx.program.instr(*instr) {
                Instruction::Def(v) => stack.push(*v),
                Instruction::Store { addr, val } => {
                    stack.push(*val);
                    stack.push(*addr);
                }
                other => stack.extend(other.operands()),
            }
        }
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

    #[test]
    fn walk_reaches_call_arguments_and_callee_body() {
        let mut pb = ProgramBuilder::new();
        let escape = pb.function("html", "html.EscapeString");
        let main = pb.function("main", "main.main");
        let (call, arg) = {
            let mut f = pb.func_builder(main);
            let arg = f.const_str("\"<b>\"");
            let call = f.call_fn(escape, &[arg], "string");
            f.ret(vec![call]);
            (call, arg)
        };
        let ctx = context(pb.finish().unwrap());

        let mut seen = Vec::new();
        walk(&ctx, call, &mut |v| {
            seen.push(v);
            Walk::Continue
        });
        assert!(seen.contains(&call));
        assert!(seen.contains(&arg));
    }

    #[test]
    fn walk_stops_on_request() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        let a = {
            let mut f = pb.func_builder(main);
            let a = f.const_str("\"x\"");
            let b = f.convert(a, "[]byte");
            f.ret(vec![b]);
            a
        };
        let ctx = context(pb.finish().unwrap());

        let mut count = 0;
        let outcome = walk(&ctx, a, &mut |_| {
            count += 1;
            Walk::Stop
        });
        assert_eq!(outcome, Walk::Stop);
        assert_eq!(count, 1);
    }

    #[test]
    fn cycles_terminate() {
        let mut pb = ProgramBuilder::new();
        let main = pb.function("main", "main.main");
        let phi = {
            let mut f = pb.func_builder(main);
            let a = f.const_("0", "int");
            let phi = f.phi(&[a], "int");
            let next = f.bin_op("+", phi, a, "int");
            // A loop-carried phi refers to a value that refers back to it.
            let _ = next;
            phi
        };
        let ctx = context(pb.finish().unwrap());
        let mut count = 0usize;
        walk(&ctx, phi, &mut |_| {
            count += 1;
            Walk::Continue
        });
        assert!(count >= 2);
    }
}
