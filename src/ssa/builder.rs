// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Programmatic construction of SSA programs.
//!
//! This is the frontend contract: a loader lowers its source language into
//! these calls (or emits the equivalent JSON) and hands the finished program
//! to the analysis. The test fixtures are built the same way.

use std::collections::HashMap;

use crate::error::AnalysisError;
use crate::ssa::function::{FuncId, Function, Signature};
use crate::ssa::instruction::{Block, InstrId, Instruction};
use crate::ssa::program::{Package, Program};
use crate::ssa::value::{CallCommon, Pos, TypeId, UnOpKind, Value, ValueId, ValueKind};

pub struct ProgramBuilder {
    program: Program,
    next_line: u32,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        ProgramBuilder::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            program: Program::default(),
            next_line: 1,
        }
    }

    pub fn intern_type(&mut self, name: &str) -> TypeId {
        self.program.types.intern(name)
    }

    /// Declares an interface type and its method names, enabling
    /// interface-conversion enumeration and invoke resolution.
    pub fn declare_interface(&mut self, name: &str, methods: &[&str]) {
        self.program
            .interfaces
            .insert(name.to_string(), methods.iter().map(|m| m.to_string()).collect());
    }

    /// Adds a free function and registers it as a member of its package.
    pub fn function(&mut self, package: &str, qualified: &str) -> FuncId {
        let name = short_name(qualified).to_string();
        let func = self.add_function(qualified, Some(package.to_string()), Signature::default());
        let package_idx = self.ensure_package(package);
        self.program.packages[package_idx].members.insert(name, func);
        func
    }

    /// Adds a method on `recv_ty`, registering it in the receiver's method
    /// set and as a member of its package under the method name.
    pub fn method(&mut self, package: &str, recv_ty: &str, name: &str) -> FuncId {
        let qualified = crate::util::method_descriptor(recv_ty, name);
        let recv = self.intern_type(recv_ty);
        let sig = Signature {
            recv: Some(recv),
            ..Signature::default()
        };
        let func = self.add_function(&qualified, Some(package.to_string()), sig);
        let named = crate::util::strip_pointer(recv_ty).to_string();
        self.program.methods.entry(named).or_default().push(func);
        let package_idx = self.ensure_package(package);
        self.program.packages[package_idx]
            .members
            .entry(name.to_string())
            .or_insert(func);
        func
    }

    /// Adds a function belonging to no package (dead code, shared stubs).
    pub fn orphan_function(&mut self, qualified: &str) -> FuncId {
        self.add_function(qualified, None, Signature::default())
    }

    pub fn func_builder(&mut self, func: FuncId) -> FunctionBuilder<'_> {
        FunctionBuilder { pb: self, func, block: 0 }
    }

    pub fn finish(self) -> Result<Program, AnalysisError> {
        self.program.finish()
    }

    fn ensure_package(&mut self, path: &str) -> usize {
        if let Some(i) = self.program.packages.iter().position(|p| p.path == path) {
            return i;
        }
        self.program.packages.push(Package {
            path: path.to_string(),
            members: HashMap::new(),
        });
        self.program.packages.len() - 1
    }

    fn add_function(&mut self, qualified: &str, package: Option<String>, sig: Signature) -> FuncId {
        let id = FuncId(self.program.functions.len() as u32);
        self.program.functions.push(Function {
            name: short_name(qualified).to_string(),
            qualified: qualified.to_string(),
            package,
            sig,
            params: Vec::new(),
            free_vars: Vec::new(),
            blocks: vec![Block::default()],
            anon_funcs: Vec::new(),
            enclosing: None,
            synthetic: false,
        });
        id
    }

    fn next_pos(&mut self, package: Option<&str>) -> Pos {
        let line = self.next_line;
        self.next_line += 1;
        Pos {
            file: format!("{}.go", package.unwrap_or("fixture")),
            line,
        }
    }
}

/// Extracts the short name from a qualified descriptor.
/// `(*database/sql.DB).Query` yields `Query`; `main.main` yields `main`.
fn short_name(qualified: &str) -> &str {
    if let Some(close) = qualified.rfind(')') {
        return qualified[close + 1..].trim_start_matches('.');
    }
    match qualified.rfind('.') {
        Some(dot) => &qualified[dot + 1..],
        None => qualified,
    }
}

/// Appends values and instructions to one function's body.
pub struct FunctionBuilder<'a> {
    pb: &'a mut ProgramBuilder,
    func: FuncId,
    block: usize,
}

impl<'a> FunctionBuilder<'a> {
    pub fn func_id(&self) -> FuncId {
        self.func
    }

    /// Appends a parameter value. Parameters are values without defining
    /// instructions; the receiver, if any, must be added first.
    pub fn param(&mut self, name: &str, ty: &str) -> ValueId {
        let index = self.function().params.len();
        let id = self.new_value(ValueKind::Parameter { index }, ty, Some(name));
        let ty_id = self.pb.program.values[id.index()].ty;
        let f = &mut self.pb.program.functions[self.func.index()];
        f.params.push(id);
        f.sig.params.push(ty_id);
        id
    }

    /// Appends the receiver parameter and records it in the signature.
    pub fn recv_param(&mut self, name: &str, ty: &str) -> ValueId {
        let id = self.param(name, ty);
        let ty_id = self.pb.program.values[id.index()].ty;
        let f = &mut self.pb.program.functions[self.func.index()];
        f.sig.recv = Some(ty_id);
        f.sig.params.pop();
        id
    }

    pub fn free_var(&mut self, name: &str, ty: &str) -> ValueId {
        let id = self.new_value(ValueKind::FreeVar, ty, Some(name));
        self.pb.program.functions[self.func.index()].free_vars.push(id);
        id
    }

    /// Starts a new basic block and makes it current.
    pub fn new_block(&mut self) -> usize {
        let f = &mut self.pb.program.functions[self.func.index()];
        f.blocks.push(Block::default());
        self.block = f.blocks.len() - 1;
        self.block
    }

    pub fn use_block(&mut self, block: usize) {
        self.block = block;
    }

    pub fn const_(&mut self, literal: &str, ty: &str) -> ValueId {
        self.def_value(
            ValueKind::Const {
                literal: literal.to_string(),
            },
            ty,
            None,
        )
    }

    pub fn const_str(&mut self, literal: &str) -> ValueId {
        self.const_(literal, "string")
    }

    pub fn global(&mut self, name: &str, ty: &str) -> ValueId {
        // Globals are program-level; no defining instruction, no parent.
        let ty_id = self.pb.intern_type(ty);
        let pos = self.pb.next_pos(None);
        let id = ValueId(self.pb.program.values.len() as u32);
        self.pb.program.values.push(Value {
            ty: ty_id,
            parent: None,
            name: Some(name.to_string()),
            pos,
            kind: ValueKind::Global,
        });
        id
    }

    pub fn func_ref(&mut self, func: FuncId) -> ValueId {
        self.def_value(ValueKind::FunctionRef(func), "func", None)
    }

    pub fn alloc(&mut self, comment: &str, ty: &str) -> ValueId {
        self.def_value(ValueKind::Alloc, ty, Some(comment))
    }

    pub fn field_addr(&mut self, base: ValueId, field: &str, ty: &str) -> ValueId {
        self.def_value(
            ValueKind::FieldAddr {
                base,
                field: field.to_string(),
            },
            ty,
            None,
        )
    }

    pub fn index_addr(&mut self, base: ValueId, index: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::IndexAddr { base, index }, ty, None)
    }

    pub fn make_map(&mut self, ty: &str) -> ValueId {
        self.def_value(ValueKind::MakeMap, ty, None)
    }

    pub fn bin_op(&mut self, op: &str, x: ValueId, y: ValueId, ty: &str) -> ValueId {
        self.def_value(
            ValueKind::BinOp {
                op: op.to_string(),
                x,
                y,
            },
            ty,
            None,
        )
    }

    pub fn un_op(&mut self, op: UnOpKind, x: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::UnOp { op, x }, ty, None)
    }

    pub fn deref(&mut self, x: ValueId, ty: &str) -> ValueId {
        self.un_op(UnOpKind::Deref, x, ty)
    }

    pub fn slice(&mut self, x: ValueId, ty: &str) -> ValueId {
        self.def_value(
            ValueKind::Slice {
                x,
                low: None,
                high: None,
            },
            ty,
            None,
        )
    }

    pub fn make_interface(&mut self, x: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::MakeInterface { x }, ty, None)
    }

    pub fn change_interface(&mut self, x: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::ChangeInterface { x }, ty, None)
    }

    pub fn type_assert(&mut self, x: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::TypeAssert { x }, ty, None)
    }

    pub fn convert(&mut self, x: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::Convert { x }, ty, None)
    }

    pub fn extract(&mut self, tuple: ValueId, index: usize, ty: &str) -> ValueId {
        self.def_value(ValueKind::Extract { tuple, index }, ty, None)
    }

    pub fn lookup(&mut self, x: ValueId, index: ValueId, ty: &str) -> ValueId {
        self.def_value(ValueKind::Lookup { x, index }, ty, None)
    }

    pub fn make_closure(&mut self, func: FuncId, bindings: &[ValueId], ty: &str) -> ValueId {
        self.def_value(
            ValueKind::MakeClosure {
                func,
                bindings: bindings.to_vec(),
            },
            ty,
            None,
        )
    }

    pub fn phi(&mut self, edges: &[ValueId], ty: &str) -> ValueId {
        self.def_value(
            ValueKind::Phi {
                edges: edges.to_vec(),
            },
            ty,
            None,
        )
    }

    /// A call through a callee operand (function reference, closure value,
    /// function-typed load).
    pub fn call(&mut self, callee: ValueId, args: &[ValueId], result_ty: &str) -> ValueId {
        self.def_value(
            ValueKind::Call(CallCommon {
                value: Some(callee),
                method: None,
                recv_ty: None,
                args: args.to_vec(),
            }),
            result_ty,
            None,
        )
    }

    /// Sugar: materialises a function reference and calls it.
    pub fn call_fn(&mut self, func: FuncId, args: &[ValueId], result_ty: &str) -> ValueId {
        let callee = self.func_ref(func);
        self.call(callee, args, result_ty)
    }

    /// An invoke-mode call: dynamic dispatch of `method` on the interface
    /// value `recv`. The receiver is the first argument by convention.
    pub fn invoke(
        &mut self,
        recv: ValueId,
        method: &str,
        args: &[ValueId],
        result_ty: &str,
    ) -> ValueId {
        let recv_ty = self.pb.program.values[recv.index()].ty;
        let mut all_args = vec![recv];
        all_args.extend_from_slice(args);
        self.def_value(
            ValueKind::Call(CallCommon {
                value: None,
                method: Some(method.to_string()),
                recv_ty: Some(recv_ty),
                args: all_args,
            }),
            result_ty,
            None,
        )
    }

    pub fn store(&mut self, addr: ValueId, val: ValueId) {
        self.push_instr(Instruction::Store { addr, val });
    }

    pub fn map_update(&mut self, map: ValueId, key: ValueId, val: ValueId) {
        self.push_instr(Instruction::MapUpdate { map, key, val });
    }

    pub fn ret(&mut self, results: Vec<ValueId>) {
        self.push_instr(Instruction::Return { results });
    }

    pub fn jump(&mut self, target: usize) {
        self.push_instr(Instruction::Jump { target });
    }

    pub fn cond_jump(&mut self, cond: ValueId, on_true: usize, on_false: usize) {
        self.push_instr(Instruction::CondJump {
            cond,
            on_true,
            on_false,
        });
    }

    /// Declares an anonymous function enclosed by the one under construction.
    pub fn anon_func(&mut self, qualified: &str) -> FuncId {
        let anon = self
            .pb
            .add_function(qualified, self.pb.program.functions[self.func.index()].package.clone(), Signature::default());
        self.pb.program.functions[anon.index()].enclosing = Some(self.func);
        self.pb.program.functions[self.func.index()].anon_funcs.push(anon);
        anon
    }

    fn function(&self) -> &Function {
        &self.pb.program.functions[self.func.index()]
    }

    /// Appends a value with a defining instruction in the current block.
    fn def_value(&mut self, kind: ValueKind, ty: &str, name: Option<&str>) -> ValueId {
        let id = self.new_value(kind, ty, name);
        self.push_instr(Instruction::Def(id));
        id
    }

    /// Appends a value without a defining instruction (parameters, free
    /// variables).
    fn new_value(&mut self, kind: ValueKind, ty: &str, name: Option<&str>) -> ValueId {
        let ty_id = self.pb.intern_type(ty);
        let package = self.function().package.clone();
        let pos = self.pb.next_pos(package.as_deref());
        let id = ValueId(self.pb.program.values.len() as u32);
        self.pb.program.values.push(Value {
            ty: ty_id,
            parent: Some(self.func),
            name: name.map(|n| n.to_string()),
            pos,
            kind,
        });
        id
    }

    fn push_instr(&mut self, instr: Instruction) {
        let id = InstrId(self.pb.program.instrs.len() as u32);
        self.pb.program.instrs.push(instr);
        self.pb.program.functions[self.func.index()].blocks[self.block]
            .instrs
            .push(id);
    }
}
