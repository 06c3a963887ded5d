// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The SSA program arena and its process-wide function cache.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::AnalysisError;
use crate::ssa::function::{FuncId, Function};
use crate::ssa::instruction::{InstrId, Instruction};
use crate::ssa::value::{Referrer, TypeId, Value, ValueId, ValueKind};

static NEXT_PROGRAM_IDENTITY: AtomicU64 = AtomicU64::new(1);

lazy_static! {
    /// Process-wide memo of `all_functions` per program identity.
    /// Initialisation happens at most once per key: the computation runs
    /// under the write lock, so concurrent callers observe either nothing or
    /// the finished entry.
    static ref ALL_FUNCTIONS: RwLock<HashMap<u64, Arc<Vec<FuncId>>>> = RwLock::new(HashMap::new());
}

/// A package of the analysed program: a path and named member functions.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Package {
    pub path: String,
    pub members: HashMap<String, FuncId>,
}

/// Interned type strings. Comparison against descriptors happens on the
/// resolved string.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TypeTable {
    names: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, TypeId>,
}

impl TypeTable {
    pub fn intern(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = TypeId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: TypeId) -> &str {
        &self.names[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), TypeId(i as u32)))
            .collect();
    }
}

/// An SSA program: arenas for functions, values and instructions, the type
/// table, packages, interface declarations and named-type method sets.
///
/// A program is immutable once finished. Construction goes through
/// [`crate::ssa::builder::ProgramBuilder`] or [`Program::from_json_file`];
/// both end in [`Program::finish`], which assigns the process-unique identity
/// and precomputes referrers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(skip)]
    identity: u64,
    pub functions: Vec<Function>,
    pub values: Vec<Value>,
    pub instrs: Vec<Instruction>,
    pub types: TypeTable,
    pub packages: Vec<Package>,
    /// Interface type name to declared method names.
    pub interfaces: HashMap<String, Vec<String>>,
    /// Named type to its method set.
    pub methods: HashMap<String, Vec<FuncId>>,
    #[serde(skip)]
    referrers: Vec<Vec<Referrer>>,
}

impl Program {
    /// The process-unique identity keying the global caches.
    #[inline]
    pub fn identity(&self) -> u64 {
        self.identity
    }

    #[inline]
    pub fn func(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    #[inline]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    #[inline]
    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    #[inline]
    pub fn type_str(&self, id: TypeId) -> &str {
        self.types.get(id)
    }

    /// The static type of a value, as a descriptor-comparable string.
    #[inline]
    pub fn value_type(&self, id: ValueId) -> &str {
        self.type_str(self.value(id).ty)
    }

    /// The uses of a value. Empty until the program is finished.
    #[inline]
    pub fn referrers(&self, id: ValueId) -> &[Referrer] {
        &self.referrers[id.index()]
    }

    pub fn package(&self, path: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.path == path)
    }

    /// The method set of a named type (pointer indirection already stripped
    /// by the caller).
    pub fn method_set(&self, type_name: &str) -> &[FuncId] {
        self.methods.get(type_name).map_or(&[], |m| m.as_slice())
    }

    /// Declared method names of an interface type.
    pub fn interface_methods(&self, interface: &str) -> &[String] {
        self.interfaces
            .get(crate::util::strip_pointer(interface))
            .map_or(&[], |m| m.as_slice())
    }

    /// Looks up a function by qualified name.
    pub fn func_by_qualified_name(&self, qualified: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.qualified == qualified)
            .map(|i| FuncId(i as u32))
    }

    /// Every function reachable by any means from the program's declared
    /// members: package members, their anonymous functions, and functions
    /// referenced by value from reached bodies. Memoised process-wide by
    /// program identity.
    pub fn all_functions(&self) -> Arc<Vec<FuncId>> {
        debug_assert!(self.identity != 0, "all_functions on an unfinished program");
        if let Some(cached) = ALL_FUNCTIONS.read().unwrap().get(&self.identity) {
            return cached.clone();
        }
        let mut cache = ALL_FUNCTIONS.write().unwrap();
        // Re-check under the write lock; another thread may have won.
        if let Some(cached) = cache.get(&self.identity) {
            return cached.clone();
        }
        let computed = Arc::new(self.compute_all_functions());
        cache.insert(self.identity, computed.clone());
        computed
    }

    fn compute_all_functions(&self) -> Vec<FuncId> {
        let mut seen = vec![false; self.functions.len()];
        let mut order = Vec::new();
        let mut worklist: Vec<FuncId> = Vec::new();

        let mut roots: Vec<FuncId> = self
            .packages
            .iter()
            .flat_map(|p| p.members.values().copied())
            .collect();
        roots.sort();
        for root in roots {
            worklist.push(root);
        }

        while let Some(func) = worklist.pop() {
            if seen[func.index()] {
                continue;
            }
            seen[func.index()] = true;
            order.push(func);

            let f = self.func(func);
            for anon in &f.anon_funcs {
                worklist.push(*anon);
            }
            for block in &f.blocks {
                for instr in &block.instrs {
                    if let Instruction::Def(v) = self.instr(*instr) {
                        match &self.value(*v).kind {
                            ValueKind::FunctionRef(target) => worklist.push(*target),
                            ValueKind::MakeClosure { func: target, .. } => worklist.push(*target),
                            _ => {}
                        }
                    }
                }
            }
        }

        // Functions unreachable from any member still exist; keep them at the
        // tail so the pre-pass covers the whole arena.
        for i in 0..self.functions.len() {
            if !seen[i] {
                order.push(FuncId(i as u32));
            }
        }
        order
    }

    /// Finalises a constructed or deserialised program: validates id ranges,
    /// rebuilds the type index, computes referrers and assigns the identity.
    pub fn finish(mut self) -> Result<Program, AnalysisError> {
        self.types.rebuild_index();
        self.validate().map_err(AnalysisError::Load)?;
        self.compute_referrers();
        self.identity = NEXT_PROGRAM_IDENTITY.fetch_add(1, Ordering::Relaxed);
        Ok(self)
    }

    /// Loads a program from the JSON frontend exchange format.
    pub fn from_json_file(path: &Path) -> Result<Program, AnalysisError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Load(format!("{}: {}", path.display(), e)))?;
        Program::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Program, AnalysisError> {
        let program: Program =
            serde_json::from_str(data).map_err(|e| AnalysisError::Load(e.to_string()))?;
        program.finish()
    }

    fn validate(&self) -> Result<(), String> {
        let nvalues = self.values.len();
        let ninstrs = self.instrs.len();
        let nfuncs = self.functions.len();
        let ntypes = self.types.len();

        let check_value = |id: ValueId| -> Result<(), String> {
            if id.index() < nvalues {
                Ok(())
            } else {
                Err(format!("value id {:?} out of range", id))
            }
        };
        let check_func = |id: FuncId| -> Result<(), String> {
            if id.index() < nfuncs {
                Ok(())
            } else {
                Err(format!("function id {:?} out of range", id))
            }
        };

        for value in &self.values {
            if value.ty.index() >= ntypes {
                return Err(format!("type id {:?} out of range", value.ty));
            }
            if let Some(parent) = value.parent {
                check_func(parent)?;
            }
            for op in value.operands() {
                check_value(op)?;
            }
            if let ValueKind::FunctionRef(f) | ValueKind::MakeClosure { func: f, .. } = &value.kind
            {
                check_func(*f)?;
            }
        }
        for instr in &self.instrs {
            if let Instruction::Def(v) = instr {
                check_value(*v)?;
            }
            for op in instr.operands() {
                check_value(op)?;
            }
        }
        for func in &self.functions {
            for p in func.params.iter().chain(func.free_vars.iter()) {
                check_value(*p)?;
            }
            for anon in &func.anon_funcs {
                check_func(*anon)?;
            }
            for block in &func.blocks {
                for instr in &block.instrs {
                    if instr.index() >= ninstrs {
                        return Err(format!("instruction id {:?} out of range", instr));
                    }
                }
            }
        }
        for package in &self.packages {
            for member in package.members.values() {
                check_func(*member)?;
            }
        }
        for methods in self.methods.values() {
            for m in methods {
                check_func(*m)?;
            }
        }
        Ok(())
    }

    fn compute_referrers(&mut self) {
        let mut referrers: Vec<Vec<Referrer>> = vec![Vec::new(); self.values.len()];
        for (i, value) in self.values.iter().enumerate() {
            let user = ValueId(i as u32);
            for op in value.operands() {
                referrers[op.index()].push(Referrer::Value(user));
            }
        }
        for (i, instr) in self.instrs.iter().enumerate() {
            if matches!(instr, Instruction::Def(_)) {
                continue;
            }
            let user = InstrId(i as u32);
            for op in instr.operands() {
                referrers[op.index()].push(Referrer::Instr(user));
            }
        }
        self.referrers = referrers;
    }
}
