// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use crate::ssa::instruction::Block;
use crate::ssa::value::{TypeId, ValueId};

/// The unique identifier for each function of a program.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct FuncId(pub u32);

impl FuncId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A function signature: optional receiver type, parameter types, result
/// types. Types are descriptor-comparable interned strings.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Signature {
    pub recv: Option<TypeId>,
    pub params: Vec<TypeId>,
    pub results: Vec<TypeId>,
}

/// A function of the analysed program.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Function {
    /// Short name (`Query`, `main`).
    pub name: String,
    /// Qualified descriptor (`(*database/sql.DB).Query`, `main.main`).
    pub qualified: String,
    /// Package path, absent for shared/synthetic functions.
    pub package: Option<String>,
    pub sig: Signature,
    /// Parameter values, in declaration order. The receiver, if any, is the
    /// first parameter by convention.
    pub params: Vec<ValueId>,
    /// Captured variables of a closure body.
    pub free_vars: Vec<ValueId>,
    pub blocks: Vec<Block>,
    /// Anonymous functions declared inside this function.
    pub anon_funcs: Vec<FuncId>,
    /// The lexically enclosing function of an anonymous function.
    pub enclosing: Option<FuncId>,
    /// True for placeholder functions fabricated by the call-graph builder.
    pub synthetic: bool,
}

impl Function {
    /// Returns the index of the parameter with the given debug name.
    pub fn param_index_by_name(&self, name: &str, values: &[crate::ssa::value::Value]) -> Option<usize> {
        self.params.iter().position(|p| {
            values
                .get(p.index())
                .and_then(|v| v.name.as_deref())
                .map_or(false, |n| n == name)
        })
    }
}
