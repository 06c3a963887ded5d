// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};

use crate::ssa::value::ValueId;

/// The unique identifier of an instruction within its program.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct InstrId(pub u32);

impl InstrId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An instruction. Every value is produced by exactly one `Def`; the
/// remaining variants are the non-value instructions the analysis inspects
/// (stores, map updates) or steps over (control flow).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Instruction {
    /// The defining instruction of a value.
    Def(ValueId),
    Store {
        addr: ValueId,
        val: ValueId,
    },
    MapUpdate {
        map: ValueId,
        key: ValueId,
        val: ValueId,
    },
    Return {
        results: Vec<ValueId>,
    },
    Jump {
        target: usize,
    },
    CondJump {
        cond: ValueId,
        on_true: usize,
        on_false: usize,
    },
}

impl Instruction {
    /// Operand values, excluding the defined value of a `Def` (its operands
    /// are reported by [`crate::ssa::value::Value::operands`]).
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Instruction::Def(_) | Instruction::Jump { .. } => Vec::new(),
            Instruction::Store { addr, val } => vec![*addr, *val],
            Instruction::MapUpdate { map, key, val } => vec![*map, *key, *val],
            Instruction::Return { results } => results.clone(),
            Instruction::CondJump { cond, .. } => vec![*cond],
        }
    }
}

/// A basic block: an ordered instruction list. Blocks are traversed in
/// natural order; frontends owe no dominator preorder.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Block {
    pub instrs: Vec<InstrId>,
}
