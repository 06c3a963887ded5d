// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ssa::function::FuncId;
use crate::ssa::instruction::InstrId;

/// The unique identifier of an interned type string.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The unique identifier of an SSA value within its program.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A source position, used for reporting and result deduplication.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Pos {
    pub file: String,
    pub line: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A use of a value, either as an operand of another value's defining
/// instruction or as an operand of a non-value instruction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Referrer {
    Value(ValueId),
    Instr(InstrId),
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum UnOpKind {
    /// Pointer dereference.
    Deref,
    Neg,
    Not,
    /// Channel receive.
    Recv,
}

/// The shared shape of call-like instructions.
///
/// A call is in *invoke mode* (dynamic dispatch through an interface) when it
/// carries a method name and no callee operand. A callee operand that is a
/// parameter combined with a method name is the devirtualisation-pending form
/// the builder treats like an invoke on the parameter's type.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct CallCommon {
    /// The callee operand for ordinary calls.
    pub value: Option<ValueId>,
    /// The invoked method name for interface calls.
    pub method: Option<String>,
    /// Receiver type from the call's signature, for invoke-mode calls.
    pub recv_ty: Option<TypeId>,
    pub args: Vec<ValueId>,
}

impl CallCommon {
    #[inline]
    pub fn is_invoke(&self) -> bool {
        self.method.is_some() && self.value.is_none()
    }
}

/// The variant tag of an SSA value. One variant per instruction kind the
/// analysis distinguishes; anything a frontend cannot express maps to the
/// nearest variant or is dropped by the frontend.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ValueKind {
    Const {
        literal: String,
    },
    FunctionRef(FuncId),
    Global,
    Parameter {
        index: usize,
    },
    FreeVar,
    Call(CallCommon),
    Alloc,
    IndexAddr {
        base: ValueId,
        index: ValueId,
    },
    MakeMap,
    FieldAddr {
        base: ValueId,
        field: String,
    },
    BinOp {
        op: String,
        x: ValueId,
        y: ValueId,
    },
    UnOp {
        op: UnOpKind,
        x: ValueId,
    },
    Slice {
        x: ValueId,
        low: Option<ValueId>,
        high: Option<ValueId>,
    },
    MakeInterface {
        x: ValueId,
    },
    ChangeInterface {
        x: ValueId,
    },
    TypeAssert {
        x: ValueId,
    },
    Convert {
        x: ValueId,
    },
    Extract {
        tuple: ValueId,
        index: usize,
    },
    Lookup {
        x: ValueId,
        index: ValueId,
    },
    MakeClosure {
        func: FuncId,
        bindings: Vec<ValueId>,
    },
    Phi {
        edges: Vec<ValueId>,
    },
}

/// An SSA value: a static type, an optional enclosing function, an optional
/// debug name (parameter names and alloc comments), a position, and the
/// variant payload.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Value {
    pub ty: TypeId,
    pub parent: Option<FuncId>,
    pub name: Option<String>,
    pub pos: Pos,
    pub kind: ValueKind,
}

impl Value {
    /// The operand values of this value's defining instruction, in a fixed
    /// order. Used by referrer computation, the propagator's derivation
    /// helpers and the generic walker.
    pub fn operands(&self) -> Vec<ValueId> {
        match &self.kind {
            ValueKind::Const { .. }
            | ValueKind::FunctionRef(_)
            | ValueKind::Global
            | ValueKind::Parameter { .. }
            | ValueKind::FreeVar
            | ValueKind::Alloc
            | ValueKind::MakeMap => Vec::new(),
            ValueKind::Call(cc) => {
                let mut ops = Vec::with_capacity(cc.args.len() + 1);
                if let Some(callee) = cc.value {
                    ops.push(callee);
                }
                ops.extend(cc.args.iter().copied());
                ops
            }
            ValueKind::IndexAddr { base, index } => vec![*base, *index],
            ValueKind::FieldAddr { base, .. } => vec![*base],
            ValueKind::BinOp { x, y, .. } => vec![*x, *y],
            ValueKind::UnOp { x, .. }
            | ValueKind::MakeInterface { x }
            | ValueKind::ChangeInterface { x }
            | ValueKind::TypeAssert { x }
            | ValueKind::Convert { x } => vec![*x],
            ValueKind::Slice { x, low, high } => {
                let mut ops = vec![*x];
                ops.extend(low.iter().copied());
                ops.extend(high.iter().copied());
                ops
            }
            ValueKind::Extract { tuple, .. } => vec![*tuple],
            ValueKind::Lookup { x, index } => vec![*x, *index],
            ValueKind::MakeClosure { bindings, .. } => bindings.clone(),
            ValueKind::Phi { edges } => edges.clone(),
        }
    }
}
