// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Session state threaded through every analysis phase.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::ssa::function::FuncId;
use crate::ssa::program::Program;
use crate::ssa::value::{TypeId, ValueId};
use crate::util::options::AnalysisOptions;
use crate::util::CancelToken;

/// The identifier of an interned synthetic method.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SynthId(pub u32);

/// A placeholder callee fabricated for an invoke whose concrete target is
/// unknown: a stable stand-in keyed by receiver type and method name.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SyntheticMethod {
    pub recv_ty: String,
    pub method: String,
    pub qualified: String,
}

lazy_static! {
    // Process-wide synthetic-method registry. The index map and the arena
    // are guarded together so each (receiver type, method) key is
    // materialised exactly once.
    static ref SYNTHETIC_INDEX: Mutex<HashMap<(String, String), SynthId>> =
        Mutex::new(HashMap::new());
    static ref SYNTHETIC_METHODS: RwLock<Vec<SyntheticMethod>> = RwLock::new(Vec::new());
}

/// Interns the synthetic method for `(recv_ty, method)`, creating it on
/// first use.
pub fn intern_synthetic_method(recv_ty: &str, method: &str) -> SynthId {
    let mut index = SYNTHETIC_INDEX.lock().unwrap();
    if let Some(id) = index.get(&(recv_ty.to_string(), method.to_string())) {
        return *id;
    }
    let mut arena = SYNTHETIC_METHODS.write().unwrap();
    let id = SynthId(arena.len() as u32);
    arena.push(SyntheticMethod {
        recv_ty: recv_ty.to_string(),
        method: method.to_string(),
        qualified: crate::util::method_descriptor(recv_ty, method),
    });
    index.insert((recv_ty.to_string(), method.to_string()), id);
    id
}

/// Resolves an interned synthetic method.
pub fn synthetic_method(id: SynthId) -> SyntheticMethod {
    SYNTHETIC_METHODS.read().unwrap()[id.0 as usize].clone()
}

/// The analysis context: the program under analysis, the options, and the
/// cancellation token. Cheap to clone and share across workers.
#[derive(Clone)]
pub struct AnalysisContext {
    pub program: Arc<Program>,
    pub options: AnalysisOptions,
    pub cancel: CancelToken,
}

impl AnalysisContext {
    pub fn new(program: Program, options: AnalysisOptions) -> Self {
        AnalysisContext {
            program: Arc::new(program),
            options,
            cancel: CancelToken::new(),
        }
    }

    #[inline]
    pub fn func_qualified_name(&self, func: FuncId) -> &str {
        &self.program.func(func).qualified
    }

    #[inline]
    pub fn type_str(&self, ty: TypeId) -> &str {
        self.program.type_str(ty)
    }

    #[inline]
    pub fn value_type(&self, value: ValueId) -> &str {
        self.program.value_type(value)
    }

    #[inline]
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
