// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The read-only SSA view the analysis consumes.
//!
//! Frontends hand the core a finished [`program::Program`], either assembled
//! with [`builder::ProgramBuilder`] or deserialised from a JSON dump. The
//! analysis itself never mutates a program; the only mutable state it keeps
//! lives in [`analysis_context::AnalysisContext`].

pub mod analysis_context;
pub mod builder;
pub mod function;
pub mod instruction;
pub mod program;
pub mod value;
pub mod walker;
