// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The error taxonomy of the analysis.

use thiserror::Error;

/// Errors surfaced by the public entry points.
///
/// Recoverable conditions inside the call-graph builder (missing package SSA,
/// universe-scope methods, unresolvable callee operands) are not errors: they
/// elide the edge and construction continues.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The frontend failed to produce an SSA program.
    #[error("failed to load ssa program: {0}")]
    Load(String),

    /// A matcher pattern failed to compile.
    #[error("invalid matcher pattern `{pattern}`: {reason}")]
    InvalidMatcher { pattern: String, reason: String },

    /// The analysis was cancelled; any partial output returned alongside this
    /// error is valid as far as it goes.
    #[error("analysis cancelled")]
    Cancelled,

    /// A structural invariant of the call graph or the SSA view was violated.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}
