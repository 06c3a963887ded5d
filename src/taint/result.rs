// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashSet;

use crate::graph::call_graph::CgEdgeId;
use crate::ssa::analysis_context::AnalysisContext;
use crate::ssa::value::{Pos, ValueId};

/// One source-to-sink finding: the witness path through the call graph, the
/// matched source and sink descriptors, the value at which the source was
/// recognised and the sink callsite value. Holds ids only; the program and
/// graph stay owned by the session.
#[derive(Clone, Debug)]
pub struct CheckResult {
    pub path: Vec<CgEdgeId>,
    pub source: String,
    pub source_value: ValueId,
    pub sink: String,
    pub sink_value: ValueId,
}

impl CheckResult {
    /// The reporting position: where the sink callsite sits in the source.
    pub fn sink_pos<'a>(&self, ctx: &'a AnalysisContext) -> &'a Pos {
        &ctx.program.value(self.sink_value).pos
    }
}

/// Deduplicates results keyed by `(sink callsite position, source
/// descriptor)`, retaining the result with the longest path so
/// parameter-mapping context across wrappers survives. The output is sorted
/// by sink position, then source descriptor, for stable reporting.
pub fn dedup_results(ctx: &AnalysisContext, mut results: Vec<CheckResult>) -> Vec<CheckResult> {
    results.sort_by(|a, b| {
        (a.sink_pos(ctx), &a.source, std::cmp::Reverse(a.path.len())).cmp(&(
            b.sink_pos(ctx),
            &b.source,
            std::cmp::Reverse(b.path.len()),
        ))
    });

    // The sort placed the longest path first within each key; keep it.
    let mut seen: HashSet<(Pos, String)> = HashSet::new();
    let mut deduped: Vec<CheckResult> = Vec::new();
    for result in results {
        let key = (result.sink_pos(ctx).clone(), result.source.clone());
        if seen.insert(key) {
            deduped.push(result);
        }
    }
    deduped
}
