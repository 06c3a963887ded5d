// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Name matching strategies for path queries.

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::error::AnalysisError;

/// How a pattern is compared against a function's qualified name.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MatchStrategy {
    /// String equality.
    Exact,
    /// Substring containment.
    Fuzzy,
    /// Shell-style glob with `*`, `?`, `[...]`.
    Glob,
    /// Regular expression; anchored only if the pattern anchors itself.
    Regex,
}

enum CompiledPattern {
    Exact(String),
    Fuzzy(String),
    Glob(GlobMatcher),
    Regex(Regex),
}

/// A compiled matcher. Construction fails only for invalid regular
/// expressions; invalid glob patterns degrade to exact matching.
pub struct Matcher {
    strategy: MatchStrategy,
    pattern: String,
    compiled: CompiledPattern,
}

impl Matcher {
    pub fn new(strategy: MatchStrategy, pattern: &str) -> Result<Matcher, AnalysisError> {
        let compiled = match strategy {
            MatchStrategy::Exact => CompiledPattern::Exact(pattern.to_string()),
            MatchStrategy::Fuzzy => CompiledPattern::Fuzzy(pattern.to_string()),
            MatchStrategy::Glob => match Glob::new(pattern) {
                Ok(glob) => CompiledPattern::Glob(glob.compile_matcher()),
                // Invalid globs degrade to exact matching.
                Err(_) => CompiledPattern::Exact(pattern.to_string()),
            },
            MatchStrategy::Regex => {
                let regex = Regex::new(pattern).map_err(|e| AnalysisError::InvalidMatcher {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                CompiledPattern::Regex(regex)
            }
        };
        Ok(Matcher {
            strategy,
            pattern: pattern.to_string(),
            compiled,
        })
    }

    /// Parses the optional `strategy:pattern` prefix form. Unknown prefixes
    /// are treated as literal text in exact mode.
    pub fn parse(input: &str) -> Result<Matcher, AnalysisError> {
        match input.split_once(':') {
            Some(("exact", rest)) => Matcher::new(MatchStrategy::Exact, rest),
            Some(("fuzzy", rest)) => Matcher::new(MatchStrategy::Fuzzy, rest),
            Some(("glob", rest)) => Matcher::new(MatchStrategy::Glob, rest),
            Some(("regex", rest)) => Matcher::new(MatchStrategy::Regex, rest),
            _ => Matcher::new(MatchStrategy::Exact, input),
        }
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.compiled {
            CompiledPattern::Exact(p) => candidate == p,
            CompiledPattern::Fuzzy(p) => candidate.contains(p.as_str()),
            CompiledPattern::Glob(g) => g.is_match(candidate),
            CompiledPattern::Regex(r) => r.is_match(candidate),
        }
    }
}
