// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ignore patterns for temporary and system files

use glob::{MatchOptions, Pattern};
use tracing::warn;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Case-insensitive glob patterns matched against the bare file name
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Compile patterns, dropping any that do not parse
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Skipping invalid ignore pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// First pattern matching the file name, if any
    pub fn matching_pattern(&self, file_name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches_with(file_name, MATCH_OPTIONS))
            .map(Pattern::as_str)
    }

    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.matching_pattern(file_name).is_some()
    }
}
