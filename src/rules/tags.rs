// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filename tagging

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::extension_of;

/// Years from 1900-2099 or an English month abbreviation
const DATE_PATTERN: &str = r"(19|20)\d{2}|jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec";

/// Derives descriptive tags from a file name
#[derive(Debug, Clone)]
pub struct Tagger {
    keyword_rules: Vec<(String, Vec<String>)>,
    date: Regex,
}

impl Tagger {
    pub fn new(rules: &BTreeMap<String, Vec<String>>) -> Self {
        let keyword_rules = rules
            .iter()
            .map(|(tag, words)| {
                let words = words
                    .iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect();
                (tag.clone(), words)
            })
            .collect();

        Self {
            keyword_rules,
            date: Regex::new(DATE_PATTERN).expect("date pattern is a valid regex"),
        }
    }

    /// Sorted, deduplicated tags for a bare file name
    pub fn tags_for(&self, file_name: &str) -> Vec<String> {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mut tags = BTreeSet::new();

        for (tag, words) in &self.keyword_rules {
            if words.iter().any(|w| stem.contains(w.as_str())) {
                tags.insert(tag.clone());
            }
        }

        if let Some(ext) = extension_of(file_name) {
            tags.insert(format!("type_{}", ext));
        }

        if self.date.is_match(&stem) {
            tags.insert("dated".to_string());
        }

        tags.into_iter().collect()
    }
}
