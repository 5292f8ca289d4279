// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Static rules applied to file names: categories, tags and ignore patterns

pub mod ignore;
pub mod tags;

use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::config::CategoryRule;

pub use ignore::IgnoreMatcher;
pub use tags::Tagger;

/// Category for every extension that no rule claims
pub const FALLBACK_CATEGORY: &str = "Other";

/// Extension to category lookup
#[derive(Debug, Clone)]
pub struct Classifier {
    by_extension: HashMap<String, String>,
    categories: Vec<String>,
}

impl Classifier {
    /// Build the lookup table; the first rule listing an extension owns it
    pub fn new(rules: &[CategoryRule]) -> Self {
        let mut by_extension: HashMap<String, String> = HashMap::new();
        let mut categories = Vec::with_capacity(rules.len() + 1);

        for rule in rules {
            if !categories.contains(&rule.name) {
                categories.push(rule.name.clone());
            }
            for ext in &rule.extensions {
                let ext = normalize_extension(ext);
                if ext.is_empty() {
                    continue;
                }
                match by_extension.get(&ext) {
                    Some(owner) if owner != &rule.name => {
                        warn!(
                            "Extension .{} listed under both {:?} and {:?}; using {:?}",
                            ext, owner, rule.name, owner
                        );
                    }
                    Some(_) => {}
                    None => {
                        by_extension.insert(ext, rule.name.clone());
                    }
                }
            }
        }

        if !categories.iter().any(|c| c == FALLBACK_CATEGORY) {
            categories.push(FALLBACK_CATEGORY.to_string());
        }

        Self { by_extension, categories }
    }

    /// Category for a bare file name
    pub fn classify(&self, file_name: &str) -> &str {
        extension_of(file_name)
            .and_then(|ext| self.by_extension.get(&ext))
            .map(String::as_str)
            .unwrap_or(FALLBACK_CATEGORY)
    }

    /// Category for the final component of a path
    pub fn classify_path(&self, path: &Path) -> &str {
        match path.file_name() {
            Some(name) => self.classify(&name.to_string_lossy()),
            None => FALLBACK_CATEGORY,
        }
    }

    /// Every destination category, configured order first, fallback last
    pub fn categories(&self) -> &[String] {
        &self.categories
    }
}

/// Lowercase an extension and drop any leading dot
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Lowercased extension of a file name, if it has one
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn images_only() -> Classifier {
        Classifier::new(&[CategoryRule::new("Images", &[".jpg", ".png"])])
    }

    #[test]
    fn test_configured_extensions() {
        let classifier = images_only();
        assert_eq!(classifier.classify("a.jpg"), "Images");
        assert_eq!(classifier.classify("b.png"), "Images");
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let classifier = images_only();
        assert_eq!(classifier.classify("HOLIDAY.JPG"), "Images");
        assert_eq!(classifier.classify("mixed.PnG"), "Images");
    }

    #[test]
    fn test_unknown_and_missing_extensions_fall_back() {
        let classifier = images_only();
        assert_eq!(classifier.classify("song.mp3"), FALLBACK_CATEGORY);
        assert_eq!(classifier.classify("Makefile"), FALLBACK_CATEGORY);
        assert_eq!(classifier.classify(".bashrc"), FALLBACK_CATEGORY);
        assert_eq!(classifier.classify("trailing."), FALLBACK_CATEGORY);
        assert_eq!(classifier.classify(""), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_only_last_extension_counts() {
        let classifier = Classifier::new(&[CategoryRule::new("Archives", &["gz"])]);
        assert_eq!(classifier.classify("backup.tar.gz"), "Archives");
        assert_eq!(classifier.classify("photo.gz.jpg"), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_first_rule_wins_on_overlap() {
        let classifier = Classifier::new(&[
            CategoryRule::new("Zips", &[".zip"]),
            CategoryRule::new("Archives", &["ZIP", ".tar"]),
        ]);
        assert_eq!(classifier.classify("x.zip"), "Zips");
        assert_eq!(classifier.classify("x.tar"), "Archives");
    }

    #[test]
    fn test_every_default_extension_maps_to_its_rule() {
        let config = AppConfig::default();
        let classifier = Classifier::new(&config.categories);
        for rule in &config.categories {
            for ext in &rule.extensions {
                let name = format!("file{}", ext);
                assert_eq!(classifier.classify(&name), rule.name, "{}", name);
            }
        }
        assert_eq!(classifier.categories().last().map(String::as_str), Some(FALLBACK_CATEGORY));
    }

    #[test]
    fn test_classify_path_uses_file_name() {
        let classifier = images_only();
        assert_eq!(classifier.classify_path(Path::new("/downloads/x.y/a.jpg")), "Images");
        assert_eq!(classifier.classify_path(Path::new("/")), FALLBACK_CATEGORY);
    }
}
