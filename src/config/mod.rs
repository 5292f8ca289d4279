// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for tidyup

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, TidyError};

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directories to watch
    #[serde(default = "default_watched_folders")]
    pub watched_folders: Vec<String>,

    /// Root of the category folders
    #[serde(default = "default_organized_folder")]
    pub organized_folder: String,

    /// Category name to extension list, in priority order
    #[serde(default = "default_categories", with = "category_map")]
    pub categories: Vec<CategoryRule>,

    /// Glob patterns for names that are never moved
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Settle delay after a filesystem event, in seconds
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,

    /// Files above this size are left alone
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Tag name to filename keywords
    #[serde(default = "default_tag_rules")]
    pub tag_rules: BTreeMap<String, Vec<String>>,

    /// Watch backend settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// One destination category and the extensions routed to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub extensions: Vec<String>,
}

impl CategoryRule {
    pub fn new(name: &str, extensions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Which notification mechanism the watcher uses
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Native OS notifications, falling back to polling when unavailable
    #[default]
    Auto,
    Native,
    Poll,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    #[serde(default)]
    pub backend: WatchBackend,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

// Default value functions
fn default_watched_folders() -> Vec<String> { vec!["./watch".to_string()] }
fn default_organized_folder() -> String { "./Organized_Files".to_string() }
fn default_delay_seconds() -> f64 { 2.0 }
fn default_max_file_size_mb() -> u64 { 1000 }
fn default_poll_interval() -> u64 { 2 }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 5000 }
fn default_db_path() -> String { "tidyup.db".to_string() }

fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new("PDFs", &[".pdf"]),
        CategoryRule::new("Documents", &[
            ".doc", ".docx", ".txt", ".rtf", ".odt", ".xls", ".xlsx", ".csv", ".ppt", ".pptx",
        ]),
        CategoryRule::new("Images", &[
            ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".tiff",
        ]),
    ]
}

fn default_ignore_patterns() -> Vec<String> {
    ["*.tmp", "*.temp", "*.part", "*.crdownload", ".DS_Store", "Thumbs.db", "*.lock"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_tag_rules() -> BTreeMap<String, Vec<String>> {
    let rules: [(&str, &[&str]); 4] = [
        ("finance", &["invoice", "receipt", "bill", "payment", "tax", "bank", "statement"]),
        ("work", &["project", "meeting", "presentation", "report", "proposal", "contract"]),
        ("personal", &["family", "vacation", "holiday", "birthday", "photo", "travel"]),
        ("education", &["homework", "assignment", "exam", "notes", "lecture", "study"]),
    ];
    rules
        .into_iter()
        .map(|(tag, words)| (tag.to_string(), words.iter().map(|w| w.to_string()).collect()))
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watched_folders: default_watched_folders(),
            organized_folder: default_organized_folder(),
            categories: default_categories(),
            ignore_patterns: default_ignore_patterns(),
            delay_seconds: default_delay_seconds(),
            max_file_size_mb: default_max_file_size_mb(),
            tag_rules: default_tag_rules(),
            watcher: WatcherConfig::default(),
            web: WebConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::default(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            debug: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Self>(&content)
                .map_err(|e| TidyError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the organizer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.watched_folders.iter().all(|f| f.trim().is_empty()) {
            return Err(TidyError::Config("at least one watched folder is required".to_string()));
        }
        if self.organized_folder.trim().is_empty() {
            return Err(TidyError::Config("organized_folder must not be empty".to_string()));
        }
        if !self.delay_seconds.is_finite() || self.delay_seconds < 0.0 {
            return Err(TidyError::Config(format!(
                "delay_seconds must be a non-negative number, got {}",
                self.delay_seconds
            )));
        }
        if self.web.port == 0 {
            return Err(TidyError::Config("web.port must not be 0".to_string()));
        }
        if let Some(rule) = self.categories.iter().find(|r| r.name.trim().is_empty()) {
            return Err(TidyError::Config(format!(
                "category with extensions {:?} has an empty name",
                rule.extensions
            )));
        }
        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| TidyError::Config(format!("bad ignore pattern {:?}: {}", pattern, e)))?;
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_seconds).unwrap_or_default()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn organized_path(&self) -> PathBuf {
        PathBuf::from(&self.organized_folder)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_folders
            .iter()
            .filter(|f| !f.trim().is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

/// Categories are a JSON object whose key order is the match priority.
mod category_map {
    use super::CategoryRule;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(rules: &[CategoryRule], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(rules.len()))?;
        for rule in rules {
            map.serialize_entry(&rule.name, &rule.extensions)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<CategoryRule>, D::Error> {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = Vec<CategoryRule>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category name to a list of extensions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut rules = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, extensions)) = access.next_entry::<String, Vec<String>>()? {
                    rules.push(CategoryRule { name, extensions });
                }
                Ok(rules)
            }
        }

        deserializer.deserialize_map(RulesVisitor)
    }
}
