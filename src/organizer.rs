// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Moves files into their category folders and records every attempt

use chrono::{Local, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::db::{FileMoveRecord, LogStore, MoveStatus};
use crate::rules::{Classifier, IgnoreMatcher, Tagger};
use crate::{Result, TidyError};

/// Settings key holding the time of the last one-shot pass
pub const LAST_ORGANIZE_RUN: &str = "last_organize_run";

/// Numbered names tried before falling back to a timestamp
const MAX_NAME_SUFFIX: u32 = 1000;

const EVENT_BUFFER: usize = 256;

#[cfg(unix)]
const CROSS_DEVICE_CODE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_CODE: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE_CODE: i32 = -1;

/// Counts from a one-shot organize pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrganizeSummary {
    pub scanned: usize,
    pub moved: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl OrganizeSummary {
    fn tally(&mut self, status: MoveStatus) {
        match status {
            MoveStatus::Success => self.moved += 1,
            MoveStatus::Failed => self.failed += 1,
            MoveStatus::Skipped => self.skipped += 1,
        }
    }
}

enum Outcome {
    Moved { destination: PathBuf, hash: String },
    Skipped(String),
    Failed(String),
}

/// The classify-and-move pipeline shared by the watch loop and on-demand passes
pub struct Organizer {
    organized_root: PathBuf,
    watched: Vec<PathBuf>,
    classifier: Classifier,
    tagger: Tagger,
    ignore: IgnoreMatcher,
    max_file_size: u64,
    store: Option<LogStore>,
    events: broadcast::Sender<FileMoveRecord>,
    in_flight: Mutex<HashSet<PathBuf>>,
    move_lock: Mutex<()>,
}

/// Claim on a source path, released on drop
struct InFlight<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.path);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Organizer {
    /// Build an organizer, creating the organized folder if needed
    pub fn new(config: &AppConfig, store: Option<LogStore>) -> Result<Self> {
        let organized = config.organized_path();
        fs::create_dir_all(&organized)?;
        let organized_root = fs::canonicalize(&organized)?;

        let watched = config
            .watched_paths()
            .iter()
            .map(|p| fs::canonicalize(p).unwrap_or_else(|_| absolute(p)))
            .collect();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            organized_root,
            watched,
            classifier: Classifier::new(&config.categories),
            tagger: Tagger::new(&config.tag_rules),
            ignore: IgnoreMatcher::new(&config.ignore_patterns),
            max_file_size: config.max_file_size_bytes(),
            store,
            events,
            in_flight: Mutex::new(HashSet::new()),
            move_lock: Mutex::new(()),
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn organized_root(&self) -> &Path {
        &self.organized_root
    }

    pub fn watched_folders(&self) -> &[PathBuf] {
        &self.watched
    }

    pub fn store(&self) -> Option<&LogStore> {
        self.store.as_ref()
    }

    /// Receive every record produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<FileMoveRecord> {
        self.events.subscribe()
    }

    /// Whether `path` is a watched folder or lies inside one
    pub fn is_watched(&self, path: &Path) -> bool {
        let path = absolute(path);
        self.watched.iter().any(|root| path.starts_with(root))
    }

    /// Organize a single file, returning the record of the attempt
    pub fn organize(&self, path: &Path) -> FileMoveRecord {
        let source = absolute(path);
        let file_name = source.file_name().map(OsStr::to_os_string).unwrap_or_default();
        let display_name = file_name.to_string_lossy().into_owned();

        let mut record = FileMoveRecord {
            id: None,
            timestamp: Utc::now(),
            source_path: source.display().to_string(),
            destination_path: None,
            category: self.classifier.classify(&display_name).to_string(),
            size_bytes: 0,
            status: MoveStatus::Skipped,
            tags: self.tagger.tags_for(&display_name),
            content_hash: None,
            message: None,
        };

        match self.try_organize(&source, &file_name, &record.category, &mut record.size_bytes) {
            Outcome::Moved { destination, hash } => {
                info!("Moved {:?} -> {:?}", source, destination);
                record.status = MoveStatus::Success;
                record.destination_path = Some(destination.display().to_string());
                record.content_hash = Some(hash);
            }
            Outcome::Failed(reason) => {
                warn!("Could not organize {:?}: {}", source, reason);
                record.status = MoveStatus::Failed;
                record.message = Some(reason);
            }
            Outcome::Skipped(reason) => {
                debug!("Skipping {:?}: {}", source, reason);
                record.message = Some(reason);
            }
        }

        if record.status != MoveStatus::Skipped {
            self.persist(&mut record);
        }
        // No subscribers is fine
        let _ = self.events.send(record.clone());
        record
    }

    fn try_organize(&self, source: &Path, file_name: &OsStr, category: &str, size: &mut u64) -> Outcome {
        if file_name.is_empty() {
            return Outcome::Skipped("path has no file name".to_string());
        }
        if source.starts_with(&self.organized_root) {
            return Outcome::Skipped("already inside the organized folder".to_string());
        }
        if let Some(pattern) = self.ignore.matching_pattern(&file_name.to_string_lossy()) {
            return Outcome::Skipped(format!("matches ignore pattern {:?}", pattern));
        }

        let _claim = match self.claim(source) {
            Some(claim) => claim,
            None => return Outcome::Skipped("already being organized".to_string()),
        };

        let metadata = match fs::symlink_metadata(source) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Outcome::Failed("file vanished before it could be moved".to_string())
            }
            Err(e) => return Outcome::Failed(format!("cannot read file metadata: {}", e)),
        };
        if !metadata.is_file() {
            return Outcome::Skipped("not a regular file".to_string());
        }
        *size = metadata.len();
        if *size > self.max_file_size {
            return Outcome::Skipped(format!("larger than the {} byte limit", self.max_file_size));
        }

        let hash = match hash_file(source) {
            Ok(h) => h,
            Err(e) => return Outcome::Failed(format!("cannot read file: {}", e)),
        };

        let dest_dir = self.organized_root.join(category);
        if let Err(e) = fs::create_dir_all(&dest_dir) {
            return Outcome::Failed(format!("cannot create {:?}: {}", dest_dir, e));
        }

        // Name choice and move are one step so concurrent movers never share a name
        let _guard = lock(&self.move_lock);
        if !source.exists() {
            return Outcome::Failed("file vanished before it could be moved".to_string());
        }
        let destination = resolve_collision(&dest_dir, file_name);
        match move_file(source, &destination) {
            Ok(()) => Outcome::Moved { destination, hash },
            Err(e) => Outcome::Failed(format!("move to {:?} failed: {}", destination, e)),
        }
    }

    fn claim(&self, path: &Path) -> Option<InFlight<'_>> {
        let mut set = lock(&self.in_flight);
        if !set.insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            path: path.to_path_buf(),
        })
    }

    fn persist(&self, record: &mut FileMoveRecord) {
        let Some(store) = &self.store else { return };
        match store.append(record) {
            Ok(id) => record.id = Some(id),
            Err(e) if record.status == MoveStatus::Success => warn!(
                "Moved {} but the move log could not record it: {}",
                record.source_path, e
            ),
            Err(e) => warn!("Failed to log attempt for {}: {}", record.source_path, e),
        }
    }

    /// Whether a file would be considered by a one-shot pass
    fn is_eligible(&self, path: &Path, size: u64) -> bool {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy(),
            None => return false,
        };
        !self.ignore.is_ignored(&name) && size <= self.max_file_size
    }

    /// Organize every eligible file already present in the watched folders,
    /// or in `folder` when it is a watched folder or inside one
    pub fn organize_existing(&self, folder: Option<&Path>) -> Result<OrganizeSummary> {
        let roots = match folder {
            Some(f) => {
                let f = fs::canonicalize(f)
                    .map_err(|e| TidyError::InvalidRequest(format!("{}: {}", f.display(), e)))?;
                if !self.is_watched(&f) {
                    return Err(TidyError::InvalidRequest(format!(
                        "{} is not inside a watched folder",
                        f.display()
                    )));
                }
                vec![f]
            }
            None => self.watched.clone(),
        };

        let mut candidates = Vec::new();
        for root in &roots {
            if !root.is_dir() {
                warn!("Folder not found: {:?}", root);
                continue;
            }
            info!("Scanning existing files in: {:?}", root);

            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !e.path().starts_with(&self.organized_root));
            for entry in walker {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if self.is_eligible(entry.path(), size) {
                    candidates.push(entry.into_path());
                }
            }
        }

        let mut summary = OrganizeSummary {
            scanned: candidates.len(),
            ..OrganizeSummary::default()
        };
        for path in candidates {
            let record = self.organize(&path);
            summary.tally(record.status);
        }

        if let Some(store) = &self.store {
            let now = serde_json::Value::String(Utc::now().to_rfc3339());
            if let Err(e) = store.set_setting(LAST_ORGANIZE_RUN, &now) {
                warn!("Could not store {}: {}", LAST_ORGANIZE_RUN, e);
            }
        }

        info!(
            "Organize pass done: {} scanned, {} moved, {} failed, {} skipped",
            summary.scanned, summary.moved, summary.failed, summary.skipped
        );
        Ok(summary)
    }
}

/// Absolute form of `path` without following a symlink in the final component
fn absolute(path: &Path) -> PathBuf {
    let (parent, name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => (parent, name),
        _ => return fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
    };
    let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
    match fs::canonicalize(parent) {
        Ok(p) => p.join(name),
        Err(_) => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// First free name in `dir`: `name.ext`, then `name (1).ext`, `name (2).ext`, ...
///
/// Names are built from the raw `OsStr`, so non-UTF-8 names keep their bytes.
pub fn resolve_collision(dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if !entry_exists(&candidate) {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path.file_stem().unwrap_or(file_name);
    let ext = as_path.extension();
    let numbered = |suffix: &str| {
        let mut name = OsString::from(stem);
        name.push(format!(" ({})", suffix));
        if let Some(ext) = ext {
            name.push(".");
            name.push(ext);
        }
        dir.join(name)
    };

    for n in 1..=MAX_NAME_SUFFIX {
        let candidate = numbered(&n.to_string());
        if !entry_exists(&candidate) {
            return candidate;
        }
    }

    numbered(&Local::now().format("%Y%m%d_%H%M%S").to_string())
}

/// Rename, or copy then delete across filesystems; the source survives any failure
fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if entry_exists(destination) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "destination already exists",
        ));
    }
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => copy_then_remove(source, destination),
        Err(e) => Err(e),
    }
}

fn copy_then_remove(source: &Path, destination: &Path) -> io::Result<()> {
    if let Err(e) = fs::copy(source, destination) {
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(source) {
        // Keep exactly one copy: the original
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(CROSS_DEVICE_CODE)
}

/// blake3 of the file contents, streamed
fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}
