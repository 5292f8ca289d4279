// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Read-only views of the organized folder tree

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::{Result, TidyError};

/// How many of the biggest files the stats view reports
const LARGEST_FILES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub name: String,
    /// Relative to the organized folder, `/`-separated
    pub path: String,
    pub category: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    /// Files anywhere below this folder
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub base_path: String,
    pub folders: Vec<FolderEntry>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FolderUsage {
    pub files: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskUsage {
    pub total_files: usize,
    pub total_bytes: u64,
    pub by_category: BTreeMap<String, FolderUsage>,
    pub largest_files: Vec<FileEntry>,
}

/// Join a user-supplied relative path onto `root`, refusing to leave it
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative.trim_end_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(TidyError::InvalidRequest(format!(
                    "path must stay inside the organized folder: {:?}",
                    relative
                )))
            }
        }
    }
    Ok(resolved)
}

fn relative_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_entry(root: &Path, path: &Path, metadata: &fs::Metadata) -> FileEntry {
    let relative = relative_string(root, path);
    let category = relative.split('/').next().filter(|_| relative.contains('/')).unwrap_or("").to_string();
    FileEntry {
        name: path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        path: relative,
        category,
        size: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        extension: path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default(),
    }
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

/// One level of the organized tree
pub fn list_directory(root: &Path, relative: &str) -> Result<DirectoryListing> {
    let dir = resolve_within(root, relative)?;
    if !dir.is_dir() {
        return Err(TidyError::NotFound(format!("no such folder: {:?}", relative)));
    }

    let mut folders = Vec::new();
    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.is_dir() {
            folders.push(FolderEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: relative_string(root, &path),
                count: count_files(&path),
            });
        } else if metadata.is_file() {
            files.push(file_entry(root, &path, &metadata));
        }
    }
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(DirectoryListing {
        path: relative_string(root, &dir),
        base_path: root.display().to_string(),
        folders,
        files,
    })
}

/// Sizes per category folder plus the largest organized files
pub fn disk_usage(root: &Path) -> DiskUsage {
    let mut usage = DiskUsage::default();
    let mut all = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let file = file_entry(root, entry.path(), &metadata);
        usage.total_files += 1;
        usage.total_bytes += file.size;
        let folder = usage.by_category.entry(file.category.clone()).or_default();
        folder.files += 1;
        folder.size_bytes += file.size;
        all.push(file);
    }

    all.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    all.truncate(LARGEST_FILES);
    usage.largest_files = all;
    usage
}

/// Newest files anywhere under `root`, by modification time
pub fn recent_files(root: &Path, limit: usize) -> Vec<FileEntry> {
    let mut all: Vec<FileEntry> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            Some(file_entry(root, e.path(), &metadata))
        })
        .collect();

    all.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    all.truncate(limit);
    all
}

/// Describe a file the log says was moved to `path`, if it is still there
pub fn existing_file(root: &Path, path: &Path) -> Option<FileEntry> {
    let metadata = fs::metadata(path).ok().filter(|m| m.is_file())?;
    Some(file_entry(root, path, &metadata))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Images/nested")).unwrap();
        fs::create_dir_all(dir.path().join("PDFs")).unwrap();
        fs::write(dir.path().join("Images/a.JPG"), vec![0u8; 30]).unwrap();
        fs::write(dir.path().join("Images/nested/b.png"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("PDFs/c.pdf"), vec![0u8; 20]).unwrap();
        dir
    }

    #[test]
    fn test_resolve_within_rejects_escapes() {
        let root = Path::new("/srv/organized");
        assert_eq!(resolve_within(root, "Images/2024").unwrap(), root.join("Images/2024"));
        assert_eq!(resolve_within(root, "").unwrap(), root);
        assert_eq!(resolve_within(root, "Images/").unwrap(), root.join("Images"));
        assert!(matches!(resolve_within(root, "/Images"), Err(TidyError::InvalidRequest(_))));
        assert!(resolve_within(root, "/").is_err());
        assert!(matches!(resolve_within(root, "../etc"), Err(TidyError::InvalidRequest(_))));
        assert!(resolve_within(root, "Images/../../x").is_err());
    }

    #[test]
    fn test_list_root() {
        let dir = tree();
        let listing = list_directory(dir.path(), "").unwrap();
        assert_eq!(listing.path, "");
        let names: Vec<_> = listing.folders.iter().map(|f| (f.name.as_str(), f.count)).collect();
        assert_eq!(names, [("Images", 2), ("PDFs", 1)]);
        assert!(listing.files.is_empty());
    }

    #[test]
    fn test_list_category() {
        let dir = tree();
        let listing = list_directory(dir.path(), "Images").unwrap();
        assert_eq!(listing.folders[0].path, "Images/nested");
        assert_eq!(listing.files.len(), 1);
        let file = &listing.files[0];
        assert_eq!(file.path, "Images/a.JPG");
        assert_eq!(file.extension, ".jpg");
        assert_eq!(file.category, "Images");
        assert_eq!(file.size, 30);
    }

    #[test]
    fn test_list_missing_folder() {
        let dir = tree();
        assert!(matches!(list_directory(dir.path(), "Music"), Err(TidyError::NotFound(_))));
    }

    #[test]
    fn test_disk_usage() {
        let dir = tree();
        let usage = disk_usage(dir.path());
        assert_eq!(usage.total_files, 3);
        assert_eq!(usage.total_bytes, 60);
        assert_eq!(usage.by_category["Images"], FolderUsage { files: 2, size_bytes: 40 });
        assert_eq!(usage.largest_files[0].name, "a.JPG");
        assert_eq!(usage.largest_files.len(), 3);
    }

    #[test]
    fn test_recent_files_newest_first() {
        let dir = tree();
        let newest = dir.path().join("PDFs/c.pdf");
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        fs::File::options().write(true).open(&newest).unwrap().set_modified(later).unwrap();

        let recent = recent_files(dir.path(), 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "PDFs/c.pdf");
        assert!(recent[0].modified >= recent[1].modified);
    }

    #[test]
    fn test_existing_file() {
        let dir = tree();
        let found = existing_file(dir.path(), &dir.path().join("PDFs/c.pdf")).unwrap();
        assert_eq!(found.category, "PDFs");
        assert!(existing_file(dir.path(), &dir.path().join("PDFs/gone.pdf")).is_none());
        assert!(existing_file(dir.path(), &dir.path().join("PDFs")).is_none());
    }
}
