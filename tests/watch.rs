// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Watch loop driven by the polling backend

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use tidyup::config::{AppConfig, CategoryRule, WatchBackend};
use tidyup::db::{LogQuery, LogStore, MoveStatus};
use tidyup::organizer::Organizer;
use tidyup::service::WatchService;
use tidyup::watcher::{ActiveBackend, FileWatcher};

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_settled_file_is_organized() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let watch_dir = root.join("watch");
    let organized = root.join("organized");

    let config = AppConfig {
        watched_folders: vec![watch_dir.display().to_string()],
        organized_folder: organized.display().to_string(),
        categories: vec![CategoryRule::new("Images", &[".jpg", ".png"])],
        delay_seconds: 0.3,
        ..AppConfig::default()
    };

    let mut watcher = FileWatcher::new(WatchBackend::Poll, Duration::from_millis(100)).unwrap();
    watcher.watch(&watch_dir).unwrap();
    assert_eq!(watcher.backend(), ActiveBackend::Poll);

    let store = LogStore::in_memory().unwrap();
    let organizer = Arc::new(Organizer::new(&config, Some(store.clone())).unwrap());
    let service = WatchService::new(organizer, config.settle_delay());
    let handle = service.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(service.run(watcher, shutdown_rx));

    assert!(wait_until(|| handle.status().is_running).await);
    let status = handle.status();
    assert_eq!(status.watched_count, 1);
    assert_eq!(status.backend, Some(ActiveBackend::Poll));

    let source = watch_dir.join("a.jpg");
    fs::write(&source, b"picture").unwrap();
    fs::write(watch_dir.join("half.crdownload"), b"partial").unwrap();

    let target = organized.join("Images").join("a.jpg");
    assert!(wait_until(|| target.is_file()).await, "file was never organized");
    assert!(!source.exists());
    assert!(watch_dir.join("half.crdownload").exists());

    let logs = store.query(&LogQuery::default()).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].category, "Images");
    assert_eq!(logs[0].status, MoveStatus::Success);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(!handle.status().is_running);
    assert_eq!(handle.status().pending_files, 0);
}

#[tokio::test]
async fn test_file_still_being_written_waits_for_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let watch_dir = root.join("watch");
    let organized = root.join("organized");

    let config = AppConfig {
        watched_folders: vec![watch_dir.display().to_string()],
        organized_folder: organized.display().to_string(),
        categories: vec![CategoryRule::new("Videos", &[".mp4"])],
        delay_seconds: 1.0,
        ..AppConfig::default()
    };

    let mut watcher = FileWatcher::new(WatchBackend::Poll, Duration::from_millis(100)).unwrap();
    watcher.watch(&watch_dir).unwrap();
    let organizer = Arc::new(Organizer::new(&config, None).unwrap());
    let service = WatchService::new(organizer, config.settle_delay());
    let handle = service.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(service.run(watcher, shutdown_rx));
    assert!(wait_until(|| handle.status().is_running).await);

    let source = watch_dir.join("clip.mp4");
    let target = organized.join("Videos").join("clip.mp4");
    let mut file = fs::File::create(&source).unwrap();
    for chunk in 0..10u8 {
        file.write_all(&[chunk; 64]).unwrap();
        file.flush().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(source.exists(), "moved while still being written");
        assert!(!target.exists());
    }
    drop(file);

    assert!(wait_until(|| target.is_file()).await, "file was never organized");
    assert_eq!(fs::read(&target).unwrap().len(), 640);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_watch_loop_stops_when_shutdown_already_requested() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let config = AppConfig {
        watched_folders: vec![root.join("w").display().to_string()],
        organized_folder: root.join("o").display().to_string(),
        ..AppConfig::default()
    };

    let mut watcher = FileWatcher::new(WatchBackend::Poll, Duration::from_secs(1)).unwrap();
    watcher.watch(Path::new(&config.watched_folders[0])).unwrap();
    let organizer = Arc::new(Organizer::new(&config, None).unwrap());
    let service = WatchService::new(organizer, config.settle_delay());
    let handle = service.handle();

    let (_tx, rx) = watch::channel(true);
    tokio::time::timeout(Duration::from_secs(5), service.run(watcher, rx))
        .await
        .unwrap();
    assert!(!handle.status().is_running);
}
