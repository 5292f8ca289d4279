// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Watch loop: debounces filesystem events per path and hands settled
//! files to the organizer

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::organizer::Organizer;
use crate::watcher::{ActiveBackend, FileWatcher, WatchEvent};

/// Settings key holding the time the watch loop last started
pub const LAST_WATCH_START: &str = "last_watch_start";

/// Snapshot of the watch loop for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct WatchStatus {
    pub is_running: bool,
    pub watched_folders: Vec<String>,
    pub watched_count: usize,
    pub backend: Option<ActiveBackend>,
    pub pending_files: usize,
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    folders: Mutex<Vec<PathBuf>>,
    backend: Mutex<Option<ActiveBackend>>,
    pending: Mutex<HashMap<PathBuf, Timer>>,
    next_timer: AtomicU64,
}

struct Timer {
    id: u64,
    task: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable view of a watch loop, usable after it has been moved into a task
#[derive(Clone, Default)]
pub struct WatchHandle {
    shared: Arc<Shared>,
}

impl WatchHandle {
    pub fn status(&self) -> WatchStatus {
        let folders: Vec<String> = lock(&self.shared.folders)
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        WatchStatus {
            is_running: self.shared.running.load(Ordering::SeqCst),
            watched_count: folders.len(),
            watched_folders: folders,
            backend: *lock(&self.shared.backend),
            pending_files: lock(&self.shared.pending).len(),
        }
    }
}

/// Per-path settle timers in front of the organizer
pub struct WatchService {
    organizer: Arc<Organizer>,
    settle: Duration,
    handle: WatchHandle,
}

impl WatchService {
    pub fn new(organizer: Arc<Organizer>, settle: Duration) -> Self {
        Self {
            organizer,
            settle,
            handle: WatchHandle::default(),
        }
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    /// Consume events until `shutdown` flips to true or the watcher goes away
    pub async fn run(self, mut watcher: FileWatcher, mut shutdown: watch::Receiver<bool>) {
        let shared = &self.handle.shared;
        *lock(&shared.folders) = watcher.watched_paths().to_vec();
        *lock(&shared.backend) = Some(watcher.backend());
        shared.running.store(true, Ordering::SeqCst);

        if let Some(store) = self.organizer.store() {
            let now = serde_json::Value::String(Utc::now().to_rfc3339());
            if let Err(e) = store.set_setting(LAST_WATCH_START, &now) {
                warn!("Could not store {}: {}", LAST_WATCH_START, e);
            }
        }
        info!("Watching {} folder(s), settle delay {:?}", watcher.watched_paths().len(), self.settle);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = watcher.next_event() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        error!("Watcher channel closed");
                        break;
                    }
                },
            }
        }

        for (_, timer) in lock(&shared.pending).drain() {
            timer.task.abort();
        }
        shared.running.store(false, Ordering::SeqCst);
        info!("Watch loop stopped");
    }

    fn dispatch(&self, event: WatchEvent) {
        match event {
            WatchEvent::Created(path) | WatchEvent::MovedIn(path) => self.schedule(path),
            WatchEvent::Modified(path) => {
                // Writes only extend a timer that is already running
                if lock(&self.handle.shared.pending).contains_key(&path) {
                    self.schedule(path);
                }
            }
            WatchEvent::Error(e) => warn!("Watch error: {}", e),
        }
    }

    /// Start (or restart) the settle timer for `path`
    fn schedule(&self, path: PathBuf) {
        let shared = Arc::clone(&self.handle.shared);
        let organizer = Arc::clone(&self.organizer);
        let settle = self.settle;
        let key = path.clone();
        let id = shared.next_timer.fetch_add(1, Ordering::Relaxed);

        let mut pending = lock(&self.handle.shared.pending);
        if let Some(previous) = pending.remove(&path) {
            previous.task.abort();
            debug!("Restarting settle timer for {:?}", path);
        }

        let task = tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            {
                // A newer timer owns this path now
                let mut pending = lock(&shared.pending);
                match pending.get(&key) {
                    Some(timer) if timer.id == id => {
                        pending.remove(&key);
                    }
                    _ => return,
                }
            }

            let target = key.clone();
            match tokio::task::spawn_blocking(move || organizer.organize(&target)).await {
                Ok(record) => debug!("{:?} finished as {}", key, record.status),
                Err(e) => error!("Organize task for {:?} panicked: {}", key, e),
            }
        });
        pending.insert(path, Timer { id, task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn service(settle: Duration) -> (tempfile::TempDir, WatchService) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            watched_folders: vec![dir.path().join("w").display().to_string()],
            organized_folder: dir.path().join("o").display().to_string(),
            ..AppConfig::default()
        };
        let organizer = Arc::new(Organizer::new(&config, None).unwrap());
        (dir, WatchService::new(organizer, settle))
    }

    fn timer_id(service: &WatchService, path: &PathBuf) -> Option<u64> {
        lock(&service.handle.shared.pending).get(path).map(|t| t.id)
    }

    #[tokio::test]
    async fn test_modified_without_pending_timer_is_ignored() {
        let (dir, service) = service(Duration::from_secs(60));
        let path = dir.path().join("w/a.jpg");

        service.dispatch(WatchEvent::Modified(path.clone()));
        assert_eq!(service.handle().status().pending_files, 0);
        assert_eq!(timer_id(&service, &path), None);
    }

    #[tokio::test]
    async fn test_modified_restarts_a_pending_timer() {
        let (dir, service) = service(Duration::from_secs(60));
        let path = dir.path().join("w/a.jpg");

        service.dispatch(WatchEvent::Created(path.clone()));
        let first = timer_id(&service, &path).unwrap();

        service.dispatch(WatchEvent::Modified(path.clone()));
        let second = timer_id(&service, &path).unwrap();
        assert_ne!(first, second);
        assert_eq!(service.handle().status().pending_files, 1);

        service.dispatch(WatchEvent::MovedIn(dir.path().join("w/b.png")));
        assert_eq!(service.handle().status().pending_files, 2);
    }

    #[tokio::test]
    async fn test_settled_timer_leaves_pending_set() {
        let (dir, service) = service(Duration::from_millis(20));
        let path = dir.path().join("w/missing.jpg");

        service.dispatch(WatchEvent::Created(path.clone()));
        for _ in 0..100 {
            if service.handle().status().pending_files == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(service.handle().status().pending_files, 0);
    }
}
