// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File system watcher for monitoring directories

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::WatchBackend;
use crate::Result;

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A new file was created
    Created(PathBuf),
    /// A file was renamed or moved into a watched folder
    MovedIn(PathBuf),
    /// A file's contents changed
    Modified(PathBuf),
    /// Watcher error
    Error(String),
}

/// Backend actually in use after any fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveBackend {
    Native,
    Poll,
}

/// File system watcher delivering events over a channel
pub struct FileWatcher {
    watcher: Box<dyn Watcher + Send>,
    backend: ActiveBackend,
    requested: WatchBackend,
    poll_interval: Duration,
    watched_paths: Vec<PathBuf>,
    event_tx: UnboundedSender<WatchEvent>,
    event_rx: UnboundedReceiver<WatchEvent>,
}

impl FileWatcher {
    /// Create a new file watcher
    pub fn new(requested: WatchBackend, poll_interval: Duration) -> Result<Self> {
        let (tx, rx) = unbounded_channel();

        let (watcher, backend) = match requested {
            WatchBackend::Poll => (Self::poll_watcher(tx.clone(), poll_interval)?, ActiveBackend::Poll),
            WatchBackend::Native => (Self::native_watcher(tx.clone())?, ActiveBackend::Native),
            WatchBackend::Auto => match Self::native_watcher(tx.clone()) {
                Ok(w) => (w, ActiveBackend::Native),
                Err(e) => {
                    warn!("Native file watching unavailable ({}), falling back to polling", e);
                    (Self::poll_watcher(tx.clone(), poll_interval)?, ActiveBackend::Poll)
                }
            },
        };

        Ok(Self {
            watcher,
            backend,
            requested,
            poll_interval,
            watched_paths: Vec::new(),
            event_tx: tx,
            event_rx: rx,
        })
    }

    fn native_watcher(tx: UnboundedSender<WatchEvent>) -> Result<Box<dyn Watcher + Send>> {
        Ok(Box::new(RecommendedWatcher::new(forward_to(tx), Config::default())?))
    }

    fn poll_watcher(tx: UnboundedSender<WatchEvent>, interval: Duration) -> Result<Box<dyn Watcher + Send>> {
        let config = Config::default().with_poll_interval(interval);
        Ok(Box::new(PollWatcher::new(forward_to(tx), config)?))
    }

    /// Add a directory to watch (recursively)
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        // Create directory if it doesn't exist
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            info!("Created watch directory: {:?}", path);
        }

        if let Err(e) = self.watcher.watch(path, RecursiveMode::Recursive) {
            if self.requested != WatchBackend::Auto || self.backend == ActiveBackend::Poll {
                return Err(e.into());
            }
            warn!("Native watch of {:?} failed ({}), switching to polling", path, e);
            self.switch_to_polling()?;
            self.watcher.watch(path, RecursiveMode::Recursive)?;
        }

        self.watched_paths.push(path.to_path_buf());
        info!("Watching: {:?} ({:?})", path, self.backend);
        Ok(())
    }

    fn switch_to_polling(&mut self) -> Result<()> {
        let mut poller = Self::poll_watcher(self.event_tx.clone(), self.poll_interval)?;
        for path in &self.watched_paths {
            poller.watch(path, RecursiveMode::Recursive)?;
        }
        self.watcher = poller;
        self.backend = ActiveBackend::Poll;
        Ok(())
    }

    /// Stop watching a directory
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        self.watcher.unwatch(path)?;
        self.watched_paths.retain(|p| p != path);
        info!("Stopped watching: {:?}", path);
        Ok(())
    }

    /// Wait for the next event; `None` once the backend has gone away
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Get currently watched paths
    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched_paths
    }

    pub fn backend(&self) -> ActiveBackend {
        self.backend
    }
}

/// Event handler run on notify's thread, forwarding into the channel
fn forward_to(tx: UnboundedSender<WatchEvent>) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => convert_event(event),
            Err(e) => Some(WatchEvent::Error(e.to_string())),
        };
        if let Some(event) = event {
            // Receiver gone means the watch loop has shut down
            let _ = tx.send(event);
        }
    }
}

/// Convert notify event to our event type
fn convert_event(event: Event) -> Option<WatchEvent> {
    debug!("notify event: {:?}", event);
    match event.kind {
        EventKind::Create(CreateKind::Folder) => None,
        EventKind::Create(_) => event.paths.into_iter().next().map(WatchEvent::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().next().map(WatchEvent::MovedIn)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().nth(1).map(WatchEvent::MovedIn)
        }
        // Backends that cannot tell the two ends of a rename apart
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .into_iter()
            .find(|p| p.is_file())
            .map(WatchEvent::MovedIn),
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => event.paths.into_iter().next().map(WatchEvent::Modified),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::DataChange;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_create_file_is_reported() {
        let ev = event(EventKind::Create(CreateKind::File), &["/w/a.jpg"]);
        assert_eq!(convert_event(ev), Some(WatchEvent::Created(PathBuf::from("/w/a.jpg"))));
    }

    #[test]
    fn test_create_folder_is_ignored() {
        let ev = event(EventKind::Create(CreateKind::Folder), &["/w/sub"]);
        assert_eq!(convert_event(ev), None);
    }

    #[test]
    fn test_rename_reports_destination() {
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/a.crdownload", "/w/a.zip"],
        );
        assert_eq!(convert_event(both), Some(WatchEvent::MovedIn(PathBuf::from("/w/a.zip"))));

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/b.zip"]);
        assert_eq!(convert_event(to), Some(WatchEvent::MovedIn(PathBuf::from("/w/b.zip"))));

        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/b.zip"]);
        assert_eq!(convert_event(from), None);
    }

    #[test]
    fn test_data_change_is_modification() {
        let ev = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/w/a.txt"]);
        assert_eq!(convert_event(ev), Some(WatchEvent::Modified(PathBuf::from("/w/a.txt"))));
    }

    #[test]
    fn test_removal_is_ignored() {
        let ev = event(EventKind::Remove(notify::event::RemoveKind::File), &["/w/a.txt"]);
        assert_eq!(convert_event(ev), None);
    }

    #[tokio::test]
    async fn test_poll_watcher_sees_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FileWatcher::new(WatchBackend::Poll, Duration::from_millis(100)).unwrap();
        watcher.watch(dir.path()).unwrap();
        assert_eq!(watcher.backend(), ActiveBackend::Poll);

        std::fs::write(dir.path().join("new.txt"), b"hello").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(ev) = watcher.next_event().await {
                if let WatchEvent::Created(p) = ev {
                    if p.ends_with("new.txt") {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(seen);
    }

    #[test]
    fn test_watch_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("later");
        let mut watcher = FileWatcher::new(WatchBackend::Poll, Duration::from_secs(1)).unwrap();
        watcher.watch(&target).unwrap();
        assert!(target.is_dir());
        assert_eq!(watcher.watched_paths(), &[target.clone()]);
        watcher.unwatch(&target).unwrap();
        assert!(watcher.watched_paths().is_empty());
    }
}
