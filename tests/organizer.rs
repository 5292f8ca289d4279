// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end organizer behaviour against real folders

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::thread;

use tidyup::config::{AppConfig, CategoryRule};
use tidyup::db::{LogQuery, LogStore, MoveStatus};
use tidyup::organizer::{Organizer, LAST_ORGANIZE_RUN};

struct Fixture {
    _dir: tempfile::TempDir,
    watch: PathBuf,
    organized: PathBuf,
    store: LogStore,
    organizer: Organizer,
}

fn config_for(root: &Path) -> AppConfig {
    AppConfig {
        watched_folders: vec![root.join("watch").display().to_string()],
        organized_folder: root.join("organized").display().to_string(),
        categories: vec![
            CategoryRule::new("Images", &[".jpg", ".png"]),
            CategoryRule::new("PDFs", &[".pdf"]),
        ],
        max_file_size_mb: 1,
        ..AppConfig::default()
    }
}

fn fixture() -> Fixture {
    fixture_with(config_for)
}

fn fixture_with(make: impl FnOnce(&Path) -> AppConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let config = make(&root);
    for folder in config.watched_paths() {
        fs::create_dir_all(folder).unwrap();
    }
    let store = LogStore::open(root.join("log.db")).unwrap();
    let organizer = Organizer::new(&config, Some(store.clone())).unwrap();
    Fixture {
        _dir: dir,
        watch: root.join("watch"),
        organized: root.join("organized"),
        store,
        organizer,
    }
}

#[test]
fn test_image_lands_in_its_category() {
    let fx = fixture();
    let source = fx.watch.join("a.jpg");
    fs::write(&source, b"jpeg bytes").unwrap();

    let record = fx.organizer.organize(&source);

    let expected = fx.organized.join("Images").join("a.jpg");
    assert_eq!(record.status, MoveStatus::Success);
    assert_eq!(record.category, "Images");
    assert_eq!(record.size_bytes, 10);
    assert_eq!(record.source_path, source.display().to_string());
    assert_eq!(record.destination_path.as_deref(), Some(expected.to_str().unwrap()));
    assert_eq!(record.content_hash, Some(blake3::hash(b"jpeg bytes").to_hex().to_string()));
    assert!(record.id.is_some());
    assert!(expected.is_file());
    assert!(!source.exists());

    let logs = fx.store.query(&LogQuery::default()).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].id, record.id);
    assert_eq!(logs[0].category, "Images");
    assert_eq!(logs[0].destination_path, record.destination_path);
    assert_eq!(logs[0].size_bytes, 10);
}

#[test]
fn test_unknown_extension_goes_to_other() {
    let fx = fixture();
    let source = fx.watch.join("notes.xyz");
    fs::write(&source, b"?").unwrap();

    let record = fx.organizer.organize(&source);
    assert_eq!(record.category, "Other");
    assert!(fx.organized.join("Other").join("notes.xyz").is_file());
}

#[test]
fn test_same_name_is_never_overwritten() {
    let fx = fixture();
    let first = fx.watch.join("report.pdf");
    fs::write(&first, b"first").unwrap();
    fx.organizer.organize(&first);

    let nested = fx.watch.join("inbox");
    fs::create_dir_all(&nested).unwrap();
    let second = nested.join("report.pdf");
    fs::write(&second, b"second").unwrap();
    let record = fx.organizer.organize(&second);

    let pdfs = fx.organized.join("PDFs");
    assert_eq!(record.status, MoveStatus::Success);
    assert_eq!(fs::read(pdfs.join("report.pdf")).unwrap(), b"first");
    assert_eq!(fs::read(pdfs.join("report (1).pdf")).unwrap(), b"second");
    assert_eq!(
        record.destination_path.as_deref(),
        Some(pdfs.join("report (1).pdf").to_str().unwrap())
    );
}

#[test]
fn test_vanished_file_is_a_failure_without_orphan() {
    let fx = fixture();
    let source = fx.watch.join("gone.pdf");
    fs::write(&source, b"soon gone").unwrap();
    fs::remove_file(&source).unwrap();

    let record = fx.organizer.organize(&source);

    assert_eq!(record.status, MoveStatus::Failed);
    assert!(record.destination_path.is_none());
    assert!(record.message.is_some());
    assert!(!fx.organized.join("PDFs").join("gone.pdf").exists());

    let failed = fx
        .store
        .query(&LogQuery {
            status: Some(MoveStatus::Failed),
            ..LogQuery::default()
        })
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source_path, source.display().to_string());
}

#[test]
fn test_ignored_and_oversize_files_are_skipped_and_not_logged() {
    let fx = fixture();
    let partial = fx.watch.join("movie.mp4.crdownload");
    let big = fx.watch.join("big.png");
    fs::write(&partial, b"partial").unwrap();
    fs::write(&big, vec![0u8; 1024 * 1024 + 1]).unwrap();

    let ignored = fx.organizer.organize(&partial);
    let oversize = fx.organizer.organize(&big);

    assert_eq!(ignored.status, MoveStatus::Skipped);
    assert_eq!(oversize.status, MoveStatus::Skipped);
    assert!(partial.exists());
    assert!(big.exists());
    assert_eq!(fx.store.count().unwrap(), 0);
}

#[test]
fn test_organize_existing_moves_eligible_files() {
    let fx = fixture();
    fs::create_dir_all(fx.watch.join("deep/er")).unwrap();
    fs::write(fx.watch.join("a.jpg"), b"a").unwrap();
    fs::write(fx.watch.join("deep/b.pdf"), b"b").unwrap();
    fs::write(fx.watch.join("deep/er/c.txt"), b"c").unwrap();
    fs::write(fx.watch.join("d.tmp"), b"d").unwrap();

    let summary = fx.organizer.organize_existing(None).unwrap();

    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.moved, 3);
    assert_eq!(summary.failed, 0);
    assert!(fx.organized.join("Images/a.jpg").is_file());
    assert!(fx.organized.join("PDFs/b.pdf").is_file());
    assert!(fx.organized.join("Other/c.txt").is_file());
    assert!(fx.watch.join("d.tmp").is_file());
    assert_eq!(fx.store.count().unwrap(), 3);
    assert!(fx.store.get_setting(LAST_ORGANIZE_RUN).unwrap().is_some());
}

#[test]
fn test_pass_with_nothing_eligible_leaves_log_unchanged() {
    let fx = fixture();
    fs::write(fx.watch.join("download.part"), b"x").unwrap();
    fs::write(fx.watch.join(".DS_Store"), b"x").unwrap();

    let summary = fx.organizer.organize_existing(None).unwrap();

    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.moved, 0);
    assert_eq!(fx.store.count().unwrap(), 0);
}

#[test]
fn test_pass_on_subfolder_and_outside_folder() {
    let fx = fixture();
    let sub = fx.watch.join("sub");
    fs::create_dir_all(&sub).unwrap();
    fs::write(sub.join("in.png"), b"1").unwrap();
    fs::write(fx.watch.join("out.png"), b"2").unwrap();

    let summary = fx.organizer.organize_existing(Some(&sub)).unwrap();
    assert_eq!(summary.moved, 1);
    assert!(fx.watch.join("out.png").exists());

    let elsewhere = tempfile::tempdir().unwrap();
    assert!(fx.organizer.organize_existing(Some(elsewhere.path())).is_err());
}

#[test]
fn test_organized_folder_inside_watch_is_not_reprocessed() {
    let fx = fixture_with(|root| AppConfig {
        watched_folders: vec![root.join("watch").display().to_string()],
        organized_folder: root.join("watch/organized").display().to_string(),
        ..config_for(root)
    });
    let organized = fx.watch.join("organized");
    fs::write(fx.watch.join("a.jpg"), b"a").unwrap();

    let first = fx.organizer.organize_existing(None).unwrap();
    assert_eq!(first.moved, 1);

    let second = fx.organizer.organize_existing(None).unwrap();
    assert_eq!(second.scanned, 0);

    let moved = organized.join("Images/a.jpg");
    let record = fx.organizer.organize(&moved);
    assert_eq!(record.status, MoveStatus::Skipped);
    assert!(moved.is_file());
    assert_eq!(fx.store.count().unwrap(), 1);
}

#[test]
fn test_subscribers_see_every_record() {
    let fx = fixture();
    let mut events = fx.organizer.subscribe();
    let source = fx.watch.join("b.png");
    fs::write(&source, b"b").unwrap();

    fx.organizer.organize(&source);
    fx.organizer.organize(&fx.watch.join("x.tmp"));

    let first = events.try_recv().unwrap();
    assert_eq!(first.status, MoveStatus::Success);
    let second = events.try_recv().unwrap();
    assert_eq!(second.status, MoveStatus::Skipped);
}

#[test]
fn test_tags_are_recorded() {
    let fx = fixture();
    let source = fx.watch.join("Invoice_2024.pdf");
    fs::write(&source, b"$").unwrap();

    let record = fx.organizer.organize(&source);
    assert_eq!(record.tags, ["dated", "finance", "type_pdf"]);
    assert!(fx.organized.join("PDFs/Invoice_2024.pdf").is_file());

    let tagged = fx
        .store
        .query(&LogQuery {
            tag: Some("finance".to_string()),
            ..LogQuery::default()
        })
        .unwrap();
    assert_eq!(tagged.len(), 1);
}

#[test]
fn test_works_without_a_store() {
    let dir = tempfile::tempdir().unwrap();
    let root = fs::canonicalize(dir.path()).unwrap();
    let config = config_for(&root);
    fs::create_dir_all(root.join("watch")).unwrap();
    let organizer = Organizer::new(&config, None).unwrap();

    let source = root.join("watch/x.png");
    fs::write(&source, b"x").unwrap();
    let record = organizer.organize(&source);
    assert_eq!(record.status, MoveStatus::Success);
    assert!(record.id.is_none());
}

#[test]
fn test_concurrent_organize_of_one_path_moves_it_once() {
    let fx = fixture();
    let source = fx.watch.join("race.pdf");
    fs::write(&source, b"only copy").unwrap();

    let callers = 8;
    let barrier = Barrier::new(callers);
    let records: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let (barrier, organizer, source) = (&barrier, &fx.organizer, &source);
                scope.spawn(move || {
                    barrier.wait();
                    organizer.organize(source)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let moved = records.iter().filter(|r| r.status == MoveStatus::Success).count();
    assert_eq!(moved, 1);
    for record in records.iter().filter(|r| r.status != MoveStatus::Success) {
        assert!(record.destination_path.is_none());
        assert!(record.message.is_some());
    }

    let pdfs: Vec<_> = fs::read_dir(fx.organized.join("PDFs")).unwrap().collect();
    assert_eq!(pdfs.len(), 1);
    assert_eq!(fs::read(fx.organized.join("PDFs/race.pdf")).unwrap(), b"only copy");
    assert!(!source.exists());
}

#[test]
fn test_concurrent_same_name_moves_get_distinct_names() {
    let fx = fixture();
    let sources: Vec<_> = ["left", "right"]
        .iter()
        .map(|folder| {
            let dir = fx.watch.join(folder);
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join("x.pdf");
            fs::write(&path, folder.as_bytes()).unwrap();
            path
        })
        .collect();

    let barrier = Barrier::new(sources.len());
    let records: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                let barrier = &barrier;
                let organizer = &fx.organizer;
                scope.spawn(move || {
                    barrier.wait();
                    organizer.organize(source)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(records.iter().all(|r| r.status == MoveStatus::Success));

    let pdfs = fx.organized.join("PDFs");
    let mut contents = vec![
        fs::read(pdfs.join("x.pdf")).unwrap(),
        fs::read(pdfs.join("x (1).pdf")).unwrap(),
    ];
    contents.sort();
    assert_eq!(contents, [b"left".to_vec(), b"right".to_vec()]);
    assert_eq!(fs::read_dir(&pdfs).unwrap().count(), 2);
}

#[cfg(unix)]
#[test]
fn test_non_utf8_name_is_kept_byte_for_byte() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let fx = fixture();
    let name = OsStr::from_bytes(b"r\xe9sum\xe9.pdf");
    let source = fx.watch.join(name);
    fs::write(&source, b"cv").unwrap();

    let record = fx.organizer.organize(&source);
    assert_eq!(record.status, MoveStatus::Success);
    assert_eq!(record.category, "PDFs");
    assert_eq!(fs::read(fx.organized.join("PDFs").join(name)).unwrap(), b"cv");
    assert!(!source.exists());
}
