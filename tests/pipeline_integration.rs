use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use git2::Repository;
use tempfile::tempdir;

use relic::config::{MappingRule, MigrationConfig};
use relic::engine::ExecutionEngine;
use relic::error::RelicError;
use relic::export::CommitExporter;
use relic::git::GitWriter;
use relic::model::{Changeset, RevisionAction, RevisionRecord};
use relic::pipeline::{self, RunStats};
use relic::source::snapshot::{SnapshotItem, SnapshotSource};
use relic::source::{ItemEvent, SourceItem, SourceRepository};

fn when(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn event(action: RevisionAction, secs: i64, author: &str, comment: &str, version: u32) -> ItemEvent {
    ItemEvent {
        action,
        timestamp: when(secs),
        author: author.into(),
        comment: comment.into(),
        version,
    }
}

fn folder(id: &str, path: &str) -> SnapshotItem {
    SnapshotItem {
        id: id.into(),
        path: path.into(),
        folder: true,
        history: vec![],
        contents: HashMap::new(),
    }
}

fn file(id: &str, path: &str, history: Vec<ItemEvent>, contents: &[(u32, &str)]) -> SnapshotItem {
    SnapshotItem {
        id: id.into(),
        path: path.into(),
        folder: false,
        history,
        contents: contents
            .iter()
            .map(|(v, text)| (*v, text.to_string()))
            .collect(),
    }
}

fn config_for(output: &Path) -> MigrationConfig {
    MigrationConfig {
        source: "unused.json".into(),
        project: "$/proj".into(),
        output: output.to_path_buf(),
        ..Default::default()
    }
}

/// Commits from oldest to newest: (message, author name, email, seconds).
fn commit_log(path: &Path) -> Vec<(String, String, String, i64)> {
    let repo = Repository::open(path).unwrap();
    let mut commits = Vec::new();
    let mut cursor = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok());
    while let Some(commit) = cursor {
        commits.push((
            commit.message().unwrap_or("").to_string(),
            commit.author().name().unwrap_or("").to_string(),
            commit.author().email().unwrap_or("").to_string(),
            commit.time().seconds(),
        ));
        cursor = commit.parent(0).ok();
    }
    commits.reverse();
    commits
}

fn tree_paths(path: &Path) -> Vec<String> {
    let repo = Repository::open(path).unwrap();
    let tree = repo
        .head()
        .unwrap()
        .peel_to_commit()
        .unwrap()
        .tree()
        .unwrap();
    let mut paths = Vec::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            paths.push(format!("{root}{}", entry.name().unwrap()));
        }
        git2::TreeWalkResult::Ok
    })
    .unwrap();
    paths.sort();
    paths
}

fn two_author_source() -> Vec<SnapshotItem> {
    vec![
        folder("P1", "$/proj"),
        folder("P2", "$/proj/src"),
        file(
            "F1",
            "$/proj/src/main.c",
            vec![
                event(RevisionAction::Add, 0, "alice", "initial import", 1),
                event(RevisionAction::Edit, 1000, "alice", "fix parser", 2),
            ],
            &[(1, "int main() {}"), (2, "int main() { return 0; }")],
        ),
        file(
            "F2",
            "$/proj/README",
            vec![event(RevisionAction::Add, 10, "bob", "docs", 1)],
            &[(1, "read me")],
        ),
    ]
}

#[test]
fn full_migration_produces_expected_commits() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();
    let source = Arc::new(SnapshotSource::from_items(two_author_source()));
    let handle = pipeline::start(&engine, config_for(dir.path()), source).unwrap();
    engine.wait_idle();
    assert!(engine.take_errors().is_empty());

    let log = commit_log(dir.path());
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].0, "initial import");
    assert_eq!(log[0].1, "alice");
    assert_eq!(log[0].2, "alice@localhost");
    assert_eq!(log[1].0, "docs");
    assert_eq!(log[1].1, "bob");
    assert_eq!(log[2].0, "fix parser");
    // Commit timestamps never decrease along the chain.
    assert!(log.windows(2).all(|w| w[0].3 <= w[1].3));

    assert_eq!(tree_paths(dir.path()), vec!["README", "src/main.c"]);

    let stats = handle.stats();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.revisions, 3);
    assert_eq!(stats.changesets, 3);
    assert_eq!(stats.commits, 3);
}

#[test]
fn rerun_with_identical_inputs_is_idempotent() {
    let run = |path: &Path| {
        let engine = ExecutionEngine::new();
        let source = Arc::new(SnapshotSource::from_items(two_author_source()));
        let mut config = config_for(path);
        config.email_domain = Some("example.com".into());
        pipeline::start(&engine, config, source).unwrap();
        engine.wait_idle();
        assert!(engine.take_errors().is_empty());
        (commit_log(path), tree_paths(path))
    };

    let first_dir = tempdir().unwrap();
    let second_dir = tempdir().unwrap();
    assert_eq!(run(first_dir.path()), run(second_dir.path()));
}

#[test]
fn excluded_items_never_reach_the_target() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();
    let mut items = two_author_source();
    items.push(file(
        "F3",
        "$/proj/scratch.tmp",
        vec![event(RevisionAction::Add, 5, "alice", "scratch", 1)],
        &[(1, "junk")],
    ));
    let mut config = config_for(dir.path());
    config.exclude = vec!["*.tmp".into()];
    let handle = pipeline::start(&engine, config, Arc::new(SnapshotSource::from_items(items))).unwrap();
    engine.wait_idle();
    assert!(engine.take_errors().is_empty());

    assert_eq!(handle.stats().revisions, 3, "tmp file contributed nothing");
    assert!(!tree_paths(dir.path()).iter().any(|p| p.ends_with(".tmp")));
}

#[test]
fn path_mapping_rewrites_the_exported_tree() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();
    let mut config = config_for(dir.path());
    config.path_mapping = Some(MappingRule {
        pattern: "^src/".into(),
        replacement: "lib/".into(),
    });
    let source = Arc::new(SnapshotSource::from_items(two_author_source()));
    pipeline::start(&engine, config, source).unwrap();
    engine.wait_idle();
    assert!(engine.take_errors().is_empty());
    assert_eq!(tree_paths(dir.path()), vec!["README", "lib/main.c"]);
}

#[test]
fn labels_become_tags_on_their_changeset_commit() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();
    let mut items = two_author_source();
    items[0].history = vec![event(
        RevisionAction::Label {
            name: "release 1.0".into(),
        },
        2000,
        "alice",
        "",
        1,
    )];
    let mut config = config_for(dir.path());
    config.annotate_tags = true;
    config.default_comment = Some("no comment recorded".into());
    pipeline::start(&engine, config, Arc::new(SnapshotSource::from_items(items))).unwrap();
    engine.wait_idle();
    assert!(engine.take_errors().is_empty());

    let repo = Repository::open(dir.path()).unwrap();
    let reference = repo.find_reference("refs/tags/release_1.0").unwrap();
    let tag = repo.find_tag(reference.target().unwrap()).unwrap();
    assert_eq!(tag.message().unwrap(), "release 1.0");
}

#[test]
fn fatal_tree_error_stops_after_last_complete_commit() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();
    // Changeset 3 of 5 deletes a path that was never added.
    let items = vec![
        folder("P1", "$/proj"),
        file(
            "F1",
            "$/proj/a.txt",
            vec![event(RevisionAction::Add, 0, "alice", "one", 1)],
            &[(1, "a")],
        ),
        file(
            "F2",
            "$/proj/b.txt",
            vec![event(RevisionAction::Add, 1000, "alice", "two", 1)],
            &[(1, "b")],
        ),
        file(
            "F3",
            "$/proj/ghost.txt",
            vec![event(RevisionAction::Delete, 2000, "alice", "three", 1)],
            &[],
        ),
        file(
            "F4",
            "$/proj/c.txt",
            vec![event(RevisionAction::Add, 3000, "alice", "four", 1)],
            &[(1, "c")],
        ),
        file(
            "F5",
            "$/proj/d.txt",
            vec![event(RevisionAction::Add, 4000, "alice", "five", 1)],
            &[(1, "d")],
        ),
    ];
    pipeline::start(
        &engine,
        config_for(dir.path()),
        Arc::new(SnapshotSource::from_items(items)),
    )
    .unwrap();
    engine.wait_idle();

    let errors = engine.take_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], RelicError::TreeOp(_, _)));

    let log = commit_log(dir.path());
    assert_eq!(log.len(), 2, "changesets 3-5 were not exported");
    assert_eq!(log[1].0, "two");
}

#[test]
fn ignored_tree_errors_keep_the_full_run_going() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();
    let items = vec![
        folder("P1", "$/proj"),
        file(
            "F1",
            "$/proj/ghost.txt",
            vec![event(RevisionAction::Delete, 0, "alice", "bad delete", 1)],
            &[],
        ),
        file(
            "F2",
            "$/proj/a.txt",
            vec![event(RevisionAction::Add, 1000, "alice", "good add", 1)],
            &[(1, "a")],
        ),
    ];
    let mut config = config_for(dir.path());
    config.ignore_errors = true;
    pipeline::start(&engine, config, Arc::new(SnapshotSource::from_items(items))).unwrap();
    engine.wait_idle();
    assert!(engine.take_errors().is_empty());

    let log = commit_log(dir.path());
    assert_eq!(log.len(), 2, "failing changeset still committed (empty)");
    assert_eq!(tree_paths(dir.path()), vec!["a.txt"]);
}

/// Source wrapper that announces and then blocks the content fetch for one
/// item, giving the test a deterministic point inside an export unit.
struct GatedSource {
    inner: SnapshotSource,
    gated_item: String,
    // Mutex-wrapped so the wrapper stays Sync like the trait requires.
    notify: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl SourceRepository for GatedSource {
    fn resolve_project(&self, path: &str) -> relic::error::Result<SourceItem> {
        self.inner.resolve_project(path)
    }

    fn children(&self, item: &SourceItem) -> relic::error::Result<Vec<SourceItem>> {
        self.inner.children(item)
    }

    fn history(&self, item: &SourceItem) -> relic::error::Result<Vec<ItemEvent>> {
        self.inner.history(item)
    }

    fn content(&self, item_id: &str, version: u32) -> relic::error::Result<Vec<u8>> {
        if item_id == self.gated_item {
            self.notify.lock().unwrap().send(()).ok();
            self.release.lock().unwrap().recv().ok();
        }
        self.inner.content(item_id, version)
    }
}

#[test]
fn abort_finishes_the_in_flight_changeset_and_skips_the_rest() {
    let dir = tempdir().unwrap();
    let engine = ExecutionEngine::new();

    let mut items = vec![folder("P1", "$/proj")];
    for i in 1..=5 {
        items.push(file(
            &format!("F{i}"),
            &format!("$/proj/f{i}.txt"),
            vec![event(
                RevisionAction::Add,
                i as i64 * 1000,
                "alice",
                &format!("change {i}"),
                1,
            )],
            &[(1, "content")],
        ));
    }
    let inner = SnapshotSource::from_items(items);

    let (notify_tx, notify_rx) = channel();
    let (release_tx, release_rx) = channel();
    let gated = GatedSource {
        inner,
        gated_item: "F4".into(),
        notify: Mutex::new(notify_tx),
        release: Mutex::new(release_rx),
    };

    let changesets: Vec<Changeset> = (1..=5)
        .map(|i| {
            let revision = RevisionRecord {
                item_id: format!("F{i}"),
                path: format!("$/proj/f{i}.txt"),
                folder: false,
                action: RevisionAction::Add,
                timestamp: when(i as i64 * 1000),
                author: "alice".into(),
                comment: format!("change {i}"),
                version: 1,
                sequence: i - 1,
            };
            Changeset {
                author: "alice".into(),
                comment: format!("change {i}"),
                start: revision.timestamp,
                end: revision.timestamp,
                revisions: vec![revision],
            }
        })
        .collect();

    let stats = Arc::new(RunStats::default());
    let config = config_for(dir.path());
    let exporter = CommitExporter::new(&config, Arc::clone(&stats)).unwrap();
    let output = dir.path().to_path_buf();
    engine.enqueue(move |ctx| {
        let mut writer = GitWriter::init(&output)?;
        exporter.export(&changesets, &gated, &mut writer, ctx)?;
        Ok(())
    });

    // Worker is now inside changeset 4, before its commit.
    notify_rx.recv().unwrap();
    assert_eq!(stats.commits.load(Ordering::Relaxed), 3);
    engine.abort();
    release_tx.send(()).unwrap();
    engine.wait_idle();

    // Cancellation is not an error, and the in-flight unit completed.
    assert!(engine.take_errors().is_empty());
    let log = commit_log(dir.path());
    assert_eq!(log.len(), 4, "changeset 5 was skipped at the boundary");
    assert_eq!(log.last().unwrap().0, "change 4");
}
