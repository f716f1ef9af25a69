//! Recursive source-tree walk producing the per-item revision stream.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use regex::Regex;

use crate::engine::WorkerContext;
use crate::error::{RelicError, Result};
use crate::model::RevisionRecord;
use crate::pipeline::RunStats;
use crate::source::{SourceItem, SourceRepository};

pub struct RevisionAnalyzer {
    roots: Vec<String>,
    excludes: Vec<Regex>,
    fail_fast: bool,
    stats: Arc<RunStats>,
    next_sequence: u64,
}

/// Compile a `*`/`?` wildcard into an anchored regex over the full path.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| RelicError::InvalidPattern(pattern.to_string(), e.to_string()))
}

impl RevisionAnalyzer {
    pub fn new(stats: Arc<RunStats>, fail_fast: bool) -> Self {
        Self {
            roots: Vec::new(),
            excludes: Vec::new(),
            fail_fast,
            stats,
            next_sequence: 0,
        }
    }

    /// Register a project subtree to analyze.
    pub fn add_root(&mut self, path: &str) {
        self.roots.push(path.to_string());
    }

    /// Exclude paths matching a wildcard pattern. Excluded items contribute
    /// no revisions and are invisible to later stages.
    pub fn exclude(&mut self, pattern: &str) -> Result<()> {
        self.excludes.push(wildcard_regex(pattern)?);
        Ok(())
    }

    fn excluded(&self, path: &str) -> bool {
        // A match on any ancestor pattern would already have pruned the
        // subtree; only the item's own path is tested here.
        self.excludes.iter().any(|re| re.is_match(path))
    }

    /// Walk every registered root and return the complete revision stream,
    /// per-item source time order preserved. Cancellation is observed
    /// between items; the partial stream is returned and the caller decides
    /// whether to continue.
    pub fn run(
        &mut self,
        source: &dyn SourceRepository,
        ctx: &WorkerContext,
    ) -> Result<Vec<RevisionRecord>> {
        let mut revisions = Vec::new();
        for root in self.roots.clone() {
            let project = source.resolve_project(&root)?;
            self.visit(source, &project, ctx, &mut revisions)?;
        }
        Ok(revisions)
    }

    fn visit(
        &mut self,
        source: &dyn SourceRepository,
        item: &SourceItem,
        ctx: &WorkerContext,
        out: &mut Vec<RevisionRecord>,
    ) -> Result<()> {
        if ctx.aborted() {
            return Ok(());
        }
        if self.excluded(&item.path) {
            tracing::debug!(path = %item.path, "excluded from analysis");
            return Ok(());
        }

        match self.record_history(source, item, out) {
            Ok(()) => {}
            Err(e) if self.fail_fast => return Err(e),
            Err(e) => {
                tracing::warn!(path = %item.path, error = %e, "skipping malformed item");
            }
        }

        if item.folder {
            let children = match source.children(item) {
                Ok(children) => children,
                Err(e) if self.fail_fast => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %item.path, error = %e, "cannot enumerate children");
                    return Ok(());
                }
            };
            for child in children {
                self.visit(source, &child, ctx, out)?;
            }
        }
        Ok(())
    }

    fn record_history(
        &mut self,
        source: &dyn SourceRepository,
        item: &SourceItem,
        out: &mut Vec<RevisionRecord>,
    ) -> Result<()> {
        let events = source.history(item)?;
        if events.is_empty() {
            // Items with no recorded history are skipped without error.
            return Ok(());
        }
        if !item.folder {
            self.stats.files.fetch_add(1, Ordering::Relaxed);
        }
        for event in events {
            out.push(RevisionRecord {
                item_id: item.id.clone(),
                path: item.path.clone(),
                folder: item.folder,
                action: event.action,
                timestamp: event.timestamp,
                author: event.author,
                comment: event.comment,
                version: event.version,
                sequence: self.next_sequence,
            });
            self.next_sequence += 1;
            self.stats.revisions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionEngine;
    use crate::model::RevisionAction;
    use crate::source::ItemEvent;
    use crate::source::snapshot::{SnapshotItem, SnapshotSource};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn event(action: RevisionAction, secs: i64, author: &str) -> ItemEvent {
        ItemEvent {
            action,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            author: author.into(),
            comment: String::new(),
            version: 1,
        }
    }

    fn file(id: &str, path: &str, history: Vec<ItemEvent>) -> SnapshotItem {
        SnapshotItem {
            id: id.into(),
            path: path.into(),
            folder: false,
            history,
            contents: HashMap::new(),
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

    /// Run the analyzer on the engine and hand back its output.
    fn analyze(source: SnapshotSource, excludes: &[&str], fail_fast: bool) -> Result<Vec<RevisionRecord>> {
        let stats = Arc::new(RunStats::default());
        let mut analyzer = RevisionAnalyzer::new(stats, fail_fast);
        analyzer.add_root("$/proj");
        for pattern in excludes {
            analyzer.exclude(pattern).unwrap();
        }

        let engine = ExecutionEngine::new();
        let result: Arc<Mutex<Option<Result<Vec<RevisionRecord>>>>> =
            Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        engine.enqueue(move |ctx| {
            *slot.lock().unwrap() = Some(analyzer.run(&source, ctx));
            Ok(())
        });
        engine.wait_idle();
        let out = result.lock().unwrap().take().unwrap();
        out
    }

    #[test]
    fn walk_emits_per_item_history_in_order() {
        let source = SnapshotSource::from_items(vec![
            folder("P1", "$/proj"),
            file(
                "F1",
                "$/proj/a.txt",
                vec![
                    event(RevisionAction::Add, 0, "alice"),
                    event(RevisionAction::Edit, 10, "alice"),
                ],
            ),
        ]);
        let revisions = analyze(source, &[], false).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].action, RevisionAction::Add);
        assert_eq!(revisions[1].action, RevisionAction::Edit);
        assert!(revisions[0].timestamp <= revisions[1].timestamp);
        assert_eq!(revisions[0].sequence, 0);
        assert_eq!(revisions[1].sequence, 1);
    }

    #[test]
    fn exclude_pattern_suppresses_matching_items() {
        let source = SnapshotSource::from_items(vec![
            folder("P1", "$/proj"),
            file("F1", "$/proj/a.txt", vec![event(RevisionAction::Add, 0, "alice")]),
            file("F2", "$/proj/b.tmp", vec![event(RevisionAction::Add, 1, "alice")]),
        ]);
        let revisions = analyze(source, &["*.tmp"], false).unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].path, "$/proj/a.txt");
    }

    #[test]
    fn deleted_then_recovered_surfaces_both_events() {
        let source = SnapshotSource::from_items(vec![
            folder("P1", "$/proj"),
            file(
                "F1",
                "$/proj/a.txt",
                vec![
                    event(RevisionAction::Add, 0, "alice"),
                    event(RevisionAction::Delete, 5, "alice"),
                    event(RevisionAction::Recover, 9, "alice"),
                ],
            ),
        ]);
        let revisions = analyze(source, &[], false).unwrap();
        let actions: Vec<&RevisionAction> = revisions.iter().map(|r| &r.action).collect();
        assert_eq!(
            actions,
            vec![
                &RevisionAction::Add,
                &RevisionAction::Delete,
                &RevisionAction::Recover
            ]
        );
    }

    #[test]
    fn malformed_item_is_skipped_unless_fail_fast() {
        let bad = SnapshotItem {
            id: "F2".into(),
            path: "$/proj/bad.txt".into(),
            folder: false,
            history: vec![
                event(RevisionAction::Add, 10, "alice"),
                event(RevisionAction::Edit, 3, "alice"),
            ],
            contents: HashMap::new(),
        };
        let items = vec![
            folder("P1", "$/proj"),
            file("F1", "$/proj/a.txt", vec![event(RevisionAction::Add, 0, "alice")]),
            bad,
        ];

        let revisions = analyze(SnapshotSource::from_items(items.clone()), &[], false).unwrap();
        assert_eq!(revisions.len(), 1, "bad item skipped, walk continued");

        let err = analyze(SnapshotSource::from_items(items), &[], true).unwrap_err();
        assert!(matches!(err, RelicError::MalformedItem(_, _)));
    }

    #[test]
    fn missing_project_is_a_configuration_error() {
        let source = SnapshotSource::from_items(vec![folder("P1", "$/other")]);
        let err = analyze(source, &[], false).unwrap_err();
        assert!(matches!(err, RelicError::SourcePathNotFound(_)));
    }

    #[test]
    fn wildcard_translation_is_anchored() {
        let re = wildcard_regex("*.tmp").unwrap();
        assert!(re.is_match("$/proj/b.tmp"));
        assert!(!re.is_match("$/proj/b.tmp.c"));
        let re = wildcard_regex("$/proj/gen-?").unwrap();
        assert!(re.is_match("$/proj/gen-1"));
        assert!(!re.is_match("$/proj/gen-12"));
    }

    #[test]
    fn stats_count_files_and_revisions() {
        let stats = Arc::new(RunStats::default());
        let mut analyzer = RevisionAnalyzer::new(Arc::clone(&stats), false);
        analyzer.add_root("$/proj");
        let source = SnapshotSource::from_items(vec![
            folder("P1", "$/proj"),
            file(
                "F1",
                "$/proj/a.txt",
                vec![
                    event(RevisionAction::Add, 0, "alice"),
                    event(RevisionAction::Edit, 1, "bob"),
                ],
            ),
        ]);
        let engine = ExecutionEngine::new();
        engine.enqueue(move |ctx| analyzer.run(&source, ctx).map(|_| ()));
        engine.wait_idle();
        assert!(engine.take_errors().is_empty());
        assert_eq!(stats.files.load(Ordering::Relaxed), 1);
        assert_eq!(stats.revisions.load(Ordering::Relaxed), 2);
    }
}
