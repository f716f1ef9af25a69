//! Reconstruction of atomic changesets from the per-file revision stream.
//!
//! The legacy format preserves no changeset boundary, so grouping is a
//! temporal/comment heuristic with two thresholds: any two same-author
//! revisions within `any_threshold` merge unconditionally; revisions whose
//! comments match exactly (non-empty) merge up to the larger
//! `same_threshold`, so a long task interrupted by unrelated edits but
//! resumed with the same comment still lands in one changeset. Accidental
//! identical comments can still merge unrelated edits; that is a documented
//! property of the heuristic, not something this code tries to outsmart.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Duration, Utc};

use crate::engine::WorkerContext;
use crate::model::{Changeset, RevisionRecord};
use crate::pipeline::RunStats;

struct OpenChangeset {
    revisions: Vec<RevisionRecord>,
    /// First non-empty comment seen; used both for the same-comment test
    /// and as the representative comment of the closed changeset.
    comment: String,
    start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl OpenChangeset {
    fn open(revision: RevisionRecord) -> Self {
        Self {
            comment: revision.comment.clone(),
            start: revision.timestamp,
            last_seen: revision.timestamp,
            revisions: vec![revision],
        }
    }

    fn append(&mut self, revision: RevisionRecord) {
        self.last_seen = revision.timestamp;
        if self.comment.is_empty() && !revision.comment.is_empty() {
            self.comment = revision.comment.clone();
        }
        self.revisions.push(revision);
    }

    fn close(self, author: &str) -> Changeset {
        Changeset {
            author: author.to_string(),
            comment: self.comment,
            start: self.start,
            end: self.last_seen,
            revisions: self.revisions,
        }
    }
}

pub struct ChangesetBuilder {
    any_threshold: Duration,
    same_threshold: Duration,
    stats: Arc<RunStats>,
}

impl ChangesetBuilder {
    pub fn new(any_threshold: Duration, same_threshold: Duration, stats: Arc<RunStats>) -> Self {
        Self {
            any_threshold,
            same_threshold,
            stats,
        }
    }

    /// Cluster the revision stream into changesets, ordered by start
    /// timestamp (ties by original revision order). The per-author open
    /// map lives only for the duration of this call.
    pub fn build(&self, mut revisions: Vec<RevisionRecord>, ctx: &WorkerContext) -> Vec<Changeset> {
        revisions.sort_by_key(|r| (r.timestamp, r.sequence));
        ctx.set_progress(0, revisions.len() as u64);

        let mut open: HashMap<String, OpenChangeset> = HashMap::new();
        let mut closed: Vec<(u64, DateTime<Utc>, Changeset)> = Vec::new();

        for revision in revisions {
            if ctx.aborted() {
                break;
            }
            ctx.bump_progress(1);

            let author = revision.author.clone();
            match open.get_mut(&author) {
                Some(current) if self.merges(current, &revision) => {
                    current.append(revision);
                }
                Some(_) => {
                    let finished = open.remove(&author).unwrap().close(&author);
                    self.emit(finished, &mut closed);
                    open.insert(author, OpenChangeset::open(revision));
                }
                None => {
                    open.insert(author, OpenChangeset::open(revision));
                }
            }
        }

        for (author, current) in open.drain() {
            let finished = current.close(&author);
            self.emit(finished, &mut closed);
        }

        closed.sort_by_key(|(order, start, _)| (*start, *order));
        closed.into_iter().map(|(_, _, changeset)| changeset).collect()
    }

    fn merges(&self, current: &OpenChangeset, revision: &RevisionRecord) -> bool {
        let gap = revision.timestamp - current.last_seen;
        if gap <= self.any_threshold {
            return true;
        }
        // Empty comments never satisfy the same-comment branch.
        !revision.comment.is_empty()
            && current.comment == revision.comment
            && gap <= self.same_threshold
    }

    fn emit(&self, changeset: Changeset, closed: &mut Vec<(u64, DateTime<Utc>, Changeset)>) {
        self.stats.changesets.fetch_add(1, Ordering::Relaxed);
        let order = changeset
            .revisions
            .first()
            .map(|r| r.sequence)
            .unwrap_or(u64::MAX);
        closed.push((order, changeset.start, changeset));
    }
}
