//! Translation of changesets into target-repository commits.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Utc};
use encoding_rs::Encoding;

use crate::config::MigrationConfig;
use crate::engine::WorkerContext;
use crate::error::{RelicError, Result};
use crate::model::{Changeset, PathMapping, RevisionAction, RevisionRecord};
use crate::pipeline::RunStats;
use crate::source::SourceRepository;

/// Working-tree mutation and commit/tag primitives of the target
/// repository. Implemented over git2 by `crate::git::GitWriter`; tests use
/// recording doubles.
pub trait CommitWriter {
    fn add(&mut self, path: &str, content: &[u8]) -> Result<()>;
    fn modify(&mut self, path: &str, content: &[u8]) -> Result<()>;
    fn delete(&mut self, path: &str) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    fn commit(
        &mut self,
        author: &str,
        email: &str,
        when: DateTime<Utc>,
        message: &[u8],
    ) -> Result<()>;
    fn tag(
        &mut self,
        name: &str,
        tagger: &str,
        email: &str,
        when: DateTime<Utc>,
        message: &str,
        annotated: bool,
    ) -> Result<()>;
}

/// Replace characters git refuses in ref names.
fn sanitize_tag_name(label: &str) -> String {
    let mut name: String = label
        .chars()
        .map(|c| match c {
            ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    while name.starts_with(['.', '-']) {
        name.remove(0);
    }
    if name.is_empty() {
        "_".into()
    } else {
        name
    }
}

pub struct CommitExporter {
    project: String,
    mapping: Option<PathMapping>,
    email_domain: Option<String>,
    default_comment: String,
    encoding: &'static Encoding,
    transcode_comments: bool,
    ignore_errors: bool,
    annotate_tags: bool,
    stats: Arc<RunStats>,
}

impl CommitExporter {
    pub fn new(config: &MigrationConfig, stats: Arc<RunStats>) -> Result<Self> {
        Ok(Self {
            project: config.project.clone(),
            mapping: config.compiled_mapping()?,
            email_domain: config.email_domain.clone(),
            default_comment: config.default_comment.clone().unwrap_or_default(),
            encoding: config.resolved_encoding()?,
            transcode_comments: config.transcode_comments,
            ignore_errors: config.ignore_errors,
            annotate_tags: config.annotate_tags,
            stats,
        })
    }

    /// Export every changeset, in builder order, as one commit each.
    /// Returns the number of commits written. Cancellation is observed per
    /// changeset and never leaves a partially-written commit.
    pub fn export(
        &self,
        changesets: &[Changeset],
        source: &dyn SourceRepository,
        writer: &mut dyn CommitWriter,
        ctx: &WorkerContext,
    ) -> Result<u64> {
        let total = changesets.len() as u64;
        ctx.set_progress(0, total);
        let mut commits = 0u64;

        for (index, changeset) in changesets.iter().enumerate() {
            if ctx.aborted() {
                break;
            }
            ctx.set_status(&format!("exporting changeset {}/{}", index + 1, total));

            for revision in &changeset.revisions {
                if let Err(e) = self.apply(revision, source, writer) {
                    if self.ignore_errors {
                        tracing::warn!(path = %revision.path, error = %e, "tree operation skipped");
                    } else {
                        return Err(e);
                    }
                }
            }

            let email = self.email_for(&changeset.author);
            let message = if changeset.comment.is_empty() {
                self.default_comment.clone()
            } else {
                changeset.comment.clone()
            };
            let message_bytes = self.encode_message(&message);
            writer.commit(&changeset.author, &email, changeset.end, &message_bytes)?;
            commits += 1;
            self.stats.commits.fetch_add(1, Ordering::Relaxed);

            for label in changeset.labels() {
                let name = sanitize_tag_name(label);
                let tagged = writer.tag(
                    &name,
                    &changeset.author,
                    &email,
                    changeset.end,
                    label,
                    self.annotate_tags,
                );
                if let Err(e) = tagged {
                    if self.ignore_errors {
                        tracing::warn!(tag = %name, error = %e, "tag skipped");
                    } else {
                        return Err(e);
                    }
                }
            }

            ctx.bump_progress(1);
        }
        Ok(commits)
    }

    fn apply(
        &self,
        revision: &RevisionRecord,
        source: &dyn SourceRepository,
        writer: &mut dyn CommitWriter,
    ) -> Result<()> {
        if matches!(revision.action, RevisionAction::Label { .. }) {
            // Labels become tags on the changeset's commit, not tree ops.
            return Ok(());
        }
        if revision.folder {
            // Folder create/delete has no blob counterpart in the target.
            return Ok(());
        }

        match &revision.action {
            RevisionAction::Add | RevisionAction::Recover => {
                let content = source.content(&revision.item_id, revision.version)?;
                writer.add(&self.map(&revision.path)?, &content)
            }
            RevisionAction::Edit => {
                let content = source.content(&revision.item_id, revision.version)?;
                writer.modify(&self.map(&revision.path)?, &content)
            }
            RevisionAction::Delete => writer.delete(&self.map(&revision.path)?),
            RevisionAction::Rename { from } => {
                writer.rename(&self.map(from)?, &self.map(&revision.path)?)
            }
            RevisionAction::Share { from: _ } => {
                // The shared item carries its own content version.
                let content = source.content(&revision.item_id, revision.version)?;
                writer.add(&self.map(&revision.path)?, &content)
            }
            RevisionAction::Branch { from: _ } => {
                // After a branch the item is independent; its content
                // continues under the existing path.
                let content = source.content(&revision.item_id, revision.version)?;
                writer.modify(&self.map(&revision.path)?, &content)
            }
            RevisionAction::Label { .. } => unreachable!("handled above"),
        }
    }

    /// Strip the project prefix and apply the configured mapping.
    fn map(&self, path: &str) -> Result<String> {
        let relative = path
            .strip_prefix(&self.project)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or_else(|| path.trim_start_matches("$/"));
        let mapped = match &self.mapping {
            Some(mapping) => mapping.apply(relative),
            None => relative.to_string(),
        };
        if mapped.is_empty() {
            return Err(RelicError::TreeOp(
                path.to_string(),
                "maps to an empty path".into(),
            ));
        }
        Ok(mapped)
    }

    fn email_for(&self, username: &str) -> String {
        let local: String = username.trim().to_lowercase().replace(' ', ".");
        match &self.email_domain {
            Some(domain) => format!("{local}@{domain}"),
            None => format!("{local}@localhost"),
        }
    }

    fn encode_message(&self, message: &str) -> Vec<u8> {
        if self.transcode_comments {
            // Canonical UTF-8.
            message.as_bytes().to_vec()
        } else {
            // Pass through in the source-specified encoding as-is.
            let (bytes, _, _) = self.encoding.encode(message);
            bytes.into_owned()
        }
    }
}
