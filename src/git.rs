//! git2-backed `CommitWriter`.
//!
//! Keeps a flat path -> blob-oid mirror of the working tree and materializes
//! it into nested tree objects at commit time. Only the worker thread
//! touches the mirror while a run is active.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{ObjectType, Oid, Repository, Signature};

use crate::error::{RelicError, Result};
use crate::export::CommitWriter;

pub struct GitWriter {
    repo: Repository,
    /// Path -> blob oid working-tree mirror.
    mirror: BTreeMap<String, Oid>,
    head: Option<Oid>,
}

impl GitWriter {
    /// Initialize a fresh repository at `path` (created if missing).
    pub fn init(path: &Path) -> Result<Self> {
        let repo = Repository::init(path)?;
        Ok(Self {
            repo,
            mirror: BTreeMap::new(),
            head: None,
        })
    }

    /// Oid of the most recently written commit.
    pub fn head(&self) -> Option<Oid> {
        self.head
    }

    fn signature(name: &str, email: &str, when: DateTime<Utc>) -> Result<Signature<'static>> {
        Ok(Signature::new(
            name,
            email,
            &git2::Time::new(when.timestamp(), 0),
        )?)
    }

    /// Build nested tree objects for every path under `prefix` in the
    /// mirror. `prefix` is either empty or ends with `/`.
    fn write_subtree(&self, prefix: &str) -> Result<Oid> {
        let mut builder = self.repo.treebuilder(None)?;
        let mut subdirs: BTreeSet<&str> = BTreeSet::new();

        for (path, oid) in self.mirror.range(prefix.to_string()..) {
            let Some(rest) = path.strip_prefix(prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    subdirs.insert(dir);
                }
                None => {
                    builder.insert(rest, *oid, 0o100644)?;
                }
            }
        }

        for dir in subdirs {
            let sub = self.write_subtree(&format!("{prefix}{dir}/"))?;
            builder.insert(dir, sub, 0o040000)?;
        }
        Ok(builder.write()?)
    }

    /// Write a commit object byte for byte, bypassing git2's str-only
    /// message API, and advance the branch HEAD points at.
    fn commit_raw(
        &self,
        tree: Oid,
        author: &str,
        email: &str,
        when: DateTime<Utc>,
        message: &[u8],
    ) -> Result<Oid> {
        let identity = format!("{author} <{email}> {} +0000", when.timestamp());
        let mut buffer = Vec::new();
        writeln!(buffer, "tree {tree}")?;
        if let Some(parent) = self.head {
            writeln!(buffer, "parent {parent}")?;
        }
        writeln!(buffer, "author {identity}")?;
        writeln!(buffer, "committer {identity}")?;
        writeln!(buffer)?;
        buffer.extend_from_slice(message);

        let oid = self.repo.odb()?.write(ObjectType::Commit, &buffer)?;
        match self.repo.find_reference("HEAD")?.symbolic_target() {
            Some(branch) => {
                let branch = branch.to_string();
                self.repo.reference(&branch, oid, true, "commit")?;
            }
            None => self.repo.set_head_detached(oid)?,
        }
        Ok(oid)
    }
}

impl CommitWriter for GitWriter {
    fn add(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let blob = self.repo.blob(content)?;
        self.mirror.insert(path.to_string(), blob);
        Ok(())
    }

    fn modify(&mut self, path: &str, content: &[u8]) -> Result<()> {
        // The legacy stream can edit a path the mirror never saw added
        // (history truncation on the source side); treat it as an add.
        self.add(path, content)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if self.mirror.remove(path).is_none() {
            return Err(RelicError::TreeOp(
                path.to_string(),
                "delete of unknown path".into(),
            ));
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let Some(blob) = self.mirror.remove(from) else {
            return Err(RelicError::TreeOp(
                from.to_string(),
                "rename of unknown path".into(),
            ));
        };
        self.mirror.insert(to.to_string(), blob);
        Ok(())
    }

    fn commit(
        &mut self,
        author: &str,
        email: &str,
        when: DateTime<Utc>,
        message: &[u8],
    ) -> Result<()> {
        let tree_oid = self.write_subtree("")?;
        let oid = match std::str::from_utf8(message) {
            Ok(text) => {
                let tree = self.repo.find_tree(tree_oid)?;
                let signature = Self::signature(author, email, when)?;
                let parent;
                let parents: Vec<&git2::Commit> = match self.head {
                    Some(oid) => {
                        parent = self.repo.find_commit(oid)?;
                        vec![&parent]
                    }
                    None => vec![],
                };
                self.repo
                    .commit(Some("HEAD"), &signature, &signature, text, &tree, &parents)?
            }
            // git2 only accepts str messages; a message kept in the source
            // encoding goes through a hand-assembled commit object so its
            // bytes land in the repository unchanged.
            Err(_) => self.commit_raw(tree_oid, author, email, when, message)?,
        };
        self.head = Some(oid);
        Ok(())
    }

    fn tag(
        &mut self,
        name: &str,
        tagger: &str,
        email: &str,
        when: DateTime<Utc>,
        message: &str,
        annotated: bool,
    ) -> Result<()> {
        let Some(head) = self.head else {
            return Err(RelicError::TreeOp(
                name.to_string(),
                "tag before first commit".into(),
            ));
        };
        let target = self.repo.find_object(head, Some(ObjectType::Commit))?;
        if annotated {
            let signature = Self::signature(tagger, email, when)?;
            self.repo.tag(name, &target, &signature, message, false)?;
        } else {
            self.repo.tag_lightweight(name, &target, false)?;
        }
        Ok(())
    }
}
