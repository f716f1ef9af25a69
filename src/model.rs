use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RelicError, Result};

/// One kind of historical event recorded against a source item.
///
/// `Rename`, `Share` and `Branch` carry the originating path so later
/// move/copy resolution can trace where the content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevisionAction {
    Add,
    Edit,
    Delete,
    Recover,
    Rename { from: String },
    Share { from: String },
    Branch { from: String },
    Label { name: String },
}

impl RevisionAction {
    /// Originating path for actions that copy or move content.
    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Rename { from } | Self::Share { from } | Self::Branch { from } => Some(from),
            _ => None,
        }
    }
}

impl std::fmt::Display for RevisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Edit => write!(f, "edit"),
            Self::Delete => write!(f, "delete"),
            Self::Recover => write!(f, "recover"),
            Self::Rename { from } => write!(f, "rename from {from}"),
            Self::Share { from } => write!(f, "share from {from}"),
            Self::Branch { from } => write!(f, "branch from {from}"),
            Self::Label { name } => write!(f, "label '{name}'"),
        }
    }
}

/// One historical event on one source item, as recovered by the analyzer.
///
/// Immutable once produced. For a given item, records are strictly
/// time-ordered as recorded by the source system; `sequence` is a global
/// emission counter used to break timestamp ties across items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub item_id: String,
    pub path: String,
    #[serde(default)]
    pub folder: bool,
    pub action: RevisionAction,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    pub version: u32,
    pub sequence: u64,
}

/// An ordered, non-empty group of revisions reconstructed as one logical
/// change. Every member shares the changeset's author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub author: String,
    /// First non-empty comment among the members, or empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub revisions: Vec<RevisionRecord>,
}

impl Changeset {
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Label names carried by member revisions, in revision order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.revisions.iter().filter_map(|r| match &r.action {
            RevisionAction::Label { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// A stateless pattern/replacement rule applied to every exported path.
#[derive(Debug, Clone)]
pub struct PathMapping {
    pattern: String,
    regex: Regex,
    replacement: String,
}

impl PathMapping {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| RelicError::InvalidMapping(pattern.to_string(), e.to_string()))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            replacement: replacement.to_string(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn apply(&self, path: &str) -> String {
        self.regex
            .replace_all(path, self.replacement.as_str())
            .into_owned()
    }
}
