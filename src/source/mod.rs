//! Abstract view of the legacy source repository.
//!
//! The on-disk/binary format reader is an external collaborator; the core
//! only needs to resolve a project, enumerate children, and read per-item
//! history and content. `snapshot` provides a JSON-backed implementation
//! used by the binary and the tests.

pub mod snapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::RevisionAction;

/// A node in the legacy project tree. Owned by the source repository and
/// read-only to the migration core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: String,
    pub path: String,
    pub folder: bool,
}

/// One historical event as the source records it, before the analyzer
/// attaches item identity and global ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub action: RevisionAction,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    #[serde(default)]
    pub comment: String,
    pub version: u32,
}

pub trait SourceRepository: Send + Sync {
    /// Resolve a path to a project item. Fails with `SourcePathNotFound`
    /// when nothing lives at the path and `NotAProject` when the path names
    /// a file.
    fn resolve_project(&self, path: &str) -> Result<SourceItem>;

    /// Direct children of a folder item.
    fn children(&self, item: &SourceItem) -> Result<Vec<SourceItem>>;

    /// Full recorded history of an item, in source time order.
    fn history(&self, item: &SourceItem) -> Result<Vec<ItemEvent>>;

    /// Content of a file item at a specific version.
    fn content(&self, item_id: &str, version: u32) -> Result<Vec<u8>>;
}
