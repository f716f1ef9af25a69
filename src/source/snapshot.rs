//! JSON snapshot source: a flat dump of the legacy tree with per-item
//! history and per-version content, produced by an external extraction tool.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RelicError, Result};
use crate::source::{ItemEvent, SourceItem, SourceRepository};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: String,
    /// Full source path, e.g. `$/project/src/main.c`.
    pub path: String,
    #[serde(default)]
    pub folder: bool,
    #[serde(default)]
    pub history: Vec<ItemEvent>,
    /// Version number -> file content. Folders carry none.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub contents: HashMap<u32, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    items: Vec<SnapshotItem>,
}

/// In-memory snapshot indexed by id and by path.
pub struct SnapshotSource {
    by_id: HashMap<String, SnapshotItem>,
    by_path: HashMap<String, String>,
}

impl SnapshotSource {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&data)?;
        Ok(Self::from_items(file.items))
    }

    pub fn from_items(items: Vec<SnapshotItem>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_path = HashMap::new();
        for item in items {
            by_path.insert(item.path.clone(), item.id.clone());
            by_id.insert(item.id.clone(), item);
        }
        Self { by_id, by_path }
    }

    fn get(&self, id: &str) -> Result<&SnapshotItem> {
        self.by_id
            .get(id)
            .ok_or_else(|| RelicError::MalformedItem(id.to_string(), "unknown item id".into()))
    }
}

/// Direct parent of a source path, `$/a/b` -> `$/a`.
fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

impl SourceRepository for SnapshotSource {
    fn resolve_project(&self, path: &str) -> Result<SourceItem> {
        let id = self
            .by_path
            .get(path)
            .ok_or_else(|| RelicError::SourcePathNotFound(path.to_string()))?;
        let item = self.get(id)?;
        if !item.folder {
            return Err(RelicError::NotAProject(path.to_string()));
        }
        Ok(SourceItem {
            id: item.id.clone(),
            path: item.path.clone(),
            folder: true,
        })
    }

    fn children(&self, item: &SourceItem) -> Result<Vec<SourceItem>> {
        let mut children: Vec<SourceItem> = self
            .by_id
            .values()
            .filter(|candidate| parent_path(&candidate.path) == Some(item.path.as_str()))
            .map(|child| SourceItem {
                id: child.id.clone(),
                path: child.path.clone(),
                folder: child.folder,
            })
            .collect();
        // Deterministic walk order regardless of map iteration.
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    fn history(&self, item: &SourceItem) -> Result<Vec<ItemEvent>> {
        let item = self.get(&item.id)?;
        if item.history.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
            return Err(RelicError::MalformedItem(
                item.path.clone(),
                "history is not time-ordered".into(),
            ));
        }
        Ok(item.history.clone())
    }

    fn content(&self, item_id: &str, version: u32) -> Result<Vec<u8>> {
        let item = self.get(item_id)?;
        item.contents
            .get(&version)
            .map(|text| text.as_bytes().to_vec())
            .ok_or_else(|| RelicError::MissingContent(item_id.to_string(), version))
    }
}
