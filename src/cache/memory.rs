//! In-memory [`PersistentStore`] backed by [`DashMap`].
//!
//! Nodes are kept in a flat map keyed by absolute path. Each attribute
//! update holds the shard lock of its node for the duration of the update,
//! which makes updates atomic per call. Nothing is persisted.
//!
//! # Examples
//!
//! ```
//! use respipe::cache::{AttributeChanges, InMemoryStore, PersistentStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryStore::new();
//! store.get_or_create("/var/app/files").await.unwrap();
//! let node = store
//!     .update_attributes("/var/app/files", AttributeChanges::new().set("version", "v1"))
//!     .await
//!     .unwrap();
//! assert_eq!(node.attr_str("version"), Some("v1"));
//! assert_eq!(store.children("/var/app").await.unwrap().len(), 1);
//! # });
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::{child_path, AttributeChanges, Attributes, PersistentStore, StoreNode};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct NodeData {
    attributes: Attributes,
    revision: u64,
}

impl NodeData {
    fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            revision: 1,
        }
    }

    fn snapshot(&self, path: &str) -> StoreNode {
        StoreNode {
            path: path.to_string(),
            attributes: self.attributes.clone(),
            revision: self.revision,
        }
    }
}

/// Thread-safe in-memory node store.
#[derive(Debug)]
pub struct InMemoryStore {
    nodes: DashMap<String, NodeData>,
}

impl InMemoryStore {
    /// Creates a store containing only the tree root `/`.
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert("/".to_string(), NodeData::new(Attributes::new()));
        Self { nodes }
    }

    /// Returns the number of nodes, including the tree root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the store holds nothing but the tree root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if !path.starts_with('/') {
        return Err(invalid("path must be absolute"));
    }
    if path != "/" && path[1..].split('/').any(str::is_empty) {
        return Err(invalid("path contains an empty segment"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains('/') {
        return Err(StoreError::InvalidPath {
            path: name.to_string(),
            reason: "child name must be a single non-empty segment".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, path: &str) -> Result<Option<StoreNode>, StoreError> {
        validate_path(path)?;
        Ok(self.nodes.get(path).map(|n| n.value().snapshot(path)))
    }

    async fn get_or_create(&self, path: &str) -> Result<StoreNode, StoreError> {
        validate_path(path)?;
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.nodes
                .entry(current.clone())
                .or_insert_with(|| NodeData::new(Attributes::new()));
        }
        let node = self
            .nodes
            .entry(path.to_string())
            .or_insert_with(|| NodeData::new(Attributes::new()));
        Ok(node.value().snapshot(path))
    }

    async fn create_child(
        &self,
        parent: &str,
        name: &str,
        attributes: Attributes,
    ) -> Result<StoreNode, StoreError> {
        validate_path(parent)?;
        validate_name(name)?;
        if !self.nodes.contains_key(parent) {
            return Err(StoreError::NotFound {
                path: parent.to_string(),
            });
        }
        let path = child_path(parent, name);
        match self.nodes.entry(path.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { path }),
            Entry::Vacant(slot) => {
                let node = slot.insert(NodeData::new(attributes));
                Ok(node.value().snapshot(&path))
            },
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<StoreNode>, StoreError> {
        validate_path(path)?;
        let prefix = child_path(path, "");
        let mut children: Vec<StoreNode> = self
            .nodes
            .iter()
            .filter(|entry| {
                entry
                    .key()
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    async fn update_attributes(
        &self,
        path: &str,
        changes: AttributeChanges,
    ) -> Result<StoreNode, StoreError> {
        validate_path(path)?;
        let mut node = self.nodes.get_mut(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })?;
        let data = node.value_mut();
        changes.apply_to(&mut data.attributes);
        data.revision += 1;
        Ok(data.snapshot(path))
    }

    async fn update_attributes_if_revision(
        &self,
        path: &str,
        expected_revision: u64,
        changes: AttributeChanges,
    ) -> Result<StoreNode, StoreError> {
        validate_path(path)?;
        let mut node = self.nodes.get_mut(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })?;
        let data = node.value_mut();
        if data.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                path: path.to_string(),
                expected: expected_revision,
                actual: data.revision,
            });
        }
        changes.apply_to(&mut data.attributes);
        data.revision += 1;
        Ok(data.snapshot(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::cache::store::AttrValue;

    // ---- Path handling ----

    #[tokio::test]
    async fn get_or_create_creates_ancestors() {
        let store = InMemoryStore::new();
        store.get_or_create("/a/b/c").await.unwrap();
        assert!(store.get("/a").await.unwrap().is_some());
        assert!(store.get("/a/b").await.unwrap().is_some());
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn relative_and_empty_segment_paths_are_rejected() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get("a/b").await,
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.get_or_create("/a//b").await,
            Err(StoreError::InvalidPath { .. })
        ));
    }

    // ---- Children ----

    #[tokio::test]
    async fn create_child_requires_parent_and_free_name() {
        let store = InMemoryStore::new();
        let err = store
            .create_child("/missing", "x", Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store.get_or_create("/p").await.unwrap();
        store.create_child("/p", "x", Attributes::new()).await.unwrap();
        let err = store
            .create_child("/p", "x", Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn children_are_direct_and_sorted() {
        let store = InMemoryStore::new();
        store.get_or_create("/p/b").await.unwrap();
        store.get_or_create("/p/a/deep").await.unwrap();
        store.get_or_create("/pp").await.unwrap();
        let names: Vec<_> = store
            .children("/p")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.path)
            .collect();
        assert_eq!(names, vec!["/p/a", "/p/b"]);
        assert!(store.children("/nothing").await.unwrap().is_empty());
    }

    // ---- Attribute updates ----

    #[tokio::test]
    async fn updates_bump_revision() {
        let store = InMemoryStore::new();
        let node = store.get_or_create("/r").await.unwrap();
        assert_eq!(node.revision, 1);
        let node = store
            .update_attributes("/r", AttributeChanges::new().set("k", "v"))
            .await
            .unwrap();
        assert_eq!(node.revision, 2);
        assert_eq!(node.attr("k"), Some(&AttrValue::String("v".into())));
    }

    #[tokio::test]
    async fn conditional_update_detects_conflict() {
        let store = InMemoryStore::new();
        let node = store.get_or_create("/r").await.unwrap();
        store
            .update_attributes("/r", AttributeChanges::new().set("lock", "A"))
            .await
            .unwrap();
        let err = store
            .update_attributes_if_revision(
                "/r",
                node.revision,
                AttributeChanges::new().set("lock", "B"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        let current = store.get("/r").await.unwrap().unwrap();
        assert_eq!(current.attr_str("lock"), Some("A"));
    }

    #[tokio::test]
    async fn update_missing_node_is_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .update_attributes("/nope", AttributeChanges::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
