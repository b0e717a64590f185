//! Hierarchical persistent store contract used by the resource cache.
//!
//! A store is a tree of nodes addressed by absolute `/`-separated paths.
//! Each node carries a flat map of typed attributes and a revision number
//! that increases with every attribute update. Stores are dumb: lease
//! rules, versions and entry naming live in
//! [`ResourceCache`](super::ResourceCache).
//!
//! # Atomicity
//!
//! Every [`update_attributes`](PersistentStore::update_attributes) call is
//! applied atomically. [`update_attributes_if_revision`](PersistentStore::update_attributes_if_revision)
//! adds compare-and-swap semantics for read-decide-write sequences such as
//! taking a lease.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StoreError;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A string.
    String(String),
    /// A UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Binary data.
    Binary(Bytes),
    /// Any JSON value.
    Json(Value),
}

impl AttrValue {
    /// Returns the string, if this is a string attribute.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the timestamp, if this is a timestamp attribute.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a binary attribute.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Converts the attribute to JSON.
    ///
    /// Timestamps become RFC 3339 strings; binary data is not representable
    /// and yields `None`.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::String(s) => Some(Value::String(s.clone())),
            Self::Timestamp(t) => Some(Value::String(t.to_rfc3339())),
            Self::Binary(_) => None,
            Self::Json(v) => Some(v.clone()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Bytes> for AttrValue {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

/// Attributes of a node.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A set of attribute writes and removals applied in one update.
///
/// # Examples
///
/// ```
/// use respipe::cache::AttributeChanges;
///
/// let changes = AttributeChanges::new()
///     .set("lock", "holder-1")
///     .remove("version");
/// assert_eq!(changes.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeChanges(BTreeMap<String, Option<AttrValue>>);

impl AttributeChanges {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.0.insert(name.into(), Some(value.into()));
        self
    }

    /// Removes `name`.
    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), None);
        self
    }

    /// Returns the number of changed attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing changes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies the changes to `attributes`.
    pub fn apply_to(&self, attributes: &mut Attributes) {
        for (name, change) in &self.0 {
            match change {
                Some(value) => {
                    attributes.insert(name.clone(), value.clone());
                },
                None => {
                    attributes.remove(name);
                },
            }
        }
    }
}

/// Snapshot of a node as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreNode {
    /// Absolute path of the node.
    pub path: String,
    /// Attributes at the time of the read.
    pub attributes: Attributes,
    /// Revision at the time of the read, starting at 1.
    pub revision: u64,
}

impl StoreNode {
    /// Returns the last path segment (empty for the tree root).
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Returns an attribute.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Returns a string attribute.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_str)
    }

    /// Returns a timestamp attribute.
    pub fn attr_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.attr(name).and_then(AttrValue::as_timestamp)
    }
}

/// Joins a parent path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Hierarchical node store with per-node typed attributes.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Reads a node; `Ok(None)` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<StoreNode>, StoreError>;

    /// Reads a node, creating it and any missing ancestors with no
    /// attributes.
    async fn get_or_create(&self, path: &str) -> Result<StoreNode, StoreError>;

    /// Creates `name` under `parent` with the given attributes.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the parent is missing,
    /// [`StoreError::AlreadyExists`] if the child exists.
    async fn create_child(
        &self,
        parent: &str,
        name: &str,
        attributes: Attributes,
    ) -> Result<StoreNode, StoreError>;

    /// Lists the direct children of a node, ordered by name. A missing node
    /// has no children.
    async fn children(&self, path: &str) -> Result<Vec<StoreNode>, StoreError>;

    /// Applies `changes` atomically and returns the updated node.
    async fn update_attributes(
        &self,
        path: &str,
        changes: AttributeChanges,
    ) -> Result<StoreNode, StoreError>;

    /// Applies `changes` atomically if the node is still at `expected_revision`.
    ///
    /// # Errors
    ///
    /// [`StoreError::RevisionConflict`] if another update came first.
    async fn update_attributes_if_revision(
        &self,
        path: &str,
        expected_revision: u64,
        changes: AttributeChanges,
    ) -> Result<StoreNode, StoreError>;

    /// Makes pending writes durable. Stores that write through need not
    /// override this.
    async fn commit(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn changes_apply_sets_and_removals() {
        let mut attrs = Attributes::new();
        attrs.insert("keep".into(), "k".into());
        attrs.insert("drop".into(), "d".into());
        AttributeChanges::new()
            .set("new", "n")
            .remove("drop")
            .remove("never-existed")
            .apply_to(&mut attrs);
        let names: Vec<_> = attrs.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["keep", "new"]);
    }

    #[test]
    fn node_name_is_last_segment() {
        let node = StoreNode {
            path: "/var/app/files".into(),
            attributes: Attributes::new(),
            revision: 1,
        };
        assert_eq!(node.name(), "files");
    }

    #[test]
    fn child_path_handles_root() {
        assert_eq!(child_path("/", "var"), "/var");
        assert_eq!(child_path("/var", "app"), "/var/app");
    }

    #[test]
    fn timestamps_convert_to_rfc3339_json() {
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            AttrValue::from(t).to_json(),
            Some(Value::String("2024-05-01T10:00:00+00:00".into()))
        );
        assert_eq!(AttrValue::Binary(Bytes::new()).to_json(), None);
    }
}
