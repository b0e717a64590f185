//! Content loader contract and an in-memory loader.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::LoadError;
use crate::resources::ResourceRef;

/// Fetches the raw bytes of a resource.
///
/// Implementations wrap whatever transport the host uses; failures are
/// reported as [`LoadError`] and are fatal for the resource.
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Loads the bytes behind `resource`.
    async fn load(&self, resource: &ResourceRef) -> Result<Bytes, LoadError>;
}

/// Loader serving a fixed URI → bytes map.
///
/// # Examples
///
/// ```
/// use respipe::pipeline::{ContentLoader, StaticContentLoader};
/// use respipe::resources::{ResourceRef, ResourceType};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let loader = StaticContentLoader::new().with("https://ex/a.css", "body{}");
/// let r = ResourceRef::parse("https://ex/a.css", ResourceType::Css).unwrap();
/// assert_eq!(loader.load(&r).await.unwrap().as_ref(), b"body{}");
/// assert_eq!(loader.load_count(), 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct StaticContentLoader {
    entries: DashMap<String, Bytes>,
    loads: AtomicUsize,
}

impl StaticContentLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    pub fn with(self, uri: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.insert(uri, content);
        self
    }

    /// Adds or replaces an entry.
    pub fn insert(&self, uri: impl Into<String>, content: impl Into<Bytes>) {
        self.entries.insert(uri.into(), content.into());
    }

    /// Removes an entry; later loads of it fail with [`LoadError::NotFound`].
    pub fn remove(&self, uri: &str) -> bool {
        self.entries.remove(uri).is_some()
    }

    /// Returns how many loads were attempted.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentLoader for StaticContentLoader {
    async fn load(&self, resource: &ResourceRef) -> Result<Bytes, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.entries
            .get(resource.uri.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LoadError::NotFound {
                uri: resource.uri.to_string(),
            })
    }
}
