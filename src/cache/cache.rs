//! Versioned, lease-locked resource cache.
//!
//! One cache root per application holds:
//!
//! ```text
//! {root}                              lock?, lockedSince?, version?
//! └── {escaped uri path}/_entries
//!     └── {sha256 prefix}_{xxx}       uri, version?, writtenAt, type, charset,
//!         │                           references, refreshedAt?
//!         ├── data                    data (binary)
//!         └── metadata                one JSON attribute per metadata entry
//! ```
//!
//! Readers see only entries written under the root's active version. A
//! writer takes the advisory lease, puts entries under a new version and
//! finally promotes that version with
//! [`set_active_version`](ResourceCache::set_active_version). Entries are
//! immutable once written, so promotion is the only step readers observe.
//!
//! An entry only gets its `uri` and `version` once its children exist, so a
//! half-written entry never matches a lookup. When several entries match,
//! the one with the latest `writtenAt` wins.
//!
//! # Lease
//!
//! The lease is a `(holder, lockedSince)` pair on the root. It can be taken
//! when it is free, already held by the caller, or older than the expiry.
//! Expiry compares wall-clock timestamps and is therefore racy under clock
//! skew between writers. Every root update is a compare-and-swap on the
//! root's revision, so two holders can never both win the same free lease.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use url::Url;

use super::path::{cache_root, hash_prefix, lookup_path};
use super::store::{child_path, AttrValue, AttributeChanges, Attributes, PersistentStore, StoreNode};
use crate::config::CacheConfig;
use crate::constants::{
    CACHE_ENTRY_DETAIL, CACHE_VERSION_DETAIL, CHARSET_ATTR, DATA_ATTR, DATA_NODE, LOCKED_SINCE_ATTR,
    LOCK_ATTR, METADATA_NODE, REFERENCES_ATTR, REFRESHED_AT_ATTR, TYPE_ATTR, URI_ATTR, VERSION_ATTR,
    WRITTEN_AT_ATTR,
};
use crate::error::{CacheError, StoreError};
use crate::resources::{
    Charset, ExternalResource, LoadStatus, MetadataMap, Representation, ResourceRef, ResourceType,
};

/// Attempts of a compare-and-swap root update before giving up.
const MAX_ROOT_UPDATE_ATTEMPTS: usize = 8;

type SuffixSource = Arc<dyn Fn() -> u16 + Send + Sync>;

fn random_suffix() -> u16 {
    (uuid::Uuid::new_v4().as_u128() & 0x0fff) as u16
}

/// Blank versions are the same as no version.
fn normalize_version(version: Option<&str>) -> Option<&str> {
    version.filter(|v| !v.trim().is_empty())
}

fn encode_references(references: &[ResourceRef]) -> Value {
    Value::Array(
        references
            .iter()
            .map(|r| {
                let mut object = Map::new();
                object.insert("uri".to_string(), Value::String(r.uri.to_string()));
                object.insert("type".to_string(), Value::String(r.expected_type.name().to_string()));
                Value::Object(object)
            })
            .collect(),
    )
}

/// Entries written before references were stored have none.
fn decode_references(entry: &StoreNode) -> Result<Vec<ResourceRef>, String> {
    let Some(value) = entry.attr(REFERENCES_ATTR) else {
        return Ok(Vec::new());
    };
    let Some(Value::Array(items)) = value.to_json() else {
        return Err("references is not an array".to_string());
    };
    items
        .iter()
        .map(|item| {
            let uri = item
                .get("uri")
                .and_then(Value::as_str)
                .and_then(|raw| Url::parse(raw).ok())
                .ok_or_else(|| format!("malformed reference {item}"))?;
            let expected_type = item
                .get("type")
                .and_then(Value::as_str)
                .and_then(ResourceType::parse)
                .unwrap_or_default();
            Ok(ResourceRef::new(uri, expected_type))
        })
        .collect()
}

enum RootUpdate {
    Missing,
    Declined,
    Applied,
}

/// Cache of resource records for one application.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use respipe::cache::{InMemoryStore, ResourceCache};
/// use respipe::resources::{ExternalResource, ResourceRef, ResourceType};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cache = ResourceCache::new(Arc::new(InMemoryStore::new()), "shop").unwrap();
/// let holder = ResourceCache::<InMemoryStore>::generate_holder_id();
/// assert!(cache.lock(&holder).await.unwrap());
///
/// let r = ResourceRef::parse("https://ex/a.js", ResourceType::JavaScript).unwrap();
/// let mut record = ExternalResource::from_ref(&r, b"let a;".to_vec());
/// cache.put(&mut record, Some("v1")).await.unwrap();
/// assert!(cache.get(&r.uri).await.unwrap().is_none());
///
/// cache.set_active_version(Some("v1")).await.unwrap();
/// let mut hit = cache.get(&r.uri).await.unwrap().unwrap();
/// assert_eq!(hit.content_text().unwrap(), "let a;");
///
/// cache.release_lock(&holder).await.unwrap();
/// # });
/// ```
pub struct ResourceCache<S: PersistentStore> {
    store: Arc<S>,
    application_id: String,
    root: String,
    config: CacheConfig,
    suffix_source: SuffixSource,
}

impl<S: PersistentStore> ResourceCache<S> {
    /// Creates a cache for `application_id` with the default configuration.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidPath`] if the application id cannot be used as a
    /// path segment.
    pub fn new(store: Arc<S>, application_id: impl Into<String>) -> Result<Self, CacheError> {
        let application_id = application_id.into();
        let config = CacheConfig::default();
        let root = cache_root(&config.root_template, &application_id)?;
        Ok(Self {
            store,
            application_id,
            root,
            config,
            suffix_source: Arc::new(random_suffix),
        })
    }

    /// Sets the configuration and recomputes the root path.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] if `config` does not validate.
    pub fn with_config(mut self, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        self.root = cache_root(&config.root_template, &self.application_id)?;
        self.config = config;
        Ok(self)
    }

    /// Replaces the source of the 12-bit entry name suffixes.
    ///
    /// Only the low 12 bits of the returned value are used.
    pub fn with_suffix_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> u16 + Send + Sync + 'static,
    {
        self.suffix_source = Arc::new(source);
        self
    }

    /// Returns a fresh, unique lease holder id.
    pub fn generate_holder_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Returns the root path of this cache.
    pub fn root_path(&self) -> &str {
        &self.root
    }

    /// Returns the application id.
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ---- Lease ----

    /// Takes the lease for `holder`, creating the root if needed.
    ///
    /// Returns `false` if another holder owns a lease younger than the
    /// expiry.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] if the store fails.
    pub async fn lock(&self, holder: &str) -> Result<bool, CacheError> {
        let outcome = self
            .update_root(true, |root| {
                self.can_be_locked(root, holder).then(|| {
                    AttributeChanges::new()
                        .set(LOCK_ATTR, holder)
                        .set(LOCKED_SINCE_ATTR, Utc::now())
                })
            })
            .await?;
        let locked = matches!(outcome, RootUpdate::Applied);
        tracing::debug!(root = %self.root, holder, locked, "lock");
        Ok(locked)
    }

    /// Re-stamps the lease if `holder` still owns it.
    ///
    /// # Errors
    ///
    /// [`CacheError::Consistency`] if the root does not exist.
    pub async fn refresh_lock(&self, holder: &str) -> Result<bool, CacheError> {
        let outcome = self
            .update_root(false, |root| {
                (root.attr_str(LOCK_ATTR) == Some(holder))
                    .then(|| AttributeChanges::new().set(LOCKED_SINCE_ATTR, Utc::now()))
            })
            .await?;
        match outcome {
            RootUpdate::Missing => Err(CacheError::Consistency(format!(
                "cannot refresh lock on {}: root not found",
                self.root
            ))),
            RootUpdate::Declined => {
                tracing::debug!(root = %self.root, holder, "lease no longer held");
                Ok(false)
            },
            RootUpdate::Applied => Ok(true),
        }
    }

    /// Clears the lease if `holder` owns it; otherwise does nothing.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] if the store fails.
    pub async fn release_lock(&self, holder: &str) -> Result<(), CacheError> {
        let outcome = self
            .update_root(false, |root| {
                (root.attr_str(LOCK_ATTR) == Some(holder)).then(|| {
                    AttributeChanges::new()
                        .remove(LOCK_ATTR)
                        .remove(LOCKED_SINCE_ATTR)
                })
            })
            .await?;
        if matches!(outcome, RootUpdate::Applied) {
            tracing::debug!(root = %self.root, holder, "lock released");
        }
        Ok(())
    }

    fn can_be_locked(&self, root: &StoreNode, holder: &str) -> bool {
        let current = root.attr_str(LOCK_ATTR).filter(|h| !h.trim().is_empty());
        let Some(current) = current else {
            return true;
        };
        if current == holder {
            return true;
        }
        let Some(since) = root.attr_timestamp(LOCKED_SINCE_ATTR) else {
            return true;
        };
        let age = (Utc::now() - since).num_seconds();
        let expiry = i64::try_from(self.config.lock_expiry_secs).unwrap_or(i64::MAX);
        age >= expiry
    }

    /// Read-decide-write loop on the root node.
    async fn update_root<F>(&self, create: bool, decide: F) -> Result<RootUpdate, CacheError>
    where
        F: Fn(&StoreNode) -> Option<AttributeChanges> + Send,
    {
        for _ in 0..MAX_ROOT_UPDATE_ATTEMPTS {
            let root = if create {
                self.store.get_or_create(&self.root).await?
            } else {
                match self.store.get(&self.root).await? {
                    Some(root) => root,
                    None => return Ok(RootUpdate::Missing),
                }
            };
            let Some(changes) = decide(&root) else {
                return Ok(RootUpdate::Declined);
            };
            match self
                .store
                .update_attributes_if_revision(&self.root, root.revision, changes)
                .await
            {
                Ok(_) => {
                    self.store.commit().await?;
                    return Ok(RootUpdate::Applied);
                },
                Err(StoreError::RevisionConflict { .. }) => {
                    tracing::debug!(root = %self.root, "root changed concurrently, retrying");
                },
                Err(e) => return Err(e.into()),
            }
        }
        Err(CacheError::Consistency(format!(
            "root {} kept changing during {MAX_ROOT_UPDATE_ATTEMPTS} update attempts",
            self.root
        )))
    }

    // ---- Versions ----

    /// Returns the active version, `None` if unset or if the root is missing.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] if the store fails.
    pub async fn active_version(&self) -> Result<Option<String>, CacheError> {
        Ok(self.store.get(&self.root).await?.and_then(|root| {
            normalize_version(root.attr_str(VERSION_ATTR)).map(str::to_string)
        }))
    }

    /// Promotes `version` (or clears the active version with `None`).
    ///
    /// Entries written under other versions become invisible to
    /// [`get`](Self::get) once this returns.
    ///
    /// # Errors
    ///
    /// [`CacheError::Consistency`] if the root does not exist.
    pub async fn set_active_version(&self, version: Option<&str>) -> Result<(), CacheError> {
        let version = normalize_version(version);
        let outcome = self
            .update_root(false, |root| {
                if normalize_version(root.attr_str(VERSION_ATTR)) == version {
                    return None;
                }
                Some(match version {
                    Some(v) => AttributeChanges::new().set(VERSION_ATTR, v),
                    None => AttributeChanges::new().remove(VERSION_ATTR),
                })
            })
            .await?;
        match outcome {
            RootUpdate::Missing => Err(CacheError::Consistency(format!(
                "cannot set active version: root {} not found",
                self.root
            ))),
            RootUpdate::Declined | RootUpdate::Applied => {
                tracing::debug!(root = %self.root, version = ?version, "active version set");
                Ok(())
            },
        }
    }

    // ---- Entries ----

    /// Returns the record cached for `uri` under the active version.
    ///
    /// Unreadable entries are skipped with a warning.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidPath`] if `uri` cannot be mapped to a path,
    /// [`CacheError::Store`] if the store fails.
    pub async fn get(&self, uri: &Url) -> Result<Option<ExternalResource>, CacheError> {
        let Some(root) = self.store.get(&self.root).await? else {
            return Ok(None);
        };
        let version = normalize_version(root.attr_str(VERSION_ATTR)).map(str::to_string);
        self.get_version(uri, version.as_deref()).await
    }

    /// Returns the record cached for `uri` under an explicit version.
    ///
    /// If several entries match, the most recently written one is returned.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn get_version(
        &self,
        uri: &Url,
        version: Option<&str>,
    ) -> Result<Option<ExternalResource>, CacheError> {
        for entry in self.matching_entries(uri, version).await? {
            match self.read_entry(&entry).await {
                Ok(record) => return Ok(Some(record)),
                Err(CacheError::Corrupt { path, reason }) => {
                    tracing::warn!(%path, %reason, "skipping corrupt cache entry");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Stores `record` under `version` and returns the new entry name.
    ///
    /// The entry is invisible to readers until `version` is promoted. Its
    /// discovered references are stored with it and restored on read.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Conversion`] if the content cannot be turned into bytes.
    /// - [`CacheError::Consistency`] if no free entry name was found.
    /// - [`CacheError::InvalidPath`] / [`CacheError::Store`] as for [`get`](Self::get).
    pub async fn put(
        &self,
        record: &mut ExternalResource,
        version: Option<&str>,
    ) -> Result<String, CacheError> {
        let version = normalize_version(version);
        let payload = record.content_bytes()?;
        let uri = record.uri().clone();
        let lookup = lookup_path(&self.root, &uri)?;
        self.store.get_or_create(&lookup).await?;

        let mut attributes = Attributes::new();
        attributes.insert(TYPE_ATTR.to_string(), record.resource_type().name().into());
        attributes.insert(CHARSET_ATTR.to_string(), record.charset().name().into());
        attributes.insert(
            REFERENCES_ATTR.to_string(),
            AttrValue::Json(encode_references(record.references())),
        );

        let prefix = hash_prefix(uri.as_str());
        let mut created = None;
        for _ in 0..self.config.max_entry_name_attempts {
            let name = format!("{prefix}_{:03x}", (self.suffix_source)() & 0x0fff);
            match self
                .store
                .create_child(&lookup, &name, attributes.clone())
                .await
            {
                Ok(entry) => {
                    created = Some(entry);
                    break;
                },
                Err(StoreError::AlreadyExists { .. }) => {
                    tracing::debug!(%uri, %name, "entry name taken");
                },
                Err(e) => return Err(e.into()),
            }
        }
        let Some(entry) = created else {
            return Err(CacheError::Consistency(format!(
                "could not create a unique entry for {uri} under {lookup} after {} attempts",
                self.config.max_entry_name_attempts
            )));
        };

        let mut data = Attributes::new();
        data.insert(DATA_ATTR.to_string(), AttrValue::Binary(payload));
        self.store.create_child(&entry.path, DATA_NODE, data).await?;

        let metadata: Attributes = record
            .metadata_map()
            .iter()
            .map(|(k, v)| (k.clone(), AttrValue::Json(v.clone())))
            .collect();
        self.store
            .create_child(&entry.path, METADATA_NODE, metadata)
            .await?;

        let mut stamp = AttributeChanges::new()
            .set(URI_ATTR, uri.as_str())
            .set(WRITTEN_AT_ATTR, Utc::now());
        if let Some(v) = version {
            stamp = stamp.set(VERSION_ATTR, v);
        }
        self.store.update_attributes(&entry.path, stamp).await?;
        self.store.commit().await?;

        let name = entry.name().to_string();
        tracing::debug!(%uri, version = ?version, entry = %name, "stored resource");
        Ok(name)
    }

    /// Stamps the entry [`get`](Self::get) would return for `uri` as
    /// refreshed. Returns `false` if there is no such entry.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get).
    pub async fn mark_refreshed(&self, uri: &Url) -> Result<bool, CacheError> {
        let version = self.active_version().await?;
        for entry in self.matching_entries(uri, version.as_deref()).await? {
            match self.read_entry(&entry).await {
                Ok(_) => {},
                Err(CacheError::Corrupt { path, reason }) => {
                    tracing::warn!(%path, %reason, "skipping corrupt cache entry");
                    continue;
                },
                Err(e) => return Err(e),
            }
            self.store
                .update_attributes(
                    &entry.path,
                    AttributeChanges::new().set(REFRESHED_AT_ATTR, Utc::now()),
                )
                .await?;
            self.store.commit().await?;
            tracing::debug!(%uri, entry = %entry.name(), "marked refreshed");
            return Ok(true);
        }
        Ok(false)
    }

    async fn matching_entries(
        &self,
        uri: &Url,
        version: Option<&str>,
    ) -> Result<Vec<StoreNode>, CacheError> {
        let version = normalize_version(version);
        let lookup = lookup_path(&self.root, uri)?;
        let mut entries: Vec<StoreNode> = self
            .store
            .children(&lookup)
            .await?
            .into_iter()
            .filter(|entry| {
                entry.attr_str(URI_ATTR) == Some(uri.as_str())
                    && normalize_version(entry.attr_str(VERSION_ATTR)) == version
            })
            .collect();
        // newest first; entries without a timestamp last, in name order
        entries.sort_by_key(|entry| Reverse(entry.attr_timestamp(WRITTEN_AT_ATTR)));
        Ok(entries)
    }

    async fn read_entry(&self, entry: &StoreNode) -> Result<ExternalResource, CacheError> {
        let corrupt = |reason: &str| CacheError::Corrupt {
            path: entry.path.clone(),
            reason: reason.to_string(),
        };

        let uri = entry
            .attr_str(URI_ATTR)
            .and_then(|raw| Url::parse(raw).ok())
            .ok_or_else(|| corrupt("missing or malformed uri"))?;
        let resource_type = entry
            .attr_str(TYPE_ATTR)
            .and_then(ResourceType::parse)
            .unwrap_or_default();
        let references = decode_references(entry).map_err(|reason| corrupt(&reason))?;

        let payload = self
            .store
            .get(&child_path(&entry.path, DATA_NODE))
            .await?
            .and_then(|data| data.attr(DATA_ATTR).and_then(AttrValue::as_binary).cloned())
            .ok_or_else(|| corrupt("missing data"))?;

        let metadata: MetadataMap = self
            .store
            .get(&child_path(&entry.path, METADATA_NODE))
            .await?
            .map(|node| {
                node.attributes
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
                    .collect()
            })
            .unwrap_or_default();

        let mut record = ExternalResource::new(
            uri,
            Some(resource_type),
            Representation::Bytes(payload),
            Some(metadata),
        );
        if let Some(charset) = entry.attr_str(CHARSET_ATTR).and_then(Charset::parse) {
            record.set_charset(charset);
        }
        for reference in references {
            record
                .add_reference(reference.uri.as_str(), reference.expected_type)
                .map_err(|e| corrupt(&e.to_string()))?;
        }

        let mut details = Map::new();
        details.insert(
            CACHE_ENTRY_DETAIL.to_string(),
            Value::String(entry.name().to_string()),
        );
        if let Some(version) = normalize_version(entry.attr_str(VERSION_ATTR)) {
            details.insert(
                CACHE_VERSION_DETAIL.to_string(),
                Value::String(version.to_string()),
            );
        }
        record.set_load_status(LoadStatus::Cached, details);
        Ok(record)
    }
}

impl<S: PersistentStore> fmt::Debug for ResourceCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("application_id", &self.application_id)
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::cache::InMemoryStore;
    use crate::resources::ResourceRef;

    fn cache() -> ResourceCache<InMemoryStore> {
        ResourceCache::new(Arc::new(InMemoryStore::new()), "app").unwrap()
    }

    fn record(uri: &str, body: &str) -> ExternalResource {
        let r = ResourceRef::parse(uri, ResourceType::Text).unwrap();
        ExternalResource::from_ref(&r, body.as_bytes().to_vec())
    }

    #[test]
    fn root_path_uses_template() {
        let c = cache();
        assert_eq!(c.root_path(), "/var/app-integration/app/files");
        let c = c
            .with_config(CacheConfig::default().with_root_template("/c/{app}"))
            .unwrap();
        assert_eq!(c.root_path(), "/c/app");
    }

    #[test]
    fn with_config_rejects_invalid_templates() {
        for template in ["relative/{app}", "/c/{app}/", "/c/no-placeholder"] {
            let err = cache()
                .with_config(CacheConfig::default().with_root_template(template))
                .unwrap_err();
            assert!(matches!(err, CacheError::Config(_)), "{template}: {err}");
        }
    }

    #[test]
    fn with_config_escapes_application_id() {
        let c = ResourceCache::new(Arc::new(InMemoryStore::new()), "shop_1")
            .unwrap()
            .with_config(CacheConfig::default().with_root_template("/c/{app}"))
            .unwrap();
        assert_eq!(c.root_path(), "/c/shop_5f1");
    }

    #[tokio::test]
    async fn lock_by_same_holder_is_reentrant() {
        let c = cache();
        assert!(c.lock("A").await.unwrap());
        assert!(c.lock("A").await.unwrap());
        assert!(!c.lock("B").await.unwrap());
    }

    #[tokio::test]
    async fn blank_lock_attribute_counts_as_free() {
        let c = cache();
        c.store().get_or_create(c.root_path()).await.unwrap();
        c.store()
            .update_attributes(c.root_path(), AttributeChanges::new().set(LOCK_ATTR, " "))
            .await
            .unwrap();
        assert!(c.lock("B").await.unwrap());
    }

    #[tokio::test]
    async fn lock_without_timestamp_can_be_taken_over() {
        let c = cache();
        assert!(c.lock("A").await.unwrap());
        c.store()
            .update_attributes(c.root_path(), AttributeChanges::new().remove(LOCKED_SINCE_ATTR))
            .await
            .unwrap();
        assert!(c.lock("B").await.unwrap());
    }

    #[tokio::test]
    async fn zero_expiry_lets_anyone_take_over() {
        let c = cache()
            .with_config(CacheConfig::default().with_lock_expiry_secs(0))
            .unwrap();
        assert!(c.lock("A").await.unwrap());
        assert!(c.lock("B").await.unwrap());
        assert!(!c.refresh_lock("A").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_on_missing_root_is_consistency_error() {
        let err = cache().refresh_lock("A").await.unwrap_err();
        assert!(matches!(err, CacheError::Consistency(_)));
    }

    #[tokio::test]
    async fn release_by_other_holder_keeps_lease() {
        let c = cache();
        assert!(c.lock("A").await.unwrap());
        c.release_lock("B").await.unwrap();
        assert!(!c.lock("B").await.unwrap());
        c.release_lock("A").await.unwrap();
        assert!(c.lock("B").await.unwrap());
    }

    #[tokio::test]
    async fn release_on_missing_root_is_noop() {
        cache().release_lock("A").await.unwrap();
    }

    #[tokio::test]
    async fn set_active_version_requires_root() {
        let err = cache().set_active_version(Some("v1")).await.unwrap_err();
        assert!(matches!(err, CacheError::Consistency(_)));
    }

    #[tokio::test]
    async fn blank_version_clears_active_version() {
        let c = cache();
        c.lock("A").await.unwrap();
        c.set_active_version(Some("v1")).await.unwrap();
        assert_eq!(c.active_version().await.unwrap().as_deref(), Some("v1"));
        c.set_active_version(Some("  ")).await.unwrap();
        assert_eq!(c.active_version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unversioned_entries_match_unset_active_version() {
        let c = cache();
        c.lock("A").await.unwrap();
        let mut res = record("https://ex/a.txt", "plain");
        c.put(&mut res, None).await.unwrap();
        assert!(c.get(&"https://ex/a.txt".parse().unwrap()).await.unwrap().is_some());
        c.set_active_version(Some("v1")).await.unwrap();
        assert!(c.get(&"https://ex/a.txt".parse().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entry_name_has_hash_prefix_and_suffix() {
        let c = cache().with_suffix_source(|| 0xfabc);
        let mut res = record("https://ex/a.txt", "x");
        let name = c.put(&mut res, Some("v1")).await.unwrap();
        assert_eq!(name, format!("{}_abc", hash_prefix("https://ex/a.txt")));
    }

    #[tokio::test]
    async fn hit_carries_cached_status_metadata_and_charset() {
        let c = cache();
        c.lock("A").await.unwrap();
        let mut res = record("https://ex/a.txt", "");
        res.set_charset(Charset::Iso8859_1);
        res.set_content_text("café");
        res.set_type(ResourceType::PlainText);
        res.set_metadata("etag", serde_json::json!("abc"));
        let name = c.put(&mut res, Some("v1")).await.unwrap();
        c.set_active_version(Some("v1")).await.unwrap();

        let mut hit = c.get(res.uri()).await.unwrap().unwrap();
        assert_eq!(hit.load_status(), Some(LoadStatus::Cached));
        assert_eq!(hit.load_status_details()[CACHE_ENTRY_DETAIL], Value::String(name));
        assert_eq!(hit.load_status_details()[CACHE_VERSION_DETAIL], "v1");
        assert_eq!(hit.resource_type(), ResourceType::PlainText);
        assert_eq!(hit.metadata::<String>("etag").as_deref(), Some("abc"));
        assert_eq!(hit.charset(), Charset::Iso8859_1);
        assert_eq!(hit.content_text().unwrap(), "café");
    }

    #[tokio::test]
    async fn references_survive_the_cache() {
        let c = cache();
        let mut res = record("https://ex/app/main.css", "@import base.css");
        res.add_reference("base.css", ResourceType::Css).unwrap();
        res.add_reference("https://cdn/x.js", ResourceType::JavaScript).unwrap();
        c.put(&mut res, Some("v1")).await.unwrap();

        let hit = c.get_version(res.uri(), Some("v1")).await.unwrap().unwrap();
        let refs: Vec<(&str, ResourceType)> = hit
            .references()
            .iter()
            .map(|r| (r.uri.as_str(), r.expected_type))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("https://ex/app/base.css", ResourceType::Css),
                ("https://cdn/x.js", ResourceType::JavaScript),
            ]
        );
    }

    #[tokio::test]
    async fn newest_matching_entry_wins() {
        let next = Arc::new(std::sync::atomic::AtomicU16::new(0));
        let c = cache().with_suffix_source({
            let next = Arc::clone(&next);
            move || next.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        });
        let uri: Url = "https://ex/a.txt".parse().unwrap();

        let mut older = record(uri.as_str(), "older");
        let older_name = c.put(&mut older, Some("v1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut newer = record(uri.as_str(), "newer");
        let newer_name = c.put(&mut newer, Some("v1")).await.unwrap();
        // name order alone would pick the older entry
        assert!(older_name < newer_name);

        let mut hit = c.get_version(&uri, Some("v1")).await.unwrap().unwrap();
        assert_eq!(hit.content_text().unwrap(), "newer");
    }

    #[tokio::test]
    async fn entry_is_stamped_after_its_children_exist() {
        let store = Arc::new(StampCheckingStore::default());
        let c = ResourceCache::new(Arc::clone(&store), "app").unwrap();
        let mut res = record("https://ex/a.txt", "x");
        c.put(&mut res, Some("v1")).await.unwrap();

        assert_eq!(
            *store.parent_uri_on_child_create.lock(),
            vec![(DATA_NODE.to_string(), false), (METADATA_NODE.to_string(), false)]
        );
        assert!(c.get_version(res.uri(), Some("v1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unstamped_entry_is_invisible() {
        let c = cache();
        let uri: Url = "https://ex/a.txt".parse().unwrap();
        let lookup = lookup_path(c.root_path(), &uri).unwrap();
        c.store().get_or_create(&lookup).await.unwrap();
        c.store()
            .create_child(&lookup, "0000_000", Attributes::new())
            .await
            .unwrap();
        assert!(c.get_version(&uri, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_references_make_entry_corrupt() {
        let c = cache();
        let mut res = record("https://ex/a.txt", "x");
        let name = c.put(&mut res, Some("v1")).await.unwrap();
        let lookup = lookup_path(c.root_path(), res.uri()).unwrap();
        c.store()
            .update_attributes(
                &child_path(&lookup, &name),
                AttributeChanges::new().set(REFERENCES_ATTR, "not-a-list"),
            )
            .await
            .unwrap();
        assert!(c.get_version(res.uri(), Some("v1")).await.unwrap().is_none());
    }

    /// Records, for each child created under an entry, whether the entry
    /// already carried its `uri` stamp.
    #[derive(Default)]
    struct StampCheckingStore {
        inner: InMemoryStore,
        parent_uri_on_child_create: parking_lot::Mutex<Vec<(String, bool)>>,
    }

    #[async_trait::async_trait]
    impl PersistentStore for StampCheckingStore {
        async fn get(&self, path: &str) -> Result<Option<StoreNode>, StoreError> {
            self.inner.get(path).await
        }

        async fn get_or_create(&self, path: &str) -> Result<StoreNode, StoreError> {
            self.inner.get_or_create(path).await
        }

        async fn create_child(
            &self,
            parent: &str,
            name: &str,
            attributes: Attributes,
        ) -> Result<StoreNode, StoreError> {
            if name == DATA_NODE || name == METADATA_NODE {
                let stamped = self
                    .inner
                    .get(parent)
                    .await?
                    .is_some_and(|p| p.attr(URI_ATTR).is_some());
                self.parent_uri_on_child_create
                    .lock()
                    .push((name.to_string(), stamped));
            }
            self.inner.create_child(parent, name, attributes).await
        }

        async fn children(&self, path: &str) -> Result<Vec<StoreNode>, StoreError> {
            self.inner.children(path).await
        }

        async fn update_attributes(
            &self,
            path: &str,
            changes: AttributeChanges,
        ) -> Result<StoreNode, StoreError> {
            self.inner.update_attributes(path, changes).await
        }

        async fn update_attributes_if_revision(
            &self,
            path: &str,
            expected_revision: u64,
            changes: AttributeChanges,
        ) -> Result<StoreNode, StoreError> {
            self.inner
                .update_attributes_if_revision(path, expected_revision, changes)
                .await
        }
    }

    #[tokio::test]
    async fn corrupt_entry_is_skipped() {
        let c = cache();
        c.lock("A").await.unwrap();
        let uri: Url = "https://ex/a.txt".parse().unwrap();
        let lookup = lookup_path(c.root_path(), &uri).unwrap();
        c.store().get_or_create(&lookup).await.unwrap();
        let mut broken = Attributes::new();
        broken.insert(URI_ATTR.into(), uri.as_str().into());
        broken.insert(VERSION_ATTR.into(), "v1".into());
        c.store().create_child(&lookup, "0000_000", broken).await.unwrap();

        assert!(c.get_version(&uri, Some("v1")).await.unwrap().is_none());

        let mut res = record(uri.as_str(), "ok");
        c.put(&mut res, Some("v1")).await.unwrap();
        let mut hit = c.get_version(&uri, Some("v1")).await.unwrap().unwrap();
        assert_eq!(hit.content_text().unwrap(), "ok");
    }

    #[tokio::test]
    async fn mark_refreshed_stamps_visible_entry() {
        let c = cache();
        c.lock("A").await.unwrap();
        let uri: Url = "https://ex/a.txt".parse().unwrap();
        assert!(!c.mark_refreshed(&uri).await.unwrap());

        let mut res = record(uri.as_str(), "x");
        let name = c.put(&mut res, Some("v1")).await.unwrap();
        assert!(!c.mark_refreshed(&uri).await.unwrap());

        c.set_active_version(Some("v1")).await.unwrap();
        assert!(c.mark_refreshed(&uri).await.unwrap());
        let lookup = lookup_path(c.root_path(), &uri).unwrap();
        let entry = c
            .store()
            .get(&child_path(&lookup, &name))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.attr_timestamp(REFRESHED_AT_ATTR).is_some());
    }

    #[tokio::test]
    async fn unencodable_content_is_conversion_error() {
        let c = cache();
        let mut res = record("https://ex/a.txt", "");
        res.set_charset(Charset::UsAscii);
        res.set_content_text("€");
        let err = c.put(&mut res, Some("v1")).await.unwrap_err();
        assert!(matches!(err, CacheError::Conversion(_)));
    }
}
