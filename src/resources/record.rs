//! The record of one external resource as it travels through a pipeline run.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::charset::Charset;
use super::content::{ContentParser, ConvertibleContent, Representation, RepresentationKind};
use super::types::ResourceType;
use crate::error::{BoxError, ConversionError, LoadError};

/// Reference to a resource that should be loaded, with the type the referrer
/// expects it to have.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Absolute URI of the resource.
    pub uri: Url,
    /// Type expected by whoever discovered the reference.
    pub expected_type: ResourceType,
}

impl ResourceRef {
    /// Creates a reference.
    pub fn new(uri: Url, expected_type: ResourceType) -> Self {
        Self { uri, expected_type }
    }

    /// Parses an absolute URI into a reference.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidUri`] if `raw` is not an absolute URI.
    ///
    /// # Examples
    ///
    /// ```
    /// use respipe::resources::{ResourceRef, ResourceType};
    ///
    /// let r = ResourceRef::parse("https://ex/app/main.js", ResourceType::JavaScript).unwrap();
    /// assert_eq!(r.uri.path(), "/app/main.js");
    /// assert!(ResourceRef::parse("main.js", ResourceType::Any).is_err());
    /// ```
    pub fn parse(raw: &str, expected_type: ResourceType) -> Result<Self, LoadError> {
        let uri = Url::parse(raw).map_err(|e| LoadError::InvalidUri {
            uri: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(uri, expected_type))
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.uri, self.expected_type)
    }
}

/// How a record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    /// Freshly loaded through a [`ContentLoader`](crate::pipeline::ContentLoader).
    Loaded,
    /// Read back from the resource cache.
    Cached,
}

/// String-keyed JSON metadata. Setting `null` removes an entry.
///
/// # Examples
///
/// ```
/// use respipe::resources::MetadataMap;
/// use serde_json::json;
///
/// let mut meta = MetadataMap::new();
/// meta.set("etag", json!("abc"));
/// meta.set("size", json!(42));
/// assert_eq!(meta.get::<u64>("size"), Some(42));
/// assert_eq!(meta.get::<u64>("etag"), None);
///
/// meta.set("etag", json!(null));
/// assert!(!meta.contains("etag"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataMap(Map<String, Value>);

impl MetadataMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, or removes it when `value` is `null`.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if value.is_null() {
            self.0.shift_remove(&name);
        } else {
            self.0.insert(name, value);
        }
    }

    /// Reads `name` as `T`; `None` if absent or not convertible.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.0
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Returns the raw JSON value of `name`.
    pub fn get_raw(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns `true` if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies every non-null entry of `other` into this map.
    pub fn extend(&mut self, other: MetadataMap) {
        for (name, value) in other.0 {
            self.set(name, value);
        }
    }
}

impl FromIterator<(String, Value)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.set(name, value);
        }
        map
    }
}

/// One external resource: identity, type guess, content, metadata and the
/// references discovered while processing it.
///
/// A record is owned by a single pipeline run and is never shared, so it
/// carries no internal locking.
///
/// # Examples
///
/// ```
/// use respipe::resources::{ExternalResource, ResourceRef, ResourceType};
///
/// let r = ResourceRef::parse("https://ex/app/index.html", ResourceType::Text).unwrap();
/// let mut res = ExternalResource::from_ref(&r, b"<p>hi</p>".to_vec());
///
/// res.set_type(ResourceType::Html);
/// res.set_type(ResourceType::Any);
/// assert_eq!(res.resource_type(), ResourceType::Html);
///
/// res.add_reference("css/site.css", ResourceType::Css).unwrap();
/// assert_eq!(res.references()[0].uri.as_str(), "https://ex/app/css/site.css");
/// assert_eq!(res.content_text().unwrap(), "<p>hi</p>");
/// ```
#[derive(Debug)]
pub struct ExternalResource {
    uri: Url,
    resource_type: ResourceType,
    content: ConvertibleContent,
    metadata: MetadataMap,
    references: Vec<ResourceRef>,
    load_status: Option<LoadStatus>,
    load_status_details: Map<String, Value>,
}

impl ExternalResource {
    /// Creates a record.
    ///
    /// The content's charset starts as the default charset of
    /// `expected_type` (or of [`ResourceType::Any`] when `None`).
    pub fn new(
        uri: Url,
        expected_type: Option<ResourceType>,
        content: impl Into<Representation>,
        metadata: Option<MetadataMap>,
    ) -> Self {
        let resource_type = expected_type.unwrap_or_default();
        Self {
            uri,
            resource_type,
            content: ConvertibleContent::new(content, resource_type.default_charset()),
            metadata: metadata.unwrap_or_default(),
            references: Vec::new(),
            load_status: None,
            load_status_details: Map::new(),
        }
    }

    /// Creates a record for `resource_ref` with freshly loaded bytes.
    pub fn from_ref(resource_ref: &ResourceRef, content: impl Into<Representation>) -> Self {
        Self::new(
            resource_ref.uri.clone(),
            Some(resource_ref.expected_type),
            content,
            None,
        )
    }

    /// Returns the URI identifying this resource.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the current type guess.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Refines the type guess; a less qualified tag never replaces a more
    /// qualified one.
    pub fn set_type(&mut self, candidate: ResourceType) {
        let merged = ResourceType::merge(self.resource_type, candidate);
        tracing::debug!(uri = %self.uri, current = %self.resource_type, %candidate, %merged, "set_type");
        self.resource_type = merged;
    }

    // --- Content ---

    /// Returns the content as bytes.
    ///
    /// # Errors
    ///
    /// See [`ConvertibleContent::bytes`].
    pub fn content_bytes(&mut self) -> Result<Bytes, ConversionError> {
        self.content.bytes()
    }

    /// Returns the content as text.
    ///
    /// # Errors
    ///
    /// See [`ConvertibleContent::text`].
    pub fn content_text(&mut self) -> Result<&str, ConversionError> {
        self.content.text()
    }

    /// Replaces the content with raw bytes.
    pub fn set_content_bytes(&mut self, bytes: impl Into<Bytes>) {
        tracing::debug!(uri = %self.uri, "set_content_bytes");
        self.content.replace_with(Representation::Bytes(bytes.into()));
    }

    /// Replaces the content with text.
    pub fn set_content_text(&mut self, text: impl Into<String>) {
        tracing::debug!(uri = %self.uri, "set_content_text");
        self.content.replace_with(Representation::Text(text.into()));
    }

    /// Replaces the content with a supplier that runs on first access.
    pub fn set_content_supplier<F>(&mut self, kind: RepresentationKind, supplier: F)
    where
        F: FnOnce() -> Result<Representation, BoxError> + Send + Sync + 'static,
    {
        tracing::debug!(uri = %self.uri, %kind, "set_content_supplier");
        self.content.replace_with_supplier(kind, supplier);
    }

    /// Returns the content parsed by `parser`, installing the parsed object
    /// as the authoritative content.
    ///
    /// # Errors
    ///
    /// See [`ConvertibleContent::parsed_mut`].
    pub fn content_parsed_mut<P: ContentParser>(
        &mut self,
        parser: &Arc<P>,
    ) -> Result<&mut P::Output, ConversionError> {
        self.content.parsed_mut(parser)
    }

    /// Replaces the content with an already parsed object.
    pub fn set_content_parsed<P: ContentParser>(&mut self, parser: Arc<P>, value: P::Output) {
        tracing::debug!(uri = %self.uri, "set_content_parsed");
        self.content.replace_with_parsed(parser, value);
    }

    /// Returns the content's charset.
    pub fn charset(&self) -> Charset {
        self.content.charset()
    }

    /// Reinterprets the content under a different charset.
    pub fn set_charset(&mut self, charset: Charset) {
        tracing::debug!(uri = %self.uri, %charset, "set_charset");
        self.content.set_charset(charset);
    }

    /// Borrows the underlying content.
    pub fn content(&self) -> &ConvertibleContent {
        &self.content
    }

    // --- Metadata ---

    /// Sets a metadata entry; `null` removes it.
    pub fn set_metadata(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        tracing::debug!(uri = %self.uri, %name, %value, "set_metadata");
        self.metadata.set(name, value);
    }

    /// Reads a metadata entry as `T`; `None` if absent or of another type.
    pub fn metadata<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.metadata.get(name)
    }

    /// Returns the whole metadata map.
    pub fn metadata_map(&self) -> &MetadataMap {
        &self.metadata
    }

    // --- References ---

    /// Resolves `relative` against this resource's URI and records it as a
    /// reference. Duplicates are kept.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidUri`] if the reference cannot be resolved.
    pub fn add_reference(
        &mut self,
        relative: &str,
        expected_type: ResourceType,
    ) -> Result<&ResourceRef, LoadError> {
        let uri = self.uri.join(relative).map_err(|e| LoadError::InvalidUri {
            uri: relative.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(uri = %self.uri, reference = %uri, %expected_type, "add_reference");
        self.references.push(ResourceRef::new(uri, expected_type));
        let last = self.references.len() - 1;
        Ok(&self.references[last])
    }

    /// Returns the discovered references in discovery order.
    pub fn references(&self) -> &[ResourceRef] {
        &self.references
    }

    // --- Load status ---

    /// Records how this resource was obtained.
    pub fn set_load_status(&mut self, status: LoadStatus, details: Map<String, Value>) {
        self.load_status = Some(status);
        self.load_status_details = details;
    }

    /// Returns how this resource was obtained, if known.
    pub fn load_status(&self) -> Option<LoadStatus> {
        self.load_status
    }

    /// Returns the details recorded with the load status.
    pub fn load_status_details(&self) -> &Map<String, Value> {
        &self.load_status_details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(uri: &str, ty: ResourceType, body: &str) -> ExternalResource {
        let r = ResourceRef::parse(uri, ty).unwrap();
        ExternalResource::from_ref(&r, body.as_bytes().to_vec())
    }

    #[test]
    fn type_is_never_downgraded() {
        let mut res = record("https://ex/a.js", ResourceType::Any, "");
        res.set_type(ResourceType::Text);
        res.set_type(ResourceType::JavaScript);
        res.set_type(ResourceType::Text);
        assert_eq!(res.resource_type(), ResourceType::JavaScript);
    }

    #[test]
    fn unrelated_type_replaces_guess() {
        let mut res = record("https://ex/a", ResourceType::Css, "");
        res.set_type(ResourceType::JavaScript);
        assert_eq!(res.resource_type(), ResourceType::JavaScript);
    }

    #[test]
    fn references_resolve_and_keep_duplicates() {
        let mut res = record("https://ex/app/pages/index.html", ResourceType::Html, "");
        res.add_reference("../js/a.js", ResourceType::JavaScript).unwrap();
        res.add_reference("/img/logo.png", ResourceType::Binary).unwrap();
        res.add_reference("../js/a.js", ResourceType::JavaScript).unwrap();
        let uris: Vec<_> = res.references().iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://ex/app/js/a.js",
                "https://ex/img/logo.png",
                "https://ex/app/js/a.js",
            ]
        );
    }

    #[test]
    fn unresolvable_reference_is_invalid_uri() {
        let mut res = record("https://ex/a.html", ResourceType::Html, "");
        let err = res.add_reference("http://[::1", ResourceType::Any).unwrap_err();
        assert!(matches!(err, LoadError::InvalidUri { .. }));
        assert!(res.references().is_empty());
    }

    #[test]
    fn metadata_null_removes() {
        let mut res = record("https://ex/a", ResourceType::Any, "");
        res.set_metadata("lastModified", json!("2024-01-01"));
        assert_eq!(res.metadata::<String>("lastModified").as_deref(), Some("2024-01-01"));
        assert_eq!(res.metadata::<i64>("lastModified"), None);
        res.set_metadata("lastModified", Value::Null);
        assert!(res.metadata_map().is_empty());
    }

    #[test]
    fn content_mutations_replace_wholesale() {
        let mut res = record("https://ex/a.txt", ResourceType::PlainText, "first");
        assert_eq!(res.content_text().unwrap(), "first");
        res.set_content_text("second");
        assert_eq!(res.content_bytes().unwrap().as_ref(), b"second");
        res.set_content_bytes(Bytes::from_static(b"third"));
        assert_eq!(res.content_text().unwrap(), "third");
    }

    #[test]
    fn charset_follows_type_default_and_can_change() {
        let mut res = record("https://ex/a.txt", ResourceType::Text, "");
        assert_eq!(res.charset(), Charset::Utf8);
        res.set_content_bytes(vec![0xe9]);
        res.set_charset(Charset::Iso8859_1);
        assert_eq!(res.content_text().unwrap(), "é");
    }

    #[test]
    fn load_status_is_recorded() {
        let mut res = record("https://ex/a", ResourceType::Any, "");
        assert_eq!(res.load_status(), None);
        let mut details = Map::new();
        details.insert("cacheVersion".into(), json!("v1"));
        res.set_load_status(LoadStatus::Cached, details);
        assert_eq!(res.load_status(), Some(LoadStatus::Cached));
        assert_eq!(res.load_status_details()["cacheVersion"], json!("v1"));
    }
}
