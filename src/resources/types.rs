//! Content-type tags and their qualification lattice.
//!
//! Every [`ResourceType`] has at most one less-qualified parent. Walking the
//! parents always ends at [`ResourceType::Any`]:
//!
//! ```text
//! any
//! ├── binary
//! └── text
//!     ├── plain-text
//!     ├── application-properties
//!     ├── cache-manifest
//!     ├── javascript
//!     ├── css
//!     ├── html
//!     └── html-snippet
//! ```
//!
//! Pipeline stages refine a resource's type as they learn more about it.
//! [`ResourceType::merge`] makes sure a guess is never replaced by a less
//! specific one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::charset::Charset;

/// Content-type tag of an external resource.
///
/// # Examples
///
/// ```
/// use respipe::resources::ResourceType;
///
/// assert!(ResourceType::JavaScript.is_specialization_of(ResourceType::Text));
/// assert!(ResourceType::JavaScript.is_more_qualified_than(ResourceType::Any));
/// assert_eq!(ResourceType::parse("html-snippet"), Some(ResourceType::HtmlSnippet));
/// assert_eq!(ResourceType::Css.to_string(), "css");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Nothing is known about the content.
    Any,
    /// Binary content (images, fonts, ...).
    Binary,
    /// Some kind of text.
    Text,
    /// Unstructured plain text.
    PlainText,
    /// A Java-style `.properties` file.
    ApplicationProperties,
    /// An HTML5 application cache manifest.
    CacheManifest,
    /// JavaScript source.
    JavaScript,
    /// A CSS stylesheet.
    Css,
    /// A complete HTML document.
    Html,
    /// A fragment of an HTML document.
    HtmlSnippet,
}

/// One row of the lattice table.
struct TypeInfo {
    name: &'static str,
    parent: Option<ResourceType>,
    charset: Charset,
    is_document: bool,
}

impl ResourceType {
    /// All tags, root first.
    pub const ALL: [ResourceType; 10] = [
        Self::Any,
        Self::Binary,
        Self::Text,
        Self::PlainText,
        Self::ApplicationProperties,
        Self::CacheManifest,
        Self::JavaScript,
        Self::Css,
        Self::Html,
        Self::HtmlSnippet,
    ];

    const fn info(self) -> TypeInfo {
        const fn row(
            name: &'static str,
            parent: Option<ResourceType>,
            is_document: bool,
        ) -> TypeInfo {
            TypeInfo {
                name,
                parent,
                charset: Charset::Utf8,
                is_document,
            }
        }

        match self {
            Self::Any => row("any", None, false),
            Self::Binary => row("binary", Some(Self::Any), false),
            Self::Text => row("text", Some(Self::Any), false),
            Self::PlainText => row("plain-text", Some(Self::Text), false),
            Self::ApplicationProperties => {
                row("application-properties", Some(Self::Text), false)
            },
            Self::CacheManifest => row("cache-manifest", Some(Self::Text), false),
            Self::JavaScript => row("javascript", Some(Self::Text), false),
            Self::Css => row("css", Some(Self::Text), false),
            Self::Html => row("html", Some(Self::Text), true),
            Self::HtmlSnippet => row("html-snippet", Some(Self::Text), true),
        }
    }

    /// Returns the kebab-case name of the tag.
    pub const fn name(self) -> &'static str {
        self.info().name
    }

    /// Returns the less-qualified parent, `None` for [`ResourceType::Any`].
    pub const fn parent(self) -> Option<ResourceType> {
        self.info().parent
    }

    /// Returns the charset assumed for content of this type until told otherwise.
    pub const fn default_charset(self) -> Charset {
        self.info().charset
    }

    /// Returns `true` for HTML documents and snippets.
    pub const fn is_document(self) -> bool {
        self.info().is_document
    }

    /// Iterates over the strict ancestors of this tag, nearest first.
    pub fn ancestors(self) -> impl Iterator<Item = ResourceType> {
        std::iter::successors(self.parent(), |t| t.parent())
    }

    /// Returns `true` if `other` is a strict ancestor of this tag.
    ///
    /// ```
    /// use respipe::resources::ResourceType;
    ///
    /// assert!(ResourceType::Html.is_specialization_of(ResourceType::Any));
    /// assert!(!ResourceType::Html.is_specialization_of(ResourceType::Html));
    /// assert!(!ResourceType::Html.is_specialization_of(ResourceType::Binary));
    /// ```
    pub fn is_specialization_of(self, other: ResourceType) -> bool {
        self.ancestors().any(|t| t == other)
    }

    /// Returns `true` if this tag equals `other` or specializes it.
    pub fn is_same_or_specialization_of(self, other: ResourceType) -> bool {
        self == other || self.is_specialization_of(other)
    }

    /// Returns `true` if this tag is strictly more specific than `other`.
    ///
    /// Unrelated tags (e.g. `css` and `javascript`) are not more qualified
    /// than each other, which keeps the relation antisymmetric.
    pub fn is_more_qualified_than(self, other: ResourceType) -> bool {
        self.is_specialization_of(other)
    }

    /// Combines the current type guess with a candidate.
    ///
    /// Keeps `current` if it is more qualified than `candidate`; otherwise
    /// the candidate wins, including when the two are unrelated.
    ///
    /// ```
    /// use respipe::resources::ResourceType;
    ///
    /// assert_eq!(ResourceType::merge(ResourceType::Css, ResourceType::Text), ResourceType::Css);
    /// assert_eq!(ResourceType::merge(ResourceType::Text, ResourceType::Css), ResourceType::Css);
    /// assert_eq!(ResourceType::merge(ResourceType::Css, ResourceType::Html), ResourceType::Html);
    /// ```
    pub fn merge(current: ResourceType, candidate: ResourceType) -> ResourceType {
        if current.is_more_qualified_than(candidate) {
            current
        } else {
            candidate
        }
    }

    /// Parses a tag name, tolerating case and `-`/`_` differences.
    ///
    /// Returns `None` for blank or unknown names.
    ///
    /// ```
    /// use respipe::resources::ResourceType;
    ///
    /// assert_eq!(ResourceType::parse(" JavaScript "), Some(ResourceType::JavaScript));
    /// assert_eq!(ResourceType::parse("PLAIN_TEXT"), Some(ResourceType::PlainText));
    /// assert_eq!(ResourceType::parse(""), None);
    /// assert_eq!(ResourceType::parse("image/png"), None);
    /// ```
    pub fn parse(name: &str) -> Option<ResourceType> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        if normalized.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|t| t.name() == normalized)
    }
}

impl Default for ResourceType {
    fn default() -> Self {
        Self::Any
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned by [`ResourceType::from_str`] for unknown names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type: {0}")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom(UnknownResourceType(raw)))
    }
}
