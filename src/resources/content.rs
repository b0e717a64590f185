//! Lazy multi-representation content.
//!
//! [`ConvertibleContent`] holds exactly one authoritative representation of a
//! payload: raw bytes, text, a parsed object, or a not-yet-run supplier of
//! bytes or text. The other views are derived on demand and cached until the
//! next mutation. Every mutation (new content, new parsed object, new
//! charset) replaces the authoritative representation wholesale and drops
//! all derived views, so a stale view can never be observed.
//!
//! ```text
//!            replace_with / replace_with_supplier / replace_with_parsed
//!                          │
//!        ┌─────────────────▼──────────────────┐
//!        │ source: Bytes | Text | Parsed |    │──► derived_text  (cached)
//!        │         Lazy | Poisoned            │──► derived_bytes (cached)
//!        └────────────────────────────────────┘
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::charset::Charset;
use crate::error::{BoxError, ConversionError};

/// The kind of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepresentationKind {
    /// Raw bytes.
    Bytes,
    /// Decoded text.
    Text,
    /// A parsed object produced by a [`ContentParser`].
    Parsed,
}

impl fmt::Display for RepresentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes => write!(f, "bytes"),
            Self::Text => write!(f, "text"),
            Self::Parsed => write!(f, "parsed object"),
        }
    }
}

/// A plain (unparsed) representation used to install new content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    /// Raw bytes, interpreted with the content's charset.
    Bytes(Bytes),
    /// Text.
    Text(String),
}

impl Representation {
    /// Returns the kind of this representation.
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Self::Bytes(_) => RepresentationKind::Bytes,
            Self::Text(_) => RepresentationKind::Text,
        }
    }
}

impl From<Bytes> for Representation {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Representation {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Representation {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Representation {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Representation {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Parses text into a structured object and serializes it back.
///
/// A parser is registered with the content together with the object it
/// produced, so the object can be turned back into text or bytes when a
/// later stage asks for those views.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use respipe::resources::{Charset, ContentParser, ConvertibleContent, JsonParser};
///
/// let mut content = ConvertibleContent::new("{\"a\":1}", Charset::Utf8);
/// let parser = Arc::new(JsonParser);
/// let value = content.parsed_mut(&parser).unwrap();
/// value["a"] = serde_json::json!(2);
/// assert_eq!(content.text().unwrap(), "{\"a\":2}");
/// ```
pub trait ContentParser: Send + Sync + 'static {
    /// The parsed object type.
    type Output: Send + Sync + 'static;

    /// Parses text into an object.
    fn parse(&self, text: &str) -> Result<Self::Output, BoxError>;

    /// Serializes an object back into text.
    fn serialize(&self, value: &Self::Output) -> Result<String, BoxError>;
}

/// Parser for JSON content, producing [`serde_json::Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl ContentParser for JsonParser {
    type Output = serde_json::Value;

    fn parse(&self, text: &str) -> Result<Self::Output, BoxError> {
        Ok(serde_json::from_str(text)?)
    }

    fn serialize(&self, value: &Self::Output) -> Result<String, BoxError> {
        Ok(serde_json::to_string(value)?)
    }
}

/// Type-erased parsed object together with the parser that can serialize it.
trait ParsedObject: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn to_text(&self) -> Result<String, BoxError>;
}

struct ParsedValue<P: ContentParser> {
    parser: Arc<P>,
    value: P::Output,
}

impl<P: ContentParser> ParsedObject for ParsedValue<P> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn to_text(&self) -> Result<String, BoxError> {
        self.parser.serialize(&self.value)
    }
}

type Supplier = Box<dyn FnOnce() -> Result<Representation, BoxError> + Send + Sync>;

enum Source {
    Bytes(Bytes),
    Text(String),
    Parsed(Box<dyn ParsedObject>),
    Lazy {
        kind: RepresentationKind,
        supplier: Supplier,
    },
    /// A supplier failed; every access reports the same failure.
    Poisoned {
        kind: RepresentationKind,
        reason: String,
    },
}

impl Source {
    fn kind(&self) -> RepresentationKind {
        match self {
            Self::Bytes(_) => RepresentationKind::Bytes,
            Self::Text(_) => RepresentationKind::Text,
            Self::Parsed(_) => RepresentationKind::Parsed,
            Self::Lazy { kind, .. } | Self::Poisoned { kind, .. } => *kind,
        }
    }
}

impl From<Representation> for Source {
    fn from(repr: Representation) -> Self {
        match repr {
            Representation::Bytes(b) => Self::Bytes(b),
            Representation::Text(t) => Self::Text(t),
        }
    }
}

/// Content with one authoritative representation and lazily derived views.
///
/// Not shared between pipeline runs; owned by one
/// [`ExternalResource`](super::ExternalResource) at a time.
///
/// # Examples
///
/// ```
/// use respipe::resources::{Charset, ConvertibleContent};
///
/// let mut content = ConvertibleContent::new(b"caf\xe9".to_vec(), Charset::Iso8859_1);
/// assert_eq!(content.text().unwrap(), "café");
///
/// content.replace_with("thé");
/// assert_eq!(content.bytes().unwrap().as_ref(), b"th\xe9");
/// ```
pub struct ConvertibleContent {
    source: Source,
    charset: Charset,
    derived_text: Option<String>,
    derived_bytes: Option<Bytes>,
}

impl ConvertibleContent {
    /// Creates content from an initial representation.
    pub fn new(initial: impl Into<Representation>, charset: Charset) -> Self {
        Self {
            source: initial.into().into(),
            charset,
            derived_text: None,
            derived_bytes: None,
        }
    }

    /// Returns the kind of the authoritative representation.
    ///
    /// For a supplier that has not run yet this is its declared kind.
    pub fn kind(&self) -> RepresentationKind {
        self.source.kind()
    }

    /// Returns the charset used to convert between bytes and text.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Installs a new authoritative representation and drops derived views.
    pub fn replace_with(&mut self, repr: impl Into<Representation>) {
        self.install(repr.into().into());
    }

    /// Installs a supplier that produces the content on first access.
    ///
    /// The supplier runs at most once. Its output must be of the declared
    /// `kind` ([`RepresentationKind::Bytes`] or [`RepresentationKind::Text`]).
    pub fn replace_with_supplier<F>(&mut self, kind: RepresentationKind, supplier: F)
    where
        F: FnOnce() -> Result<Representation, BoxError> + Send + Sync + 'static,
    {
        self.install(Source::Lazy {
            kind,
            supplier: Box::new(supplier),
        });
    }

    /// Installs an already parsed object as the authoritative representation.
    pub fn replace_with_parsed<P: ContentParser>(&mut self, parser: Arc<P>, value: P::Output) {
        self.install(Source::Parsed(Box::new(ParsedValue { parser, value })));
    }

    /// Re-wraps the same source under a different charset.
    ///
    /// Bytes are reinterpreted on the next text access; text and parsed
    /// objects are encoded with the new charset on the next bytes access.
    pub fn set_charset(&mut self, charset: Charset) {
        self.charset = charset;
        self.clear_derived();
    }

    /// Returns the content as bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] if the text or parsed object cannot be
    /// encoded with the current charset, or a supplier failed.
    pub fn bytes(&mut self) -> Result<Bytes, ConversionError> {
        self.materialize(RepresentationKind::Bytes)?;
        if let Source::Bytes(bytes) = &self.source {
            return Ok(bytes.clone());
        }
        if let Some(bytes) = &self.derived_bytes {
            return Ok(bytes.clone());
        }

        let from = self.source.kind();
        let text = match &self.source {
            Source::Text(text) => text.clone(),
            _ => self.text()?.to_owned(),
        };
        let encoded = self.charset.encode(&text).map_err(|reason| {
            ConversionError::new(from, RepresentationKind::Bytes, self.charset, reason)
        })?;
        let bytes = Bytes::from(encoded);
        self.derived_bytes = Some(bytes.clone());
        Ok(bytes)
    }

    /// Returns the content as text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] if the bytes are not valid in the
    /// current charset, the parsed object cannot be serialized, or a
    /// supplier failed.
    pub fn text(&mut self) -> Result<&str, ConversionError> {
        self.materialize(RepresentationKind::Text)?;
        if self.derived_text.is_none() {
            let charset = self.charset;
            let fail = |from, reason: String| {
                ConversionError::new(from, RepresentationKind::Text, charset, reason)
            };
            self.derived_text = match &self.source {
                Source::Bytes(bytes) => Some(
                    charset
                        .decode(bytes)
                        .map_err(|r| fail(RepresentationKind::Bytes, r))?,
                ),
                Source::Parsed(parsed) => Some(
                    parsed
                        .to_text()
                        .map_err(|e| fail(RepresentationKind::Parsed, e.to_string()))?,
                ),
                _ => None,
            };
        }

        match (&self.source, &self.derived_text) {
            (Source::Text(text), _) => Ok(text),
            (_, Some(text)) => Ok(text),
            (source, None) => Err(ConversionError::new(
                source.kind(),
                RepresentationKind::Text,
                self.charset,
                "content is not materialized",
            )),
        }
    }

    /// Returns the parsed object, parsing and installing it if needed.
    ///
    /// If the authoritative representation is not already an object produced
    /// by a parser of type `P`, the text view is parsed and the object becomes
    /// the new authoritative representation. Derived views are dropped
    /// because the caller may mutate the object.
    ///
    /// # Errors
    ///
    /// Returns a [`ConversionError`] if the text view cannot be produced or
    /// the parser rejects it.
    pub fn parsed_mut<P: ContentParser>(
        &mut self,
        parser: &Arc<P>,
    ) -> Result<&mut P::Output, ConversionError> {
        let installed = matches!(
            &self.source,
            Source::Parsed(parsed) if parsed.as_any().is::<ParsedValue<P>>()
        );
        if !installed {
            let from = self.source.kind();
            let charset = self.charset;
            let value = parser.parse(self.text()?).map_err(|e| {
                ConversionError::new(from, RepresentationKind::Parsed, charset, e.to_string())
            })?;
            self.source = Source::Parsed(Box::new(ParsedValue {
                parser: Arc::clone(parser),
                value,
            }));
        }
        self.clear_derived();

        let charset = self.charset;
        match &mut self.source {
            Source::Parsed(parsed) => parsed
                .as_any_mut()
                .downcast_mut::<ParsedValue<P>>()
                .map(|pv| &mut pv.value)
                .ok_or_else(|| {
                    ConversionError::new(
                        RepresentationKind::Parsed,
                        RepresentationKind::Parsed,
                        charset,
                        "parsed object has an unexpected type",
                    )
                }),
            source => Err(ConversionError::new(
                source.kind(),
                RepresentationKind::Parsed,
                charset,
                "content is not parsed",
            )),
        }
    }

    /// Borrows the parsed object if it is authoritative and was produced by
    /// a parser of type `P`.
    pub fn parsed<P: ContentParser>(&self) -> Option<&P::Output> {
        match &self.source {
            Source::Parsed(parsed) => parsed
                .as_any()
                .downcast_ref::<ParsedValue<P>>()
                .map(|pv| &pv.value),
            _ => None,
        }
    }

    fn install(&mut self, source: Source) {
        self.source = source;
        self.clear_derived();
    }

    fn clear_derived(&mut self) {
        self.derived_text = None;
        self.derived_bytes = None;
    }

    /// Runs a pending supplier; reports a poisoned supplier.
    fn materialize(&mut self, requested: RepresentationKind) -> Result<(), ConversionError> {
        match &self.source {
            Source::Lazy { .. } => {},
            Source::Poisoned { kind, reason } => {
                return Err(ConversionError::new(
                    *kind,
                    requested,
                    self.charset,
                    reason.clone(),
                ));
            },
            _ => return Ok(()),
        }

        let placeholder = Source::Bytes(Bytes::new());
        let Source::Lazy { kind, supplier } = std::mem::replace(&mut self.source, placeholder)
        else {
            return Ok(());
        };

        let outcome = supplier()
            .map_err(|e| format!("content supplier failed: {e}"))
            .and_then(|repr| {
                if repr.kind() == kind {
                    Ok(repr)
                } else {
                    Err(format!(
                        "content supplier declared {kind} but produced {}",
                        repr.kind()
                    ))
                }
            });

        match outcome {
            Ok(repr) => {
                self.source = repr.into();
                Ok(())
            },
            Err(reason) => {
                tracing::debug!(%kind, %reason, "content supplier poisoned");
                self.source = Source::Poisoned {
                    kind,
                    reason: reason.clone(),
                };
                Err(ConversionError::new(kind, requested, self.charset, reason))
            },
        }
    }
}

impl fmt::Debug for ConvertibleContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertibleContent")
            .field("kind", &self.source.kind())
            .field("charset", &self.charset)
            .field("has_derived_text", &self.derived_text.is_some())
            .field("has_derived_bytes", &self.derived_bytes.is_some())
            .finish()
    }
}
