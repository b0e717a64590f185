//! External resources: type tags, charsets, convertible content and the
//! per-resource record.

pub mod charset;
pub mod content;
pub mod record;
pub mod types;

pub use charset::Charset;
pub use content::{
    ContentParser, ConvertibleContent, JsonParser, Representation, RepresentationKind,
};
pub use record::{ExternalResource, LoadStatus, MetadataMap, ResourceRef};
pub use types::{ResourceType, UnknownResourceType};
