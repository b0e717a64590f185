//! Attribute names, node names and defaults shared by the cache and engine.
//!
//! The attribute names form the persisted schema of a cache root. Changing
//! any of them orphans existing cache content.

/// Root attribute holding the current lease holder id.
pub const LOCK_ATTR: &str = "lock";

/// Root attribute holding the timestamp the lease was taken or refreshed.
pub const LOCKED_SINCE_ATTR: &str = "lockedSince";

/// Root and entry attribute holding a version stamp.
///
/// On the root it is the active version; on an entry it is the version the
/// entry was written under.
pub const VERSION_ATTR: &str = "version";

/// Entry attribute holding the full URI of the cached resource.
pub const URI_ATTR: &str = "uri";

/// Entry attribute holding the resource type tag.
pub const TYPE_ATTR: &str = "type";

/// Entry attribute holding the charset of the stored payload.
pub const CHARSET_ATTR: &str = "charset";

/// Entry attribute stamped by [`ResourceCache::mark_refreshed`](crate::cache::ResourceCache::mark_refreshed).
pub const REFRESHED_AT_ATTR: &str = "refreshedAt";

/// Entry attribute holding the time the entry became visible to readers.
pub const WRITTEN_AT_ATTR: &str = "writtenAt";

/// Entry attribute holding the references discovered in the resource, as a
/// JSON array of `{"uri": .., "type": ..}` objects.
pub const REFERENCES_ATTR: &str = "references";

/// Child node of an entry holding the payload.
pub const DATA_NODE: &str = "data";

/// Attribute of the [`DATA_NODE`] holding the payload bytes.
pub const DATA_ATTR: &str = "data";

/// Child node of an entry holding resource metadata as attributes.
pub const METADATA_NODE: &str = "metadata";

/// Leaf node appended to every lookup path; its children are the entries.
pub const ENTRIES_NODE: &str = "_entries";

/// Default root path template. `{app}` is replaced by the application id.
pub const DEFAULT_ROOT_TEMPLATE: &str = "/var/app-integration/{app}/files";

/// Default lease expiry in seconds (5 minutes).
pub const DEFAULT_LOCK_EXPIRY_SECS: u64 = 300;

/// Default number of attempts to find a free entry name before giving up.
pub const DEFAULT_MAX_ENTRY_NAME_ATTEMPTS: usize = 20;

/// Default number of resources a prefetch run loads at the same time.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 4;

/// Maximum length in bytes of one escaped path segment.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Load status detail key naming the cache entry a record came from.
pub const CACHE_ENTRY_DETAIL: &str = "cacheEntry";

/// Load status detail key naming the version a record was read under.
pub const CACHE_VERSION_DETAIL: &str = "cacheVersion";
