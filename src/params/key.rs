//! Namespaced parameter keys.

use std::fmt;

/// A `(namespace, key)` pair.
///
/// Written as `namespace:key`. A bare `key` belongs to the namespace of the
/// task that uses it.
///
/// # Examples
///
/// ```
/// use respipe::params::NamespaceKey;
///
/// let own = NamespaceKey::parse("timeout", "download");
/// assert_eq!(own.namespace(), "download");
/// assert_eq!(own.key(), "timeout");
///
/// let other = NamespaceKey::parse("validate:min-size", "download");
/// assert_eq!(other.to_string(), "validate:min-size");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceKey {
    namespace: String,
    key: String,
}

impl NamespaceKey {
    /// Creates a key in an explicit namespace.
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Parses `ns:key` or a bare `key` in `default_namespace`.
    ///
    /// Only the first `:` separates; an empty namespace before it also falls
    /// back to `default_namespace`.
    pub fn parse(raw: &str, default_namespace: &str) -> Self {
        match raw.split_once(':') {
            Some((ns, key)) if !ns.is_empty() => Self::new(ns, key),
            Some((_, key)) => Self::new(default_namespace, key),
            None => Self::new(default_namespace, raw),
        }
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the key within the namespace.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("any-variable", "my-namespace", "any-variable")]
    #[case("other:any-other", "other", "any-other")]
    #[case(":leading", "my-namespace", "leading")]
    #[case("a:b:c", "a", "b:c")]
    fn parse_qualifier(#[case] raw: &str, #[case] ns: &str, #[case] key: &str) {
        let parsed = NamespaceKey::parse(raw, "my-namespace");
        assert_eq!(parsed, NamespaceKey::new(ns, key));
    }
}
