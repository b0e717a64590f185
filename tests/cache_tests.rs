//! Integration tests for ResourceCache on top of InMemoryStore.
//!
//! Covers version visibility, lease hand-over after expiry, entry name
//! exhaustion and concurrent writers. Organized into module blocks per
//! concern.

use std::sync::Arc;

use chrono::{Duration, Utc};
use url::Url;

use respipe::cache::{AttributeChanges, InMemoryStore, PersistentStore, ResourceCache};
use respipe::constants::LOCKED_SINCE_ATTR;
use respipe::error::CacheError;
use respipe::resources::{ExternalResource, ResourceType};

fn cache() -> ResourceCache<InMemoryStore> {
    ResourceCache::new(Arc::new(InMemoryStore::new()), "test-app").unwrap()
}

fn record(uri: &str, content: &str) -> ExternalResource {
    ExternalResource::new(
        Url::parse(uri).unwrap(),
        Some(ResourceType::JavaScript),
        content.to_string(),
        None,
    )
}

/// Moves the lease timestamp `secs` seconds into the past.
async fn age_lease(cache: &ResourceCache<InMemoryStore>, secs: i64) {
    cache
        .store()
        .update_attributes(
            cache.root_path(),
            AttributeChanges::new().set(LOCKED_SINCE_ATTR, Utc::now() - Duration::seconds(secs)),
        )
        .await
        .unwrap();
}

// ─── Version Visibility ─────────────────────────────────────────────────────

mod version_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_entries_become_visible_on_promotion() {
        let cache = cache();
        let uri = Url::parse("https://ex/a.js").unwrap();

        assert!(cache.get(&uri).await.unwrap().is_none());

        cache
            .put(&mut record("https://ex/a.js", "let a = 1;"), Some("v1"))
            .await
            .unwrap();
        assert!(cache.get(&uri).await.unwrap().is_none());

        cache.set_active_version(Some("v1")).await.unwrap();
        let mut hit = cache.get(&uri).await.unwrap().unwrap();
        assert_eq!(hit.content_text().unwrap(), "let a = 1;");
        assert_eq!(hit.resource_type(), ResourceType::JavaScript);

        cache.set_active_version(Some("v2")).await.unwrap();
        assert!(cache.get(&uri).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_versions_are_isolated() {
        let cache = cache();
        let uri = Url::parse("https://ex/a.js").unwrap();
        cache
            .put(&mut record("https://ex/a.js", "old"), Some("v1"))
            .await
            .unwrap();
        cache
            .put(&mut record("https://ex/a.js", "new"), Some("v2"))
            .await
            .unwrap();

        cache.set_active_version(Some("v1")).await.unwrap();
        assert_eq!(
            cache.get(&uri).await.unwrap().unwrap().content_text().unwrap(),
            "old"
        );
        cache.set_active_version(Some("v2")).await.unwrap();
        assert_eq!(
            cache.get(&uri).await.unwrap().unwrap().content_text().unwrap(),
            "new"
        );
        assert_eq!(cache.active_version().await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_query_strings_are_separate_resources() {
        let cache = cache();
        cache
            .put(&mut record("https://ex/a.js?lang=de", "de"), Some("v1"))
            .await
            .unwrap();
        cache
            .put(&mut record("https://ex/a.js?lang=en", "en"), Some("v1"))
            .await
            .unwrap();
        cache.set_active_version(Some("v1")).await.unwrap();

        let de = Url::parse("https://ex/a.js?lang=de").unwrap();
        let plain = Url::parse("https://ex/a.js").unwrap();
        assert_eq!(
            cache.get(&de).await.unwrap().unwrap().content_text().unwrap(),
            "de"
        );
        assert!(cache.get(&plain).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_version_ignores_active_version() {
        let cache = cache();
        let uri = Url::parse("https://ex/a.js").unwrap();
        cache
            .put(&mut record("https://ex/a.js", "draft"), Some("next"))
            .await
            .unwrap();
        assert!(cache.get(&uri).await.unwrap().is_none());
        assert!(cache.get_version(&uri, Some("next")).await.unwrap().is_some());
    }
}

// ─── Lease ──────────────────────────────────────────────────────────────────

mod lease_tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let cache = cache();
        assert!(cache.lock("A").await.unwrap());
        assert!(!cache.lock("B").await.unwrap());

        age_lease(&cache, 301).await;

        assert!(cache.lock("B").await.unwrap());
        assert!(!cache.refresh_lock("A").await.unwrap());
        assert!(cache.refresh_lock("B").await.unwrap());
    }

    #[tokio::test]
    async fn test_young_lease_is_kept() {
        let cache = cache();
        assert!(cache.lock("A").await.unwrap());
        age_lease(&cache, 200).await;
        assert!(!cache.lock("B").await.unwrap());
        assert!(cache.refresh_lock("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let cache = cache();
        assert!(cache.lock("A").await.unwrap());
        cache.release_lock("A").await.unwrap();
        cache.release_lock("A").await.unwrap();
        assert!(cache.lock("B").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_lock_has_single_winner() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.lock(&format!("holder-{i}")).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

// ─── Entry Names ────────────────────────────────────────────────────────────

mod entry_name_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_exhausted_names_are_consistency_error() {
        let cache = cache().with_suffix_source(|| 0x2a);
        cache
            .put(&mut record("https://ex/a.js", "one"), Some("v1"))
            .await
            .unwrap();

        let err = cache
            .put(&mut record("https://ex/a.js", "two"), Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Consistency(_)));
    }

    #[tokio::test]
    async fn test_concurrent_puts_get_distinct_names() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .put(&mut record("https://ex/a.js", &format!("v{i}")), Some("v1"))
                        .await
                })
            })
            .collect();

        let mut names = std::collections::HashSet::new();
        let mut failures = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(name) => {
                    names.insert(name);
                },
                Err(CacheError::Consistency(_)) => failures += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(names.len() + failures, 10);
    }

    #[tokio::test]
    async fn test_invalid_path_segment_is_rejected() {
        let cache = cache();
        let err = cache
            .put(
                &mut record(&format!("https://ex/{}", "x".repeat(300)), "long"),
                Some("v1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidPath { .. }));
    }
}
