//! Integration engine: cached resource access and versioned prefetch.
//!
//! [`IntegrationEngine::resource`] serves a resource from the cache's
//! active version, falling back to a live pipeline run.
//! [`IntegrationEngine::prefetch`] fills a new cache version and promotes it:
//!
//! 1. Take the cache lease with a fresh holder id.
//! 2. Load and process the given resources, then every resource they
//!    reference, breadth-first. Each wave runs at most
//!    `max_concurrent_loads` loads at a time.
//! 3. Store each result under the new version. A resource already stored
//!    there is reused, and the references stored with it are followed.
//! 4. Re-check the lease between waves and promote the version if it is
//!    still held.
//! 5. Release the lease, whatever happened.
//!
//! A failing resource is recorded in the [`PrefetchReport`] and does not
//! stop the run.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::{PersistentStore, ResourceCache};
use crate::config::EngineConfig;
use crate::constants::DEFAULT_MAX_CONCURRENT_LOADS;
use crate::error::{CacheError, EngineError, PipelineError, Severity};
use crate::pipeline::{GlobalContext, ProcessingPipeline};
use crate::resources::{ExternalResource, ResourceRef};

const ENGINE_SOURCE: &str = "engine";

/// A resource stored by a prefetch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedResource {
    /// URI of the resource.
    pub uri: Url,
    /// Name of the cache entry written for it.
    pub entry: String,
}

/// A resource a prefetch run could not store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResource {
    /// URI of the resource.
    pub uri: Url,
    /// Why it failed.
    pub error: String,
}

/// Outcome of [`IntegrationEngine::prefetch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchReport {
    /// Version the resources were stored under.
    pub version: String,
    /// Resources loaded and stored by this run.
    pub loaded: Vec<LoadedResource>,
    /// Resources already stored under the version. Their stored references
    /// are still followed.
    pub skipped: Vec<Url>,
    /// Resources that failed.
    pub failed: Vec<FailedResource>,
    /// Whether the version was promoted.
    pub promoted: bool,
}

impl PrefetchReport {
    /// Returns `true` if no resource failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Loaded {
        uri: Url,
        entry: String,
        references: Vec<ResourceRef>,
    },
    Skipped {
        uri: Url,
        references: Vec<ResourceRef>,
    },
    Failed(FailedResource),
}

/// Ties a [`ResourceCache`] to a [`ProcessingPipeline`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use respipe::cache::{InMemoryStore, ResourceCache};
/// use respipe::engine::IntegrationEngine;
/// use respipe::pipeline::{GlobalContext, ProcessingPipeline, StaticContentLoader};
/// use respipe::resources::{ResourceRef, ResourceType};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cache = ResourceCache::new(Arc::new(InMemoryStore::new()), "shop").unwrap();
/// let engine = IntegrationEngine::new(cache, ProcessingPipeline::default());
///
/// let loader = StaticContentLoader::new().with("https://ex/a.js", "let a;");
/// let global = Arc::new(GlobalContext::new("shop", Arc::new(loader)));
/// engine.pipeline().declare_parameters(&global);
///
/// let r = ResourceRef::parse("https://ex/a.js", ResourceType::JavaScript).unwrap();
/// let report = engine.prefetch(&global, vec![r.clone()], "v1").await.unwrap();
/// assert!(report.promoted);
///
/// let mut cached = engine.resource(&global, &r).await.unwrap();
/// assert_eq!(cached.content_text().unwrap(), "let a;");
/// # });
/// ```
pub struct IntegrationEngine<S: PersistentStore> {
    cache: ResourceCache<S>,
    pipeline: ProcessingPipeline,
    max_concurrent_loads: usize,
}

impl<S: PersistentStore> IntegrationEngine<S> {
    /// Creates an engine loading up to 4 resources at a time.
    pub fn new(cache: ResourceCache<S>, pipeline: ProcessingPipeline) -> Self {
        Self {
            cache,
            pipeline,
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
        }
    }

    /// Creates an engine from configuration.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidPath`] if the application id cannot be used
    /// in a cache path, [`CacheError::Config`] if the cache settings are
    /// invalid.
    pub fn from_config(
        config: &EngineConfig,
        store: Arc<S>,
        pipeline: ProcessingPipeline,
    ) -> Result<Self, CacheError> {
        let cache = ResourceCache::new(store, config.application_id.clone())?
            .with_config(config.cache.clone())?;
        Ok(Self::new(cache, pipeline).with_max_concurrent_loads(config.max_concurrent_loads))
    }

    /// Sets the prefetch concurrency (at least 1).
    pub fn with_max_concurrent_loads(mut self, loads: usize) -> Self {
        self.max_concurrent_loads = loads.max(1);
        self
    }

    /// Returns the cache.
    pub fn cache(&self) -> &ResourceCache<S> {
        &self.cache
    }

    /// Returns the pipeline.
    pub fn pipeline(&self) -> &ProcessingPipeline {
        &self.pipeline
    }

    /// Returns the cached record for `resource`, or loads it live.
    ///
    /// Live results are not stored; only [`prefetch`](Self::prefetch)
    /// writes to the cache.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Cache`] if the cache lookup fails, otherwise the
    /// error of the live pipeline run.
    pub async fn resource(
        &self,
        global: &Arc<GlobalContext>,
        resource: &ResourceRef,
    ) -> Result<ExternalResource, PipelineError> {
        if let Some(record) = self.cache.get(&resource.uri).await? {
            tracing::debug!(uri = %resource.uri, "cache hit");
            return Ok(record);
        }
        tracing::debug!(uri = %resource.uri, "cache miss, loading live");
        self.pipeline.load_and_process(global, resource).await
    }

    /// Loads `resources` and everything they reference into `version` and
    /// promotes it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::LeaseUnavailable`] if another holder owns the lease.
    /// - [`EngineError::LeaseLost`] if the lease expired and was taken over;
    ///   the version is not promoted.
    /// - [`EngineError::Cache`] if a lease or promotion step fails.
    pub async fn prefetch(
        &self,
        global: &Arc<GlobalContext>,
        resources: Vec<ResourceRef>,
        version: &str,
    ) -> Result<PrefetchReport, EngineError> {
        let holder = ResourceCache::<S>::generate_holder_id();
        if !self.cache.lock(&holder).await? {
            return Err(EngineError::LeaseUnavailable {
                root: self.cache.root_path().to_string(),
            });
        }
        tracing::debug!(root = self.cache.root_path(), %holder, version, "prefetch started");

        let result = self.prefetch_locked(global, resources, version, &holder).await;

        if let Err(e) = self.cache.release_lock(&holder).await {
            tracing::warn!(root = self.cache.root_path(), %holder, error = %e, "failed to release lease");
        }
        result
    }

    async fn prefetch_locked(
        &self,
        global: &Arc<GlobalContext>,
        resources: Vec<ResourceRef>,
        version: &str,
        holder: &str,
    ) -> Result<PrefetchReport, EngineError> {
        let mut report = PrefetchReport {
            version: version.to_string(),
            ..PrefetchReport::default()
        };
        let mut seen = HashSet::new();
        let mut wave: Vec<ResourceRef> = resources
            .into_iter()
            .filter(|r| seen.insert(r.uri.clone()))
            .collect();

        while !wave.is_empty() {
            let outcomes: Vec<Outcome> = stream::iter(wave)
                .map(|r| self.prefetch_one(global, r, version))
                .buffer_unordered(self.max_concurrent_loads)
                .collect()
                .await;

            let mut next = Vec::new();
            for outcome in outcomes {
                match outcome {
                    Outcome::Loaded {
                        uri,
                        entry,
                        references,
                    } => {
                        report.loaded.push(LoadedResource { uri, entry });
                        next.extend(references.into_iter().filter(|r| seen.insert(r.uri.clone())));
                    },
                    Outcome::Skipped { uri, references } => {
                        report.skipped.push(uri);
                        next.extend(references.into_iter().filter(|r| seen.insert(r.uri.clone())));
                    },
                    Outcome::Failed(failed) => report.failed.push(failed),
                }
            }

            self.ensure_lease(holder).await?;
            wave = next;
        }

        self.cache.set_active_version(Some(version)).await?;
        report.promoted = true;
        tracing::debug!(
            root = self.cache.root_path(),
            version,
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "prefetch promoted"
        );
        Ok(report)
    }

    async fn prefetch_one(
        &self,
        global: &Arc<GlobalContext>,
        resource: ResourceRef,
        version: &str,
    ) -> Outcome {
        match self.cache.get_version(&resource.uri, Some(version)).await {
            Ok(Some(stored)) => {
                return Outcome::Skipped {
                    uri: resource.uri,
                    references: stored.references().to_vec(),
                }
            },
            Ok(None) => {},
            Err(e) => return self.failed(global, resource.uri, e.to_string()),
        }

        // the pipeline records its own diagnostic on failure
        let mut record = match self.pipeline.load_and_process(global, &resource).await {
            Ok(record) => record,
            Err(e) => {
                return Outcome::Failed(FailedResource {
                    uri: resource.uri,
                    error: e.to_string(),
                })
            },
        };

        match self.cache.put(&mut record, Some(version)).await {
            Ok(entry) => Outcome::Loaded {
                uri: resource.uri,
                entry,
                references: record.references().to_vec(),
            },
            Err(e) => self.failed(global, resource.uri, e.to_string()),
        }
    }

    fn failed(&self, global: &GlobalContext, uri: Url, error: String) -> Outcome {
        global.report(Severity::Error, ENGINE_SOURCE, format!("{uri}: {error}"));
        Outcome::Failed(FailedResource { uri, error })
    }

    async fn ensure_lease(&self, holder: &str) -> Result<(), EngineError> {
        if self.cache.refresh_lock(holder).await? {
            return Ok(());
        }
        tracing::warn!(root = self.cache.root_path(), %holder, "lease lost");
        Err(EngineError::LeaseLost {
            root: self.cache.root_path().to_string(),
            holder: holder.to_string(),
        })
    }
}

impl<S: PersistentStore> std::fmt::Debug for IntegrationEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationEngine")
            .field("cache", &self.cache)
            .field("pipeline", &self.pipeline)
            .field("max_concurrent_loads", &self.max_concurrent_loads)
            .finish()
    }
}
