//! Built-in tasks.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use super::context::TaskContext;
use super::loader::ContentLoader;
use super::task::{LoadingTask, PreparationTask, ProcessingTask, Task};
use crate::error::PipelineError;
use crate::params::ValueType;
use crate::resources::{ExternalResource, LoadStatus, ResourceRef};

/// Loads a resource through the context's
/// [`ContentLoader`](crate::pipeline::ContentLoader).
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadTask;

impl Task for DownloadTask {
    fn name(&self) -> &str {
        "download"
    }
}

#[async_trait]
impl LoadingTask for DownloadTask {
    async fn load(
        &self,
        ctx: &TaskContext,
        resource: &ResourceRef,
    ) -> Result<ExternalResource, PipelineError> {
        let bytes = ctx.loader().load(resource).await?;
        tracing::debug!(uri = %resource.uri, size = bytes.len(), "downloaded");
        let mut record = ExternalResource::from_ref(resource, bytes);
        record.set_load_status(LoadStatus::Loaded, serde_json::Map::new());
        Ok(record)
    }
}

/// Re-asserts parameters at the rank the task was registered with.
///
/// Properties given with [`with`](Self::with) are created while parameters
/// are declared, so they survive sealing. On `prepare`, they and every key
/// of the task's namespace are written again at the task's rank, which
/// lets them override values from lower-ranked sources.
///
/// Keys may be qualified (`file-size-validator:min-size`) to target
/// another task's namespace.
#[derive(Debug, Clone)]
pub struct PropertiesTask {
    namespace: String,
    properties: IndexMap<String, Value>,
}

impl PropertiesTask {
    /// Creates a task for the `properties` namespace.
    pub fn new() -> Self {
        Self::for_namespace("properties")
    }

    /// Creates a task whose unqualified keys resolve to `namespace`.
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            properties: IndexMap::new(),
        }
    }

    /// Adds a property.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl Default for PropertiesTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for PropertiesTask {
    fn name(&self) -> &str {
        "properties"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn declare_parameters(&self, ctx: &TaskContext) {
        for (key, value) in &self.properties {
            ctx.set_value(key, value.clone());
        }
    }
}

#[async_trait]
impl PreparationTask for PropertiesTask {
    async fn prepare(&self, ctx: &TaskContext, _resource: &ResourceRef) -> Result<(), PipelineError> {
        for (key, value) in &self.properties {
            ctx.set_value(key, value.clone());
        }
        for key in ctx.keys() {
            if let Some(value) = ctx.value(&key) {
                ctx.set_value(&key, value);
            }
        }
        Ok(())
    }
}

/// Parameter holding the minimal expected content size in bytes.
pub const MIN_SIZE_PARAM: &str = "min-size";

const DEFAULT_MIN_SIZE: i64 = 1000;

/// Warns about suspiciously small resources.
///
/// Reads `min-size` (integer, default 1000) from its namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSizeValidator;

impl Task for FileSizeValidator {
    fn name(&self) -> &str {
        "file-size-validator"
    }

    fn declare_parameters(&self, ctx: &TaskContext) {
        ctx.set_type(MIN_SIZE_PARAM, ValueType::Integer);
        ctx.set_value(MIN_SIZE_PARAM, DEFAULT_MIN_SIZE);
    }
}

#[async_trait]
impl ProcessingTask for FileSizeValidator {
    async fn process(
        &self,
        ctx: &TaskContext,
        resource: &mut ExternalResource,
    ) -> Result<(), PipelineError> {
        let threshold = ctx.i64(MIN_SIZE_PARAM).unwrap_or(DEFAULT_MIN_SIZE);
        let size = resource.content_bytes()?.len();
        if i64::try_from(size).unwrap_or(i64::MAX) < threshold {
            ctx.add_warning(format!(
                "{}: byte-count of {size} is less than threshold of {threshold}",
                resource.uri()
            ));
        }
        Ok(())
    }
}
