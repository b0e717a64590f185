//! Pipeline task contracts.
//!
//! A pipeline runs three kinds of tasks per resource, in order: every
//! [`PreparationTask`], then exactly one [`LoadingTask`], then every
//! [`ProcessingTask`]. Each task gets its own [`TaskContext`] whose
//! namespace defaults to the task name.

use async_trait::async_trait;

use super::context::TaskContext;
use crate::error::PipelineError;
use crate::resources::{ExternalResource, ResourceRef};

/// Behavior shared by all task kinds.
pub trait Task: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Namespace unqualified parameter keys resolve to.
    fn namespace(&self) -> &str {
        self.name()
    }

    /// Declares parameter types and defaults.
    ///
    /// Called once per pipeline, before the parameter store is sealed. The
    /// context writes at [`Ranking::TaskDefault`](crate::params::Ranking).
    fn declare_parameters(&self, _ctx: &TaskContext) {}
}

/// Runs before the resource is loaded.
#[async_trait]
pub trait PreparationTask: Task {
    /// Prepares for loading `resource`.
    async fn prepare(&self, ctx: &TaskContext, resource: &ResourceRef)
        -> Result<(), PipelineError>;
}

/// Produces the record of a resource.
#[async_trait]
pub trait LoadingTask: Task {
    /// Loads `resource` into a record.
    async fn load(
        &self,
        ctx: &TaskContext,
        resource: &ResourceRef,
    ) -> Result<ExternalResource, PipelineError>;
}

/// Transforms or validates a loaded record.
#[async_trait]
pub trait ProcessingTask: Task {
    /// Processes `resource` in place.
    async fn process(
        &self,
        ctx: &TaskContext,
        resource: &mut ExternalResource,
    ) -> Result<(), PipelineError>;
}
