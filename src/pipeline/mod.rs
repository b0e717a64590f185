//! Resource processing pipeline.
//!
//! A [`ProcessingPipeline`] runs preparation, loading and processing tasks
//! for one resource at a time. Tasks share a [`GlobalContext`] (parameters,
//! loader, diagnostics) through per-task [`TaskContext`]s.

pub mod context;
pub mod loader;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod task;
pub mod tasks;

pub use context::{Diagnostic, GlobalContext, TaskContext};
pub use loader::{ContentLoader, StaticContentLoader};
pub use pipeline::{ProcessingPipeline, ProcessingPipelineBuilder};
pub use task::{LoadingTask, PreparationTask, ProcessingTask, Task};
pub use tasks::{DownloadTask, FileSizeValidator, PropertiesTask, MIN_SIZE_PARAM};
