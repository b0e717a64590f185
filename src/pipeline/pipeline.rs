//! Task pipeline: prepare, load, process.

use std::fmt;
use std::sync::Arc;

use super::context::{GlobalContext, TaskContext};
use super::task::{LoadingTask, PreparationTask, ProcessingTask, Task};
use super::tasks::DownloadTask;
use crate::error::{PipelineError, Severity};
use crate::params::Ranking;
use crate::resources::{ExternalResource, ResourceRef, ResourceType};

struct Registered<T: ?Sized> {
    task: Arc<T>,
    rank: Ranking,
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            rank: self.rank,
        }
    }
}

/// Ordered set of tasks applied to each resource.
///
/// Build one with [`ProcessingPipeline::builder`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use respipe::pipeline::{
///     FileSizeValidator, GlobalContext, ProcessingPipeline, StaticContentLoader,
/// };
/// use respipe::resources::{ResourceRef, ResourceType};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let loader = StaticContentLoader::new().with("https://ex/a.js", "let a;");
/// let global = Arc::new(GlobalContext::new("shop", Arc::new(loader)));
///
/// let pipeline = ProcessingPipeline::builder()
///     .process(FileSizeValidator)
///     .build();
/// pipeline.declare_parameters(&global);
///
/// let r = ResourceRef::parse("https://ex/a.js", ResourceType::JavaScript).unwrap();
/// let mut record = pipeline.load_and_process(&global, &r).await.unwrap();
/// assert_eq!(record.content_text().unwrap(), "let a;");
/// // 6 bytes is below the default threshold
/// assert_eq!(global.warnings().len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct ProcessingPipeline {
    preparation: Vec<Registered<dyn PreparationTask>>,
    loader: Registered<dyn LoadingTask>,
    processing: Vec<Registered<dyn ProcessingTask>>,
}

impl ProcessingPipeline {
    /// Starts a builder.
    pub fn builder() -> ProcessingPipelineBuilder {
        ProcessingPipelineBuilder::new()
    }

    /// Runs every task's [`declare_parameters`](Task::declare_parameters)
    /// hook at [`Ranking::TaskDefault`], then seals the parameter store.
    ///
    /// Calling it again on an already sealed store only records warnings
    /// for keys that did not exist before.
    pub fn declare_parameters(&self, global: &Arc<GlobalContext>) {
        for step in &self.preparation {
            declare(global, step.task.as_ref());
        }
        declare(global, self.loader.task.as_ref());
        for step in &self.processing {
            declare(global, step.task.as_ref());
        }
        global.params_mut().seal();
        tracing::debug!(app = global.application_id(), tasks = self.len(), "parameters declared");
    }

    /// Loads and processes one resource.
    ///
    /// # Errors
    ///
    /// The first task failure aborts this resource and is also recorded as
    /// an error diagnostic.
    pub async fn load_and_process(
        &self,
        global: &Arc<GlobalContext>,
        resource: &ResourceRef,
    ) -> Result<ExternalResource, PipelineError> {
        let result = self.run(global, resource).await;
        if let Err(err) = &result {
            global.report(Severity::Error, "pipeline", format!("{}: {err}", resource.uri));
        }
        result
    }

    async fn run(
        &self,
        global: &Arc<GlobalContext>,
        resource: &ResourceRef,
    ) -> Result<ExternalResource, PipelineError> {
        for step in &self.preparation {
            let ctx = context(global, step.task.as_ref(), step.rank, resource.expected_type);
            step.task.prepare(&ctx, resource).await?;
        }

        let loader = &self.loader;
        let ctx = context(global, loader.task.as_ref(), loader.rank, resource.expected_type);
        let mut record = loader.task.load(&ctx, resource).await?;

        for step in &self.processing {
            let ctx = context(global, step.task.as_ref(), step.rank, record.resource_type());
            step.task.process(&ctx, &mut record).await?;
        }
        Ok(record)
    }

    /// Returns the number of registered tasks, the loading task included.
    pub fn len(&self) -> usize {
        self.preparation.len() + 1 + self.processing.len()
    }

    /// Always `false`: a pipeline has a loading task.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the task names in execution order.
    pub fn task_names(&self) -> Vec<&str> {
        let preparation = self.preparation.iter().map(|s| s.task.name());
        let loader = std::iter::once(self.loader.task.name());
        let processing = self.processing.iter().map(|s| s.task.name());
        preparation.chain(loader).chain(processing).collect()
    }
}

fn context<T: Task + ?Sized>(
    global: &Arc<GlobalContext>,
    task: &T,
    rank: Ranking,
    resource_type: ResourceType,
) -> TaskContext {
    global.task_context(task.name(), task.namespace(), rank, resource_type)
}

fn declare<T: Task + ?Sized>(global: &Arc<GlobalContext>, task: &T) {
    let ctx = context(global, task, Ranking::TaskDefault, ResourceType::Any);
    task.declare_parameters(&ctx);
}

impl Default for ProcessingPipeline {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("tasks", &self.task_names())
            .finish()
    }
}

/// Builder for [`ProcessingPipeline`].
///
/// Tasks run in registration order. Without an explicit
/// [`loader`](Self::loader), [`DownloadTask`] is used. Tasks write
/// parameters at [`Ranking::Runtime`] unless registered with a rank.
pub struct ProcessingPipelineBuilder {
    preparation: Vec<Registered<dyn PreparationTask>>,
    loader: Option<Registered<dyn LoadingTask>>,
    processing: Vec<Registered<dyn ProcessingTask>>,
}

impl ProcessingPipelineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            preparation: Vec::new(),
            loader: None,
            processing: Vec::new(),
        }
    }

    /// Adds a preparation task.
    pub fn prepare(self, task: impl PreparationTask + 'static) -> Self {
        self.prepare_with_rank(task, Ranking::Runtime)
    }

    /// Adds a preparation task writing parameters at `rank`.
    pub fn prepare_with_rank(mut self, task: impl PreparationTask + 'static, rank: Ranking) -> Self {
        self.preparation.push(Registered {
            task: Arc::new(task),
            rank,
        });
        self
    }

    /// Sets the loading task.
    pub fn loader(mut self, task: impl LoadingTask + 'static) -> Self {
        self.loader = Some(Registered {
            task: Arc::new(task),
            rank: Ranking::Runtime,
        });
        self
    }

    /// Adds a processing task.
    pub fn process(self, task: impl ProcessingTask + 'static) -> Self {
        self.process_with_rank(task, Ranking::Runtime)
    }

    /// Adds a processing task writing parameters at `rank`.
    pub fn process_with_rank(mut self, task: impl ProcessingTask + 'static, rank: Ranking) -> Self {
        self.processing.push(Registered {
            task: Arc::new(task),
            rank,
        });
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> ProcessingPipeline {
        ProcessingPipeline {
            preparation: self.preparation,
            loader: self.loader.unwrap_or_else(|| Registered {
                task: Arc::new(DownloadTask),
                rank: Ranking::Runtime,
            }),
            processing: self.processing,
        }
    }
}

impl Default for ProcessingPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
