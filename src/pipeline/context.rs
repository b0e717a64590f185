//! Run-wide and per-task contexts.
//!
//! [`GlobalContext`] is shared by every task of a pipeline run (and by all
//! runs of a prefetch): it owns the parameter store, the content loader and
//! the diagnostics log. [`TaskContext`] scopes it to one task: unqualified
//! keys resolve to the task's namespace, writes carry the task's
//! [`Ranking`], and parameter failures are recorded as diagnostics
//! attributed to the task instead of being returned.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use respipe::params::Ranking;
//! use respipe::pipeline::{GlobalContext, StaticContentLoader};
//! use respipe::resources::ResourceType;
//! use serde_json::json;
//!
//! let global = Arc::new(GlobalContext::new("shop", Arc::new(StaticContentLoader::new())));
//! let ctx = global.task_context("download", "download", Ranking::Runtime, ResourceType::Any);
//!
//! ctx.set_value("timeout", json!(30));
//! assert_eq!(ctx.i64("timeout"), Some(30));
//!
//! // wrong type: warning, no value
//! assert_eq!(ctx.string("timeout"), None);
//! assert_eq!(global.warnings().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::loader::ContentLoader;
use crate::error::{ParameterError, Severity};
use crate::params::{NamespaceKey, ParameterStore, Ranking, ValueType};
use crate::resources::ResourceType;

/// A warning or error reported during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// How serious it is.
    pub severity: Severity,
    /// Who reported it (task name or `engine`).
    pub source: String,
    /// What happened.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.source, self.message)
    }
}

/// State shared by all tasks of a run.
pub struct GlobalContext {
    application_id: String,
    loader: Arc<dyn ContentLoader>,
    params: RwLock<ParameterStore>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl GlobalContext {
    /// Creates a context with an empty parameter store.
    pub fn new(application_id: impl Into<String>, loader: Arc<dyn ContentLoader>) -> Self {
        Self {
            application_id: application_id.into(),
            loader,
            params: RwLock::new(ParameterStore::new()),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    /// Returns the application id.
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Returns the content loader.
    pub fn loader(&self) -> &Arc<dyn ContentLoader> {
        &self.loader
    }

    /// Read access to the parameter store.
    ///
    /// Do not hold the guard across an `.await`.
    pub fn params(&self) -> RwLockReadGuard<'_, ParameterStore> {
        self.params.read()
    }

    /// Write access to the parameter store.
    ///
    /// Do not hold the guard across an `.await`.
    pub fn params_mut(&self) -> RwLockWriteGuard<'_, ParameterStore> {
        self.params.write()
    }

    /// Records a diagnostic and emits it as a `tracing` event.
    pub fn report(&self, severity: Severity, source: &str, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Warning => tracing::warn!(app = %self.application_id, source, %message),
            Severity::Error => tracing::error!(app = %self.application_id, source, %message),
        }
        self.diagnostics.lock().push(Diagnostic {
            severity,
            source: source.to_string(),
            message,
        });
    }

    /// Returns all diagnostics in reporting order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    /// Returns the warnings.
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.with_severity(Severity::Warning)
    }

    /// Returns the errors.
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.with_severity(Severity::Error)
    }

    fn with_severity(&self, severity: Severity) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .iter()
            .filter(|d| d.severity == severity)
            .cloned()
            .collect()
    }

    /// Creates a context for one task.
    pub fn task_context(
        self: &Arc<Self>,
        task_name: impl Into<String>,
        namespace: impl Into<String>,
        rank: Ranking,
        resource_type: ResourceType,
    ) -> TaskContext {
        TaskContext {
            global: Arc::clone(self),
            task_name: task_name.into(),
            namespace: namespace.into(),
            rank,
            resource_type,
        }
    }
}

impl fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalContext")
            .field("application_id", &self.application_id)
            .field("params", &*self.params.read())
            .field("diagnostics", &self.diagnostics.lock().len())
            .finish_non_exhaustive()
    }
}

/// View of the run for one task.
///
/// Cheap to clone; all clones share the same [`GlobalContext`].
///
/// # Typed accessors
///
/// [`string`](Self::string), [`i64`](Self::i64), [`f64`](Self::f64),
/// [`bool`](Self::bool) and [`typed`](Self::typed) return `None` when the
/// key is absent. A present value of the wrong type also yields `None` and
/// records a warning.
#[derive(Clone)]
pub struct TaskContext {
    global: Arc<GlobalContext>,
    task_name: String,
    namespace: String,
    rank: Ranking,
    resource_type: ResourceType,
}

impl TaskContext {
    /// Returns the name of the task.
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Returns the namespace unqualified keys resolve to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the rank of this task's writes.
    pub fn rank(&self) -> Ranking {
        self.rank
    }

    /// Returns the type of the resource being handled.
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Returns the shared context.
    pub fn global(&self) -> &Arc<GlobalContext> {
        &self.global
    }

    /// Returns the content loader.
    pub fn loader(&self) -> &Arc<dyn ContentLoader> {
        self.global.loader()
    }

    /// Resolves `raw` (`key` or `namespace:key`) against this task's namespace.
    pub fn key(&self, raw: &str) -> NamespaceKey {
        NamespaceKey::parse(raw, &self.namespace)
    }

    // --- Parameters ---

    /// Writes a parameter at this task's rank.
    ///
    /// Sealed-store and type violations are recorded as warnings and leave
    /// the store unchanged.
    pub fn set_value(&self, raw_key: &str, value: impl Into<Value>) {
        let key = self.key(raw_key);
        let result = self
            .global
            .params_mut()
            .set_value(&key, value.into(), self.rank);
        self.check(result);
    }

    /// Reads a parameter.
    pub fn value(&self, raw_key: &str) -> Option<Value> {
        self.global.params().value(&self.key(raw_key)).cloned()
    }

    /// Reads a parameter, falling back to `default`.
    ///
    /// If the stored value or the declared type disagrees with the type of
    /// `default`, a warning is recorded and `default` is returned.
    pub fn value_or(&self, raw_key: &str, default: impl Into<Value>) -> Value {
        let default = default.into();
        let key = self.key(raw_key);
        let expected = ValueType::of(&default);
        let (declared, stored) = {
            let params = self.global.params();
            (
                params.value_type(&key),
                params.value_as(&key, expected).map(|v| v.cloned()),
            )
        };

        if let Some(declared) = declared {
            if !expected.accepts(declared) {
                self.report_parameter(ParameterError::TypeMismatch {
                    key,
                    expected,
                    actual: declared,
                });
                return default;
            }
        }

        match stored {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                self.report_parameter(err);
                default
            },
        }
    }

    /// Reads a string parameter.
    pub fn string(&self, raw_key: &str) -> Option<String> {
        self.value_of(raw_key, ValueType::String)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Reads an integer parameter.
    pub fn i64(&self, raw_key: &str) -> Option<i64> {
        self.value_of(raw_key, ValueType::Integer)
            .and_then(|v| v.as_i64())
    }

    /// Reads a numeric parameter.
    pub fn f64(&self, raw_key: &str) -> Option<f64> {
        self.value_of(raw_key, ValueType::Float)
            .and_then(|v| v.as_f64())
    }

    /// Reads a boolean parameter.
    pub fn bool(&self, raw_key: &str) -> Option<bool> {
        self.value_of(raw_key, ValueType::Bool)
            .and_then(|v| v.as_bool())
    }

    /// Reads a parameter and deserializes it into `T`.
    pub fn typed<T: DeserializeOwned>(&self, raw_key: &str) -> Option<T> {
        let value = self.value(raw_key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                self.add_warning(format!(
                    "cannot read {} as {}: {e}",
                    self.key(raw_key),
                    std::any::type_name::<T>()
                ));
                None
            },
        }
    }

    /// Declares the type of a parameter.
    ///
    /// A conflicting declaration is recorded as an error.
    pub fn set_type(&self, raw_key: &str, value_type: ValueType) {
        let key = self.key(raw_key);
        let result = self.global.params_mut().set_type(&key, value_type);
        self.check(result);
    }

    /// Returns the declared type of a parameter.
    pub fn value_type(&self, raw_key: &str) -> Option<ValueType> {
        self.global.params().value_type(&self.key(raw_key))
    }

    /// Returns the keys of this task's namespace that hold a value.
    pub fn keys(&self) -> Vec<String> {
        self.global
            .params()
            .keys(&self.namespace)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    // --- Diagnostics ---

    /// Records a warning attributed to this task.
    pub fn add_warning(&self, message: impl Into<String>) {
        self.global
            .report(Severity::Warning, &self.task_name, message);
    }

    /// Records an error attributed to this task.
    pub fn add_error(&self, message: impl Into<String>) {
        self.global.report(Severity::Error, &self.task_name, message);
    }

    fn value_of(&self, raw_key: &str, expected: ValueType) -> Option<Value> {
        let key = self.key(raw_key);
        let result = self
            .global
            .params()
            .value_as(&key, expected)
            .map(|v| v.cloned());
        result.unwrap_or_else(|err| {
            self.report_parameter(err);
            None
        })
    }

    fn check(&self, result: Result<(), ParameterError>) {
        if let Err(err) = result {
            self.report_parameter(err);
        }
    }

    fn report_parameter(&self, err: ParameterError) {
        self.global
            .report(err.severity(), &self.task_name, err.to_string());
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_name", &self.task_name)
            .field("namespace", &self.namespace)
            .field("rank", &self.rank)
            .field("resource_type", &self.resource_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StaticContentLoader;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MY_NAMESPACE: &str = "my-namespace";

    fn context() -> (Arc<GlobalContext>, TaskContext) {
        let global = Arc::new(GlobalContext::new(
            "app",
            Arc::new(StaticContentLoader::new()),
        ));
        let ctx = global.task_context("test-task", MY_NAMESPACE, Ranking::Runtime, ResourceType::Any);
        (global, ctx)
    }

    fn counts(global: &GlobalContext) -> (usize, usize) {
        (global.warnings().len(), global.errors().len())
    }

    #[test]
    fn unqualified_and_qualified_keys() {
        let (_, ctx) = context();
        assert_eq!(ctx.key("any-variable"), NamespaceKey::new(MY_NAMESPACE, "any-variable"));
        assert_eq!(ctx.key("other:any-other"), NamespaceKey::new("other", "any-other"));
    }

    #[test]
    fn get_value_with_type() {
        let (global, ctx) = context();
        ctx.set_value("test1", 100);
        assert_eq!(ctx.value("test1"), Some(json!(100)));
        assert_eq!(ctx.i64("test1"), Some(100));
        assert_eq!(ctx.f64("test1"), Some(100.0));
        assert_eq!(counts(&global), (0, 0));
    }

    #[test]
    fn get_value_with_wrong_type() {
        let (global, ctx) = context();
        ctx.set_value("test1", 100);
        assert_eq!(ctx.string("test1"), None);
        assert_eq!(counts(&global), (1, 0));
        assert_eq!(global.warnings()[0].source, "test-task");
        assert!(global.warnings()[0].message.contains("my-namespace:test1"));
    }

    #[test]
    fn get_value_with_default() {
        let (global, ctx) = context();
        ctx.set_value("test1", 100);
        assert_eq!(ctx.value_or("test1", 0), json!(100));
        assert_eq!(ctx.value_or("test2", 0), json!(0));
        assert_eq!(counts(&global), (0, 0));
    }

    #[test]
    fn default_of_wrong_type_for_value() {
        let (global, ctx) = context();
        ctx.set_value("test1", 100);
        assert_eq!(ctx.value_or("test1", "something"), json!("something"));
        assert_eq!(counts(&global), (1, 0));
    }

    #[test]
    fn default_of_wrong_type_for_declaration() {
        let (global, ctx) = context();
        ctx.set_type("test1", ValueType::Integer);
        assert_eq!(ctx.value_or("test1", "something"), json!("something"));
        assert_eq!(counts(&global), (1, 0));
    }

    #[test]
    fn set_value_with_wrong_type() {
        let (global, ctx) = context();
        ctx.set_type("test1", ValueType::Integer);
        ctx.set_value("test1", "Hello");
        assert_eq!(ctx.value("test1"), None);
        assert_eq!(counts(&global), (1, 0));
    }

    #[test]
    fn conflicting_type_is_error() {
        let (global, ctx) = context();
        assert_eq!(ctx.value_type("test1"), None);
        ctx.set_type("test1", ValueType::Integer);
        assert_eq!(ctx.value_type("test1"), Some(ValueType::Integer));
        assert_eq!(counts(&global), (0, 0));
        ctx.set_type("test1", ValueType::String);
        assert_eq!(counts(&global), (0, 1));
        assert_eq!(ctx.value_type("test1"), Some(ValueType::Integer));
    }

    #[test]
    fn keys_of_own_namespace() {
        let (global, ctx) = context();
        assert!(ctx.keys().is_empty());
        ctx.set_value("test1", "Hello");
        ctx.set_value("test2", "World!");
        ctx.set_value("other:test3", "elsewhere");
        assert_eq!(ctx.keys(), vec!["test1".to_string(), "test2".to_string()]);
        assert_eq!(global.params().keys("other"), vec!["test3"]);
    }

    #[test]
    fn sealed_store_warns_once_and_reads_default() {
        let (global, ctx) = context();
        ctx.set_value("test1", "Hello");
        ctx.set_value("test2", "World!");
        global.params_mut().seal();

        ctx.set_value("test2", "Changed value");
        assert_eq!(ctx.string("test2").as_deref(), Some("Changed value"));
        assert_eq!(counts(&global), (0, 0));

        ctx.set_value("test3", "new key");
        assert_eq!(ctx.value("test3"), None);
        assert_eq!(ctx.value_or("test3", "default"), json!("default"));
        assert_eq!(counts(&global), (1, 0));
    }

    #[test]
    fn typed_reads_structured_values() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Retry {
            attempts: u32,
        }
        let (global, ctx) = context();
        ctx.set_value("retry", json!({"attempts": 3}));
        assert_eq!(ctx.typed::<Retry>("retry"), Some(Retry { attempts: 3 }));
        assert_eq!(ctx.typed::<Vec<u8>>("retry"), None);
        assert_eq!(counts(&global), (1, 0));
    }

    #[test]
    fn lower_rank_write_is_silently_ignored() {
        let (global, runtime) = context();
        let defaults =
            global.task_context("test-task", MY_NAMESPACE, Ranking::TaskDefault, ResourceType::Any);
        runtime.set_value("n", 2);
        defaults.set_value("n", 1);
        assert_eq!(runtime.i64("n"), Some(2));
        assert_eq!(counts(&global), (0, 0));
    }
}
