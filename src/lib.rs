//! Resource integration pipeline with a versioned, lease-locked cache.
//!
//! This crate loads external resources (scripts, stylesheets, HTML
//! snippets, ...) of an application, runs them through a task pipeline and
//! keeps the results in a cache whose content is published atomically by
//! version.
//!
//! # Overview
//!
//! A prefetch run takes an advisory lease on the application's cache root,
//! writes every resource under a fresh version and finally promotes that
//! version. Readers only ever see the promoted version, so a run that fails
//! half way leaves the previous content in place.
//!
//! # Module Organization
//!
//! - [`resources`] - Type lattice, charsets, convertible content, resource records
//! - [`params`] - Namespaced, ranked and typed pipeline parameters
//! - [`pipeline`] - Task contracts, contexts, built-in tasks and the pipeline
//! - [`cache`] - Persistent store contract, in-memory store, versioned cache
//! - [`engine`] - Cached resource access and versioned prefetch
//! - [`config`] - TOML configuration
//! - [`error`] - Error types
//! - [`constants`] - Persisted attribute names and defaults

pub mod cache;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod params;
pub mod pipeline;
pub mod resources;

// Re-exports for ergonomic access
pub use cache::{InMemoryStore, PersistentStore, ResourceCache};
pub use config::{CacheConfig, EngineConfig};
pub use engine::{IntegrationEngine, PrefetchReport};
pub use error::{CacheError, EngineError, LoadError, PipelineError};
pub use pipeline::{GlobalContext, ProcessingPipeline};
pub use resources::{ExternalResource, ResourceRef, ResourceType};
