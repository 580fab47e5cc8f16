//! Per resource-type registries
//!
//! Provides [`ProcessorRegistry`] for named processors, [`StorageRule`] for
//! choosing the backend of each derivative path, and [`Registry`], which
//! bundles them with the storage backends and configuration. A registry is
//! populated once through [`RegistryBuilder`] and only read afterwards.

use crate::config::DerivativesConfig;
use crate::error::{DerivativesError, Result};
use deriv_storage::{Storage, StorageRegistry};
use deriv_tree::{RawArtifact, RawTree, TreePath};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Options handed to a processor
pub type Options = Map<String, Value>;

/// Turns a primary artifact into a raw tree of derivatives
///
/// Implemented for every `Fn(&mut RawArtifact, &Options) -> anyhow::Result<RawTree>`
/// closure that is `Send + Sync`.
pub trait Processor: Send + Sync {
    /// Produce derivatives from `source`
    ///
    /// # Errors
    /// Any processor-specific failure
    fn process(&self, source: &mut RawArtifact, options: &Options) -> anyhow::Result<RawTree>;
}

impl<F> Processor for F
where
    F: Fn(&mut RawArtifact, &Options) -> anyhow::Result<RawTree> + Send + Sync,
{
    fn process(&self, source: &mut RawArtifact, options: &Options) -> anyhow::Result<RawTree> {
        self(source, options)
    }
}

/// Named processors
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: IndexMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor; the last registration for a name wins
    pub fn register(&mut self, name: impl Into<String>, processor: impl Processor + 'static) {
        let name = name.into();
        debug!(processor = %name, "Registered processor");
        self.processors.insert(name, Arc::new(processor));
    }

    /// Processor registered under `name`
    ///
    /// # Errors
    /// `DerivativesError::UnregisteredProcessor` if absent
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Processor>> {
        self.processors
            .get(name)
            .cloned()
            .ok_or_else(|| DerivativesError::UnregisteredProcessor(name.to_string()))
    }

    /// Check if a processor exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.processors.keys().map(String::as_str).collect()
    }

    /// Get number of registered processors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Chooses the storage backend of a derivative from its path
#[derive(Clone)]
pub enum StorageRule {
    /// Same backend for every path
    Fixed(String),
    /// Backend computed per path, never cached
    Dynamic(Arc<dyn Fn(&TreePath) -> String + Send + Sync>),
}

impl StorageRule {
    /// Rule computing the backend with `f`
    pub fn dynamic(f: impl Fn(&TreePath) -> String + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    /// Backend key for `path`
    #[must_use]
    pub fn resolve(&self, path: &TreePath) -> String {
        match self {
            Self::Fixed(key) => key.clone(),
            Self::Dynamic(f) => f(path),
        }
    }
}

impl fmt::Debug for StorageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(key) => f.debug_tuple("Fixed").field(key).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Summary of one processor invocation
#[derive(Debug, Clone, Copy)]
pub struct ProcessEvent<'a> {
    /// Processor name
    pub processor: &'a str,
    /// Options the processor was called with
    pub options: &'a Options,
    /// Wall-clock time spent in the processor
    pub duration: Duration,
    /// Whether the processor succeeded
    pub succeeded: bool,
}

/// Receives an event after every processor call
pub trait InstrumentationSink: Send + Sync {
    /// Record one processor call
    fn processed(&self, event: &ProcessEvent<'_>);
}

impl<F> InstrumentationSink for F
where
    F: Fn(&ProcessEvent<'_>) + Send + Sync,
{
    fn processed(&self, event: &ProcessEvent<'_>) {
        self(event);
    }
}

/// Everything shared by all attachers of one resource type
pub struct Registry {
    processors: ProcessorRegistry,
    storage_rule: StorageRule,
    storages: StorageRegistry,
    config: DerivativesConfig,
    sink: Option<Arc<dyn InstrumentationSink>>,
}

impl Registry {
    /// Start building a registry
    #[inline]
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registered processors
    #[inline]
    #[must_use]
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Storage backends
    #[inline]
    #[must_use]
    pub fn storages(&self) -> &StorageRegistry {
        &self.storages
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DerivativesConfig {
        &self.config
    }

    /// Storage rule
    #[inline]
    #[must_use]
    pub fn storage_rule(&self) -> &StorageRule {
        &self.storage_rule
    }

    /// Backend key for the derivative at `path`
    #[inline]
    #[must_use]
    pub fn resolve_storage(&self, path: &TreePath) -> String {
        self.storage_rule.resolve(path)
    }

    pub(crate) fn instrument(&self, event: &ProcessEvent<'_>) {
        let duration_ms = u64::try_from(event.duration.as_millis()).unwrap_or(u64::MAX);
        let options = Value::Object(event.options.clone());
        info!(
            processor = event.processor,
            options = %options,
            duration_ms,
            succeeded = event.succeeded,
            "Derivatives processed"
        );
        if let Some(sink) = &self.sink {
            sink.processed(event);
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("processors", &self.processors)
            .field("storage_rule", &self.storage_rule)
            .field("storages", &self.storages)
            .field("config", &self.config)
            .field("instrumented", &self.sink.is_some())
            .finish()
    }
}

/// Builder for [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    processors: ProcessorRegistry,
    storage_rule: Option<StorageRule>,
    storages: StorageRegistry,
    config: DerivativesConfig,
    sink: Option<Arc<dyn InstrumentationSink>>,
}

impl RegistryBuilder {
    /// Create builder with default configuration and nothing registered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: DerivativesConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a processor
    #[must_use]
    pub fn with_processor(mut self, name: impl Into<String>, processor: impl Processor + 'static) -> Self {
        self.processors.register(name, processor);
        self
    }

    /// Register a storage backend
    #[must_use]
    pub fn with_storage(mut self, key: impl Into<String>, storage: impl Storage + 'static) -> Self {
        self.storages.insert(key, Arc::new(storage));
        self
    }

    /// Register a shared storage backend
    #[must_use]
    pub fn with_shared_storage(mut self, key: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        self.storages.insert(key, storage);
        self
    }

    /// Replace all storage backends
    #[must_use]
    pub fn with_storages(mut self, storages: StorageRegistry) -> Self {
        self.storages = storages;
        self
    }

    /// Use one backend for every derivative
    #[must_use]
    pub fn with_fixed_storage(mut self, key: impl Into<String>) -> Self {
        self.storage_rule = Some(StorageRule::Fixed(key.into()));
        self
    }

    /// Compute the backend of each derivative from its path
    #[must_use]
    pub fn with_storage_fn(mut self, f: impl Fn(&TreePath) -> String + Send + Sync + 'static) -> Self {
        self.storage_rule = Some(StorageRule::dynamic(f));
        self
    }

    /// Receive an event after every processor call
    #[must_use]
    pub fn with_instrumentation(mut self, sink: impl InstrumentationSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Finish the registry
    ///
    /// Without an explicit rule every derivative goes to the configured
    /// default storage.
    #[must_use]
    pub fn build(self) -> Arc<Registry> {
        let storage_rule = self
            .storage_rule
            .unwrap_or_else(|| StorageRule::Fixed(self.config.default_storage().to_string()));

        info!(
            processors = self.processors.len(),
            storages = ?self.storages.keys().collect::<Vec<_>>(),
            rule = ?storage_rule,
            "Derivatives registry built"
        );

        Arc::new(Registry {
            processors: self.processors,
            storage_rule,
            storages: self.storages,
            config: self.config,
            sink: self.sink,
        })
    }
}
