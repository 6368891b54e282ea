//! Name-keyed component registry.
//!
//! Maps configured type names to factories. A registry is assembled once with
//! [`RegistryBuilder`] before any run starts and is read-only afterwards, so
//! it can be shared between runs behind an `Arc` or a `static`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::component::{ComponentRole, Sink, Source, Stage};
use crate::config::{ComponentOptions, ComponentSpec};
use crate::PipelineError;

type Factory<T> = Arc<dyn Fn(&ComponentOptions) -> Result<Box<T>, PipelineError> + Send + Sync>;

/// Builds a [`ComponentRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    sources: HashMap<String, Factory<dyn Source>>,
    stages: HashMap<String, Factory<dyn Stage>>,
    sinks: HashMap<String, Factory<dyn Sink>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source factory under `name`, replacing any previous one.
    pub fn source<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ComponentOptions) -> Result<Box<dyn Source>, PipelineError> + Send + Sync + 'static,
    {
        self.sources.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn stage<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ComponentOptions) -> Result<Box<dyn Stage>, PipelineError> + Send + Sync + 'static,
    {
        self.stages.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn sink<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ComponentOptions) -> Result<Box<dyn Sink>, PipelineError> + Send + Sync + 'static,
    {
        self.sinks.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn build(self) -> ComponentRegistry {
        ComponentRegistry {
            sources: self.sources,
            stages: self.stages,
            sinks: self.sinks,
        }
    }
}

/// Read-only map from type names to component factories.
pub struct ComponentRegistry {
    sources: HashMap<String, Factory<dyn Source>>,
    stages: HashMap<String, Factory<dyn Stage>>,
    sinks: HashMap<String, Factory<dyn Sink>>,
}

impl ComponentRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn create_source(&self, spec: &ComponentSpec) -> Result<Box<dyn Source>, PipelineError> {
        resolve(&self.sources, ComponentRole::Source, spec)
    }

    pub fn create_stage(&self, spec: &ComponentSpec) -> Result<Box<dyn Stage>, PipelineError> {
        resolve(&self.stages, ComponentRole::Stage, spec)
    }

    pub fn create_sink(&self, spec: &ComponentSpec) -> Result<Box<dyn Sink>, PipelineError> {
        resolve(&self.sinks, ComponentRole::Sink, spec)
    }

    pub fn contains(&self, role: ComponentRole, type_name: &str) -> bool {
        match role {
            ComponentRole::Source => self.sources.contains_key(type_name),
            ComponentRole::Stage => self.stages.contains_key(type_name),
            ComponentRole::Sink => self.sinks.contains_key(type_name),
            ComponentRole::Connector => false,
        }
    }

    /// Registered type names for `role`, sorted.
    pub fn type_names(&self, role: ComponentRole) -> Vec<&str> {
        let mut names: Vec<&str> = match role {
            ComponentRole::Source => self.sources.keys().map(String::as_str).collect(),
            ComponentRole::Stage => self.stages.keys().map(String::as_str).collect(),
            ComponentRole::Sink => self.sinks.keys().map(String::as_str).collect(),
            ComponentRole::Connector => Vec::new(),
        };
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("sources", &self.type_names(ComponentRole::Source))
            .field("stages", &self.type_names(ComponentRole::Stage))
            .field("sinks", &self.type_names(ComponentRole::Sink))
            .finish()
    }
}

fn resolve<T: ?Sized>(
    factories: &HashMap<String, Factory<T>>,
    role: ComponentRole,
    spec: &ComponentSpec,
) -> Result<Box<T>, PipelineError> {
    let factory = factories
        .get(&spec.type_name)
        .ok_or_else(|| PipelineError::Resolution {
            role,
            type_name: spec.type_name.clone(),
        })?;
    factory(&spec.options)
}
