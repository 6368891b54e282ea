//! Static description of a pipeline run.
//!
//! A [`PipelineConfig`] lists the sources, stages and sinks of one run by type
//! name, each with a flat string option map. The engine only carries these
//! values to the registry; interpreting the options is up to each component's
//! factory, which uses the [`ComponentOptions`] helpers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::PipelineError;

fn default_concurrency() -> usize {
    1
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of units of work in flight at once.
    #[serde(default = "default_concurrency", alias = "Threads")]
    pub concurrency: usize,
    /// Queue depth of the engine's channels; unbounded when absent.
    #[serde(default, alias = "ChannelCapacity")]
    pub channel_capacity: Option<usize>,
    #[serde(default, alias = "Providers")]
    pub sources: Vec<ComponentSpec>,
    /// Applied in order.
    #[serde(default, alias = "Middlewares")]
    pub stages: Vec<ComponentSpec>,
    #[serde(default, alias = "Consumers")]
    pub sinks: Vec<ComponentSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            channel_capacity: None,
            sources: Vec::new(),
            stages: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

/// One configured component: a registry type name plus its options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type", alias = "Type")]
    pub type_name: String,
    #[serde(default, alias = "Options")]
    pub options: ComponentOptions,
}

impl ComponentSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            options: ComponentOptions::default(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key, value);
        self
    }
}

/// Flat string-keyed options of one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentOptions(HashMap<String, String>);

impl ComponentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// A mandatory option.
    pub fn require(&self, component: &str, key: &str) -> Result<&str, PipelineError> {
        self.get(key).ok_or_else(|| PipelineError::InvalidOption {
            component: component.to_string(),
            key: key.to_string(),
            reason: "missing required option".to_string(),
        })
    }

    /// Parse an option, falling back to `default` (with a warning) when it is
    /// absent. A present but unparsable value is an error.
    pub fn parse_or<T>(&self, component: &str, key: &str, default: T) -> Result<T, PipelineError>
    where
        T: FromStr + fmt::Display,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| PipelineError::InvalidOption {
                component: component.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            }),
            None => {
                warn!("{key} not set for {component}, defaulting to {default}");
                Ok(default)
            }
        }
    }

    /// Case-insensitive match of a mode-style option against `expected`.
    ///
    /// Absent options fall back to `default`.
    pub fn mode_is(&self, key: &str, expected: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case(expected))
            .unwrap_or(default)
    }

    /// Boolean option (`true`/`false`, `yes`/`no`, `1`/`0`); absent or
    /// unrecognized values fall back to `default`.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "true" | "yes" | "1") => true,
            Some(v) if matches!(v.as_str(), "false" | "no" | "0") => false,
            _ => default,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ComponentOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
