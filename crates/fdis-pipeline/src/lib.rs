//! # fdis Pipeline
//!
//! This crate provides the streaming engine behind fdis, the file distributor.
//! Content descriptors flow from one or more sources, through a chain of
//! stages, to one or more sinks. Every component runs as its own Tokio task and
//! talks to its neighbours exclusively through completion-signaling channels.
//!
//! ## Features
//!
//! - Completion-signaling [`channel`]s (unbounded by default, bounded on request)
//! - [`broadcast`] fan-out and [`funnel`] fan-in over those channels
//! - A lock-free [`RateLimiter`] for throttled stages
//! - The sampled-window [`FingerprintComparator`] used for deduplication
//! - A name-keyed [`ComponentRegistry`] and the [`Orchestrator`] that resolves,
//!   wires, runs and drains a configured pipeline
//!
//! ## License
//!
//! MIT License
//!

use thiserror::Error;

pub mod broadcast;
pub mod channel;
pub mod channel_pipeline;
pub mod component;
pub mod config;
mod context;
pub mod descriptor;
pub mod fingerprint;
pub mod funnel;
pub mod orchestrator;
pub mod outcome;
pub mod rate_limiter;
pub mod registry;
pub mod report;
mod run_completion;

#[cfg(test)]
mod test_utils;

/// Re-export key traits and types
pub use broadcast::{BroadcastStats, broadcast};
pub use channel::{
    ContentReceiver, ContentSender, Received, Receiver, Sender, bounded, channel, with_capacity,
};
pub use channel_pipeline::{SpawnedChain, StageChain};
pub use component::{ComponentRole, Sink, Source, Stage};
pub use config::{ComponentOptions, ComponentSpec, PipelineConfig};
pub use context::PipelineContext;
pub use descriptor::ContentDescriptor;
pub use fingerprint::{FingerprintComparator, UniqueContentSet, UniquePathSet, compare_paths};
pub use funnel::funnel;
pub use orchestrator::{Orchestrator, RunState};
pub use outcome::{Outcome, OutcomeKind};
pub use rate_limiter::RateLimiter;
pub use registry::{ComponentRegistry, RegistryBuilder};
pub use report::{ComponentReport, RunReport};
pub use run_completion::{ComponentTask, TaskOutput, settle_components};

pub use tokio_util::sync::CancellationToken;

/// Common error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Write after completion on channel")]
    ChannelCompleted,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown {role} type '{type_name}'")]
    Resolution {
        role: ComponentRole,
        type_name: String,
    },

    #[error("Invalid option '{key}' for {component}: {reason}")]
    InvalidOption {
        component: String,
        key: String,
        reason: String,
    },

    #[error("Component failed ({component}): {source}")]
    Component {
        component: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Task failed: {0}")]
    TaskJoin(String),
}

impl PipelineError {
    /// Wrap an arbitrary error as a component-level failure.
    pub fn component(
        component: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        PipelineError::Component {
            component: component.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error belongs to the fatal configuration phase.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::Configuration(_)
                | PipelineError::Resolution { .. }
                | PipelineError::InvalidOption { .. }
        )
    }
}
