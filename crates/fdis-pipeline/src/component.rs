//! Source, Stage and Sink traits.
//!
//! These are the contracts between the engine and the pluggable components.
//! Each component is run as its own task by the [`Orchestrator`](crate::Orchestrator).
//!
//! Channel rules every implementation must follow:
//!
//! - Output senders are passed by value. Completing them explicitly once the
//!   work is done is encouraged; dropping them completes them as well, so an
//!   early return with `?` never leaves a downstream task waiting.
//! - Per-item problems are reported as [`Outcome`]s and the loop continues
//!   with the next item.
//! - An `Err` return means the component itself failed (e.g. a required
//!   resource could not be opened). The orchestrator records it as a failed
//!   component; the rest of the pipeline keeps running.
//! - Cancellation is observed through `ctx.token` at every suspension point
//!   and recorded as a cancelled [`Outcome`], not returned as an error.

use std::fmt;

use async_trait::async_trait;

use crate::{ContentReceiver, ContentSender, Outcome, PipelineContext, PipelineError};

/// Role of a component within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentRole {
    Source,
    Stage,
    Sink,
    /// Engine-internal plumbing (funnel, broadcast).
    Connector,
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRole::Source => write!(f, "source"),
            ComponentRole::Stage => write!(f, "stage"),
            ComponentRole::Sink => write!(f, "sink"),
            ComponentRole::Connector => write!(f, "connector"),
        }
    }
}

/// Produces descriptors.
#[async_trait]
pub trait Source: Send {
    /// Display name used in logs and reports.
    fn name(&self) -> String;

    /// Write zero or more descriptors to `output`.
    ///
    /// `input` carries items handed to the source by an upstream producer; the
    /// orchestrator passes an already completed channel. Sources should forward
    /// whatever arrives on it before producing their own items.
    async fn provide(
        &mut self,
        input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError>;
}

/// Forwards, transforms, drops or replaces descriptors.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> String;

    /// Read `input` until it ends, writing results to `output`.
    async fn process(
        &mut self,
        input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError>;
}

/// Consumes descriptors.
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> String;

    /// Drain `input` fully, or until cancelled.
    async fn consume(
        &mut self,
        input: ContentReceiver,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError>;
}
