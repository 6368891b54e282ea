//! # fdis stages
//!
//! The concrete components of the file distributor: a recursive file reader,
//! the transforming stages (deduplication, filtering, sorting, collision
//! handling, archiving, throttling), the local file writer and the gofile.io
//! uploader.
//!
//! [`default_registry`] exposes all of them under the type names used in
//! configuration files.

use std::sync::{Arc, LazyLock};

use fdis_pipeline::{
    ComponentOptions, ComponentRegistry, ContentDescriptor, ContentSender, Outcome,
    PipelineContext, PipelineError, RegistryBuilder,
};
use regex::{Regex, RegexBuilder};

pub mod archiver;
pub mod collision;
pub mod dedupe;
pub mod error;
pub mod filter;
pub mod gofile;
pub mod naming;
pub mod reader;
pub mod sorter;
pub mod throttle;
pub mod writer;

pub use archiver::FileArchiver;
pub use collision::FilePathCollisionSolver;
pub use dedupe::Deduplicate;
pub use error::StageError;
pub use filter::FileFilter;
pub use gofile::GofileUploader;
pub use reader::FileReader;
pub use sorter::FileSorter;
pub use throttle::Throttle;
pub use writer::FileWriter;

/// Alias kept for configuration files written for older releases.
pub const DEDUPLICATE_ALIAS: &str = "DeduplicateFiles";

static DEFAULT_REGISTRY: LazyLock<Arc<ComponentRegistry>> =
    LazyLock::new(|| Arc::new(register_defaults(ComponentRegistry::builder()).build()));

/// The process-wide registry of every component in this crate.
pub fn default_registry() -> Arc<ComponentRegistry> {
    DEFAULT_REGISTRY.clone()
}

/// Register every component of this crate on `builder`.
pub fn register_defaults(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .source(FileReader::NAME, |o| Ok(Box::new(FileReader::from_options(o)?)))
        .stage(Deduplicate::NAME, |o| Ok(Box::new(Deduplicate::from_options(o)?)))
        .stage(DEDUPLICATE_ALIAS, |o| Ok(Box::new(Deduplicate::from_options(o)?)))
        .stage(FileFilter::NAME, |o| Ok(Box::new(FileFilter::from_options(o)?)))
        .stage(FileSorter::NAME, |o| Ok(Box::new(FileSorter::from_options(o)?)))
        .stage(FilePathCollisionSolver::NAME, |o| {
            Ok(Box::new(FilePathCollisionSolver::from_options(o)))
        })
        .stage(FileArchiver::NAME, |o| Ok(Box::new(FileArchiver::from_options(o)?)))
        .stage(Throttle::NAME, |o| Ok(Box::new(Throttle::from_options(o)?)))
        .sink(FileWriter::NAME, |o| Ok(Box::new(FileWriter::from_options(o)?)))
        .sink(GofileUploader::NAME, |o| {
            Ok(Box::new(GofileUploader::from_options(o)?))
        })
}

/// Case-insensitive pattern from a required option.
pub(crate) fn regex_option(
    component: &str,
    options: &ComponentOptions,
    key: &str,
) -> Result<Regex, PipelineError> {
    let pattern = options.require(component, key)?;
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| PipelineError::InvalidOption {
            component: component.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Send `item` downstream.
///
/// A cancelled send pushes a cancelled outcome named after `what` and
/// yields `Ok(false)`, keeping the outcomes gathered so far.
pub(crate) async fn forward(
    output: &ContentSender,
    item: ContentDescriptor,
    ctx: &PipelineContext,
    outcomes: &mut Vec<Outcome>,
    what: &str,
) -> Result<bool, PipelineError> {
    match output.send_cancellable(item, &ctx.token).await {
        Ok(()) => Ok(true),
        Err(PipelineError::Cancelled) => {
            outcomes.push(Outcome::cancelled(format!("{what} cancelled")));
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
