//! Relative path collision handling.

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentReceiver, ContentSender, Outcome, PipelineContext, PipelineError,
    Received, Stage, UniquePathSet,
};
use tracing::{debug, info, warn};

use crate::forward;
use crate::naming::randomized_name;

/// Makes `relative_folder/file_name` unique across the stream.
///
/// `Mode` is `Remove` (drop later collisions, the default) or `Rename` (give
/// them a random suffix).
pub struct FilePathCollisionSolver {
    rename: bool,
}

impl FilePathCollisionSolver {
    pub const NAME: &'static str = "FilePathCollisionSolver";

    pub fn new(rename: bool) -> Self {
        Self { rename }
    }

    pub fn from_options(options: &ComponentOptions) -> Self {
        if options.get("Mode").is_none() {
            warn!("Mode not set in {}, defaulting to 'Remove'", Self::NAME);
        }
        Self::new(options.mode_is("Mode", "Rename", false))
    }
}

#[async_trait]
impl Stage for FilePathCollisionSolver {
    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    async fn process(
        &mut self,
        mut input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut seen = UniquePathSet::new();
        let mut outcomes = Vec::new();
        let mut collisions = 0usize;

        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled("collision solver cancelled"));
                    return Ok(outcomes);
                }
            };

            if seen.insert(&item) {
                debug!(file = %item.file_name(), "Added");
                if !forward(&output, item, ctx, &mut outcomes, "collision solver").await? {
                    return Ok(outcomes);
                }
                continue;
            }

            collisions += 1;
            if !self.rename {
                warn!("{} collided, removing it", item.relative_path().display());
                outcomes.push(Outcome::skipped(format!(
                    "{} collided and was removed",
                    item.relative_path().display()
                )));
                continue;
            }

            // A renamed path may already be taken by another item; draw
            // again until the path is free.
            let mut renamed = item.with_file_name(randomized_name(item.file_name()));
            while !seen.insert(&renamed) {
                renamed = item.with_file_name(randomized_name(item.file_name()));
            }
            info!(
                "{} collided, renaming it to {}",
                item.file_name(),
                renamed.file_name()
            );
            if !forward(&output, renamed, ctx, &mut outcomes, "collision solver").await? {
                return Ok(outcomes);
            }
        }

        outcomes.push(Outcome::success(format!(
            "{} files processed, {collisions} solved",
            seen.len() + if self.rename { 0 } else { collisions }
        )));
        Ok(outcomes)
    }
}
