//! Regex-driven subfolder rewriting.

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentReceiver, ContentSender, Outcome, PipelineContext, PipelineError,
    Received, Stage,
};
use regex::Regex;
use tracing::{debug, info};

use crate::{forward, regex_option};

/// Moves matching items into `Subfolder`.
///
/// Items whose `relative_folder/file_name` matches `Regex` get their relative
/// folder replaced by `Subfolder`; everything else passes unchanged.
pub struct FileSorter {
    regex: Regex,
    subfolder: String,
}

impl FileSorter {
    pub const NAME: &'static str = "FileSorter";

    pub fn new(regex: Regex, subfolder: impl Into<String>) -> Self {
        Self {
            regex,
            subfolder: subfolder.into(),
        }
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let regex = regex_option(Self::NAME, options, "Regex")?;
        let subfolder = options.require(Self::NAME, "Subfolder")?;
        Ok(Self::new(regex, subfolder))
    }
}

#[async_trait]
impl Stage for FileSorter {
    fn name(&self) -> String {
        format!("{}[{}]/[{}]", Self::NAME, self.regex, self.subfolder)
    }

    async fn process(
        &mut self,
        mut input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut outcomes = Vec::new();
        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled("sorter cancelled"));
                    break;
                }
            };

            let path = item.relative_path();
            if !self.regex.is_match(&path.to_string_lossy()) {
                debug!(file = %path.display(), "No match, subfolder unchanged");
                if !forward(&output, item, ctx, &mut outcomes, "sorter").await? {
                    break;
                }
                continue;
            }

            let sorted = item.with_relative_folder(self.subfolder.as_str());
            debug!(file = %path.display(), to = %sorted.relative_path().display(), "Sorted");
            let message = format!(
                "Changed subfolder of {} from '{}' to '{}'",
                item.file_name(),
                item.relative_folder(),
                sorted.relative_folder()
            );
            if !forward(&output, sorted, ctx, &mut outcomes, "sorter").await? {
                break;
            }
            outcomes.push(Outcome::success(message));
        }

        info!(sorted = outcomes.len(), subfolder = %self.subfolder, "Sorter finished");
        Ok(outcomes)
    }
}
