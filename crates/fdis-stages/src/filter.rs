//! Regex allow/block filter.

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentReceiver, ContentSender, Outcome, OutcomeKind, PipelineContext,
    PipelineError, Received, Stage,
};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{forward, regex_option};

/// Keeps or drops items by matching `relative_folder/file_name`.
///
/// Options: `Regex` (required, case-insensitive) and `Mode`, either `Allow`
/// (forward matches, the default) or `Block` (forward everything else).
/// Rejected items are reported as skipped.
pub struct FileFilter {
    regex: Regex,
    allow: bool,
}

impl FileFilter {
    pub const NAME: &'static str = "FileFilter";

    pub fn new(regex: Regex, allow: bool) -> Self {
        Self { regex, allow }
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let regex = regex_option(Self::NAME, options, "Regex")?;
        if options.get("Mode").is_none() {
            warn!("No mode defined for {}, defaulting to 'Allow'", Self::NAME);
        }
        Ok(Self::new(regex, options.mode_is("Mode", "Allow", true)))
    }

    fn accepts(&self, relative_path: &str) -> bool {
        self.regex.is_match(relative_path) == self.allow
    }
}

#[async_trait]
impl Stage for FileFilter {
    fn name(&self) -> String {
        let mode = if self.allow { "Allow" } else { "Block" };
        format!("{}[{}][{mode}]", Self::NAME, self.regex)
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
                    outcomes.push(Outcome::cancelled("filter cancelled"));
                    break;
                }
            };

            let path = item.relative_path().to_string_lossy().into_owned();
            if self.accepts(&path) {
                debug!(file = %path, "Allowed");
                if !forward(&output, item, ctx, &mut outcomes, "filter").await? {
                    break;
                }
                outcomes.push(Outcome::success(format!("Allowed file: {path}")));
            } else {
                debug!(file = %path, "Blocked");
                outcomes.push(Outcome::skipped(format!("Blocked file: {path}")));
            }
        }

        info!(
            filter = %self.name(),
            allowed = outcomes.iter().filter(|o| o.kind() == OutcomeKind::Success).count(),
            blocked = outcomes.iter().filter(|o| o.kind() == OutcomeKind::Skipped).count(),
            "Filter finished"
        );
        Ok(outcomes)
    }
}
