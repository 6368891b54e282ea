//! Recursive file system source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentDescriptor, ContentReceiver, ContentSender, FingerprintComparator,
    Outcome, OutcomeKind, PipelineContext, PipelineError, Received, Source, UniqueContentSet,
};
use tracing::{debug, info, trace, warn};

use crate::{StageError, forward};

/// Emits one descriptor per file below `Source`.
///
/// Options:
/// - `Source` (required): a directory, walked recursively, or a single file.
/// - `Deduplicate` (default `false`): skip files whose content fingerprint
///   matches a file already emitted by this reader.
pub struct FileReader {
    source: PathBuf,
    deduplicate: bool,
}

impl FileReader {
    pub const NAME: &'static str = "FileReader";

    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            deduplicate: false,
        }
    }

    pub fn with_deduplicate(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let source = options.require(Self::NAME, "Source")?;
        let deduplicate =
            options.flag("Deduplicate", false) || options.mode_is("Mode", "Deduplicate", false);
        Ok(Self::new(source).with_deduplicate(deduplicate))
    }

    /// Emit `item` unless it duplicates an earlier one.
    async fn emit(
        &self,
        item: ContentDescriptor,
        seen: &mut Option<UniqueContentSet>,
        output: &ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Outcome, PipelineError> {
        if let Some(seen) = seen.as_mut() {
            match seen.insert(&item).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(file = %item.locator().display(), "Skipping duplicate file");
                    return Ok(Outcome::skipped(format!(
                        "Skipping duplicate file: {}",
                        item.locator().display()
                    )));
                }
                Err(e) => {
                    return Ok(Outcome::error(
                        format!("Could not fingerprint {}", item.locator().display()),
                        StageError::Io(e),
                    ));
                }
            }
        }
        let message = format!("Content found {}", item.locator().display());
        output.send_cancellable(item, &ctx.token).await?;
        Ok(Outcome::success(message))
    }
}

#[async_trait]
impl Source for FileReader {
    fn name(&self) -> String {
        format!("{}[{}]", Self::NAME, self.source.display())
    }

    async fn provide(
        &mut self,
        mut input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut seen = self
            .deduplicate
            .then(|| UniqueContentSet::new(FingerprintComparator::default()));
        let mut outcomes = Vec::new();

        let mut forwarded = 0usize;
        loop {
            match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => {
                    if let Some(seen) = seen.as_mut()
                        && let Err(e) = seen.insert(&item).await
                    {
                        warn!(file = %item.locator().display(), error = %e, "Could not fingerprint upstream file");
                    }
                    let what = self.name();
                    if !forward(&output, item, ctx, &mut outcomes, &what).await? {
                        return Ok(outcomes);
                    }
                    forwarded += 1;
                }
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled(format!("{} cancelled", self.name())));
                    return Ok(outcomes);
                }
            }
        }
        debug!(forwarded, "Forwarded upstream files");

        let (root, files) = match list_files(&self.source).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(source = %self.source.display(), error = %e, "Couldn't read source");
                outcomes.push(Outcome::error(
                    format!("Couldn't find {}", self.source.display()),
                    e,
                ));
                return Ok(outcomes);
            }
        };
        trace!(count = files.len(), "Listed source files");

        for path in files {
            if ctx.is_cancelled() {
                outcomes.push(Outcome::cancelled(format!("{} cancelled", self.name())));
                break;
            }
            let item = match ContentDescriptor::from_path(&path, &root).await {
                Ok(item) => item,
                Err(e) => {
                    outcomes.push(Outcome::error(
                        format!("Couldn't read {}", path.display()),
                        e,
                    ));
                    continue;
                }
            };
            let outcome = match self.emit(item, &mut seen, &output, ctx).await {
                Ok(outcome) => outcome,
                Err(PipelineError::Cancelled) => {
                    Outcome::cancelled(format!("{} cancelled", self.name()))
                }
                Err(e) => return Err(e),
            };
            let stop = outcome.kind() == OutcomeKind::Cancelled;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }

        info!(
            source = %self.source.display(),
            read = outcomes.iter().filter(|o| o.kind() == OutcomeKind::Success).count(),
            discarded = outcomes.iter().filter(|o| o.kind() == OutcomeKind::Skipped).count(),
            "Finished reading source"
        );
        Ok(outcomes)
    }
}

/// Every regular file at or below `source`, sorted by path, plus the root
/// their relative folders are computed against.
async fn list_files(source: &Path) -> std::io::Result<(PathBuf, Vec<PathBuf>)> {
    let metadata = tokio::fs::metadata(source).await?;
    if !metadata.is_dir() {
        let root = source.parent().map(Path::to_path_buf).unwrap_or_default();
        return Ok((root, vec![source.to_path_buf()]));
    }

    let mut files = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            } else if file_type.is_symlink()
                && tokio::fs::metadata(&path)
                    .await
                    .is_ok_and(|m| m.is_file())
            {
                // Linked files are read, linked directories are not walked.
                files.push(path);
            }
        }
    }
    files.sort();
    Ok((source.to_path_buf(), files))
}
