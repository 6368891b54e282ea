//! Local file system sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fdis_pipeline::{
    CancellationToken, ComponentOptions, ContentDescriptor, ContentReceiver, Outcome, OutcomeKind,
    PipelineContext, PipelineError, Received, Sink,
};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::StageError;
use crate::naming::randomized_name;

const DEFAULT_BUFFER_SIZE: usize = 81920;

/// Copies every item to `SaveFolder/relative_folder/file_name`.
///
/// Options:
/// - `SaveFolder` (required)
/// - `BufferSize` (default 81920): copy buffer in bytes
/// - `Mode`: `Overwrite` (default) replaces existing files, `Rename` writes
///   next to them under a randomized name.
pub struct FileWriter {
    save_folder: PathBuf,
    buffer_size: usize,
    rename: bool,
}

impl FileWriter {
    pub const NAME: &'static str = "FileWriter";

    pub fn new(save_folder: impl Into<PathBuf>) -> Self {
        Self {
            save_folder: save_folder.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            rename: false,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_rename(mut self, rename: bool) -> Self {
        self.rename = rename;
        self
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let save_folder = options.require(Self::NAME, "SaveFolder")?;
        let buffer_size = options.parse_or(Self::NAME, "BufferSize", DEFAULT_BUFFER_SIZE)?;
        if options.get("Mode").is_none() {
            warn!("No mode specified for {}, defaulting to 'Overwrite'", Self::NAME);
        }
        Ok(Self::new(save_folder)
            .with_buffer_size(buffer_size)
            .with_rename(options.mode_is("Mode", "Rename", false)))
    }

    /// Where `item` should land, before collision handling.
    fn destination(&self, item: &ContentDescriptor) -> PathBuf {
        self.save_folder
            .join(item.relative_folder())
            .join(item.file_name())
    }

    /// Copy `item` into place; `Ok(None)` when cancelled.
    async fn write(
        &self,
        item: &ContentDescriptor,
        token: &CancellationToken,
    ) -> Result<Option<PathBuf>, StageError> {
        let metadata = match tokio::fs::metadata(item.locator()).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(StageError::Missing(item.locator().to_path_buf())),
        };
        if metadata.len() != item.size() {
            return Err(StageError::SizeMismatch {
                path: item.locator().to_path_buf(),
                expected: item.size(),
                actual: metadata.len(),
            });
        }

        let mut target = self.destination(item);
        if let Some(folder) = target.parent() {
            tokio::fs::create_dir_all(folder).await?;
        }
        if self.rename {
            while tokio::fs::try_exists(&target).await? {
                target.set_file_name(randomized_name(item.file_name()));
            }
        }

        if token.is_cancelled() {
            return Ok(None);
        }
        debug!("Writing {} to {}", item.file_name(), target.display());
        let copied = copy_file(item.locator(), &target, self.buffer_size, token).await?;
        Ok(copied.map(|_| target))
    }
}

/// Copy `from` to `to`. A cancelled copy removes the partial `to` and
/// returns `Ok(None)`.
async fn copy_file(
    from: &Path,
    to: &Path,
    buffer_size: usize,
    token: &CancellationToken,
) -> std::io::Result<Option<u64>> {
    let mut reader = BufReader::with_capacity(buffer_size, File::open(from).await?);
    let mut writer = BufWriter::with_capacity(buffer_size, File::create(to).await?);
    let copy = async {
        let copied = tokio::io::copy_buf(&mut reader, &mut writer).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(copied)
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => {}
        result = copy => return result.map(Some),
    }

    drop(writer);
    debug!(path = %to.display(), "Removing partially written file");
    if let Err(e) = tokio::fs::remove_file(to).await {
        warn!(path = %to.display(), error = %e, "Failed to remove partially written file");
    }
    Ok(None)
}

#[async_trait]
impl Sink for FileWriter {
    fn name(&self) -> String {
        format!("{}[{}]", Self::NAME, self.save_folder.display())
    }

    async fn consume(
        &mut self,
        mut input: ContentReceiver,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut outcomes = Vec::new();
        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled(format!("{} cancelled", self.name())));
                    break;
                }
            };

            let _permit = match ctx.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes.push(Outcome::cancelled(format!("{} cancelled", self.name())));
                    break;
                }
            };

            match self.write(&item, &ctx.token).await {
                Ok(Some(target)) => outcomes.push(Outcome::success(format!(
                    "{} copied to {}",
                    item.locator().display(),
                    target.display()
                ))),
                Err(e) => {
                    warn!(file = %item.locator().display(), error = %e, "Write failed");
                    outcomes.push(Outcome::error(
                        format!("Couldn't write {}", item.relative_path().display()),
                        e,
                    ));
                }
                Ok(None) => {
                    outcomes.push(Outcome::cancelled(format!(
                        "Writing {} cancelled",
                        item.file_name()
                    )));
                    break;
                }
            }
        }

        info!(
            "Wrote {} files to {}",
            outcomes
                .iter()
                .filter(|o| o.kind() == OutcomeKind::Success)
                .count(),
            self.save_folder.display()
        );
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context, feed, init_tracing, write_file};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copies_into_relative_folders() {
        init_tracing();
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let items = vec![
            write_file(input.path(), "", "a.txt", b"alpha"),
            write_file(input.path(), "nested/deep", "b.txt", b"beta"),
        ];

        let mut writer = FileWriter::new(output.path()).with_buffer_size(2);
        let outcomes = writer.consume(feed(items).await, &context()).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Outcome::succeeded));
        assert_eq!(std::fs::read(output.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(
            std::fs::read(output.path().join("nested/deep/b.txt")).unwrap(),
            b"beta"
        );
    }

    #[tokio::test]
    async fn test_overwrite_and_rename_modes() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(output.path().join("a.txt"), b"old").unwrap();
        let item = write_file(input.path(), "", "a.txt", b"new");

        let mut renaming = FileWriter::new(output.path()).with_rename(true);
        renaming
            .consume(feed(vec![item.clone()]).await, &context())
            .await
            .unwrap();
        assert_eq!(std::fs::read(output.path().join("a.txt")).unwrap(), b"old");
        assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 2);

        let mut overwriting = FileWriter::new(output.path());
        overwriting
            .consume(feed(vec![item]).await, &context())
            .await
            .unwrap();
        assert_eq!(std::fs::read(output.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_and_changed_sources_fail() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let missing = ContentDescriptor::new("gone.txt", "", input.path().join("gone.txt"), 3);
        let changed = write_file(input.path(), "", "changed.txt", b"1234");
        let changed = changed.with_content(changed.locator(), 2);

        let mut writer = FileWriter::new(output.path());
        let outcomes = writer
            .consume(feed(vec![missing, changed]).await, &context())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Outcome::is_failure));
        assert!(matches!(
            outcomes[1]
                .cause()
                .and_then(|c| c.downcast_ref::<StageError>()),
            Some(StageError::SizeMismatch {
                expected: 2,
                actual: 4,
                ..
            })
        ));
        assert!(!output.path().join("changed.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_writing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let item = write_file(input.path(), "", "a.txt", b"a");
        let ctx = context();
        ctx.token.cancel();

        let mut writer = FileWriter::new(output.path());
        let outcomes = writer.consume(feed(vec![item]).await, &ctx).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind(), OutcomeKind::Cancelled);
        assert!(!output.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_copy_removes_partial_file() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let item = write_file(input.path(), "", "a.txt", b"some content");
        let target = output.path().join("a.txt");
        let token = CancellationToken::new();
        token.cancel();

        let copied = copy_file(item.locator(), &target, 4, &token).await.unwrap();

        assert_eq!(copied, None);
        assert!(!target.exists());
        assert!(item.locator().exists());
    }

    #[tokio::test]
    async fn test_copy_file_reports_bytes() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let item = write_file(input.path(), "", "a.txt", b"some content");
        let target = output.path().join("a.txt");

        let copied = copy_file(item.locator(), &target, 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(copied, Some(12));
        assert_eq!(std::fs::read(&target).unwrap(), b"some content");
    }

    #[test]
    fn test_options() {
        let options: ComponentOptions = [("SaveFolder", "/out"), ("Mode", "Rename")]
            .into_iter()
            .collect();
        let writer = FileWriter::from_options(&options).unwrap();
        assert!(writer.rename);
        assert_eq!(writer.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(writer.name(), "FileWriter[/out]");

        assert!(FileWriter::from_options(&ComponentOptions::new()).is_err());
    }
}
