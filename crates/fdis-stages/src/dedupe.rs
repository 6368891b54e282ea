//! Content-based deduplication stage.

use async_trait::async_trait;
use fdis_pipeline::fingerprint::{DEFAULT_BUFFER_SIZE, DEFAULT_SCANS};
use fdis_pipeline::{
    ComponentOptions, ContentReceiver, ContentSender, FingerprintComparator, Outcome,
    PipelineContext, PipelineError, Received, Stage, UniqueContentSet,
};
use tracing::{debug, info, warn};

use crate::{StageError, forward};

/// Forwards the first item of every group of content-equal items.
///
/// Equality is the sampled-window fingerprint of [`FingerprintComparator`]:
/// items of different sizes are never duplicates, items of the same size are
/// duplicates when all `Scans` windows of `BufferSize` bytes match.
pub struct Deduplicate {
    comparator: FingerprintComparator,
}

impl Deduplicate {
    pub const NAME: &'static str = "Deduplicate";

    pub fn new(comparator: FingerprintComparator) -> Self {
        Self { comparator }
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let scans = options.parse_or(Self::NAME, "Scans", DEFAULT_SCANS)?;
        let buffer_size = options.parse_or(Self::NAME, "BufferSize", DEFAULT_BUFFER_SIZE)?;
        Ok(Self::new(FingerprintComparator::new(scans, buffer_size)))
    }
}

impl Default for Deduplicate {
    fn default() -> Self {
        Self::new(FingerprintComparator::default())
    }
}

#[async_trait]
impl Stage for Deduplicate {
    fn name(&self) -> String {
        Self::NAME.to_string()
    }

    async fn process(
        &mut self,
        mut input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut unique = UniqueContentSet::new(self.comparator);
        let mut outcomes = Vec::new();
        let mut duplicates = 0usize;

        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled("deduplication cancelled"));
                    break;
                }
            };

            match unique.insert(&item).await {
                Ok(true) => {
                    debug!(file = %item.relative_path().display(), "Unique content");
                    if !forward(&output, item, ctx, &mut outcomes, "deduplication").await? {
                        break;
                    }
                }
                Ok(false) => {
                    duplicates += 1;
                    debug!(file = %item.relative_path().display(), "Duplicate content dropped");
                    outcomes.push(Outcome::skipped(format!(
                        "{} is a duplicate",
                        item.relative_path().display()
                    )));
                }
                Err(e) => {
                    warn!(file = %item.locator().display(), error = %e, "Could not compare content");
                    outcomes.push(Outcome::error(
                        format!("Could not compare {}", item.relative_path().display()),
                        StageError::Io(e),
                    ));
                }
            }
        }

        info!(
            unique = unique.len(),
            duplicates,
            scans = self.comparator.scans(),
            buffer_size = self.comparator.buffer_size(),
            "Deduplication finished"
        );
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context, feed, write_file};
    use fdis_pipeline::{ContentDescriptor, OutcomeKind, channel};
    use tempfile::TempDir;

    async fn run(
        stage: &mut Deduplicate,
        items: Vec<ContentDescriptor>,
    ) -> (Vec<String>, Vec<Outcome>) {
        let (tx, rx) = channel();
        let outcomes = stage
            .process(feed(items).await, tx, &context())
            .await
            .unwrap();
        let names = rx
            .collect()
            .await
            .into_iter()
            .map(|i| i.file_name().to_string())
            .collect();
        (names, outcomes)
    }

    #[tokio::test]
    async fn test_duplicates_are_skipped() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            write_file(dir.path(), "", "a.txt", &[1u8; 100]),
            write_file(dir.path(), "", "b.txt", &[1u8; 100]),
            write_file(dir.path(), "", "c.txt", &[1u8; 50]),
        ];

        let (names, outcomes) = run(&mut Deduplicate::default(), items).await;
        assert_eq!(names, vec!["a.txt", "c.txt"]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind(), OutcomeKind::Skipped);
        assert!(outcomes[0].message().contains("b.txt"));
    }

    #[tokio::test]
    async fn test_distinct_content_passes() {
        let dir = TempDir::new().unwrap();
        let mut other = vec![1u8; 100];
        other[0] = 2;
        let items = vec![
            write_file(dir.path(), "", "a.txt", &[1u8; 100]),
            write_file(dir.path(), "x", "a.txt", &other),
            write_file(dir.path(), "", "empty", b""),
        ];

        let (names, outcomes) = run(&mut Deduplicate::default(), items).await;
        assert_eq!(names.len(), 3);
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_item_is_dropped_with_failure() {
        let dir = TempDir::new().unwrap();
        let present = write_file(dir.path(), "", "a.txt", &[1u8; 10]);
        let missing = ContentDescriptor::new("gone.txt", "", dir.path().join("gone.txt"), 10);

        let (names, outcomes) = run(&mut Deduplicate::default(), vec![present, missing]).await;
        assert_eq!(names, vec!["a.txt"]);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_failure());
    }

    #[test]
    fn test_options() {
        let options: ComponentOptions = [("Scans", "3"), ("BufferSize", "256")]
            .into_iter()
            .collect();
        let stage = Deduplicate::from_options(&options).unwrap();
        assert_eq!(stage.comparator, FingerprintComparator::new(3, 256));

        let stage = Deduplicate::from_options(&ComponentOptions::new()).unwrap();
        assert_eq!(stage.comparator, FingerprintComparator::default());

        let bad: ComponentOptions = [("Scans", "many")].into_iter().collect();
        assert!(Deduplicate::from_options(&bad).is_err());
    }
}
