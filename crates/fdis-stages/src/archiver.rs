//! Zip packing of matching items.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fdis_pipeline::{
    ComponentOptions, ContentDescriptor, ContentReceiver, ContentSender, Outcome,
    PipelineContext, PipelineError, Received, Stage,
};
use regex::Regex;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::StageError;
use crate::forward;
use crate::naming::{expand_name_template, randomized_name};
use crate::regex_option;

/// Packs items matching `Regex` into a zip archive named `ArchiveName`.
///
/// Non-matching items pass through untouched. Once the input ends, a single
/// descriptor for the archive is emitted at the root folder. The archive
/// lives in a temporary directory owned by the stage, so it stays readable
/// until the stage is dropped.
///
/// Items whose entry name is already taken are stored under a randomized
/// file name. If the archive cannot be written, the matched items are
/// forwarded unchanged instead.
pub struct FileArchiver {
    regex: Regex,
    archive_name: String,
    workdir: Option<TempDir>,
}

/// One archive member: its name inside the zip and the item it reads from.
struct Entry {
    name: String,
    item: ContentDescriptor,
}

impl FileArchiver {
    pub const NAME: &'static str = "FileArchiver";

    pub fn new(regex: Regex, archive_name: impl Into<String>) -> Self {
        Self {
            regex,
            archive_name: archive_name.into(),
            workdir: None,
        }
    }

    pub fn from_options(options: &ComponentOptions) -> Result<Self, PipelineError> {
        let regex = regex_option(Self::NAME, options, "Regex")?;
        let archive_name = options.require(Self::NAME, "ArchiveName")?;
        Ok(Self::new(regex, archive_name))
    }

    /// The stage's temporary directory, created on first use.
    fn workdir(&mut self) -> std::io::Result<&Path> {
        let dir = match self.workdir.take() {
            Some(dir) => dir,
            None => tempfile::Builder::new().prefix("fdis-archive-").tempdir()?,
        };
        Ok(self.workdir.insert(dir).path())
    }

    async fn write_archive(
        &mut self,
        entries: &[Entry],
    ) -> Result<ContentDescriptor, StageError> {
        let file_name = expand_name_template(&self.archive_name);
        let path = self.workdir()?.join(&file_name);

        let target = path.clone();
        let entries: Vec<_> = entries
            .iter()
            .map(|e| (e.name.clone(), e.item.locator().to_path_buf()))
            .collect();
        let size = tokio::task::spawn_blocking(move || write_zip(&target, &entries)).await??;
        Ok(ContentDescriptor::new(file_name, "", path, size))
    }
}

impl Drop for FileArchiver {
    fn drop(&mut self) {
        if let Some(dir) = self.workdir.take() {
            debug!(path = %dir.path().display(), "Cleaning up archive directory");
            if let Err(e) = dir.close() {
                warn!(error = %e, "Failed to remove archive directory");
            }
        }
    }
}

/// Write `entries` into a new deflated zip at `path`; returns the archive size.
fn write_zip(path: &Path, entries: &[(String, PathBuf)]) -> Result<u64, StageError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, locator) in entries {
        let mut source = File::open(locator)?;
        zip.start_file(name.as_str(), options)?;
        std::io::copy(&mut source, &mut zip)?;
    }

    let mut writer = zip.finish()?;
    std::io::Write::flush(&mut writer)?;
    Ok(std::fs::metadata(path)?.len())
}

/// `relative_folder/file_name` with forward slashes, as zip expects.
fn entry_name(item: &ContentDescriptor) -> String {
    let folder = item.relative_folder().replace('\\', "/");
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        item.file_name().to_string()
    } else {
        format!("{folder}/{}", item.file_name())
    }
}

#[async_trait]
impl Stage for FileArchiver {
    fn name(&self) -> String {
        format!("{}[{}]/[{}]", Self::NAME, self.regex, self.archive_name)
    }

    async fn process(
        &mut self,
        mut input: ContentReceiver,
        output: ContentSender,
        ctx: &PipelineContext,
    ) -> Result<Vec<Outcome>, PipelineError> {
        let mut entries: Vec<Entry> = Vec::new();
        let mut names = HashSet::new();
        let mut outcomes = Vec::new();
        info!("Archiving items that match {}", self.regex);

        loop {
            let item = match input.recv_cancellable(&ctx.token).await {
                Received::Item(item) => item,
                Received::Ended => break,
                Received::Cancelled => {
                    outcomes.push(Outcome::cancelled("archiving cancelled"));
                    return Ok(outcomes);
                }
            };

            if !tokio::fs::try_exists(item.locator()).await.unwrap_or(false) {
                outcomes.push(Outcome::skipped(format!(
                    "{} no longer exists, not archived",
                    item.locator().display()
                )));
                continue;
            }

            let mut name = entry_name(&item);
            if !self.regex.is_match(&name) {
                debug!("{name} did not match {}, not added to archive", self.regex);
                if !forward(&output, item, ctx, &mut outcomes, "archiving").await? {
                    return Ok(outcomes);
                }
                continue;
            }

            while !names.insert(name.clone()) {
                let renamed = entry_name(&item.with_file_name(randomized_name(item.file_name())));
                debug!("{name} is already in the archive, storing it as {renamed}");
                name = renamed;
            }
            debug!("{name} queued for archive");
            entries.push(Entry { name, item });
        }

        if entries.is_empty() {
            info!("Nothing matched {}, no archive written", self.regex);
            return Ok(outcomes);
        }

        let count = entries.len();
        let uncompressed: u64 = entries.iter().map(|e| e.item.size()).sum();
        info!(
            "Writing {count} entries to archive [{}], compressing {}MiB..",
            self.archive_name,
            uncompressed >> 20
        );
        match self.write_archive(&entries).await {
            Ok(archive) => {
                info!(
                    "Compressed {} from {}MiB to {}MiB",
                    archive.file_name(),
                    uncompressed >> 20,
                    archive.size() >> 20
                );
                outcomes.extend(entries.iter().map(|e| {
                    Outcome::success(format!("{} added to archive as {}", e.item, e.name))
                }));
                forward(&output, archive, ctx, &mut outcomes, "archiving").await?;
            }
            Err(e) => {
                warn!(error = %e, "Failed to write archive, forwarding {count} items unarchived");
                outcomes.push(Outcome::error(
                    format!("Could not write archive {}", self.archive_name),
                    e,
                ));
                for entry in entries {
                    if !forward(&output, entry.item, ctx, &mut outcomes, "archiving").await? {
                        break;
                    }
                }
            }
        }
        Ok(outcomes)
    }
}
