//! # Content fingerprint comparison
//!
//! Orders descriptors by content so duplicates can be found without hashing
//! whole files.
//!
//! [`FingerprintComparator::compare`] orders by size first, which needs no I/O
//! and separates most files. Only when two sizes match does it open both files
//! and compare a handful of sampled windows: one at offset 0 and one at each
//! `i * (len / scans)` for `i` in `1..scans`.
//!
//! Two files that agree on every sampled window compare equal even if they
//! differ elsewhere. The comparison is a fast probabilistic heuristic, not a
//! cryptographic hash: false-positive duplicates are possible and accepted in
//! exchange for reading `scans * buffer_size` bytes per file instead of all of
//! them.
//!
//! [`compare_paths`] is the content-independent ordering used to detect
//! destination collisions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::ContentDescriptor;

/// Default number of sampled windows.
pub const DEFAULT_SCANS: usize = 5;
/// Default window size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Size-then-sampled-bytes ordering over descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintComparator {
    scans: usize,
    buffer_size: usize,
}

impl Default for FingerprintComparator {
    fn default() -> Self {
        Self::new(DEFAULT_SCANS, DEFAULT_BUFFER_SIZE)
    }
}

impl FingerprintComparator {
    /// Both parameters are clamped to at least 1.
    pub fn new(scans: usize, buffer_size: usize) -> Self {
        Self {
            scans: scans.max(1),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn scans(&self) -> usize {
        self.scans
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Offsets of the sampled windows for content of `len` bytes.
    pub fn window_offsets(&self, len: u64) -> Vec<u64> {
        let stride = len / self.scans as u64;
        (0..self.scans as u64).map(|i| i * stride).collect()
    }

    /// Compare two descriptors.
    ///
    /// Fails with an I/O error when either side cannot be opened or read,
    /// e.g. when the file was deleted after it was enqueued.
    pub async fn compare(
        &self,
        a: &ContentDescriptor,
        b: &ContentDescriptor,
    ) -> std::io::Result<Ordering> {
        match a.size().cmp(&b.size()) {
            Ordering::Equal => {}
            unequal => return Ok(unequal),
        }
        if a.locator() == b.locator() {
            return Ok(Ordering::Equal);
        }

        let mut file_a = open(a.locator()).await?;
        let mut file_b = open(b.locator()).await?;
        let mut buf_a = vec![0u8; self.buffer_size];
        let mut buf_b = vec![0u8; self.buffer_size];

        for offset in self.window_offsets(a.size()) {
            let read_a = read_window(&mut file_a, a.locator(), offset, &mut buf_a).await?;
            let read_b = read_window(&mut file_b, b.locator(), offset, &mut buf_b).await?;

            match read_a.cmp(&read_b) {
                Ordering::Equal => {}
                unequal => return Ok(unequal),
            }
            match buf_a[..read_a].cmp(&buf_b[..read_b]) {
                Ordering::Equal => {}
                unequal => return Ok(unequal),
            }
        }

        Ok(Ordering::Equal)
    }
}

async fn open(path: &Path) -> std::io::Result<File> {
    File::open(path).await.map_err(|e| with_path(e, path))
}

/// Read up to `buf.len()` bytes starting at `offset`; short only at EOF.
async fn read_window(
    file: &mut File,
    path: &Path,
    offset: u64,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| with_path(e, path))?;

    let mut filled = 0;
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .await
            .map_err(|e| with_path(e, path))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn with_path(e: std::io::Error, path: &Path) -> std::io::Error {
    std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))
}

/// Orders descriptors by destination path (`relative_folder/file_name`).
pub fn compare_paths(a: &ContentDescriptor, b: &ContentDescriptor) -> Ordering {
    a.relative_path().cmp(&b.relative_path())
}

/// A uniqueness set under [`compare_paths`], kept sorted by destination path.
#[derive(Debug, Default)]
pub struct UniquePathSet {
    entries: Vec<ContentDescriptor>,
}

impl UniquePathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, item: &ContentDescriptor) -> bool {
        self.entries
            .binary_search_by(|entry| compare_paths(entry, item))
            .is_ok()
    }

    /// Adds `item` unless another entry has the same destination path.
    pub fn insert(&mut self, item: &ContentDescriptor) -> bool {
        match self
            .entries
            .binary_search_by(|entry| compare_paths(entry, item))
        {
            Ok(_) => false,
            Err(index) => {
                self.entries.insert(index, item.clone());
                true
            }
        }
    }
}

/// A uniqueness set under the fingerprint ordering.
///
/// Entries are bucketed by size and each bucket is kept sorted by the
/// comparator, so an insert reads only files of the same size and binary
/// searches among them.
#[derive(Debug, Default)]
pub struct UniqueContentSet {
    comparator: FingerprintComparator,
    buckets: BTreeMap<u64, Vec<ContentDescriptor>>,
    len: usize,
}

impl UniqueContentSet {
    pub fn new(comparator: FingerprintComparator) -> Self {
        Self {
            comparator,
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `item`; returns `Ok(false)` if an equal item is already present.
    ///
    /// On error the set is unchanged.
    pub async fn insert(&mut self, item: &ContentDescriptor) -> std::io::Result<bool> {
        let bucket = self.buckets.entry(item.size()).or_default();

        let mut lo = 0;
        let mut hi = bucket.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.comparator.compare(item, &bucket[mid]).await? {
                Ordering::Equal => return Ok(false),
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
            }
        }

        bucket.insert(lo, item.clone());
        self.len += 1;
        Ok(true)
    }
}
