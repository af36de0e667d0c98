//! Durable scan state carried from one run to the next.
//!
//! The whole state lives in a single JSON [Checkpoint]. It is loaded once when a
//! run starts, threaded through the run by `&mut`, and saved once at the end of
//! a successful run.
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::{
    reassembly::{Section, Stats},
    Result,
};

/// Half-open byte range `[start, end)` of a reassembled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, other: &Span) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

/// Scan state for one reassembled file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Sorted, non-overlapping, non-touching ranges not yet consumed by a
    /// complete frame.
    pub unprocessed: Vec<Span>,
    /// File length as of the last scan.
    pub file_size: u64,
    /// Index used to name the next scan's output files.
    pub output_index: u32,
}

/// Everything persisted between runs.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Scan state keyed by reassembled file name, e.g., `node58p1.dat`.
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
    /// Merged section history.
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub stats: Stats,
    /// Per node start offset used when requesting missing port 1 data.
    #[serde(default)]
    pub offsets: BTreeMap<u32, u64>,
}

impl Checkpoint {
    /// Start offset recorded for `node`, 0 if none was set.
    #[must_use]
    pub fn offset(&self, node: u32) -> u64 {
        self.offsets.get(&node).copied().unwrap_or_default()
    }
}

/// Combine spans where one ends exactly where the next starts, e.g.,
/// `[a, b), [b, c)` becomes `[a, c)`. Input must be sorted.
#[must_use]
pub fn combine_adjacent(spans: Vec<Span>) -> Vec<Span> {
    let mut combined: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        match combined.last_mut() {
            Some(prev) if prev.end == span.start => prev.end = span.end,
            _ => combined.push(span),
        }
    }
    combined
}

/// Owner of the [Checkpoint] and the path it is persisted to.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    checkpoint: Checkpoint,
}

impl StateStore {
    /// Load the checkpoint at `path`.
    ///
    /// This does not fail. A missing checkpoint is a first run, and one that
    /// cannot be read or decoded is logged and replaced by an empty state, in
    /// which case every reassembled file is re-scanned from the start.
    pub fn load<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let checkpoint = match fs::read(&path) {
            Ok(dat) => match serde_json::from_slice::<Checkpoint>(&dat) {
                Ok(checkpoint) => {
                    debug!(path = %path.display(), files = checkpoint.files.len(), "loaded checkpoint");
                    checkpoint
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "corrupt checkpoint; starting from empty state");
                    Checkpoint::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no checkpoint; starting from empty state");
                Checkpoint::default()
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable checkpoint; starting from empty state");
                Checkpoint::default()
            }
        };
        Self { path, checkpoint }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn checkpoint_mut(&mut self) -> &mut Checkpoint {
        &mut self.checkpoint
    }

    #[must_use]
    pub fn file(&self, file_id: &str) -> Option<&FileState> {
        self.checkpoint.files.get(file_id)
    }

    #[must_use]
    pub fn unprocessed(&self, file_id: &str) -> &[Span] {
        self.file(file_id)
            .map(|fs| fs.unprocessed.as_slice())
            .unwrap_or_default()
    }

    /// Record that `file_id` is now `new_len` bytes long, making any bytes past
    /// the previously known size unprocessed.
    pub fn extend_for_growth(&mut self, file_id: &str, new_len: u64) {
        let state = self.checkpoint.files.entry(file_id.to_string()).or_default();
        let old_len = state.file_size;
        if new_len < old_len {
            warn!(file_id, old_len, new_len, "file shrank; keeping previous state");
            return;
        }
        if new_len == old_len {
            return;
        }
        match state.unprocessed.last_mut() {
            Some(last) if last.end == old_len => last.end = new_len,
            _ => state.unprocessed.push(Span::new(old_len, new_len)),
        }
        state.file_size = new_len;
        debug!(file_id, old_len, new_len, "file grew");
    }

    /// Remove fully consumed spans from the unprocessed ranges of `file_id`.
    ///
    /// Each span is removed from the range containing it, leaving the bytes on
    /// either side unprocessed. Spans not contained by any range are ignored.
    pub fn consume(&mut self, file_id: &str, spans: &[Span]) {
        let Some(state) = self.checkpoint.files.get_mut(file_id) else {
            return;
        };
        for span in spans {
            let Some(idx) = state.unprocessed.iter().position(|r| r.contains(span)) else {
                debug!(file_id, ?span, "consumed span outside unprocessed ranges");
                continue;
            };
            let range = state.unprocessed.remove(idx);
            if span.start > range.start {
                state.unprocessed.push(Span::new(range.start, span.start));
            }
            if span.end < range.end {
                state.unprocessed.push(Span::new(span.end, range.end));
            }
            trace!(file_id, ?span, ?range, "consumed");
        }
        let mut unprocessed = std::mem::take(&mut state.unprocessed);
        unprocessed.sort();
        state.unprocessed = combine_adjacent(unprocessed);
    }

    /// Return the output index for this scan of `file_id` and advance it.
    pub fn bump_output_index(&mut self, file_id: &str) -> u32 {
        let state = self.checkpoint.files.entry(file_id.to_string()).or_default();
        let index = state.output_index;
        state.output_index += 1;
        index
    }

    /// Atomically replace the checkpoint on disk.
    ///
    /// The state is written to a temporary file next to the checkpoint, synced,
    /// and renamed over it, so the checkpoint is always either the previous or
    /// the new state.
    ///
    /// # Errors
    /// If the state cannot be encoded, written, synced, or renamed into place.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        let dat = serde_json::to_vec(&self.checkpoint)?;
        tmp.write_all(&dat)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        debug!(path = %self.path.display(), bytes = dat.len(), "saved checkpoint");
        Ok(())
    }
}
