//! Sparse, offset addressed reassembly of device byte streams.
//!
//! Each `(node, port)` stream is reassembled into its own file named
//! `node<N>p<P>.dat`, with every committed section written at its absolute
//! offset. Gaps that have not been received read as zeros.
mod stats;

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{transfer::TagGroup, Result};

pub use stats::{DeviceStats, Stats};

/// A received byte range `[start, end]` (inclusive) of one device stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub node: u32,
    pub port: u32,
    pub start: u64,
    pub end: u64,
    /// Device that relayed the data.
    pub device_id: String,
    /// Open time of the transfer file carrying the data, UTC seconds.
    pub timestamp: i64,
}

impl Section {
    pub fn new<S: Into<String>>(
        node: u32,
        port: u32,
        start: u64,
        end: u64,
        device_id: S,
        timestamp: i64,
    ) -> Self {
        Self {
            node,
            port,
            start,
            end,
            device_id: device_id.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn from_group(group: &TagGroup, device_id: &str, timestamp: i64) -> Self {
        Self::new(
            group.node,
            group.port,
            group.start,
            group.end,
            device_id,
            timestamp,
        )
    }

    /// Number of bytes covered, `1 + end - start`, or 0 when `end < start`.
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        self.end
            .checked_sub(self.start)
            .map_or(0, |n| n.saturating_add(1))
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

/// Name of the reassembled file for a `(node, port)` stream.
#[must_use]
pub fn node_file_name(node: u32, port: u32) -> String {
    format!("node{node}p{port}.dat")
}

/// Merge overlapping or adjacent sections of the same `(node, port)`.
///
/// The result is sorted by `(node, port, start)` and, per `(node, port)`, no two
/// sections overlap or touch. Merged sections take the max `end` and max
/// `timestamp`. Invalid sections (`end <= start`) are dropped.
///
/// # Example
/// ```
/// use mdd::reassembly::{merge_sections, Section};
///
/// let merged = merge_sections(vec![
///     Section::new(58, 1, 1000, 1999, "unit_364", 2),
///     Section::new(58, 1, 0, 999, "unit_364", 1),
/// ]);
/// assert_eq!(merged.len(), 1);
/// assert_eq!((merged[0].start, merged[0].end), (0, 1999));
/// ```
#[must_use]
pub fn merge_sections(sections: Vec<Section>) -> Vec<Section> {
    let mut sections: Vec<Section> = sections
        .into_iter()
        .filter(|s| {
            if s.is_valid() {
                return true;
            }
            warn!(
                node = s.node,
                port = s.port,
                start = s.start,
                end = s.end,
                "dropping section with end <= start"
            );
            false
        })
        .collect();
    // Full key so ties resolve the same way regardless of input order
    sections.sort_by(|a, b| {
        (a.node, a.port, a.start, a.end, &a.device_id, a.timestamp).cmp(&(
            b.node,
            b.port,
            b.start,
            b.end,
            &b.device_id,
            b.timestamp,
        ))
    });

    let mut merged: Vec<Section> = Vec::with_capacity(sections.len());
    for section in sections {
        if let Some(prev) = merged.last_mut() {
            if prev.node == section.node
                && prev.port == section.port
                && section.start <= prev.end.saturating_add(1)
            {
                prev.end = prev.end.max(section.end);
                prev.timestamp = prev.timestamp.max(section.timestamp);
                continue;
            }
        }
        merged.push(section);
    }
    merged
}

/// Highest known end offset and most recent time for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latest {
    pub end: u64,
    pub timestamp: i64,
}

/// The highest end offset and latest timestamp per node over the sections
/// for `port`.
#[must_use]
pub fn latest_by_node(sections: &[Section], port: u32) -> BTreeMap<u32, Latest> {
    let mut nodes: BTreeMap<u32, Latest> = BTreeMap::default();
    for section in sections.iter().filter(|s| s.port == port) {
        nodes
            .entry(section.node)
            .and_modify(|l| {
                l.end = l.end.max(section.end);
                l.timestamp = l.timestamp.max(section.timestamp);
            })
            .or_insert(Latest {
                end: section.end,
                timestamp: section.timestamp,
            });
    }
    nodes
}

/// Writes sections into their reassembled files and keeps the section history
/// and statistics that go along with them.
#[derive(Debug)]
pub struct ReassemblyStore {
    dir: PathBuf,
    framed_port: u32,
    sections: Vec<Section>,
    stats: Stats,
    changed: BTreeSet<String>,
}

impl ReassemblyStore {
    /// Create a store writing into `dir`. Files for `framed_port` are reported
    /// by [ReassemblyStore::changed] when written to.
    pub fn new<P: Into<PathBuf>>(dir: P, framed_port: u32) -> Self {
        Self {
            dir: dir.into(),
            framed_port,
            sections: Vec::default(),
            stats: Stats::default(),
            changed: BTreeSet::default(),
        }
    }

    /// Continue from previously merged sections and statistics.
    #[must_use]
    pub fn with_history(mut self, sections: Vec<Section>, stats: Stats) -> Self {
        self.sections = sections;
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn path(&self, node: u32, port: u32) -> PathBuf {
        self.dir.join(node_file_name(node, port))
    }

    /// Write `payload` at `section.start` of the section's reassembled file,
    /// zero filling if the file is shorter than `start`.
    ///
    /// Invalid sections are dropped with a warning and nothing is written.
    ///
    /// # Errors
    /// Any IO error opening, extending, seeking or writing the file.
    pub fn commit(&mut self, section: Section, payload: &[u8]) -> Result<()> {
        if !section.is_valid() {
            warn!(
                node = section.node,
                port = section.port,
                start = section.start,
                end = section.end,
                "dropping section with end <= start"
            );
            return Ok(());
        }
        let path = self.path(section.node, section.port);
        write_at(&path, section.start, payload)?;
        debug!(
            path = %path.display(),
            start = section.start,
            end = section.end,
            len = payload.len(),
            "committed section"
        );

        if section.port == self.framed_port {
            self.changed
                .insert(node_file_name(section.node, section.port));
        }
        self.update_stats(&section);
        self.sections.push(section);
        Ok(())
    }

    pub fn update_stats(&mut self, section: &Section) {
        self.stats.update(section);
    }

    /// Names of framed-port files written to by this store.
    pub fn changed(&self) -> impl Iterator<Item = &str> + '_ {
        self.changed.iter().map(String::as_str)
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Read back the inclusive range `[start, end]` of a reassembled file.
    /// Bytes past the end of the file are not returned.
    ///
    /// # Errors
    /// Any IO error opening or reading the file.
    pub fn read(&self, node: u32, port: u32, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut file = File::open(self.path(node, port))?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::default();
        file.take(end.saturating_sub(start).saturating_add(1))
            .read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Merge all sections, returning them with the statistics and the names of
    /// the framed-port files that changed.
    #[must_use]
    pub fn finish(self) -> (Vec<Section>, Stats, Vec<String>) {
        let sections = merge_sections(self.sections);
        (sections, self.stats, self.changed.into_iter().collect())
    }
}

fn write_at(path: &Path, start: u64, payload: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let len = file.metadata()?.len();
    if start > len {
        trace!(path = %path.display(), from = len, to = start, "zero filling");
        file.set_len(start)?;
    }
    file.seek(SeekFrom::Start(start))?;
    file.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sect(node: u32, port: u32, start: u64, end: u64) -> Section {
        Section::new(node, port, start, end, "unit_364", 0)
    }

    fn spans(sections: &[Section]) -> Vec<(u32, u32, u64, u64)> {
        sections
            .iter()
            .map(|s| (s.node, s.port, s.start, s.end))
            .collect()
    }

    #[test]
    fn merge_overlapping_and_adjacent() {
        let merged = merge_sections(vec![
            sect(58, 1, 3840, 4058),
            sect(58, 1, 0, 3583),
            sect(58, 1, 2048, 2303),
            sect(58, 1, 3584, 3700),
            sect(58, 2, 0, 10),
            sect(59, 1, 12, 20),
        ]);

        assert_eq!(
            spans(&merged),
            vec![
                (58, 1, 0, 3700),
                (58, 1, 3840, 4058),
                (58, 2, 0, 10),
                (59, 1, 12, 20)
            ]
        );
    }

    #[test]
    fn merge_keeps_one_byte_gap_apart() {
        let merged = merge_sections(vec![sect(58, 1, 0, 9), sect(58, 1, 11, 20)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_takes_max_timestamp() {
        let merged = merge_sections(vec![
            Section::new(58, 1, 0, 9, "unit_364", 5),
            Section::new(58, 1, 5, 7, "unit_364", 9),
            Section::new(58, 1, 8, 12, "unit_364", 1),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, 12);
        assert_eq!(merged[0].timestamp, 9);
    }

    #[test]
    fn merge_drops_invalid() {
        let merged = merge_sections(vec![sect(58, 1, 10, 10), sect(58, 1, 10, 5)]);
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_is_idempotent_and_order_independent() {
        let input = vec![
            sect(58, 1, 500, 600),
            sect(58, 1, 0, 99),
            sect(58, 1, 100, 200),
            sect(58, 1, 150, 499),
            sect(58, 1, 700, 800),
            sect(58, 2, 0, 5),
        ];
        let once = merge_sections(input.clone());
        let twice = merge_sections(once.clone());
        let mut reversed = input;
        reversed.reverse();

        assert_eq!(once, twice);
        assert_eq!(once, merge_sections(reversed));
        assert_eq!(
            spans(&once),
            vec![(58, 1, 0, 600), (58, 1, 700, 800), (58, 2, 0, 5)]
        );
    }

    #[test]
    fn latest() {
        let sections = vec![
            Section::new(58, 1, 0, 99, "unit_364", 5),
            Section::new(58, 1, 200, 299, "unit_364", 3),
            Section::new(58, 2, 0, 999, "unit_364", 7),
            Section::new(59, 1, 0, 9, "unit_363", 1),
        ];
        let latest = latest_by_node(&sections, 1);

        assert_eq!(latest[&58], Latest { end: 299, timestamp: 5 });
        assert_eq!(latest[&59], Latest { end: 9, timestamp: 1 });
    }

    #[test]
    fn commit_zero_fills_and_reads_back() {
        let tmpdir = tempfile::tempdir().unwrap();
        let mut store = ReassemblyStore::new(tmpdir.path(), 1);

        store.commit(sect(58, 1, 10, 14), b"hello").unwrap();
        store.commit(sect(58, 1, 0, 2), b"abc").unwrap();

        let dat = fs::read(tmpdir.path().join("node58p1.dat")).unwrap();
        assert_eq!(dat.len(), 15);
        assert_eq!(&dat[..3], b"abc");
        assert_eq!(&dat[3..10], &[0u8; 7]);
        assert_eq!(&dat[10..], b"hello");
        assert_eq!(store.read(58, 1, 10, 14).unwrap(), b"hello");
    }

    #[test]
    fn commit_overwrites_overlap() {
        let tmpdir = tempfile::tempdir().unwrap();
        let mut store = ReassemblyStore::new(tmpdir.path(), 1);

        store.commit(sect(58, 1, 0, 4), b"aaaaa").unwrap();
        store.commit(sect(58, 1, 2, 6), b"bbbbb").unwrap();

        assert_eq!(store.read(58, 1, 0, 6).unwrap(), b"aabbbbb");
    }

    #[test]
    fn commit_tracks_changed_framed_port_only() {
        let tmpdir = tempfile::tempdir().unwrap();
        let mut store = ReassemblyStore::new(tmpdir.path(), 1);

        store.commit(sect(58, 2, 0, 1), b"ab").unwrap();
        store.commit(sect(58, 1, 0, 1), b"ab").unwrap();
        store.commit(sect(58, 1, 2, 3), b"cd").unwrap();
        store.commit(sect(59, 1, 5, 5), b"x").unwrap();

        assert_eq!(store.changed().collect::<Vec<_>>(), vec!["node58p1.dat"]);
        assert!(
            !tmpdir.path().join("node59p1.dat").exists(),
            "invalid section should not be written"
        );
        assert_eq!(store.stats().get(58, "unit_364").unwrap().bytes, 6);

        let (sections, stats, changed) = store.finish();
        assert_eq!(spans(&sections), vec![(58, 1, 0, 3), (58, 2, 0, 1)]);
        assert_eq!(stats.get(58, "unit_364").unwrap().bytes, 6);
        assert_eq!(changed, vec!["node58p1.dat".to_string()]);
    }

    #[test]
    fn finish_merges_with_history() {
        let tmpdir = tempfile::tempdir().unwrap();
        let mut store = ReassemblyStore::new(tmpdir.path(), 1)
            .with_history(vec![sect(58, 1, 0, 999)], Stats::default());

        store.commit(sect(58, 1, 1000, 1001), b"ab").unwrap();

        let (sections, _, _) = store.finish();
        assert_eq!(spans(&sections), vec![(58, 1, 0, 1001)]);
    }
}
