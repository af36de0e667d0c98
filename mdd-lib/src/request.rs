//! Retransmission requests for byte ranges not yet received.
//!
//! A request (`.mdr`) file lists ranges as `STARTOFFSET`, `ENDOFFSET` and
//! `PORT` lines, offsets inclusive.
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{reassembly::Section, state::Checkpoint, Config, Result};

/// Upper bound requested when no maximum is given.
pub const OPEN_END: u64 = 9_999_999;

/// An inclusive range `[start, end]` to request for `port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestRange {
    pub start: u64,
    pub end: u64,
    pub port: u32,
}

/// Ranges of `[min, max]` on `(node, port)` not covered by `sections`. The
/// last range always runs to `max`, so data past the known end is requested
/// too.
///
/// A gap before a section starting at `s` ends at `s - 1`. Older request
/// files ended such gaps at `s`, overlapping the section by one byte.
///
/// # Example
/// ```
/// use mdd::reassembly::Section;
/// use mdd::request::{missing_ranges, RequestRange};
///
/// let sections = vec![Section::new(58, 1, 100, 199, "unit_364", 0)];
/// let ranges = missing_ranges(&sections, 58, 1, 0, 999);
/// assert_eq!(ranges, vec![
///     RequestRange { start: 0, end: 99, port: 1 },
///     RequestRange { start: 200, end: 999, port: 1 },
/// ]);
/// ```
#[must_use]
pub fn missing_ranges(
    sections: &[Section],
    node: u32,
    port: u32,
    min: u64,
    max: u64,
) -> Vec<RequestRange> {
    let mut received: Vec<&Section> = sections
        .iter()
        .filter(|s| s.node == node && s.port == port)
        .collect();
    received.sort_by_key(|s| s.start);

    let mut ranges = Vec::default();
    let mut posn = min;
    for section in received {
        if posn > max {
            break;
        }
        if section.start > posn {
            ranges.push(RequestRange {
                start: posn,
                end: (section.start - 1).min(max),
                port,
            });
        }
        posn = posn.max(section.end.saturating_add(1));
    }
    if posn <= max {
        ranges.push(RequestRange {
            start: posn,
            end: max,
            port,
        });
    }
    ranges
}

/// Write `ranges` in request file form.
///
/// # Errors
/// Any IO error writing to `w`.
pub fn write_request<W: Write>(mut w: W, ranges: &[RequestRange]) -> Result<()> {
    for range in ranges {
        writeln!(w, "STARTOFFSET: {}", range.start)?;
        writeln!(w, "ENDOFFSET: {}", range.end)?;
        writeln!(w, "PORT: {}", range.port)?;
    }
    w.flush()?;
    Ok(())
}

/// Ranges to request for `node`. Port 1 starts at the node's recorded offset.
/// Without `max` port 2 is requested as well, both up to [OPEN_END]; with a
/// `max` only port 1 up to `max` is requested.
#[must_use]
pub fn node_request(checkpoint: &Checkpoint, node: u32, max: Option<u64>) -> Vec<RequestRange> {
    let min = checkpoint.offset(node);
    let mut ranges = missing_ranges(
        &checkpoint.sections,
        node,
        1,
        min,
        max.unwrap_or(OPEN_END),
    );
    if max.is_none() {
        ranges.extend(missing_ranges(&checkpoint.sections, node, 2, 0, OPEN_END));
    }
    ranges
}

/// Write `<node>.mdr` into the data directory. See [node_request].
///
/// # Errors
/// Any IO error creating or writing the file.
pub fn write_node_request(
    config: &Config,
    checkpoint: &Checkpoint,
    node: u32,
    max: Option<u64>,
) -> Result<PathBuf> {
    let ranges = node_request(checkpoint, node, max);
    let path = config.datafile(&format!("{node}.mdr"));
    debug!(path = %path.display(), ranges = ranges.len(), "writing request");
    write_request(BufWriter::new(File::create(&path)?), &ranges)?;
    info!(node, path = %path.display(), ranges = ranges.len(), "wrote request");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn range(start: u64, end: u64, port: u32) -> RequestRange {
        RequestRange { start, end, port }
    }

    fn checkpoint() -> Checkpoint {
        Checkpoint {
            sections: vec![
                Section::new(58, 1, 0, 3583, "unit_364", 0),
                Section::new(58, 1, 3840, 4058, "unit_364", 0),
                Section::new(58, 2, 10, 19, "unit_364", 0),
                Section::new(59, 1, 0, 99, "unit_363", 0),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn gaps_between_and_after() {
        let ranges = missing_ranges(&checkpoint().sections, 58, 1, 0, OPEN_END);

        assert_eq!(
            ranges,
            vec![range(3584, 3839, 1), range(4059, OPEN_END, 1)]
        );
    }

    #[test]
    fn min_past_received_data() {
        let ranges = missing_ranges(&checkpoint().sections, 58, 1, 4000, 5000);

        assert_eq!(ranges, vec![range(4059, 5000, 1)]);
    }

    #[test]
    fn max_inside_received_data() {
        let ranges = missing_ranges(&checkpoint().sections, 58, 1, 0, 3700);
        assert_eq!(ranges, vec![range(3584, 3700, 1)]);

        let ranges = missing_ranges(&checkpoint().sections, 58, 1, 0, 100);
        assert!(ranges.is_empty());
    }

    #[test]
    fn nothing_received() {
        let ranges = missing_ranges(&checkpoint().sections, 60, 1, 0, OPEN_END);
        assert_eq!(ranges, vec![range(0, OPEN_END, 1)]);
    }

    #[test]
    fn node_request_uses_offset_and_ports() {
        let mut checkpoint = checkpoint();
        checkpoint.offsets.insert(58, 1000);

        assert_eq!(
            node_request(&checkpoint, 58, None),
            vec![
                range(3584, 3839, 1),
                range(4059, OPEN_END, 1),
                range(0, 9, 2),
                range(20, OPEN_END, 2),
            ]
        );
        assert_eq!(
            node_request(&checkpoint, 58, Some(4000)),
            vec![range(3584, 3839, 1)]
        );
    }

    #[test]
    fn writes_mdr_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let config = Config::builder().data_dir(tmpdir.path().into()).build();

        let path = write_node_request(&config, &checkpoint(), 59, Some(200)).unwrap();

        assert_eq!(path, tmpdir.path().join("59.mdr"));
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "STARTOFFSET: 100\nENDOFFSET: 200\nPORT: 1\n"
        );
    }
}
