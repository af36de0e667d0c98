//! SIO frame scanning and demultiplexing.
//!
//! The framed port of each node carries SIO frames: a 33 byte ASCII header
//! between `0x01` and `0x02` sentinels, the modem-escaped data and a `0x03`
//! terminator. Complete frames are de-escaped and appended to one output file
//! per instrument type. Only the bytes of complete frames are marked consumed,
//! everything else stays unprocessed until later data completes it.
mod escape;
mod header;

use std::{
    collections::{hash_map::Entry, BTreeMap, HashMap},
    fs::{File, OpenOptions},
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::{
    state::{combine_adjacent, Span, StateStore},
    Config, Result,
};

pub use escape::{unescape, unescape_len, ESCAPE};
pub use header::{
    find_headers, FrameHeader, HeaderMatch, InstrumentCode, InstrumentType, BLOCK_END,
    FRAME_OVERHEAD, HEADER_END, HEADER_LEN, HEADER_START,
};

/// A complete, de-escaped frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    /// Header, de-escaped data and terminator.
    pub bytes: Vec<u8>,
    /// Source bytes the frame occupied, in file offsets.
    pub consumed: Span,
}

/// Result of checking the frame following a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Complete(Frame),
    /// The frame runs past the end of the available bytes.
    Incomplete { offset: u64 },
    /// All bytes are present but the terminator is not [BLOCK_END].
    Malformed { offset: u64 },
}

/// Check the frame whose header is `hdr`, where `block` starts at file offset
/// `base`.
///
/// The declared length counts de-escaped data bytes, so the data is decoded
/// until that many bytes are produced and the terminator must be the next raw
/// byte. The consumed span covers the raw, still escaped, bytes.
#[must_use]
pub fn check_frame(block: &[u8], hdr: &HeaderMatch, base: u64) -> FrameOutcome {
    let offset = base + hdr.start as u64;
    let Some((data, used)) = unescape_len(&block[hdr.end..], hdr.header.data_len) else {
        return FrameOutcome::Incomplete { offset };
    };
    let term_idx = hdr.end + used;
    match block.get(term_idx) {
        None => return FrameOutcome::Incomplete { offset },
        Some(&BLOCK_END) => {}
        Some(_) => return FrameOutcome::Malformed { offset },
    }

    let mut bytes = Vec::with_capacity(hdr.header.frame_len());
    bytes.extend_from_slice(&block[hdr.start..hdr.end]);
    bytes.extend_from_slice(&data);
    bytes.push(BLOCK_END);

    FrameOutcome::Complete(Frame {
        header: hdr.header,
        bytes,
        consumed: Span::new(offset, base + (term_idx + 1) as u64),
    })
}

/// Check every header found in `block`, in order, where `block` starts at file
/// offset `base`.
pub fn scan_block(block: &[u8], base: u64) -> impl Iterator<Item = FrameOutcome> + '_ {
    find_headers(block).map(move |hdr| check_frame(block, &hdr, base))
}

/// Name of the demultiplexed output for one scan of a reassembled file, e.g.,
/// `node58p1_0.status.dat` for `node58p1.dat`.
#[must_use]
pub fn output_file_name(file_name: &str, output_index: u32, ty: InstrumentType) -> String {
    let base = file_name.strip_suffix(".dat").unwrap_or(file_name);
    format!("{base}_{output_index}.{ty}.dat")
}

/// Per-type append writers for one scan. Files are created when their first
/// frame is written.
struct Demux {
    dir: PathBuf,
    file_name: String,
    output_index: u32,
    writers: HashMap<InstrumentType, BufWriter<File>>,
}

impl Demux {
    fn new(dir: PathBuf, file_name: &str, output_index: u32) -> Self {
        Self {
            dir,
            file_name: file_name.to_string(),
            output_index,
            writers: HashMap::default(),
        }
    }

    fn write(&mut self, ty: InstrumentType, dat: &[u8]) -> Result<()> {
        let writer = match self.writers.entry(ty) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self
                    .dir
                    .join(output_file_name(&self.file_name, self.output_index, ty));
                debug!(path = %path.display(), "opening output");
                let file = OpenOptions::new().append(true).create(true).open(&path)?;
                entry.insert(BufWriter::new(file))
            }
        };
        writer.write_all(dat)?;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        for (_, mut writer) in self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

/// What one scan of a reassembled file did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub file_name: String,
    pub output_index: u32,
    /// Complete frames written, by type.
    pub frames: BTreeMap<InstrumentType, usize>,
    pub incomplete: usize,
    pub malformed: usize,
    /// Bytes still unprocessed after the scan.
    pub unprocessed: u64,
}

impl ScanSummary {
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.frames.values().sum()
    }
}

/// Scans reassembled files for frames, resuming from the unprocessed ranges
/// recorded in a [StateStore].
#[derive(Debug, Clone)]
pub struct FrameScanner {
    dir: PathBuf,
}

impl FrameScanner {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.data_dir.clone(),
        }
    }

    /// Scan the unprocessed bytes of reassembled file `file_name`.
    ///
    /// Growth of the file since the last scan is added to its unprocessed
    /// ranges, the output index is advanced, complete frames are appended to
    /// `<base>_<index>.<type>.dat`, and their source bytes are consumed.
    ///
    /// # Errors
    /// Any IO error reading the reassembled file or writing an output file. The
    /// state may then be partially updated and should not be saved.
    pub fn scan_file(&self, file_name: &str, state: &mut StateStore) -> Result<ScanSummary> {
        let path = self.dir.join(file_name);
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        state.extend_for_growth(file_name, file_len);
        let output_index = state.bump_output_index(file_name);
        let ranges = state.unprocessed(file_name).to_vec();

        let mut summary = ScanSummary {
            file_name: file_name.to_string(),
            output_index,
            ..Default::default()
        };
        let mut demux = Demux::new(self.dir.clone(), file_name, output_index);
        let mut consumed: Vec<Span> = Vec::default();

        for range in ranges {
            file.seek(SeekFrom::Start(range.start))?;
            let mut block = Vec::default();
            (&mut file)
                .take(range.end.saturating_sub(range.start))
                .read_to_end(&mut block)?;
            debug!(file_name, start = range.start, end = range.end, "scanning range");

            for outcome in scan_block(&block, range.start) {
                match outcome {
                    FrameOutcome::Complete(frame) => {
                        let ty = frame.header.code.instrument_type();
                        trace!(
                            code = %frame.header.code,
                            start = frame.consumed.start,
                            end = frame.consumed.end,
                            "frame"
                        );
                        demux.write(ty, &frame.bytes)?;
                        *summary.frames.entry(ty).or_default() += 1;
                        consumed.push(frame.consumed);
                    }
                    FrameOutcome::Incomplete { offset } => {
                        debug!(file_name, offset, "incomplete frame; leaving unprocessed");
                        summary.incomplete += 1;
                    }
                    FrameOutcome::Malformed { offset } => {
                        warn!(file_name, offset, "frame terminator mismatch; leaving unprocessed");
                        summary.malformed += 1;
                    }
                }
            }
        }
        demux.finish()?;

        consumed.sort();
        state.consume(file_name, &combine_adjacent(consumed));
        summary.unprocessed = state
            .unprocessed(file_name)
            .iter()
            .map(|s| s.end - s.start)
            .sum();

        info!(
            file_name,
            output_index,
            frames = summary.total_frames(),
            incomplete = summary.incomplete,
            malformed = summary.malformed,
            unprocessed = summary.unprocessed,
            "scanned"
        );
        Ok(summary)
    }
}
