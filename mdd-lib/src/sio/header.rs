use std::{fmt::Display, sync::OnceLock};

use regex::bytes::{Captures, Regex};
use serde::Serialize;

/// Start of header.
pub const HEADER_START: u8 = 0x01;
/// End of header, binary data follows.
pub const HEADER_END: u8 = 0x02;
/// Frame terminator following the data.
pub const BLOCK_END: u8 = 0x03;
/// Bytes in a header, both sentinels included.
pub const HEADER_LEN: usize = 33;
/// Bytes in a frame other than its data, i.e., header plus terminator.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 1;

const HEADER_PATTERN: &str = concat!(
    r"\x01",
    r"(AD|CT|CO|DO|FL|PH|CS|PS|WA|WC|WE)", // instrument code
    r"([0-9]{5})",                         // controller id
    r"([0-9]{2})",                         // inductive id
    r"_",
    r"([0-9a-fA-F]{4})", // data length
    r"([0-9A-Za-z])",    // processing flag
    r"([0-9a-fA-F]{8})", // controller time
    r"_",
    r"([0-9a-fA-F]{2})", // block number
    r"_",
    r"([0-9a-fA-F]{4})", // checksum
    r"\x02",
);

fn header_regex() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(HEADER_PATTERN).expect("header regex to compile"))
}

/// Two character instrument code of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentCode {
    Ad,
    Ct,
    Co,
    Do,
    Fl,
    Ph,
    Cs,
    Ps,
    Wa,
    Wc,
    We,
}

impl InstrumentCode {
    fn from_bytes(code: &[u8]) -> Option<Self> {
        Some(match code {
            b"AD" => Self::Ad,
            b"CT" => Self::Ct,
            b"CO" => Self::Co,
            b"DO" => Self::Do,
            b"FL" => Self::Fl,
            b"PH" => Self::Ph,
            b"CS" => Self::Cs,
            b"PS" => Self::Ps,
            b"WA" => Self::Wa,
            b"WC" => Self::Wc,
            b"WE" => Self::We,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ad => "AD",
            Self::Ct => "CT",
            Self::Co => "CO",
            Self::Do => "DO",
            Self::Fl => "FL",
            Self::Ph => "PH",
            Self::Cs => "CS",
            Self::Ps => "PS",
            Self::Wa => "WA",
            Self::Wc => "WC",
            Self::We => "WE",
        }
    }

    /// Output category for frames carrying this code.
    #[must_use]
    pub fn instrument_type(self) -> InstrumentType {
        match self {
            Self::Ad => InstrumentType::Adcps,
            Self::Ct | Self::Co => InstrumentType::Ctdmo,
            Self::Do => InstrumentType::Dosta,
            Self::Fl => InstrumentType::Flort,
            Self::Ph => InstrumentType::Phsen,
            Self::Cs | Self::Ps => InstrumentType::Status,
            Self::Wa => InstrumentType::WaWfp,
            Self::Wc => InstrumentType::WcWfp,
            Self::We => InstrumentType::WeWfp,
        }
    }
}

impl Display for InstrumentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Demultiplexed output category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Adcps,
    Ctdmo,
    Dosta,
    Flort,
    Phsen,
    Status,
    WaWfp,
    WcWfp,
    WeWfp,
}

impl InstrumentType {
    /// Name used as the type component of output file names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Adcps => "adcps",
            Self::Ctdmo => "ctdmo",
            Self::Dosta => "dosta",
            Self::Flort => "flort",
            Self::Phsen => "phsen",
            Self::Status => "status",
            Self::WaWfp => "wa_wfp",
            Self::WcWfp => "wc_wfp",
            Self::WeWfp => "we_wfp",
        }
    }
}

impl Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub code: InstrumentCode,
    pub controller_id: u32,
    pub inductive_id: u8,
    /// Declared number of data bytes after de-escaping.
    pub data_len: usize,
    pub processing_flag: u8,
    /// Controller POSIX time.
    pub timestamp: u32,
    pub block_number: u8,
    /// CRC as carried in the header. Not validated.
    pub checksum: u16,
}

impl FrameHeader {
    fn from_captures(caps: &Captures) -> Option<Self> {
        let text = |i: usize| std::str::from_utf8(caps.get(i)?.as_bytes()).ok();
        Some(FrameHeader {
            code: InstrumentCode::from_bytes(caps.get(1)?.as_bytes())?,
            controller_id: text(2)?.parse().ok()?,
            inductive_id: text(3)?.parse().ok()?,
            data_len: usize::from_str_radix(text(4)?, 16).ok()?,
            processing_flag: caps.get(5)?.as_bytes()[0],
            timestamp: u32::from_str_radix(text(6)?, 16).ok()?,
            block_number: u8::from_str_radix(text(7)?, 16).ok()?,
            checksum: u16::from_str_radix(text(8)?, 16).ok()?,
        })
    }

    /// Decode a header from the first [HEADER_LEN] bytes of `dat`.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        let dat = dat.get(..HEADER_LEN)?;
        let caps = header_regex().captures(dat)?;
        if caps.get(0)?.start() != 0 {
            return None;
        }
        Self::from_captures(&caps)
    }

    /// Logical frame length: header, data and terminator.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.data_len
    }
}

/// A header located in a byte block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMatch {
    /// Offset of the start sentinel.
    pub start: usize,
    /// Offset one past the end-of-header sentinel.
    pub end: usize,
    pub header: FrameHeader,
}

/// All non-overlapping headers in `block`, in order. Each search resumes
/// right after the previous header, not after its frame.
pub fn find_headers(block: &[u8]) -> impl Iterator<Item = HeaderMatch> + '_ {
    header_regex().captures_iter(block).filter_map(|caps| {
        let m = caps.get(0)?;
        Some(HeaderMatch {
            start: m.start(),
            end: m.end(),
            header: FrameHeader::from_captures(&caps)?,
        })
    })
}
