//! Transfer (`.mdd`) file parsing.
//!
//! A transfer file starts with ASCII `key: value` header lines, followed by any
//! number of tag groups. Each group is the four lines `NODE: <n>`, `PORT: <n>`,
//! `STARTOFFSET: <n>` and `ENDOFFSET: <n>`, in any order, immediately followed
//! by `1 + ENDOFFSET - STARTOFFSET` raw payload bytes.
use std::{fs, path::Path};

use chrono::NaiveDateTime;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

const FULL_FILENAME: &str = "full_filename";
const FILEOPEN_TIME: &str = "fileopen_time";
const FILEOPEN_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Keywords starting a tag line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Node,
    Port,
    StartOffset,
    EndOffset,
}

impl Tag {
    const ALL: [Tag; 4] = [Tag::Node, Tag::Port, Tag::StartOffset, Tag::EndOffset];

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Tag::Node => "NODE",
            Tag::Port => "PORT",
            Tag::StartOffset => "STARTOFFSET",
            Tag::EndOffset => "ENDOFFSET",
        }
    }
}

/// A single `TAG: <integer>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub tag: Tag,
    pub value: u64,
    /// Offset of the first byte after the line's newline.
    pub next: usize,
}

/// One tagged fragment of a device byte stream. `payload` covers the
/// inclusive byte range `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagGroup<'a> {
    pub node: u32,
    pub port: u32,
    pub start: u64,
    pub end: u64,
    pub payload: &'a [u8],
}

impl TagGroup<'_> {
    /// Groups with `end <= start` are never committed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

/// Header metadata and tag groups from one transfer file.
#[derive(Debug, Clone)]
pub struct TransferFile<'a> {
    /// Device (glider) identifier, the `full_filename` prefix before the first `-`.
    pub device_id: String,
    /// `fileopen_time` as UTC seconds since the Unix epoch.
    pub opened: i64,
    pub groups: Vec<TagGroup<'a>>,
}

/// Parse a complete transfer file.
///
/// # Errors
/// [Error::Metadata] if `full_filename` or `fileopen_time` is missing and
/// [Error::Timestamp] if the open time does not match `Wkd Mon DD HH:MM:SS YYYY`.
pub fn parse_transfer(data: &[u8]) -> Result<TransferFile<'_>> {
    let filename = header_field(data, FULL_FILENAME).ok_or(Error::Metadata {
        field: FULL_FILENAME,
    })?;
    let device_id = filename.split('-').next().unwrap_or_default().to_string();
    let opened = header_field(data, FILEOPEN_TIME).ok_or(Error::Metadata {
        field: FILEOPEN_TIME,
    })?;
    let opened = parse_fileopen_time(&opened)?;

    let groups: Vec<TagGroup> = TagGroupIter::new(data).collect();
    debug!(%device_id, opened, groups = groups.len(), "parsed transfer file");

    Ok(TransferFile {
        device_id,
        opened,
        groups,
    })
}

/// Read a transfer file from disk. The returned bytes back the [TagGroup]
/// payloads produced by [parse_transfer].
///
/// # Errors
/// Any IO error reading the file.
pub fn read_transfer<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Value of the first `<name>: <value>` occurrence, trimmed.
fn header_field(data: &[u8], name: &str) -> Option<String> {
    let needle = format!("{name}:");
    let start = find(data, needle.as_bytes(), 0)? + needle.len();
    let end = data[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(data.len(), |n| start + n);
    Some(String::from_utf8_lossy(&data[start..end]).trim().to_string())
}

/// Parse the open time, where underscores or runs of whitespace separate the
/// fields, e.g., `Thu_Jul_25_17:27:44_2013` or `Thu Jul  5 17:27:44 2013`.
///
/// # Errors
/// [Error::Timestamp] if the value does not match the fixed pattern.
pub fn parse_fileopen_time(value: &str) -> Result<i64> {
    let normalized = value
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    NaiveDateTime::parse_from_str(&normalized, FILEOPEN_FORMAT)
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|_| Error::Timestamp {
            value: value.to_string(),
        })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|n| from + n)
}

/// Single forward pass over the tag lines of a transfer file, producing
/// [TagGroup]s in file order.
///
/// A later occurrence of a tag before its group completes replaces the earlier
/// value. Parsing ends at end of input, dropping any partial group.
pub struct TagGroupIter<'a> {
    data: &'a [u8],
    pos: usize,
    node: Option<u64>,
    port: Option<u64>,
    start: Option<u64>,
    end: Option<u64>,
}

impl<'a> TagGroupIter<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            node: None,
            port: None,
            start: None,
            end: None,
        }
    }

    /// Next tag line at or after the current position. Lines that do not start
    /// with a tag keyword are skipped.
    fn next_token(&mut self) -> Option<Token> {
        while self.pos < self.data.len() {
            let line_start = self.pos;
            let line_end = self.data[line_start..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(self.data.len(), |n| line_start + n);
            self.pos = (line_end + 1).min(self.data.len());

            let line = &self.data[line_start..line_end];
            let Some(tag) = Tag::ALL
                .into_iter()
                .find(|t| line.starts_with(t.keyword().as_bytes()))
            else {
                continue;
            };
            let rest = &line[tag.keyword().len()..];
            let Some(rest) = rest.strip_prefix(b":") else {
                continue;
            };
            match std::str::from_utf8(rest)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
            {
                Some(value) => {
                    let token = Token {
                        tag,
                        value,
                        next: self.pos,
                    };
                    trace!(?token, "tag");
                    return Some(token);
                }
                None => {
                    warn!(
                        offset = line_start,
                        line = %String::from_utf8_lossy(line),
                        "skipping tag line with non-integer value"
                    );
                }
            }
        }
        None
    }

    fn complete(&self) -> Option<(u64, u64, u64, u64)> {
        Some((self.node?, self.port?, self.start?, self.end?))
    }
}

impl<'a> Iterator for TagGroupIter<'a> {
    type Item = TagGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;
        loop {
            let token = self.next_token()?;
            match token.tag {
                Tag::Node => self.node = Some(token.value),
                Tag::Port => self.port = Some(token.value),
                Tag::StartOffset => self.start = Some(token.value),
                Tag::EndOffset => self.end = Some(token.value),
            }
            let Some((node, port, start, end)) = self.complete() else {
                continue;
            };
            self.node = None;
            self.port = None;
            self.start = None;
            self.end = None;

            let (Ok(node), Ok(port)) = (u32::try_from(node), u32::try_from(port)) else {
                warn!(node, port, "node or port out of range; dropping group");
                continue;
            };

            // end < start carries no payload; end == start is still skipped over
            // and a length that does not fit is treated as truncated
            let len = match end.checked_sub(start) {
                None => Some(0),
                Some(n) => n.checked_add(1).and_then(|n| usize::try_from(n).ok()),
            };
            let payload_start = token.next;
            let Some(payload_end) = len
                .and_then(|len| payload_start.checked_add(len))
                .filter(|n| *n <= data.len())
            else {
                warn!(
                    node,
                    port,
                    start,
                    end,
                    available = data.len() - payload_start,
                    "payload truncated by end of file"
                );
                self.pos = data.len();
                return None;
            };
            self.pos = payload_end;

            return Some(TagGroup {
                node,
                port,
                start,
                end,
                payload: &data[payload_start..payload_end],
            });
        }
    }
}
