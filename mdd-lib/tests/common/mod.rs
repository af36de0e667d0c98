#![allow(dead_code)]
use std::{fs, path::PathBuf};

use mdd::sio::{BLOCK_END, ESCAPE};

pub const OPENED: &str = "Thu_Jul_25_17:27:44_2013";
pub const OPENED_SECS: i64 = 1_374_773_264;

/// One tag group of a transfer file.
pub struct Group<'a> {
    pub node: u32,
    pub port: u32,
    pub start: u64,
    pub payload: &'a [u8],
}

impl<'a> Group<'a> {
    pub fn new(node: u32, port: u32, start: u64, payload: &'a [u8]) -> Self {
        Self {
            node,
            port,
            start,
            payload,
        }
    }
}

/// A transfer file from `device` holding `groups`.
pub fn transfer(device: &str, groups: &[Group]) -> Vec<u8> {
    let mut dat = format!(
        "dbd_label: DBD_ASC(dinkum_binary_data_ascii)file\n\
         full_filename: {device}-2013-206-2-0\n\
         fileopen_time: {OPENED}\n"
    )
    .into_bytes();
    for g in groups {
        let end = g.start + g.payload.len() as u64 - 1;
        dat.extend_from_slice(
            format!(
                "NODE: {}\nPORT: {}\nSTARTOFFSET: {}\nENDOFFSET: {end}\n",
                g.node, g.port, g.start
            )
            .as_bytes(),
        );
        dat.extend_from_slice(g.payload);
    }
    dat
}

/// Write a transfer file into `dir`, returning its path.
pub fn write_transfer(dir: &std::path::Path, name: &str, groups: &[Group]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, transfer("unit_364", groups)).unwrap();
    path
}

/// Escape `data` the way the modem does.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for b in data {
        match *b {
            0x2b => out.extend_from_slice(&[ESCAPE, 0x6b]),
            ESCAPE => out.extend_from_slice(&[ESCAPE, 0x58]),
            b => out.push(b),
        }
    }
    out
}

pub fn header(code: &str, len: usize, block: u8) -> Vec<u8> {
    format!("\x01{code}1000101_{len:04x}u51EF0F5A_{block:02x}_0000\x02").into_bytes()
}

/// A frame as it appears on the wire, with `data` escaped.
pub fn wire_frame(code: &str, data: &[u8]) -> Vec<u8> {
    let mut dat = header(code, data.len(), 1);
    dat.extend_from_slice(&escape(data));
    dat.push(BLOCK_END);
    dat
}

/// A frame as it is demultiplexed.
pub fn emitted_frame(code: &str, data: &[u8]) -> Vec<u8> {
    let mut dat = header(code, data.len(), 1);
    dat.extend_from_slice(data);
    dat.push(BLOCK_END);
    dat
}
