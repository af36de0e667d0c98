//! Run orchestration: ingest transfer files, reassemble, then scan the framed
//! port files that changed.
use std::{fs, path::Path};

use serde::Serialize;
use tracing::{error, info};

use crate::{
    reassembly::{ReassemblyStore, Section},
    sio::{FrameScanner, ScanSummary},
    state::StateStore,
    transfer::{parse_transfer, read_transfer},
    Config, Result,
};

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub transfer_files: usize,
    /// Sections written to reassembled files.
    pub sections: usize,
    /// Sections dropped because `end <= start`.
    pub dropped: usize,
    /// Payload bytes written.
    pub bytes: u64,
    pub scans: Vec<ScanSummary>,
}

/// Ingest `paths` in order and scan every changed framed port file.
///
/// The section history and statistics in `state` are used and replaced. The
/// state is not saved; see [run].
///
/// # Errors
/// If a transfer file cannot be read or lacks its metadata, or on any IO error
/// writing reassembled or output files. `state` should then be discarded.
pub fn process<P: AsRef<Path>>(
    config: &Config,
    state: &mut StateStore,
    paths: &[P],
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let checkpoint = state.checkpoint();
    let mut store = ReassemblyStore::new(&config.data_dir, config.framed_port)
        .with_history(checkpoint.sections.clone(), checkpoint.stats.clone());

    for path in paths {
        let path = path.as_ref();
        let dat = read_transfer(path).inspect_err(|err| {
            error!(path = %path.display(), %err, "failed to read transfer file");
        })?;
        let transfer = parse_transfer(&dat).inspect_err(|err| {
            error!(path = %path.display(), %err, "failed to parse transfer file");
        })?;

        for group in &transfer.groups {
            let section = Section::from_group(group, &transfer.device_id, transfer.opened);
            if section.is_valid() {
                summary.sections += 1;
                summary.bytes += section.num_bytes();
            } else {
                summary.dropped += 1;
            }
            store.commit(section, group.payload)?;
        }
        summary.transfer_files += 1;
        info!(
            path = %path.display(),
            device_id = %transfer.device_id,
            groups = transfer.groups.len(),
            "ingested"
        );
    }

    let (sections, stats, changed) = store.finish();
    let checkpoint = state.checkpoint_mut();
    checkpoint.sections = sections;
    checkpoint.stats = stats;

    let scanner = FrameScanner::new(config);
    for file_name in &changed {
        summary.scans.push(scanner.scan_file(file_name, state)?);
    }

    info!(
        transfer_files = summary.transfer_files,
        sections = summary.sections,
        dropped = summary.dropped,
        bytes = summary.bytes,
        scanned = summary.scans.len(),
        "run complete"
    );
    Ok(summary)
}

/// Load the checkpoint, [process] `paths`, and save the checkpoint.
///
/// The checkpoint is only saved when processing succeeds, leaving the previous
/// checkpoint in place otherwise.
///
/// # Errors
/// See [process] and [StateStore::save].
pub fn run<P: AsRef<Path>>(config: &Config, paths: &[P]) -> Result<RunSummary> {
    fs::create_dir_all(&config.data_dir)?;
    let mut state = StateStore::load(config.checkpoint_path());
    let summary = process(config, &mut state, paths)?;
    state.save()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFER: &[u8] = b"full_filename: unit_364-2013-206-2-0\n\
fileopen_time: Thu_Jul_25_17:27:44_2013\n\
NODE: 58\nPORT: 2\nSTARTOFFSET: 0\nENDOFFSET: 3\nabcd\
NODE: 58\nPORT: 2\nSTARTOFFSET: 9\nENDOFFSET: 9\nz";

    #[test]
    fn unframed_port_is_not_scanned() {
        let tmpdir = tempfile::tempdir().unwrap();
        let config = Config::builder().data_dir(tmpdir.path().into()).build();
        let path = tmpdir.path().join("a.mdd");
        fs::write(&path, TRANSFER).unwrap();

        let summary = run(&config, &[&path]).unwrap();

        assert_eq!(summary.transfer_files, 1);
        assert_eq!(summary.sections, 1);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.bytes, 4);
        assert!(summary.scans.is_empty());
        assert!(config.checkpoint_path().exists());
    }

    #[test]
    fn bad_metadata_keeps_previous_checkpoint() {
        let tmpdir = tempfile::tempdir().unwrap();
        let config = Config::builder().data_dir(tmpdir.path().into()).build();
        let good = tmpdir.path().join("a.mdd");
        fs::write(&good, TRANSFER).unwrap();
        run(&config, &[&good]).unwrap();
        let before = fs::read(config.checkpoint_path()).unwrap();

        let bad = tmpdir.path().join("b.mdd");
        fs::write(&bad, b"NODE: 58\nPORT: 2\nSTARTOFFSET: 20\nENDOFFSET: 21\nxy").unwrap();
        let zult = run(&config, &[&bad]);

        assert!(matches!(zult, Err(crate::Error::Metadata { .. })));
        assert_eq!(fs::read(config.checkpoint_path()).unwrap(), before);
    }
}
