mod status;

use std::{io::stderr, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdd::{process, request, state::StateStore, Config};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Directory for reassembled files, demultiplexed outputs, the checkpoint and
    /// request files.
    #[arg(
        short,
        long,
        global = true,
        env = "MDD_DATA_DIR",
        default_value = "data",
        value_name = "path"
    )]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reassemble transfer files and demultiplex SIO frames from the framed port.
    ///
    /// Transfer files are ingested in the order given. The checkpoint is only
    /// updated if every file is processed successfully.
    Process {
        /// Input .mdd transfer files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Write a <node>.mdr file requesting byte ranges not yet received.
    Request {
        /// Node to request data for.
        node: u32,

        /// Only request port 1 data up to this offset.
        #[arg(short, long)]
        max: Option<u64>,

        /// Record a new port 1 start offset for the node before writing the request.
        #[arg(short, long, value_name = "offset")]
        start_offset: Option<u64>,
    },
    /// Show received data statistics and scan state.
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: status::Format,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("MDD_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = Config::builder().data_dir(cli.data_dir).build();

    match &cli.command {
        Commands::Process { inputs } => {
            info!("processing {} transfer files into {:?}", inputs.len(), config.data_dir);
            let summary = process::run(&config, inputs).context("processing transfer files")?;
            for scan in &summary.scans {
                info!(
                    "{}: {} frames to index {}, {} bytes unprocessed",
                    scan.file_name,
                    scan.total_frames(),
                    scan.output_index,
                    scan.unprocessed
                );
            }
            Ok(())
        }
        Commands::Request {
            node,
            max,
            start_offset,
        } => {
            let mut state = StateStore::load(config.checkpoint_path());
            if let Some(offset) = start_offset {
                state.checkpoint_mut().offsets.insert(*node, *offset);
                state.save().context("saving checkpoint")?;
            }
            let path = request::write_node_request(&config, state.checkpoint(), *node, *max)
                .with_context(|| format!("writing request for node {node}"))?;
            info!("wrote {path:?}");
            Ok(())
        }
        Commands::Status { format } => {
            let state = StateStore::load(config.checkpoint_path());
            status::status(&config, state.checkpoint(), format)
        }
    }
}
