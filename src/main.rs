//! sparse-stream command line tool.
//!
//! `download` writes a sparse stream to stdout, `upload` reads one from
//! stdin. Only the stream touches the standard streams; all logging goes
//! to stderr, so transfers compose with pipes and external compressors.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;

use sparse_stream::{DownloadConfig, Downloader, HttpClient, TransferStats, Uploader};

#[derive(Debug, Parser)]
#[command(
    name = "sparse-stream",
    version,
    about = "Stream sparse disk images to and from an imageio service"
)]
struct Cli {
    /// Raise log verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download an image as a sparse stream to stdout.
    Download {
        /// Transfer URL of the image.
        url: String,

        /// Emit only extents changed since the previous checkpoint.
        #[arg(long)]
        incremental: bool,

        /// Skip server certificate validation.
        #[arg(long)]
        insecure: bool,
    },

    /// Upload a sparse stream from stdin to an image.
    Upload {
        /// Transfer URL of the image.
        url: String,

        /// Skip server certificate validation.
        #[arg(long)]
        insecure: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Download {
            url,
            incremental,
            insecure,
        } => {
            let mut client = HttpClient::connect(&url, !insecure)
                .context("connecting to imageio service")?;
            let stdout = io::stdout();
            let mut sink = io::BufWriter::new(stdout.lock());

            let started = Instant::now();
            let stats = Downloader::new(DownloadConfig { incremental })
                .run(&mut client, &mut sink)
                .context("downloading image")?;
            sink.flush().context("flushing stream")?;
            report("downloaded", stats, started);
        }
        Command::Upload { url, insecure } => {
            let mut client = HttpClient::connect(&url, !insecure)
                .context("connecting to imageio service")?;
            let stdin = io::stdin();
            let mut source = io::BufReader::new(stdin.lock());

            let started = Instant::now();
            let stats = Uploader::new()
                .run(&mut client, &mut source)
                .context("uploading stream")?;
            report("uploaded", stats, started);
        }
    }
    Ok(())
}

fn report(verb: &str, stats: TransferStats, started: Instant) {
    info!(
        "{verb} {} bytes in {} data frames and {} zero frames in {:.2?}",
        stats.bytes(),
        stats.data_frames,
        stats.zero_frames,
        started.elapsed()
    );
}
