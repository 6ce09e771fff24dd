//! `rstc`: a leech-only BitTorrent client. Downloads a single-file torrent
//! to disk and exits; it never seeds.
use anyhow::{Context, Result};
use clap::Parser;
use rs_torrent_client::orchestrator;
use rs_torrent_client::torrent::TorrentFile;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rstc", about = "A leech-only BitTorrent client", version)]
struct Cli {
    /// Path to the `.torrent` metainfo file.
    metainfo_path: PathBuf,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start runtime");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            error!(error = %err, "download failed");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let data = std::fs::read(&cli.metainfo_path)
        .with_context(|| format!("failed to read {}", cli.metainfo_path.display()))?;
    let torrent = TorrentFile::parse(&data).context("failed to parse metainfo file")?;

    info!(
        name = torrent.output_name(),
        pieces = torrent.num_pieces(),
        size = torrent.total_size(),
        "starting download"
    );

    let output_path = PathBuf::from(torrent.output_name());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt signal, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator::run(torrent, &output_path, shutdown_rx).await
}
