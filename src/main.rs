//! CLI entry point (§6): `rstc <source.torrent> <destination-dir>`.
use clap::Parser;
use rs_torrent_client::engine::Engine;
use rs_torrent_client::torrent::Metainfo;
use std::path::PathBuf;
use std::process::ExitCode;

/// A leecher-only BitTorrent client: downloads one torrent and exits.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the `.torrent` metainfo file.
    source: PathBuf,

    /// Directory the downloaded file(s) are written into.
    destination: PathBuf,

    /// Overwrite destination file(s) that already exist.
    #[arg(short, long)]
    force: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("error: failed to start async runtime: {error}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::from(0),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let metainfo = Metainfo::load(&cli.source)?;
    tracing::info!(
        name = %metainfo.name,
        pieces = metainfo.number_of_pieces(),
        total_length = metainfo.total_length,
        "loaded torrent"
    );

    let engine = Engine::new(metainfo, cli.destination, cli.force)?;
    engine.run().await?;
    tracing::info!("download complete");
    Ok(())
}
