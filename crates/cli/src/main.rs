//! Blobgate CLI
//!
//! Uploads files to and downloads objects from a blobgate gateway over the
//! native upload and download channels.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

/// Blobgate CLI: move files in and out of the object cache.
#[derive(Parser, Debug)]
#[command(name = "blobgate", version, about)]
struct Cli {
    /// Address of the upload channel.
    #[arg(
        long,
        env = "BLOBGATE_UPLOAD_ADDR",
        default_value = "127.0.0.1:6666",
        global = true
    )]
    upload_addr: String,

    /// Address of the download channel.
    #[arg(
        long,
        env = "BLOBGATE_DOWNLOAD_ADDR",
        default_value = "127.0.0.1:5555",
        global = true
    )]
    download_addr: String,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print its object id.
    Upload(commands::upload::UploadArgs),
    /// Download an object into a file.
    Download(commands::download::DownloadArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Upload(args) => commands::upload::run(&cli.upload_addr, &args, &cli.format).await,
        Command::Download(args) => {
            commands::download::run(&cli.download_addr, &args, &cli.format).await
        }
    }
}
