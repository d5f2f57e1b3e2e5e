use std::path::PathBuf;

use anyhow::Context;
use blobgate_client::{DEFAULT_CHUNK_SIZE, DEFAULT_CREDIT, DownloadClient};
use blobgate_core::ObjectId;
use clap::Args;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Object id printed by `blobgate upload`.
    #[arg(value_parser = parse_object_id)]
    pub object_id: ObjectId,
    /// Destination file. Overwritten if it exists.
    pub out: PathBuf,
    /// Requests kept in flight.
    #[arg(long, default_value_t = DEFAULT_CREDIT)]
    pub credit: usize,
    /// Bytes per request.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

fn parse_object_id(s: &str) -> Result<ObjectId, String> {
    s.parse().map_err(|e| format!("invalid object id `{s}`: {e}"))
}

pub async fn run(addr: &str, args: &DownloadArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let mut client = DownloadClient::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?
        .with_credit(args.credit)
        .with_chunk_size(args.chunk_size);

    let mut file = tokio::fs::File::create(&args.out)
        .await
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let len = match client.download(&args.object_id, &mut file).await {
        Ok(len) => len,
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&args.out).await;
            return Err(e.into());
        }
    };
    file.set_len(len).await?;

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "object_id": args.object_id.to_string(),
                "path": args.out.display().to_string(),
                "size": len,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Downloaded {len} bytes to {}", args.out.display());
        }
    }
    Ok(())
}
