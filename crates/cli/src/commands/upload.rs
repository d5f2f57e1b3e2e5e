use std::path::{Path, PathBuf};

use anyhow::Context;
use blobgate_client::{DEFAULT_CHUNK_SIZE, UploadClient};
use clap::Args;

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File to upload.
    pub file: PathBuf,
    /// Filename stored with the object. Defaults to the file's own name.
    #[arg(long)]
    pub name: Option<String>,
    /// Bytes per chunk.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

pub async fn run(addr: &str, args: &UploadArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let size = file.metadata().await?.len();
    if size == 0 {
        anyhow::bail!("{} is empty; empty objects cannot be uploaded", args.file.display());
    }
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| display_name(&args.file));

    let mut client = UploadClient::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?
        .with_chunk_size(args.chunk_size);
    let receipt = client.upload(&name, size, file).await?;

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "object_id": receipt.object_id.to_string(),
                "filename": name,
                "size": receipt.size,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("{}", receipt.object_id);
            eprintln!("Uploaded {name} ({} bytes)", receipt.size);
        }
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_uses_last_component() {
        assert_eq!(display_name(Path::new("/tmp/data/report.pdf")), "report.pdf");
        assert_eq!(display_name(Path::new("notes.txt")), "notes.txt");
    }
}
