use std::sync::Arc;

use blobgate_store::ObjectBackend;
use blobgate_store_fs::FsBackend;
use blobgate_store_memory::MemoryBackend;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::ServerError;

/// Create the object backend selected by the configuration.
pub async fn create_backend(config: &StorageConfig) -> Result<Arc<dyn ObjectBackend>, ServerError> {
    match config.backend.as_str() {
        "memory" => {
            info!("using in-memory object backend; blobs do not survive a restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        "fs" => {
            let root = config.root.as_deref().ok_or_else(|| {
                ServerError::Config("storage.root is required for the fs backend".into())
            })?;
            let backend = FsBackend::open(root).await?;
            info!(root, "using filesystem object backend");
            Ok(Arc::new(backend))
        }
        other => Err(ServerError::Config(format!(
            "unknown storage backend: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_by_default() {
        let backend = create_backend(&StorageConfig::default()).await.unwrap();
        assert!(backend.list_pools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fs_backend_requires_root() {
        let config = StorageConfig {
            backend: "fs".into(),
            ..StorageConfig::default()
        };
        let err = create_backend(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn fs_backend_opens_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: "fs".into(),
            root: Some(dir.path().display().to_string()),
            ..StorageConfig::default()
        };
        let backend = create_backend(&config).await.unwrap();
        assert!(backend.list_pools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let config = StorageConfig {
            backend: "rados".into(),
            ..StorageConfig::default()
        };
        let err = create_backend(&config).await.err().unwrap();
        assert!(err.to_string().contains("rados"));
    }
}
