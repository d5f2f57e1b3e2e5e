mod broker;
mod collector;
mod http;
mod server;
mod storage;


pub use broker::*;
pub use collector::*;
pub use http::*;
pub use server::*;
pub use storage::*;

use serde::Deserialize;

/// Top-level configuration for the blobgate server, loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlobgateConfig {
    /// Object store backend and blob lifetime.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload channel listener and worker pool.
    #[serde(default)]
    pub upload: UploadServerConfig,
    /// Download channel listener.
    #[serde(default)]
    pub download: DownloadServerConfig,
    /// HTTP surface.
    #[serde(default)]
    pub http: HttpConfig,
    /// Garbage collector schedule.
    #[serde(default)]
    pub collector: CollectorServerConfig,
    /// Process-level settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl BlobgateConfig {
    /// Parse a configuration document. An empty document yields defaults.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
