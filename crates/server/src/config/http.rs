use serde::Deserialize;

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whether the `all` role starts the HTTP listener.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Multipart field carrying the uploaded file.
    #[serde(default = "default_content_field")]
    pub content_field: String,
    /// Request body limit for uploads.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: default_port(),
            content_field: default_content_field(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl HttpConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_content_field() -> String {
    "content".to_owned()
}

fn default_max_upload_bytes() -> usize {
    256 * 1024 * 1024
}
