//! Network front ends of the blobgate cache.
//!
//! The [`UploadBroker`] accepts chunked uploads through a [`Router`] and a
//! fixed pool of workers, tracking in-progress transfers in a
//! [`SessionRegistry`]. The [`DownloadServer`] answers chunk requests from
//! a single loop.

pub mod config;
pub mod download;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod transport;
pub mod upload;

pub use config::{DownloadConfig, UploadConfig};
pub use download::DownloadServer;
pub use error::BrokerError;
pub use metrics::{BrokerMetrics, MetricsSnapshot};
pub use registry::{Lookup, SessionRegistry, SharedSession};
pub use session::{ChunkProgress, UploadSession};
pub use transport::{Envelope, Inbound, ReplySender, Router};
pub use upload::UploadBroker;
