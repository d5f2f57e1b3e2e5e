//! Blobgate transfer clients
//!
//! Native clients for the blobgate upload and download channels.
//!
//! # Quick Start
//!
//! ```no_run
//! use blobgate_client::{DownloadClient, UploadClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), blobgate_client::ClientError> {
//!     let mut uploader = UploadClient::connect("127.0.0.1:6666").await?;
//!     let receipt = uploader.upload_bytes("hello.txt", b"hello").await?;
//!
//!     let mut downloader = DownloadClient::connect("127.0.0.1:5555").await?;
//!     let bytes = downloader.download_to_vec(&receipt.object_id).await?;
//!     assert_eq!(bytes, b"hello");
//!     Ok(())
//! }
//! ```
//!
//! Uploads are stop-and-wait: every chunk carries its offset and the next
//! one is sent only after the server confirms the previous. Downloads keep
//! up to a [`CreditWindow`] of requests in flight and place every reply at
//! the offset it echoes.

mod connection;
mod credit;
mod download;
mod error;
mod upload;

pub use credit::CreditWindow;
pub use download::{DEFAULT_CREDIT, DownloadClient};
pub use error::ClientError;
pub use upload::{DEFAULT_CHUNK_SIZE, UploadClient, UploadReceipt};
