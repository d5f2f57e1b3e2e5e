pub mod error;
pub mod protocol;
pub mod types;
pub mod wire;

pub use error::ErrorKind;
pub use protocol::ProtocolError;
pub use protocol::download::{DownloadReply, DownloadRequest, DownloadStatus};
pub use protocol::upload::{UploadChunk, UploadHeader, UploadReply};
pub use types::{BlobDescriptor, Identity, ObjectId, PoolName};
pub use wire::{FrameCodec, Frames};
