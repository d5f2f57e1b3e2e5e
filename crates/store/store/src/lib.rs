pub mod attrs;
pub mod backend;
pub mod blob;
pub mod config;
pub mod error;
pub mod locks;
pub mod store;
pub mod testing;

pub use backend::{LockOutcome, LockSpec, Locker, ObjectBackend, ObjectStat, PoolContext};
pub use blob::{BlobHandle, BlobLock};
pub use config::StoreConfig;
pub use error::{BackendError, StoreError};
pub use locks::LockTable;
pub use store::{ObjectStore, PoolView};
