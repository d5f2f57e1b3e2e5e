use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use blobgate_core::PoolName;
use blobgate_store::{
    BackendError, LockOutcome, LockSpec, LockTable, Locker, ObjectBackend, ObjectStat,
    PoolContext,
};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Directory holding attribute files inside each pool directory.
const XATTR_DIR: &str = ".xattr";

/// [`ObjectBackend`] storing each pool as a directory under a root.
///
/// Objects are plain files; attribute `name` of object `o` lives in
/// `<pool>/.xattr/<o>/<name>`. Locks are process-local and do not survive
/// a restart.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    locks: Arc<DashMap<PoolName, Arc<LockTable>>>,
}

impl FsBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "filesystem backend opened");
        Ok(Self {
            root,
            locks: Arc::new(DashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pool_dir(&self, pool: &PoolName) -> Result<PathBuf, BackendError> {
        check_name("pool", pool)?;
        Ok(self.root.join(pool.as_str()))
    }
}

/// Reject names that could escape their directory or collide with the
/// attribute directory.
fn check_name(what: &str, name: &str) -> Result<(), BackendError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(BackendError::Backend(format!("invalid {what} name {name:?}")));
    }
    Ok(())
}

fn not_found(err: io::Error, what: impl FnOnce() -> String) -> BackendError {
    if err.kind() == io::ErrorKind::NotFound {
        BackendError::NotFound(what())
    } else {
        BackendError::Io(err)
    }
}

#[async_trait]
impl ObjectBackend for FsBackend {
    async fn list_pools(&self) -> Result<Vec<PoolName>, BackendError> {
        let mut pools = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if check_name("pool", name).is_ok() {
                    pools.push(PoolName::from(name));
                }
            }
        }
        pools.sort();
        Ok(pools)
    }

    async fn create_pool(&self, pool: &PoolName) -> Result<(), BackendError> {
        let dir = self.pool_dir(pool)?;
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn open_pool(&self, pool: &PoolName) -> Result<Arc<dyn PoolContext>, BackendError> {
        let dir = self.pool_dir(pool)?;
        let meta = fs::metadata(&dir)
            .await
            .map_err(|e| not_found(e, || format!("pool {pool}")))?;
        if !meta.is_dir() {
            return Err(BackendError::NotFound(format!("pool {pool}")));
        }
        let locks = Arc::clone(self.locks.entry(pool.clone()).or_default().value());
        Ok(Arc::new(FsContext {
            name: pool.clone(),
            dir,
            locks,
            closed: AtomicBool::new(false),
        }))
    }
}

struct FsContext {
    name: PoolName,
    dir: PathBuf,
    locks: Arc<LockTable>,
    closed: AtomicBool,
}

impl FsContext {
    fn check_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("context for pool {} is closed", self.name)));
        }
        Ok(())
    }

    fn object_path(&self, object: &str) -> Result<PathBuf, BackendError> {
        self.check_open()?;
        check_name("object", object)?;
        Ok(self.dir.join(object))
    }

    fn xattr_dir(&self, object: &str) -> PathBuf {
        self.dir.join(XATTR_DIR).join(object)
    }

    fn missing(&self, object: &str) -> impl FnOnce() -> String {
        let what = format!("object {}/{object}", self.name);
        move || what
    }

    async fn require_object(&self, object: &str) -> Result<PathBuf, BackendError> {
        let path = self.object_path(object)?;
        fs::metadata(&path)
            .await
            .map_err(|e| not_found(e, self.missing(object)))?;
        Ok(path)
    }
}

#[async_trait]
impl PoolContext for FsContext {
    fn pool(&self) -> &PoolName {
        &self.name
    }

    async fn stat(&self, object: &str) -> Result<ObjectStat, BackendError> {
        let path = self.object_path(object)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| not_found(e, self.missing(object)))?;
        Ok(ObjectStat { size: meta.len() })
    }

    async fn read_at(&self, object: &str, offset: u64, len: usize) -> Result<Bytes, BackendError> {
        let path = self.object_path(object)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| not_found(e, self.missing(object)))?;
        let size = file.metadata().await?.len();
        if offset >= size || len == 0 {
            return Ok(Bytes::new());
        }
        file.seek(SeekFrom::Start(offset)).await?;
        let want = (size - offset).min(len as u64);
        let mut buf = Vec::with_capacity(usize::try_from(want).unwrap_or(len));
        file.take(want).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn write_full(&self, object: &str, data: &[u8]) -> Result<(), BackendError> {
        let path = self.object_path(object)?;
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn write_at(&self, object: &str, offset: u64, data: &[u8]) -> Result<(), BackendError> {
        let path = self.object_path(object)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn get_xattr(&self, object: &str, name: &str) -> Result<Option<Bytes>, BackendError> {
        self.require_object(object).await?;
        check_name("attribute", name)?;
        match fs::read(self.xattr_dir(object).join(name)).await {
            Ok(value) => Ok(Some(Bytes::from(value))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_xattr(&self, object: &str, name: &str, value: &[u8]) -> Result<(), BackendError> {
        self.require_object(object).await?;
        check_name("attribute", name)?;
        let dir = self.xattr_dir(object);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(name), value).await?;
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<String>, BackendError> {
        self.check_open()?;
        let mut objects = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if check_name("object", name).is_ok() {
                    objects.push(name.to_owned());
                }
            }
        }
        Ok(objects)
    }

    async fn lock_exclusive(
        &self,
        object: &str,
        spec: &LockSpec,
    ) -> Result<LockOutcome, BackendError> {
        self.object_path(object)?;
        Ok(self.locks.lock_exclusive(object, spec))
    }

    async fn unlock(&self, object: &str, name: &str, cookie: &str) -> Result<(), BackendError> {
        self.object_path(object)?;
        self.locks.unlock(object, name, cookie)
    }

    async fn list_lockers(&self, object: &str, name: &str) -> Result<Vec<Locker>, BackendError> {
        self.object_path(object)?;
        Ok(self.locks.lockers(object, name))
    }

    async fn remove(&self, object: &str) -> Result<(), BackendError> {
        let path = self.object_path(object)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found(e, self.missing(object)))?;
        match fs::remove_dir_all(self.xattr_dir(object)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.locks.remove_object(object);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
