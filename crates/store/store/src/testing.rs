//! Reusable conformance suites.
//!
//! Backend crates call [`run_backend_conformance_tests`] and
//! [`run_adapter_conformance_tests`] from their test modules with a fresh
//! backend instance.

use std::sync::Arc;
use std::time::Duration;

use blobgate_core::PoolName;
use chrono::{TimeDelta, Utc};

use crate::attrs::LOCK_NAME;
use crate::backend::{LockOutcome, LockSpec, ObjectBackend};
use crate::config::StoreConfig;
use crate::error::{BackendError, StoreError};
use crate::store::ObjectStore;

fn lock_spec(cookie: &str, lease: Option<Duration>, renew: bool) -> LockSpec {
    LockSpec {
        name: LOCK_NAME.to_owned(),
        cookie: cookie.to_owned(),
        lease,
        renew,
    }
}

/// Run the backend primitive conformance suite.
///
/// # Errors
///
/// Returns an error if a backend call fails unexpectedly. Behavioural
/// mismatches panic.
pub async fn run_backend_conformance_tests(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    test_create_pool_is_idempotent(backend).await?;
    test_open_missing_pool(backend).await?;
    test_write_and_read(backend).await?;
    test_missing_object(backend).await?;
    test_xattrs(backend).await?;
    test_list_objects(backend).await?;
    test_exclusive_lock(backend).await?;
    test_lock_lease_expiry(backend).await?;
    test_remove(backend).await?;
    test_closed_context(backend).await?;
    Ok(())
}

async fn test_create_pool_is_idempotent(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-create");
    backend.create_pool(&pool).await?;
    backend.create_pool(&pool).await?;
    let pools = backend.list_pools().await?;
    assert_eq!(
        pools.iter().filter(|p| **p == pool).count(),
        1,
        "pool should be listed exactly once"
    );
    Ok(())
}

async fn test_open_missing_pool(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let result = backend.open_pool(&PoolName::from("conf-never-created")).await;
    assert!(
        matches!(result, Err(ref e) if e.is_not_found()),
        "opening a missing pool should report not found"
    );
    Ok(())
}

async fn test_write_and_read(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-rw");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    ctx.write_full("obj", b"hello").await?;
    ctx.write_at("obj", 5, b" world").await?;
    assert_eq!(ctx.stat("obj").await?.size, 11);
    assert_eq!(&ctx.read_at("obj", 0, 100).await?[..], b"hello world");
    assert_eq!(&ctx.read_at("obj", 6, 3).await?[..], b"wor");

    let tail = ctx.read_at("obj", 9, 10).await?;
    assert_eq!(&tail[..], b"ld", "read across the end should be short");
    assert!(ctx.read_at("obj", 11, 10).await?.is_empty());
    assert!(ctx.read_at("obj", 500, 10).await?.is_empty());

    ctx.write_full("obj", b"new").await?;
    assert_eq!(ctx.stat("obj").await?.size, 3, "write_full replaces content");
    assert_eq!(&ctx.read_at("obj", 0, 100).await?[..], b"new");

    ctx.close();
    Ok(())
}

async fn test_missing_object(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-missing");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    assert!(matches!(ctx.stat("ghost").await, Err(ref e) if e.is_not_found()));
    assert!(matches!(ctx.read_at("ghost", 0, 1).await, Err(ref e) if e.is_not_found()));
    assert!(matches!(ctx.get_xattr("ghost", "TTL").await, Err(ref e) if e.is_not_found()));
    assert!(matches!(ctx.remove("ghost").await, Err(ref e) if e.is_not_found()));

    ctx.close();
    Ok(())
}

async fn test_xattrs(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-xattr");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    ctx.write_full("obj", b"x").await?;
    assert_eq!(ctx.get_xattr("obj", "TTL").await?, None);
    ctx.set_xattr("obj", "TTL", &[1, 2, 3, 4, 5, 6, 7, 8]).await?;
    ctx.set_xattr("obj", "FILENAME", b"a.bin").await?;
    assert_eq!(
        ctx.get_xattr("obj", "TTL").await?.as_deref(),
        Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..])
    );
    ctx.set_xattr("obj", "FILENAME", b"b.bin").await?;
    assert_eq!(ctx.get_xattr("obj", "FILENAME").await?.as_deref(), Some(&b"b.bin"[..]));

    ctx.write_full("obj", b"rewritten").await?;
    assert!(
        ctx.get_xattr("obj", "TTL").await?.is_some(),
        "attributes survive content rewrites"
    );

    ctx.close();
    Ok(())
}

async fn test_list_objects(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-list");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    assert!(ctx.list_objects().await?.is_empty());
    ctx.write_full("a", b"1").await?;
    ctx.write_full("b", b"2").await?;
    ctx.set_xattr("b", "TTL", b"12345678").await?;
    // A lock alone does not make an object.
    ctx.lock_exclusive("c", &lock_spec("k", None, false)).await?;

    let mut objects = ctx.list_objects().await?;
    objects.sort();
    assert_eq!(objects, vec!["a".to_owned(), "b".to_owned()]);

    ctx.close();
    Ok(())
}

async fn test_exclusive_lock(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-lock");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    assert!(ctx.list_lockers("obj", LOCK_NAME).await?.is_empty());
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("one", None, false)).await?,
        LockOutcome::Acquired
    );
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("two", None, false)).await?,
        LockOutcome::Busy,
        "a second holder must be refused"
    );
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("one", None, false)).await?,
        LockOutcome::Busy,
        "re-acquiring without renew is refused"
    );
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("one", None, true)).await?,
        LockOutcome::Acquired,
        "the holder may renew"
    );
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("two", None, true)).await?,
        LockOutcome::Busy,
        "renew does not steal"
    );

    let lockers = ctx.list_lockers("obj", LOCK_NAME).await?;
    assert_eq!(lockers.len(), 1);
    assert_eq!(lockers[0].cookie, "one");

    assert!(
        ctx.unlock("obj", LOCK_NAME, "two").await.is_err(),
        "only the holder can unlock"
    );
    ctx.unlock("obj", LOCK_NAME, "one").await?;
    assert!(ctx.list_lockers("obj", LOCK_NAME).await?.is_empty());
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("two", None, false)).await?,
        LockOutcome::Acquired
    );
    ctx.unlock("obj", LOCK_NAME, "two").await?;

    ctx.close();
    Ok(())
}

async fn test_lock_lease_expiry(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-lease");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    let lease = Some(Duration::from_millis(50));
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("one", lease, false)).await?,
        LockOutcome::Acquired
    );
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(
        ctx.list_lockers("obj", LOCK_NAME).await?.is_empty(),
        "an expired lease is not listed"
    );
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("two", None, false)).await?,
        LockOutcome::Acquired,
        "an expired lease can be taken over"
    );
    assert_eq!(
        ctx.lock_exclusive("obj", &lock_spec("one", lease, true)).await?,
        LockOutcome::Busy,
        "the lapsed holder cannot renew"
    );
    ctx.unlock("obj", LOCK_NAME, "two").await?;

    ctx.close();
    Ok(())
}

async fn test_remove(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-remove");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;

    ctx.write_full("obj", b"data").await?;
    ctx.set_xattr("obj", "TTL", b"12345678").await?;
    ctx.lock_exclusive("obj", &lock_spec("k", None, false)).await?;
    ctx.remove("obj").await?;

    assert!(matches!(ctx.stat("obj").await, Err(ref e) if e.is_not_found()));
    assert!(ctx.list_objects().await?.is_empty());
    assert!(
        ctx.list_lockers("obj", LOCK_NAME).await?.is_empty(),
        "remove drops locks with the object"
    );

    ctx.write_full("obj", b"again").await?;
    assert_eq!(
        ctx.get_xattr("obj", "TTL").await?,
        None,
        "attributes do not survive removal"
    );

    ctx.close();
    Ok(())
}

async fn test_closed_context(backend: &dyn ObjectBackend) -> Result<(), BackendError> {
    let pool = PoolName::from("conf-closed");
    backend.create_pool(&pool).await?;
    let ctx = backend.open_pool(&pool).await?;
    ctx.close();
    ctx.close();
    assert!(
        matches!(ctx.write_full("obj", b"x").await, Err(BackendError::Unavailable(_))),
        "a closed context refuses work"
    );
    Ok(())
}

/// Run the object store adapter suite over `backend`.
///
/// # Errors
///
/// Returns an error if an adapter call fails unexpectedly.
pub async fn run_adapter_conformance_tests(
    backend: Arc<dyn ObjectBackend>,
) -> Result<(), StoreError> {
    let store = ObjectStore::new(
        backend,
        StoreConfig {
            pool_prefix: "adapter-".to_owned(),
            ..StoreConfig::default()
        },
    );
    test_create_write_open(&store).await?;
    test_open_missing(&store).await?;
    test_open_without_ttl(&store).await?;
    test_lock_conflicts(&store).await?;
    test_delete_respects_lock(&store).await?;
    test_write_all(&store).await?;
    test_pool_view(&store).await?;
    Ok(())
}

async fn test_create_write_open(store: &ObjectStore) -> Result<(), StoreError> {
    let mut handle = store.create_new("report.pdf").await?;
    assert_eq!(handle.pool(), &store.pool_for(handle.id()));
    assert!(store.owns_pool(handle.pool()));

    assert_eq!(handle.write_chunk(b"abc").await?, 3);
    assert_eq!(handle.write_chunk(b"defg").await?, 7);
    handle.set_attributes().await?;
    let (pool, id) = (handle.pool().clone(), *handle.id());
    handle.destroy();

    let opened = store.open_existing(&pool, &id).await?;
    assert_eq!(opened.size(), 7);
    assert_eq!(opened.filename(), "report.pdf");
    assert!(opened.ttl() > Utc::now());
    assert_eq!(&opened.read_range(0, 100).await?[..], b"abcdefg");
    assert_eq!(&opened.read_range(2, 3).await?[..], b"cde");
    assert!(opened.read_range(7, 3).await?.is_empty());

    let desc = opened.descriptor();
    assert_eq!(desc.size, 7);
    assert_eq!(desc.uri, format!("/download/{pool}/{id}"));
    assert_eq!(desc.filename.as_deref(), Some("report.pdf"));
    opened.destroy();
    Ok(())
}

async fn test_open_missing(store: &ObjectStore) -> Result<(), StoreError> {
    let handle = store.create_new("x").await?;
    let (pool, id) = (handle.pool().clone(), *handle.id());
    handle.destroy();

    // Allocated but never written.
    let err = store.open_existing(&pool, &id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "got {err:?}");

    let err = store
        .open_existing(&PoolName::from("adapter-zz-missing"), &id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "got {err:?}");
    Ok(())
}

async fn test_open_without_ttl(store: &ObjectStore) -> Result<(), StoreError> {
    let mut handle = store.create_new("no-attrs").await?;
    handle.write_chunk(b"data").await?;
    let (pool, id) = (handle.pool().clone(), *handle.id());
    handle.destroy();

    let err = store.open_existing(&pool, &id).await.unwrap_err();
    assert!(
        matches!(err, StoreError::NotFound(_)),
        "a blob without TTL is not openable, got {err:?}"
    );
    Ok(())
}

async fn test_lock_conflicts(store: &ObjectStore) -> Result<(), StoreError> {
    let mut handle = store.create_new("locked").await?;
    handle.write_chunk(b"x").await?;
    handle.set_attributes().await?;

    let lock = handle.acquire_lock(None).await?;
    assert!(lock.is_held().await?);
    assert!(handle.is_locked().await?);

    let other = store.open_existing(handle.pool(), handle.id()).await?;
    let err = other.acquire_lock(None).await.unwrap_err();
    assert!(matches!(err, StoreError::LockConflict(_)));

    lock.renew().await?;
    lock.release().await?;
    assert!(!handle.is_locked().await?);

    let relock = other.acquire_lock(None).await?;
    relock.release().await?;
    other.destroy();
    handle.destroy();
    Ok(())
}

async fn test_delete_respects_lock(store: &ObjectStore) -> Result<(), StoreError> {
    let mut handle = store.create_new("victim").await?;
    handle.write_chunk(b"payload").await?;
    handle.set_attributes().await?;

    let lock = handle.acquire_lock(None).await?;
    let err = handle.delete().await.unwrap_err();
    assert!(
        matches!(err, StoreError::LockConflict(_)),
        "delete refuses even the holder's own lock"
    );
    lock.release().await?;

    handle.delete().await?;
    let err = store
        .open_existing(handle.pool(), handle.id())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    handle.destroy();
    Ok(())
}

async fn test_write_all(store: &ObjectStore) -> Result<(), StoreError> {
    let body = vec![7u8; store.config().io_buffer_size * 2 + 17];
    let desc = store.write_all("stream.bin", &body[..]).await?;
    assert_eq!(desc.size, body.len() as u64);

    let handle = store.open_existing(&desc.pool, &desc.object_id).await?;
    assert!(!handle.is_locked().await?, "write_all releases its lock");
    assert_eq!(handle.read_range(0, body.len() + 1).await?.len(), body.len());
    handle.destroy();

    let empty = store.write_all("empty.bin", &b""[..]).await?;
    assert_eq!(empty.size, 0);
    let handle = store.open_existing(&empty.pool, &empty.object_id).await?;
    assert!(handle.read_range(0, 10).await?.is_empty());
    handle.destroy();
    Ok(())
}

async fn test_pool_view(store: &ObjectStore) -> Result<(), StoreError> {
    let mut handle = store.create_new("viewed").await?;
    handle.write_chunk(b"x").await?;
    let past = Utc::now() - TimeDelta::seconds(1);
    handle.set_ttl(past).await?;
    let object = handle.id().to_string();

    let view = store.open_pool_view(handle.pool()).await?;
    assert!(view.list_objects().await?.contains(&object));
    assert_eq!(
        view.object_ttl(&object).await?.map(|t| t.timestamp()),
        Some(past.timestamp())
    );

    let lock = handle.acquire_lock(None).await?;
    assert!(view.is_locked(&object).await?);
    lock.release().await?;
    assert!(!view.is_locked(&object).await?);

    view.remove(&object).await?;
    assert!(!view.list_objects().await?.contains(&object));
    drop(view);
    handle.destroy();
    Ok(())
}
