//! Process-wide cache of session factories, one per (url, options) pair.

use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use moka::future::Cache;
use once_cell::sync::OnceCell;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tokio::sync::Mutex;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::url::{DbUrl, Dialect};
use crate::error::{Result, TempDbError};
use crate::infra::db::core::flatten_txn_err;

/// Engine arguments that take part in the cache key alongside the url.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout: Option<Duration>,
    pub sqlx_logging: bool,
}

impl SessionOptions {
    fn connect_options(&self, url: &DbUrl) -> ConnectOptions {
        let mut opt = ConnectOptions::new(url.to_connection_string());
        if let Some(max) = self.max_connections {
            opt.max_connections(max);
        }
        if let Some(min) = self.min_connections {
            opt.min_connections(min);
        }
        if let Some(timeout) = self.acquire_timeout {
            opt.acquire_timeout(timeout);
        }
        opt.sqlx_logging(self.sqlx_logging);
        opt
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FactoryKey {
    dialect: Dialect,
    url_hash: u64,
    options: SessionOptions,
}

impl FactoryKey {
    fn new(url: &DbUrl, options: &SessionOptions) -> Self {
        Self {
            dialect: url.dialect(),
            url_hash: xxh3_64(url.to_connection_string().as_bytes()),
            options: options.clone(),
        }
    }

    fn sanitized_log_key(&self) -> String {
        format!("{}:{:x}", self.dialect, self.url_hash)
    }
}

static SESSION_FACTORIES: OnceCell<Cache<FactoryKey, Arc<DatabaseConnection>>> = OnceCell::new();
static INIT_LOCKS: OnceCell<DashMap<FactoryKey, Arc<Mutex<()>>>> = OnceCell::new();

fn build_cache() -> Cache<FactoryKey, Arc<DatabaseConnection>> {
    // Capacity-only LRU, no TTL. An evicted pool closes only once the last
    // outstanding session releases it.
    Cache::builder()
        .max_capacity(64)
        .eviction_listener(|_k, v: Arc<DatabaseConnection>, _cause| {
            if Arc::strong_count(&v) == 1 {
                debug!("session_factory=evicted action=drop_last_ref");
                drop(v);
            } else {
                debug!(
                    "session_factory=evicted action=retain_external_refs count={}",
                    Arc::strong_count(&v)
                );
            }
        })
        .build()
}

fn factories() -> &'static Cache<FactoryKey, Arc<DatabaseConnection>> {
    SESSION_FACTORIES.get_or_init(build_cache)
}

/// Return the cached factory for `url` and `options`, building it on first
/// use. Concurrent callers for the same key wait for a single build.
pub async fn session_factory(
    url: &DbUrl,
    options: &SessionOptions,
) -> Result<Arc<DatabaseConnection>> {
    let key = FactoryKey::new(url, options);
    let log_key = key.sanitized_log_key();
    let cache = factories();

    // Fast path: outside the mutex
    if let Some(factory) = cache.get(&key).await {
        debug!(
            session_factory = "reuse",
            key = %log_key,
            "Reusing cached session factory"
        );
        return Ok(factory);
    }

    let init_locks = INIT_LOCKS.get_or_init(DashMap::new);
    let lock = init_locks
        .entry(key.clone())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .value()
        .clone();

    let wait_start = Instant::now();
    let _guard = lock.lock().await;
    let dedup_wait_ms = wait_start.elapsed().as_millis();
    if dedup_wait_ms > 0 {
        debug!(
            session_factory = "dedup_wait_ms",
            key = %log_key,
            wait_ms = dedup_wait_ms,
            "Waited for concurrent factory creation"
        );
    }

    // Second check: inside the mutex
    if let Some(factory) = cache.get(&key).await {
        return Ok(factory);
    }

    info!("session_factory=about_to_build url={} options={:?}", url, options);
    let factory = Arc::new(Database::connect(options.connect_options(url)).await?);
    cache.insert(key.clone(), factory.clone()).await;
    init_locks.remove(&key);

    Ok(factory)
}

/// A transaction on a cached session factory. Dropping it without
/// `commit()` rolls the work back.
pub struct Session {
    txn: DatabaseTransaction,
    factory: Arc<DatabaseConnection>,
}

impl Session {
    pub fn factory(&self) -> &Arc<DatabaseConnection> {
        &self.factory
    }

    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

impl Deref for Session {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}

/// Begin a new session on the cached factory for `url`.
pub async fn session(url: &DbUrl, options: &SessionOptions) -> Result<Session> {
    let factory = session_factory(url, options).await?;
    let txn = factory.begin().await?;
    Ok(Session { txn, factory })
}

/// Run `f` in a session: commit on `Ok`, roll back on `Err`.
pub async fn with_session<T, F>(url: &DbUrl, options: &SessionOptions, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T>> + Send,
    T: Send,
{
    let factory = session_factory(url, options).await?;
    factory
        .transaction::<_, T, TempDbError>(f)
        .await
        .map_err(flatten_txn_err)
}

pub async fn cached_factory_count() -> u64 {
    let cache = factories();
    cache.run_pending_tasks().await;
    cache.entry_count()
}

/// Forget every cached factory. Pools still referenced by live sessions stay
/// open until those sessions finish.
pub async fn clear_session_factories() {
    let cache = factories();
    cache.invalidate_all();
    cache.run_pending_tasks().await;
}
