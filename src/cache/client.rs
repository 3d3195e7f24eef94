//! Cache-aside 读写
//!
//! key = `{p}:cache:{kind}:{id}`，重建锁名 = `{kind}:{id}`。
//! 三种读策略共用一个 `loader(id) -> Option<T>` 回调：
//! - pass_through：空值缓存防穿透
//! - mutex：互斥重建防击穿，调用方等待重建完成
//! - logical_expire：逻辑过期，过期数据先返回，后台单个任务重建
//!
//! Redis 出错一律向上抛 StoreUnavailable，不当作未命中处理。

use super::entry::{self, CacheEntry};
use super::rebuild_pool::RebuildPool;
use crate::config::CacheConfig;
use crate::error::{Result, SeckillError};
use crate::keys::RedisKeys;
use crate::lock::{LockHandle, RedisLock};
use crate::metrics;
use crate::redis_handle::RedisHandle;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const PASS_THROUGH: &str = "pass_through";
const MUTEX: &str = "mutex";
const LOGICAL: &str = "logical";

enum Lookup<T> {
    Hit(T),
    NullHit,
    Miss,
}

#[derive(Clone)]
pub struct CacheClient {
    redis: RedisHandle,
    keys: RedisKeys,
    lock: RedisLock,
    pool: Arc<RebuildPool>,
    cfg: CacheConfig,
}

impl CacheClient {
    /// 会启动重建任务池，必须在 tokio runtime 内调用
    pub fn new(redis: RedisHandle, keys: RedisKeys, lock: RedisLock, cfg: CacheConfig) -> Self {
        let pool = Arc::new(RebuildPool::new(cfg.rebuild_workers, cfg.rebuild_queue_capacity));
        Self {
            redis,
            keys,
            lock,
            pool,
            cfg,
        }
    }

    pub fn key_for(&self, kind: &str, id: impl Display) -> String {
        format!("{}{}", self.keys.cache_prefix(kind), id)
    }

    fn lock_name(kind: &str, id: impl Display) -> String {
        format!("{}:{}", kind, id)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cfg.ttl_seconds)
    }

    pub fn logical_window(&self) -> Duration {
        Duration::from_secs(self.cfg.logical_expire_seconds)
    }

    pub fn rebuild_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.cfg.rebuild_lock_ttl_ms)
    }

    /// 写入普通缓存（带 Redis TTL）
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = entry::encode_plain(value)?;
        self.redis.set_ex_string(key, &raw, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    /// 写入逻辑过期缓存；Redis 层 TTL 见 `entry::logical_store_ttl`
    pub async fn set_with_logical_expire<T: Serialize>(&self, key: &str, value: &T, window: Duration) -> Result<()> {
        let raw = serde_json::to_string(&CacheEntry::with_window(value, Utc::now(), window))?;
        match entry::logical_store_ttl(self.cfg.logical_store_ttl_seconds, window, self.rebuild_lock_ttl()) {
            Some(store_ttl) => self.redis.set_ex_string(key, &raw, store_ttl).await?,
            None => self.redis.set_string(key, &raw).await?,
        }
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let removed = self.redis.del(key).await?;
        debug!(key = %key, removed, "缓存已失效");
        Ok(())
    }

    async fn write_null_marker(&self, key: &str) -> Result<()> {
        self.redis
            .set_ex_string(key, entry::NULL_MARKER, self.cfg.null_ttl_seconds.max(1))
            .await?;
        Ok(())
    }

    async fn read_plain<T: DeserializeOwned>(&self, key: &str, strategy: &str) -> Result<Lookup<T>> {
        let raw = match self.redis.get_string(key).await? {
            Some(raw) => raw,
            None => return Ok(Lookup::Miss),
        };
        if entry::is_null_marker(&raw) {
            metrics::on_cache_lookup(strategy, "null_hit");
            return Ok(Lookup::NullHit);
        }
        match entry::decode_plain(key, &raw) {
            Ok(v) => {
                metrics::on_cache_lookup(strategy, "hit");
                Ok(Lookup::Hit(v))
            }
            Err(e) => {
                warn!(error = %e, "缓存数据无法解析，按未命中处理");
                metrics::on_cache_lookup(strategy, "malformed");
                Ok(Lookup::Miss)
            }
        }
    }

    /// 回源并写回；不存在时写空值标记
    async fn load_and_store<T, ID, F, Fut>(&self, key: &str, id: ID, loader: &F, ttl: Duration) -> Result<Option<T>>
    where
        T: Serialize,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match loader(id).await? {
            Some(v) => {
                self.set(key, &v, ttl).await?;
                Ok(Some(v))
            }
            None => {
                self.write_null_marker(key).await?;
                Ok(None)
            }
        }
    }

    /// 缓存穿透：空值也缓存（null_ttl_seconds）
    pub async fn query_with_pass_through<T, ID, F, Fut>(
        &self,
        kind: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        ID: Display,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = self.key_for(kind, &id);
        match self.read_plain::<T>(&key, PASS_THROUGH).await? {
            Lookup::Hit(v) => Ok(Some(v)),
            Lookup::NullHit => Ok(None),
            Lookup::Miss => {
                metrics::on_cache_lookup(PASS_THROUGH, "miss");
                self.load_and_store(&key, id, &loader, ttl).await
            }
        }
    }

    /// 缓存击穿：互斥锁重建。抢不到锁就退避后整体重读，
    /// 受 mutex_max_retries 和 mutex_deadline_ms 双重约束，耗尽返回 LockTimeout
    pub async fn query_with_mutex<T, ID, F, Fut>(
        &self,
        kind: &str,
        id: ID,
        loader: F,
        ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        ID: Display + Clone,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = self.key_for(kind, &id);
        let lock_name = Self::lock_name(kind, &id);
        let backoff = Duration::from_millis(self.cfg.mutex_retry_backoff_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(self.cfg.mutex_deadline_ms);
        let mut retries = 0u32;

        loop {
            match self.read_plain::<T>(&key, MUTEX).await? {
                Lookup::Hit(v) => return Ok(Some(v)),
                Lookup::NullHit => return Ok(None),
                Lookup::Miss => {}
            }

            if let Some(handle) = self.lock.try_lock(&lock_name, self.rebuild_lock_ttl()).await? {
                let result = self.rebuild_locked(&key, id.clone(), &loader, ttl).await;
                self.release(&handle).await;
                return result;
            }

            retries += 1;
            if retries > self.cfg.mutex_max_retries || Instant::now() + backoff > deadline {
                warn!(lock = %lock_name, retries, "互斥重建等待超时");
                return Err(SeckillError::LockTimeout { resource: lock_name });
            }
            tokio::time::sleep(backoff).await;
        }
    }

    async fn rebuild_locked<T, ID, F, Fut>(&self, key: &str, id: ID, loader: &F, ttl: Duration) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        // 等锁期间可能已经有人重建完成
        match self.read_plain::<T>(key, MUTEX).await? {
            Lookup::Hit(v) => return Ok(Some(v)),
            Lookup::NullHit => return Ok(None),
            Lookup::Miss => {}
        }
        metrics::on_cache_lookup(MUTEX, "miss");
        debug!(key = %key, "互斥重建开始");
        self.load_and_store(key, id, loader, ttl).await
    }

    async fn release(&self, handle: &LockHandle) {
        if let Err(e) = self.lock.unlock(handle).await {
            warn!(lock = %handle.resource_name, error = %e, "释放重建锁失败，等待 TTL 过期");
        }
    }

    /// 逻辑过期：未预热的 key 返回 None；过期数据照常返回，同时尝试提交一次后台重建。
    /// 同一 key 同时最多一个重建（重建锁由后台任务写完后释放）
    pub async fn query_with_logical_expire<T, ID, F, Fut>(
        &self,
        kind: &str,
        id: ID,
        loader: F,
        window: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        ID: Display + Clone + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let key = self.key_for(kind, &id);
        let raw = match self.redis.get_string(&key).await? {
            Some(raw) if !entry::is_null_marker(&raw) => raw,
            _ => {
                metrics::on_cache_lookup(LOGICAL, "miss");
                return Ok(None);
            }
        };

        let cached = match entry::decode_entry::<T>(&key, &raw) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "逻辑过期缓存无法解析，触发重建");
                metrics::on_cache_lookup(LOGICAL, "malformed");
                self.try_schedule_rebuild::<T, ID, F, Fut>(kind, &key, id, loader, window)
                    .await?;
                return Ok(None);
            }
        };

        if !cached.is_expired(Utc::now()) {
            metrics::on_cache_lookup(LOGICAL, "hit");
            return Ok(Some(cached.data));
        }

        metrics::on_cache_lookup(LOGICAL, "stale");
        match self
            .try_schedule_rebuild::<T, ID, F, Fut>(kind, &key, id, loader, window)
            .await?
        {
            Some(fresh) => Ok(Some(fresh)),
            None => Ok(Some(cached.data)),
        }
    }

    /// 抢重建锁并提交后台任务；拿锁后发现已被他人刷新则直接返回新值
    async fn try_schedule_rebuild<T, ID, F, Fut>(
        &self,
        kind: &str,
        key: &str,
        id: ID,
        loader: F,
        window: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        ID: Display + Clone + Send + Sync + 'static,
        F: Fn(ID) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let lock_name = Self::lock_name(kind, &id);
        let handle = match self.lock.try_lock(&lock_name, self.rebuild_lock_ttl()).await? {
            Some(h) => h,
            None => {
                debug!(lock = %lock_name, "已有重建在进行，返回旧数据");
                return Ok(None);
            }
        };

        if let Some(raw) = self.redis.get_string(key).await? {
            if let Ok(e) = entry::decode_entry::<T>(key, &raw) {
                if !e.is_expired(Utc::now()) {
                    self.release(&handle).await;
                    return Ok(Some(e.data));
                }
            }
        }

        let this = self.clone();
        let key_owned = key.to_string();
        let job_handle = handle.clone();
        let job = Box::pin(async move {
            match loader(id).await {
                Ok(Some(v)) => match this.set_with_logical_expire(&key_owned, &v, window).await {
                    Ok(()) => {
                        metrics::on_cache_rebuild("ok");
                        info!(key = %key_owned, "逻辑过期缓存已重建");
                    }
                    Err(e) => {
                        metrics::on_cache_rebuild("error");
                        warn!(key = %key_owned, error = %e, "重建写回失败");
                    }
                },
                Ok(None) => {
                    metrics::on_cache_rebuild("absent");
                    warn!(key = %key_owned, "重建时数据源已无该记录，保留旧缓存");
                }
                Err(e) => {
                    metrics::on_cache_rebuild("error");
                    warn!(key = %key_owned, error = %e, "重建回源失败");
                }
            }
            this.release(&job_handle).await;
        });

        if !self.pool.submit(job) {
            metrics::on_cache_rebuild("rejected");
            self.release(&handle).await;
        }
        Ok(None)
    }
}
