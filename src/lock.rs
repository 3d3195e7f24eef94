//! Redis 互斥锁
//!
//! - 加锁：SET key token NX PX ttl，token = 实例 ID + 随机 uuid，每次加锁都不同
//! - 解锁：Lua 比较 token 后删除，一次往返内完成
//! - 锁是建议性的，持有者崩溃/卡住超过 TTL 后锁会被 Redis 自动释放，临界区必须短于 TTL

use crate::config::LockConfig;
use crate::error::{Result, SeckillError};
use crate::keys::RedisKeys;
use crate::redis_handle::RedisHandle;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) const UNLOCK_SCRIPT: &str = include_str!("../scripts/lua/unlock.lua");

/// 一次成功加锁的凭证，解锁必须出示
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub resource_name: String,
    pub owner_token: String,
    pub ttl: Duration,
}

#[derive(Clone)]
pub struct RedisLock {
    redis: RedisHandle,
    keys: RedisKeys,
    instance_id: String,
    retry_backoff: Duration,
    max_retries: u32,
}

impl RedisLock {
    pub fn new(redis: RedisHandle, keys: RedisKeys, instance_id: impl Into<String>, cfg: &LockConfig) -> Self {
        Self {
            redis,
            keys,
            instance_id: instance_id.into(),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms.max(1)),
            max_retries: cfg.max_retries,
        }
    }

    fn next_token(&self) -> String {
        format!("{}-{}", self.instance_id, uuid::Uuid::new_v4().simple())
    }

    /// 尝试加锁一次；已被占用返回 Ok(None)
    pub async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let key = self.keys.lock(name);
        let token = self.next_token();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if self.redis.set_nx_px(&key, &token, ttl_ms).await? {
            debug!(lock = %name, ttl_ms, "加锁成功");
            Ok(Some(LockHandle {
                resource_name: name.to_string(),
                owner_token: token,
                ttl,
            }))
        } else {
            Ok(None)
        }
    }

    /// 释放锁；返回 false 表示锁已过期或已被他人持有（不会误删）
    pub async fn unlock(&self, handle: &LockHandle) -> Result<bool> {
        let key = self.keys.lock(&handle.resource_name);
        let deleted = self.redis.del_if_value_matches(&key, &handle.owner_token).await?;
        if deleted == 0 {
            warn!(lock = %handle.resource_name, "解锁时 token 不匹配，锁可能已过期被他人获取");
        }
        Ok(deleted > 0)
    }

    /// 带有限次数退避重试的加锁，耗尽返回 LockTimeout
    pub async fn lock_with_retry(&self, name: &str, ttl: Duration) -> Result<LockHandle> {
        for attempt in 0..=self.max_retries {
            if let Some(handle) = self.try_lock(name, ttl).await? {
                return Ok(handle);
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }
        Err(SeckillError::LockTimeout {
            resource: name.to_string(),
        })
    }

    /// 当前锁的持有者 token（调试/测试用）
    pub async fn current_owner(&self, name: &str) -> Result<Option<String>> {
        Ok(self.redis.get_string(&self.keys.lock(name)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_script_compares_before_delete() {
        let get = UNLOCK_SCRIPT.find("GET").unwrap();
        let del = UNLOCK_SCRIPT.find("DEL").unwrap();
        assert!(get < del);
        assert!(UNLOCK_SCRIPT.contains("ARGV[1]"));
    }
}
