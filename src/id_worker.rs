//! 基于 Redis 的分布式 ID 生成器
//!
//! ID = (当前秒 - begin_timestamp) << count_bits | 当日序列号
//! 序列号来自 `INCRBY {p}:icr:{purpose}:{yyyy:MM:dd}`，按天重置，顺带可以统计每天的下单量。
//! Redis 不可用时直接报错，不允许本地兜底生成（无法保证全局唯一）。

use crate::config::IdWorkerConfig;
use crate::error::{Result, SeckillError};
use crate::keys::RedisKeys;
use crate::redis_handle::RedisHandle;
use chrono::{NaiveDate, Utc};

#[derive(Clone)]
pub struct RedisIdWorker {
    redis: RedisHandle,
    keys: RedisKeys,
    begin_timestamp: i64,
    count_bits: u32,
}

impl RedisIdWorker {
    pub fn new(redis: RedisHandle, keys: RedisKeys, cfg: &IdWorkerConfig) -> Self {
        Self {
            redis,
            keys,
            begin_timestamp: cfg.begin_timestamp,
            count_bits: cfg.count_bits.clamp(1, 62),
        }
    }

    /// purpose 用来区分 ID 类型，例如 "order:"
    pub async fn next_id(&self, purpose: &str) -> Result<i64> {
        let now = Utc::now();
        let key = self.keys.id_counter(purpose, now.date_naive());
        let count = self.redis.incr_by(&key, 1).await?;
        compose_id(now.timestamp(), self.begin_timestamp, count, self.count_bits)
            .ok_or(SeckillError::IdSpaceExhausted { key })
    }

    /// 某天某类 ID 已经发出的数量
    pub async fn daily_count(&self, purpose: &str, day: NaiveDate) -> Result<i64> {
        let key = self.keys.id_counter(purpose, day);
        let v = self.redis.get_string(&key).await?;
        Ok(v.and_then(|s| s.parse().ok()).unwrap_or(0))
    }

    pub fn count_bits(&self) -> u32 {
        self.count_bits
    }
}

/// 序列号超出 count_bits 或时间戳早于起点时返回 None
pub fn compose_id(now_seconds: i64, begin_timestamp: i64, count: i64, count_bits: u32) -> Option<i64> {
    let timestamp = now_seconds - begin_timestamp;
    let max_count = (1i64 << count_bits) - 1;
    if timestamp < 0 || count < 0 || count > max_count {
        return None;
    }
    let max_timestamp = i64::MAX >> count_bits;
    if timestamp > max_timestamp {
        return None;
    }
    Some(timestamp << count_bits | count)
}

/// 拆回 (相对秒数, 序列号)
pub fn split_id(id: i64, count_bits: u32) -> (i64, i64) {
    (id >> count_bits, id & ((1i64 << count_bits) - 1))
}
