//! 缓存值的编码
//!
//! - 普通缓存：值直接序列化成 JSON 字符串
//! - 空值标记：空字符串 ""，和 "key 不存在" 是两回事
//! - 逻辑过期：`{"data": ..., "logical_expiry": "..."}`，过期判断完全由应用负责

use crate::error::{Result, SeckillError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NULL_MARKER: &str = "";

pub fn is_null_marker(raw: &str) -> bool {
    raw == NULL_MARKER
}

pub fn encode_plain<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode_plain<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| SeckillError::MalformedCacheEntry {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// 缺省表示永不逻辑过期
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_expiry: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    pub fn with_window(data: T, now: DateTime<Utc>, window: Duration) -> Self {
        let expiry = chrono::Duration::from_std(window)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            data,
            logical_expiry: Some(expiry),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.logical_expiry, Some(t) if t < now)
    }
}

pub fn decode_entry<T: DeserializeOwned>(key: &str, raw: &str) -> Result<CacheEntry<T>> {
    serde_json::from_str(raw).map_err(|e| SeckillError::MalformedCacheEntry {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// 逻辑过期条目的 Redis 层 TTL（秒）；configured 为 0 表示不设 TTL。
/// 设了 TTL 时至少为 window + margin，保证数据在逻辑过期后、重建完成前不会被 Redis 先删掉
pub fn logical_store_ttl(configured_seconds: u64, window: Duration, margin: Duration) -> Option<u64> {
    if configured_seconds == 0 {
        return None;
    }
    let window_secs = window.as_secs() + u64::from(window.subsec_nanos() > 0);
    let floor = window_secs.saturating_add(margin.as_secs().max(1));
    Some(configured_seconds.max(floor))
}
