//! 错误分类
//!
//! - StoreUnavailable：Redis 不可达/超时，向上透传（绝不当作缓存未命中处理）
//! - LockTimeout：锁重试耗尽
//! - MalformedCacheEntry：缓存反序列化失败，调用方按未命中处理并触发重建
//! - PersistenceConflict：落库时发现 (user, voucher) 已有订单
//!
//! 库存不足 / 重复下单属于业务结果，见 `admission::AdmissionOutcome`，不在这里。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SeckillError>;

#[derive(Debug, Error)]
pub enum SeckillError {
    #[error("redis 不可用: {0}")]
    StoreUnavailable(String),

    #[error("redis 命令失败: {0}")]
    StoreCommand(String),

    #[error("Lua 脚本返回值无法识别: {0}")]
    ScriptReply(String),

    #[error("获取锁超时: {resource}")]
    LockTimeout { resource: String },

    #[error("缓存数据格式错误: key={key}, reason={reason}")]
    MalformedCacheEntry { key: String, reason: String },

    #[error("订单已存在: user_id={user_id}, voucher_id={voucher_id}")]
    PersistenceConflict { user_id: i64, voucher_id: i64 },

    #[error("持久层错误: {0}")]
    Persistence(String),

    #[error("秒杀券不存在: {0}")]
    VoucherNotFound(i64),

    #[error("秒杀尚未开始: voucher_id={0}")]
    SaleNotStarted(i64),

    #[error("秒杀已经结束: voucher_id={0}")]
    SaleEnded(i64),

    #[error("{kind} 不存在: id={id}")]
    EntityNotFound { kind: &'static str, id: i64 },

    #[error("当日 ID 序列号耗尽: {key}")]
    IdSpaceExhausted { key: String },

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SeckillError {
    /// 可以在本地退避重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SeckillError::StoreUnavailable(_) | SeckillError::LockTimeout { .. } | SeckillError::Persistence(_)
        )
    }
}

impl From<redis::RedisError> for SeckillError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            SeckillError::StoreUnavailable(e.to_string())
        } else {
            SeckillError::StoreCommand(e.to_string())
        }
    }
}
