use serde::{Deserialize, Serialize};

use super::config_defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub redis: RedisConnectionConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub id_worker: IdWorkerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Redis 连接配置（单实例或 Cluster）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConnectionConfig {
    /// Redis 模式： "single" | "cluster"
    #[serde(default = "default_redis_mode")]
    pub mode: String,
    /// 单实例 Redis URL（mode=single 时使用）
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Cluster 节点 URL 列表（mode=cluster 时使用）
    #[serde(default)]
    pub cluster_urls: Vec<String>,
    /// 所有 key 的统一前缀
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// 实例 ID：留空或 "auto" 自动生成（hostname + pid + 短 uuid）
    /// 用作 Streams consumer 名称和锁 owner token 前缀
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdWorkerConfig {
    /// 起始时间戳（秒），默认 2022-01-01T00:00:00Z
    #[serde(default = "default_begin_timestamp")]
    pub begin_timestamp: i64,
    /// 低位序列号位数
    #[serde(default = "default_count_bits")]
    pub count_bits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// 订单落库时的用户锁 TTL（毫秒）；须大于一次落库（含重试）的耗时
    #[serde(default = "default_order_lock_ttl_ms")]
    pub order_lock_ttl_ms: u64,
    /// lock_with_retry 的退避间隔（毫秒）
    #[serde(default = "default_lock_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// lock_with_retry 的最大重试次数
    #[serde(default = "default_lock_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 普通缓存 TTL（秒）
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
    /// 空值缓存 TTL（秒），用于防穿透
    #[serde(default = "default_cache_null_ttl_seconds")]
    pub null_ttl_seconds: u64,
    /// 逻辑过期窗口（秒）
    #[serde(default = "default_logical_expire_seconds")]
    pub logical_expire_seconds: u64,
    /// 逻辑过期数据的 Redis 层 TTL（秒），0 表示不设置
    #[serde(default)]
    pub logical_store_ttl_seconds: u64,
    /// 重建锁 TTL（毫秒）
    #[serde(default = "default_rebuild_lock_ttl_ms")]
    pub rebuild_lock_ttl_ms: u64,
    /// 互斥重建：抢锁失败后的等待间隔（毫秒）
    #[serde(default = "default_mutex_retry_backoff_ms")]
    pub mutex_retry_backoff_ms: u64,
    /// 互斥重建：最大重试次数
    #[serde(default = "default_mutex_max_retries")]
    pub mutex_max_retries: u32,
    /// 互斥重建：整体截止时间（毫秒）
    #[serde(default = "default_mutex_deadline_ms")]
    pub mutex_deadline_ms: u64,
    /// 逻辑过期异步重建的 worker 数
    #[serde(default = "default_rebuild_workers")]
    pub rebuild_workers: usize,
    /// 重建任务队列容量，满了直接丢弃（锁会被释放）
    #[serde(default = "default_rebuild_queue_capacity")]
    pub rebuild_queue_capacity: usize,
    /// 店铺类型列表缓存 TTL（秒）
    #[serde(default = "default_shop_type_ttl_seconds")]
    pub shop_type_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeckillConfig {
    /// 已下单用户集合在活动结束后额外保留的时间（秒）
    #[serde(default = "default_admitted_set_grace_seconds")]
    pub admitted_set_grace_seconds: u64,
    /// Streams 读取 block 时间（毫秒）
    #[serde(default = "default_stream_block_ms")]
    pub stream_block_ms: u64,
    /// Streams 每次拉取条数
    #[serde(default = "default_stream_count")]
    pub stream_count: usize,
    /// consumer group 名称
    #[serde(default = "default_stream_group")]
    pub stream_group: String,
    /// 订单 stream 最大长度（MAXLEN ~），0 表示不裁剪
    #[serde(default)]
    pub stream_maxlen: usize,
    /// pending 恢复扫描间隔（毫秒）
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    /// XAUTOCLAIM 最小 idle（毫秒）：超过该时间的其他 consumer 的 pending 会被接管
    #[serde(default = "default_reclaim_min_idle_ms")]
    pub reclaim_min_idle_ms: u64,
    /// 单次处理内落库的最大尝试次数
    #[serde(default = "default_persist_max_attempts")]
    pub persist_max_attempts: u32,
    /// 落库重试退避（毫秒）
    #[serde(default = "default_persist_retry_backoff_ms")]
    pub persist_retry_backoff_ms: u64,
}

/// 本地演示（binary 使用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_demo_voucher_stock")]
    pub voucher_stock: i64,
    #[serde(default = "default_demo_users")]
    pub users: i64,
    #[serde(default = "default_demo_concurrency")]
    pub concurrency: usize,
}
