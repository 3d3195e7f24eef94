use super::config_types::*;

pub fn default_redis_mode() -> String {
    "single".to_string()
}

pub fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

pub fn default_key_prefix() -> String {
    "seckill".to_string()
}

pub fn default_instance_id() -> String {
    "auto".to_string()
}

pub fn default_begin_timestamp() -> i64 {
    1_640_995_200
}

pub fn default_count_bits() -> u32 {
    32
}

pub fn default_order_lock_ttl_ms() -> u64 {
    30_000
}

pub fn default_lock_retry_backoff_ms() -> u64 {
    50
}

pub fn default_lock_max_retries() -> u32 {
    20
}

pub fn default_cache_ttl_seconds() -> u64 {
    30 * 60
}

pub fn default_cache_null_ttl_seconds() -> u64 {
    2 * 60
}

pub fn default_logical_expire_seconds() -> u64 {
    30 * 60
}

pub fn default_rebuild_lock_ttl_ms() -> u64 {
    10_000
}

pub fn default_mutex_retry_backoff_ms() -> u64 {
    50
}

pub fn default_mutex_max_retries() -> u32 {
    100
}

pub fn default_mutex_deadline_ms() -> u64 {
    5_000
}

pub fn default_rebuild_workers() -> usize {
    10
}

pub fn default_rebuild_queue_capacity() -> usize {
    1024
}

pub fn default_shop_type_ttl_seconds() -> u64 {
    24 * 3600
}

pub fn default_admitted_set_grace_seconds() -> u64 {
    24 * 3600
}

pub fn default_stream_block_ms() -> u64 {
    2_000
}

pub fn default_stream_count() -> usize {
    10
}

pub fn default_stream_group() -> String {
    "g1".to_string()
}

pub fn default_recovery_interval_ms() -> u64 {
    5_000
}

pub fn default_reclaim_min_idle_ms() -> u64 {
    30_000
}

pub fn default_persist_max_attempts() -> u32 {
    3
}

pub fn default_persist_retry_backoff_ms() -> u64 {
    200
}

pub fn default_demo_voucher_stock() -> i64 {
    100
}

pub fn default_demo_users() -> i64 {
    1_000
}

pub fn default_demo_concurrency() -> usize {
    200
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            mode: default_redis_mode(),
            url: default_redis_url(),
            cluster_urls: Vec::new(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
        }
    }
}

impl Default for IdWorkerConfig {
    fn default() -> Self {
        Self {
            begin_timestamp: default_begin_timestamp(),
            count_bits: default_count_bits(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            order_lock_ttl_ms: default_order_lock_ttl_ms(),
            retry_backoff_ms: default_lock_retry_backoff_ms(),
            max_retries: default_lock_max_retries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl_seconds(),
            null_ttl_seconds: default_cache_null_ttl_seconds(),
            logical_expire_seconds: default_logical_expire_seconds(),
            logical_store_ttl_seconds: 0,
            rebuild_lock_ttl_ms: default_rebuild_lock_ttl_ms(),
            mutex_retry_backoff_ms: default_mutex_retry_backoff_ms(),
            mutex_max_retries: default_mutex_max_retries(),
            mutex_deadline_ms: default_mutex_deadline_ms(),
            rebuild_workers: default_rebuild_workers(),
            rebuild_queue_capacity: default_rebuild_queue_capacity(),
            shop_type_ttl_seconds: default_shop_type_ttl_seconds(),
        }
    }
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            admitted_set_grace_seconds: default_admitted_set_grace_seconds(),
            stream_block_ms: default_stream_block_ms(),
            stream_count: default_stream_count(),
            stream_group: default_stream_group(),
            stream_maxlen: 0,
            recovery_interval_ms: default_recovery_interval_ms(),
            reclaim_min_idle_ms: default_reclaim_min_idle_ms(),
            persist_max_attempts: default_persist_max_attempts(),
            persist_retry_backoff_ms: default_persist_retry_backoff_ms(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            voucher_stock: default_demo_voucher_stock(),
            users: default_demo_users(),
            concurrency: default_demo_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis: RedisConnectionConfig::default(),
            instance: InstanceConfig::default(),
            id_worker: IdWorkerConfig::default(),
            lock: LockConfig::default(),
            cache: CacheConfig::default(),
            seckill: SeckillConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}
