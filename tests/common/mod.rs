#![allow(dead_code)]

use seckill_gate::config::RedisConnectionConfig;
use seckill_gate::redis_handle::RedisHandle;
use seckill_gate::{initialize_app, Config, MemoryRepository, SeckillApp};
use std::sync::Arc;
use std::time::Duration;

pub fn test_redis_config() -> RedisConnectionConfig {
    let mut cfg = RedisConnectionConfig::default();
    let mode = std::env::var("SECKILL_TEST_REDIS_MODE").unwrap_or_else(|_| "single".to_string());
    if mode == "cluster" {
        cfg.mode = "cluster".to_string();
        if let Ok(s) = std::env::var("SECKILL_TEST_REDIS_CLUSTER_URLS") {
            cfg.cluster_urls = s
                .split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect();
        }
        if cfg.cluster_urls.is_empty() {
            cfg.cluster_urls = vec![std::env::var("SECKILL_TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())];
        }
    } else {
        cfg.mode = "single".to_string();
        cfg.url = std::env::var("SECKILL_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    }
    cfg
}

pub async fn can_connect_redis(cfg: &RedisConnectionConfig) -> bool {
    let connect = async {
        match RedisHandle::connect(cfg).await {
            Ok(h) => h.ping().await.is_ok(),
            Err(_) => false,
        }
    };
    tokio::time::timeout(Duration::from_secs(2), connect)
        .await
        .unwrap_or(false)
}

/// 每个测试独立的 key 前缀 + 缩短的超时参数
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.redis = test_redis_config();
    cfg.redis.key_prefix = format!("seckill_test_{}", uuid::Uuid::new_v4().simple());
    cfg.instance.instance_id = format!("test-{}", uuid::Uuid::new_v4().simple());
    cfg.lock.retry_backoff_ms = 10;
    cfg.lock.max_retries = 5;
    cfg.cache.mutex_retry_backoff_ms = 10;
    cfg.cache.mutex_deadline_ms = 5_000;
    cfg.cache.mutex_max_retries = 500;
    cfg.seckill.stream_block_ms = 100;
    cfg.seckill.recovery_interval_ms = 200;
    cfg.seckill.persist_retry_backoff_ms = 10;
    cfg
}

/// Redis 不可用时返回 None，调用方打印 skip 后直接返回
pub async fn test_app(repo: Arc<MemoryRepository>) -> Option<SeckillApp> {
    test_app_with(test_config(), repo).await
}

pub async fn test_app_with(cfg: Config, repo: Arc<MemoryRepository>) -> Option<SeckillApp> {
    if !can_connect_redis(&cfg.redis).await {
        eprintln!("skip: redis not available");
        return None;
    }
    Some(initialize_app(cfg, repo.clone(), repo).await.unwrap())
}

pub fn voucher(id: i64) -> seckill_gate::models::Voucher {
    seckill_gate::models::Voucher {
        id,
        shop_id: 1,
        title: "100 元代金券".to_string(),
        sub_title: None,
        rules: None,
        pay_value: 8000,
        actual_value: 10000,
    }
}

/// 当前时间处于活动窗口内
pub fn open_sale(voucher_id: i64, stock: i64) -> seckill_gate::models::SeckillVoucher {
    let now = chrono::Utc::now();
    seckill_gate::models::SeckillVoucher {
        voucher_id,
        stock,
        begin_time: now - chrono::Duration::minutes(5),
        end_time: now + chrono::Duration::hours(1),
    }
}

pub fn shop(id: i64, name: &str) -> seckill_gate::models::Shop {
    seckill_gate::models::Shop {
        id,
        name: name.to_string(),
        type_id: 1,
        area: None,
        address: "测试路 1 号".to_string(),
        x: 120.1,
        y: 30.3,
        avg_price: Some(50),
        sold: 0,
        score: 40,
        open_hours: None,
    }
}
