use crate::admission::AdmissionGate;
use crate::cache::CacheClient;
use crate::catalog::CatalogService;
use crate::config::{normalize_instance_id, Config};
use crate::error::Result;
use crate::id_worker::RedisIdWorker;
use crate::keys::RedisKeys;
use crate::lock::RedisLock;
use crate::order_worker::OrderWorker;
use crate::redis_handle::RedisHandle;
use crate::repository::{SeckillRepository, ShopRepository};
use crate::seckill::SeckillService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 进程内所有组件，共享同一条多路复用 Redis 连接（订单 worker 除外）
#[derive(Clone)]
pub struct SeckillApp {
    pub config: Config,
    pub instance_id: String,
    pub redis: RedisHandle,
    pub keys: RedisKeys,
    pub lock: RedisLock,
    pub cache: CacheClient,
    pub id_worker: RedisIdWorker,
    pub gate: AdmissionGate,
    pub seckill: SeckillService,
    pub catalog: CatalogService,
    orders: Arc<dyn SeckillRepository>,
}

pub async fn initialize_app(
    config: Config,
    orders: Arc<dyn SeckillRepository>,
    shops: Arc<dyn ShopRepository>,
) -> Result<SeckillApp> {
    crate::metrics::init();

    let instance_id = normalize_instance_id(&config.instance.instance_id);
    info!("  实例 ID: {}", instance_id);
    info!(
        "  Redis: mode={}, url={}, key_prefix={}",
        config.redis.mode, config.redis.url, config.redis.key_prefix
    );
    info!(
        "  缓存: ttl={}s, null_ttl={}s, 逻辑过期={}s, 重建 worker={}",
        config.cache.ttl_seconds,
        config.cache.null_ttl_seconds,
        config.cache.logical_expire_seconds,
        config.cache.rebuild_workers
    );
    info!(
        "  订单 stream: group={}, block={}ms, count={}, reclaim_idle={}ms",
        config.seckill.stream_group,
        config.seckill.stream_block_ms,
        config.seckill.stream_count,
        config.seckill.reclaim_min_idle_ms
    );

    let redis = RedisHandle::connect(&config.redis).await?;
    redis.ping().await?;

    let keys = RedisKeys::new(config.redis.key_prefix.clone());
    let lock = RedisLock::new(redis.clone(), keys.clone(), instance_id.clone(), &config.lock);
    let cache = CacheClient::new(redis.clone(), keys.clone(), lock.clone(), config.cache.clone());
    let id_worker = RedisIdWorker::new(redis.clone(), keys.clone(), &config.id_worker);
    let gate = AdmissionGate::new(redis.clone(), keys.clone(), config.seckill.stream_maxlen);
    let seckill = SeckillService::new(
        orders.clone(),
        cache.clone(),
        id_worker.clone(),
        gate.clone(),
        Duration::from_secs(config.seckill.admitted_set_grace_seconds),
    );
    let catalog = CatalogService::new(
        shops,
        orders.clone(),
        cache.clone(),
        redis.clone(),
        keys.clone(),
        config.cache.shop_type_ttl_seconds,
    );

    Ok(SeckillApp {
        config,
        instance_id,
        redis,
        keys,
        lock,
        cache,
        id_worker,
        gate,
        seckill,
        catalog,
        orders,
    })
}

impl SeckillApp {
    /// 订单 worker 使用独立连接；consumer 名为实例 ID
    pub async fn order_worker(&self) -> Result<OrderWorker> {
        let dedicated = RedisHandle::connect(&self.config.redis).await?;
        Ok(OrderWorker::new(
            dedicated,
            &self.keys,
            self.lock.clone(),
            self.orders.clone(),
            self.instance_id.clone(),
            &self.config.seckill,
            &self.config.lock,
        ))
    }

    pub async fn spawn_order_worker(&self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let worker = self.order_worker().await?;
        worker.ensure_group().await?;
        Ok(tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                error!(error = %e, "订单 worker 异常退出");
            }
        }))
    }
}
