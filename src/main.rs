use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use futures_util::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use seckill_gate::catalog::EntityKind;
use seckill_gate::models::{SeckillVoucher, Shop, ShopType, Voucher};
use seckill_gate::{initialize_app, metrics, utils, Config, MemoryRepository, PurchaseOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const DEMO_VOUCHER_ID: i64 = 10;
const DEMO_SHOP_ID: i64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // 日志过滤（config/observability.json，RUST_LOG 优先）
    let logging_config = utils::LoggingConfig::load();
    let env_filter = logging_config.build_env_filter();

    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("seckill.log");

    // 文件日志：JSON，按 5MB 轮转，保留最近 5 个
    // file-rotate 的 new() 在 unix 下多一个文件权限参数
    #[cfg(unix)]
    let rotating_appender = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(5)),
        ContentLimit::Bytes(5 * 1024 * 1024),
        Compression::None,
        None,
    );
    #[cfg(not(unix))]
    let rotating_appender = FileRotate::new(
        log_path,
        AppendTimestamp::default(FileLimit::MaxFiles(5)),
        ContentLimit::Bytes(5 * 1024 * 1024),
        Compression::None,
    );
    let (non_blocking_appender, guard) = non_blocking(rotating_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking_appender)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_ansi(false)
        .json()
        .with_filter(env_filter);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time()
        .compact()
        .with_filter(EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    // guard 必须活到进程结束，否则缓冲区里的日志会丢
    Box::leak(Box::new(guard));

    info!("启动秒杀下单服务...");
    let config = Config::load()?;
    info!("配置加载成功");

    let repo = Arc::new(MemoryRepository::new());
    seed_catalog(&repo);

    let app = initialize_app(config.clone(), repo.clone(), repo.clone()).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = app.spawn_order_worker(shutdown_rx).await?;

    // 店铺缓存：预热逻辑过期数据，再走一遍两种读路径
    app.catalog
        .warm_up_shop(DEMO_SHOP_ID, app.cache.logical_window())
        .await?;
    let hot = app.catalog.get_hot_shop(DEMO_SHOP_ID).await?;
    let cached = app.catalog.get_cached_entity(EntityKind::Shop, DEMO_SHOP_ID).await?;
    let types = app.catalog.shop_types().await?;
    info!(
        hot = hot.is_some(),
        cached = cached.is_some(),
        shop_types = types.len(),
        "店铺缓存读取完成"
    );

    run_flash_sale(&app, &config).await?;

    info!("秒杀演示完成，Ctrl+C 退出");
    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，等待订单 worker 结束当前轮询");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_millis(config.seckill.stream_block_ms + 3_000), worker)
        .await
        .is_err()
    {
        warn!("订单 worker 未在超时内退出");
    }

    let stock_row = repo_stock(&repo).await;
    info!(orders = repo.order_count(), ?stock_row, "数据库订单统计");
    info!("指标快照:\n{}", metrics::render());
    Ok(())
}

fn seed_catalog(repo: &MemoryRepository) {
    repo.insert_shop(Shop {
        id: DEMO_SHOP_ID,
        name: "103 茶餐厅".to_string(),
        type_id: 1,
        area: Some("大关".to_string()),
        address: "金华路锦昌文华苑 29 号".to_string(),
        x: 120.149192,
        y: 30.316078,
        avg_price: Some(80),
        sold: 4215,
        score: 37,
        open_hours: Some("10:00-22:00".to_string()),
    });
    for (id, name, sort) in [(1, "美食", 1), (2, "KTV", 2), (3, "丽人·美发", 3)] {
        repo.insert_shop_type(ShopType {
            id,
            name: name.to_string(),
            icon: None,
            sort,
        });
    }
}

async fn repo_stock(repo: &MemoryRepository) -> Option<i64> {
    use seckill_gate::SeckillRepository;
    repo.load_stock_row(DEMO_VOUCHER_ID).await.ok().flatten().map(|r| r.stock)
}

/// 每个用户下单两次、顺序打乱，统计准入结果
async fn run_flash_sale(app: &seckill_gate::SeckillApp, config: &Config) -> Result<()> {
    let now = Utc::now();
    let voucher = Voucher {
        id: DEMO_VOUCHER_ID,
        shop_id: DEMO_SHOP_ID,
        title: "100 元代金券".to_string(),
        sub_title: Some("周一至周日均可使用".to_string()),
        rules: Some("全场通用\\n无需预约".to_string()),
        pay_value: 8000,
        actual_value: 10000,
    };
    let seckill = SeckillVoucher {
        voucher_id: DEMO_VOUCHER_ID,
        stock: config.demo.voucher_stock,
        begin_time: now - ChronoDuration::minutes(1),
        end_time: now + ChronoDuration::hours(1),
    };
    app.seckill.add_seckill_voucher(&voucher, &seckill).await?;

    let mut attempts: Vec<i64> = (1..=config.demo.users).chain(1..=config.demo.users).collect();
    attempts.shuffle(&mut rand::thread_rng());

    let results: Vec<_> = stream::iter(attempts)
        .map(|user_id| {
            let seckill = app.seckill.clone();
            async move { seckill.purchase(DEMO_VOUCHER_ID, user_id).await }
        })
        .buffer_unordered(config.demo.concurrency.max(1))
        .collect()
        .await;

    let (mut admitted, mut out_of_stock, mut duplicate, mut failed) = (0, 0, 0, 0);
    for r in &results {
        match r {
            Ok(PurchaseOutcome::Admitted { .. }) => admitted += 1,
            Ok(PurchaseOutcome::OutOfStock) => out_of_stock += 1,
            Ok(PurchaseOutcome::DuplicateUser) => duplicate += 1,
            Err(e) => {
                failed += 1;
                warn!(error = %e, "下单失败");
            }
        }
    }
    let remaining = app.gate.remaining_stock(DEMO_VOUCHER_ID).await?;
    info!(admitted, out_of_stock, duplicate, failed, ?remaining, "秒杀结果");
    Ok(())
}
