// Prometheus 指标
// - 命名遵循 Prometheus 习惯（snake_case + *_total）
// - label 取值都是固定枚举，不放 voucher_id / user_id 这类高基数字段

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static::lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("seckill".to_string()), None)
        .expect("Failed to create Prometheus registry");

    static ref ADMISSION_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("admission_total", "Admission gate decisions"),
        &["outcome"] // admitted|out_of_stock|duplicate_user
    )
    .expect("metric");

    static ref CACHE_LOOKUP_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookup_total", "Cache lookups by strategy and result"),
        &["strategy", "result"] // strategy=pass_through|mutex|logical, result=hit|null_hit|miss|stale|malformed
    )
    .expect("metric");

    static ref CACHE_REBUILD_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_rebuild_total", "Background cache rebuilds"),
        &["result"] // ok|absent|error|rejected
    )
    .expect("metric");

    static ref ORDER_WORKER_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("order_worker_total", "Order worker entry outcomes"),
        &["result"] // persisted|duplicate|malformed|deleted|lock_busy|failed
    )
    .expect("metric");

    static ref REDIS_OP_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("redis_op_total", "Redis stream operations"),
        &["op", "ok"]
    )
    .expect("metric");

    static ref ORDER_STREAM_PENDING: IntGauge = IntGauge::with_opts(Opts::new(
        "order_stream_pending",
        "Pending (unacknowledged) entries in the order stream group"
    ))
    .expect("metric");
}

/// 注册全部指标；重复调用无副作用
pub fn init() {
    let _ = REGISTRY.register(Box::new(ADMISSION_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_LOOKUP_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_REBUILD_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ORDER_WORKER_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REDIS_OP_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ORDER_STREAM_PENDING.clone()));
}

pub fn on_admission(outcome: &str) {
    ADMISSION_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn on_cache_lookup(strategy: &str, result: &str) {
    CACHE_LOOKUP_TOTAL.with_label_values(&[strategy, result]).inc();
}

pub fn on_cache_rebuild(result: &str) {
    CACHE_REBUILD_TOTAL.with_label_values(&[result]).inc();
}

pub fn on_order_worker(result: &str) {
    ORDER_WORKER_TOTAL.with_label_values(&[result]).inc();
}

pub fn redis_op(op: &str, ok: bool) {
    REDIS_OP_TOTAL
        .with_label_values(&[op, if ok { "true" } else { "false" }])
        .inc();
}

pub fn set_order_stream_pending(v: i64) {
    ORDER_STREAM_PENDING.set(v);
}

pub fn render() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
