//! 订单落库 worker（Redis Streams consumer group）
//!
//! 每条消息：Pending → 加用户锁 → 事务内落库 → commit 后 XACK。
//! 处理失败的消息不 ack，留在 pending 列表里，由恢复扫描（读自己的 pending）
//! 或 XAUTOCLAIM（接管死掉的 consumer 的 pending）重新处理；
//! 落库前的一人一单复查保证重复处理不会产生第二条订单。

use crate::config::{LockConfig, SeckillConfig};
use crate::error::{Result, SeckillError};
use crate::keys::RedisKeys;
use crate::lock::RedisLock;
use crate::metrics;
use crate::models::PendingOrderEntry;
use crate::redis_handle::{RedisHandle, StreamRecord};
use crate::repository::{create_order_in_tx, PersistOutcome, SeckillRepository};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(300);

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// 新订单已提交并 ack
    Persisted,
    /// 订单已存在（重复投递），直接 ack
    AlreadyExists,
    /// 字段缺失/无法解析，ack 掉避免反复投递
    Malformed,
    /// 消息本体已被删除，只剩 pending id，ack
    Deleted,
    /// 同一用户的锁被占用，保持 pending
    LockBusy,
    /// 落库失败（已重试），保持 pending
    Failed,
}

impl EntryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryOutcome::Persisted => "persisted",
            EntryOutcome::AlreadyExists => "duplicate",
            EntryOutcome::Malformed => "malformed",
            EntryOutcome::Deleted => "deleted",
            EntryOutcome::LockBusy => "lock_busy",
            EntryOutcome::Failed => "failed",
        }
    }

    pub fn should_ack(&self) -> bool {
        matches!(
            self,
            EntryOutcome::Persisted | EntryOutcome::AlreadyExists | EntryOutcome::Malformed | EntryOutcome::Deleted
        )
    }
}

pub struct OrderWorker {
    /// 独占连接：XREADGROUP BLOCK 不能和其他请求共用
    redis: RedisHandle,
    lock: RedisLock,
    repo: Arc<dyn SeckillRepository>,
    stream: String,
    group: String,
    consumer: String,
    order_lock_ttl: Duration,
    cfg: SeckillConfig,
}

impl OrderWorker {
    pub fn new(
        redis: RedisHandle,
        keys: &RedisKeys,
        lock: RedisLock,
        repo: Arc<dyn SeckillRepository>,
        consumer: impl Into<String>,
        cfg: &SeckillConfig,
        lock_cfg: &LockConfig,
    ) -> Self {
        let order_lock_ttl = Duration::from_millis(lock_cfg.order_lock_ttl_ms);
        let budget = persist_backoff_budget(cfg);
        if budget >= order_lock_ttl {
            warn!(
                backoff_budget_ms = budget.as_millis() as u64,
                order_lock_ttl_ms = lock_cfg.order_lock_ttl_ms,
                "落库重试退避总时长不小于用户锁 TTL，锁可能在落库过程中过期"
            );
        }
        Self {
            redis,
            lock,
            repo,
            stream: keys.order_stream(),
            group: cfg.stream_group.clone(),
            consumer: consumer.into(),
            order_lock_ttl,
            cfg: cfg.clone(),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub async fn ensure_group(&self) -> Result<()> {
        self.redis.xgroup_create(&self.stream, &self.group).await?;
        Ok(())
    }

    /// 主循环：启动先恢复一次 pending，之后周期性恢复 + 接管；读新消息带 BLOCK 超时，
    /// 每轮之间检查 shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.ensure_group().await?;
        info!(
            consumer = %self.consumer,
            stream = %self.stream,
            group = %self.group,
            "订单 worker 已启动"
        );

        let recovery_interval = Duration::from_millis(self.cfg.recovery_interval_ms.max(100));
        let mut last_recovery_at: Option<Instant> = None;
        let mut force_recovery = true;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if force_recovery || last_recovery_at.map_or(true, |t| t.elapsed() >= recovery_interval) {
                last_recovery_at = Some(Instant::now());
                force_recovery = false;
                if let Err(e) = self.recover_pending().await {
                    warn!(error = %e, "pending 恢复扫描失败");
                }
                let _ = self.reclaim_idle().await;
                if let Ok(total) = self.pending_total().await {
                    debug!(pending = total, "订单 stream pending 数");
                }
            }

            match self.poll_once().await {
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "XREADGROUP 失败，稍后重试");
                    force_recovery = true;
                    tokio::select! {
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(consumer = %self.consumer, "订单 worker 已退出");
        Ok(())
    }

    /// 读一批新消息（BLOCK stream_block_ms）并处理，返回读到的条数
    pub async fn poll_once(&self) -> Result<usize> {
        let records = self
            .redis
            .xreadgroup(
                &self.stream,
                &self.group,
                &self.consumer,
                ">",
                Some(self.cfg.stream_block_ms),
                self.cfg.stream_count,
            )
            .await?;
        for record in &records {
            self.process_entry(record).await;
        }
        Ok(records.len())
    }

    /// 从头读本 consumer 的 pending 列表并逐条重处理；
    /// 游标逐批前移，本轮仍失败的消息留到下一轮
    pub async fn recover_pending(&self) -> Result<usize> {
        let mut cursor = "0".to_string();
        let mut handled = 0usize;
        loop {
            let records = self
                .redis
                .xreadgroup(&self.stream, &self.group, &self.consumer, &cursor, None, self.cfg.stream_count)
                .await?;
            let Some(last) = records.last() else {
                break;
            };
            cursor = last.id.clone();
            for record in &records {
                warn!(entry_id = %record.id, "重新处理 pending 消息");
                self.process_entry(record).await;
                handled += 1;
            }
        }
        if handled > 0 {
            info!(handled, consumer = %self.consumer, "pending 恢复扫描完成");
        }
        Ok(handled)
    }

    /// XAUTOCLAIM 接管 idle 超过 reclaim_min_idle_ms 的消息（其他 consumer 崩溃遗留）；
    /// Redis 不支持该命令时忽略
    pub async fn reclaim_idle(&self) -> Result<usize> {
        let records = match self
            .redis
            .xautoclaim(
                &self.stream,
                &self.group,
                &self.consumer,
                self.cfg.reclaim_min_idle_ms,
                self.cfg.stream_count,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "XAUTOCLAIM 不可用或失败，忽略");
                return Ok(0);
            }
        };
        for record in &records {
            info!(entry_id = %record.id, consumer = %self.consumer, "接管 idle pending 消息");
            self.process_entry(record).await;
        }
        Ok(records.len())
    }

    pub async fn pending_total(&self) -> Result<u64> {
        let total = self.redis.xpending_total(&self.stream, &self.group).await?;
        metrics::set_order_stream_pending(i64::try_from(total).unwrap_or(i64::MAX));
        Ok(total)
    }

    /// 处理一条消息；只有在落库提交（或确认无需落库）之后才 ack
    pub async fn process_entry(&self, record: &StreamRecord) -> EntryOutcome {
        let outcome = match &record.fields {
            None => {
                warn!(entry_id = %record.id, "pending 消息本体已不存在，直接 ack");
                EntryOutcome::Deleted
            }
            Some(fields) => match PendingOrderEntry::from_fields(&record.id, fields) {
                None => {
                    error!(entry_id = %record.id, ?fields, "订单消息字段无法解析，丢弃");
                    EntryOutcome::Malformed
                }
                Some(entry) => self.persist_entry(&entry).await,
            },
        };

        if outcome.should_ack() {
            if let Err(e) = self.redis.xack(&self.stream, &self.group, &record.id).await {
                // 已落库的消息重新投递时会被一人一单复查挡住
                warn!(entry_id = %record.id, error = %e, "XACK 失败，消息将被重新投递");
            }
        }
        metrics::on_order_worker(outcome.as_str());
        outcome
    }

    async fn persist_entry(&self, entry: &PendingOrderEntry) -> EntryOutcome {
        let lock_name = format!("order:{}", entry.user_id);
        let handle = match self.lock.try_lock(&lock_name, self.order_lock_ttl).await {
            Ok(Some(h)) => h,
            Ok(None) => {
                warn!(user_id = entry.user_id, entry_id = %entry.entry_id, "用户订单锁被占用，稍后重试");
                return EntryOutcome::LockBusy;
            }
            Err(e) => {
                warn!(user_id = entry.user_id, error = %e, "获取用户订单锁失败");
                return EntryOutcome::Failed;
            }
        };

        let outcome = self.persist_with_retry(entry).await;

        if let Err(e) = self.lock.unlock(&handle).await {
            warn!(lock = %lock_name, error = %e, "释放用户订单锁失败，等待 TTL 过期");
        }
        outcome
    }

    async fn persist_with_retry(&self, entry: &PendingOrderEntry) -> EntryOutcome {
        let order = entry.to_order_record();
        let max_attempts = self.cfg.persist_max_attempts.max(1);
        let backoff = Duration::from_millis(self.cfg.persist_retry_backoff_ms);

        for attempt in 1..=max_attempts {
            match create_order_in_tx(self.repo.as_ref(), &order).await {
                Ok(PersistOutcome::Created) => return EntryOutcome::Persisted,
                Ok(PersistOutcome::AlreadyExists) => return EntryOutcome::AlreadyExists,
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(order_id = order.id, attempt, error = %e, "订单落库失败，重试");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    log_persist_failure(entry, attempt, &e);
                    return EntryOutcome::Failed;
                }
            }
        }
        EntryOutcome::Failed
    }
}

/// 一次处理内落库重试的退避总时长（不含落库本身）
pub fn persist_backoff_budget(cfg: &SeckillConfig) -> Duration {
    let retries = cfg.persist_max_attempts.max(1) - 1;
    Duration::from_millis(cfg.persist_retry_backoff_ms.saturating_mul(u64::from(retries)))
}

fn log_persist_failure(entry: &PendingOrderEntry, attempts: u32, e: &SeckillError) {
    error!(
        entry_id = %entry.entry_id,
        order_id = entry.order_id,
        user_id = entry.user_id,
        voucher_id = entry.voucher_id,
        attempts,
        error = %e,
        "订单落库失败，消息保留在 pending 列表等待重新投递"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminal_outcomes_are_acked() {
        assert!(EntryOutcome::Persisted.should_ack());
        assert!(EntryOutcome::AlreadyExists.should_ack());
        assert!(EntryOutcome::Malformed.should_ack());
        assert!(EntryOutcome::Deleted.should_ack());
        assert!(!EntryOutcome::LockBusy.should_ack());
        assert!(!EntryOutcome::Failed.should_ack());
    }

    #[test]
    fn default_retry_budget_fits_inside_order_lock() {
        let cfg = crate::config::Config::default();
        let ttl = Duration::from_millis(cfg.lock.order_lock_ttl_ms);
        assert!(ttl <= Duration::from_secs(30));
        // 每次落库留 1s 余量
        let per_attempt = Duration::from_secs(1) * cfg.seckill.persist_max_attempts;
        assert!(persist_backoff_budget(&cfg.seckill) + per_attempt < ttl);
    }

    #[test]
    fn single_attempt_has_no_backoff() {
        let mut cfg = crate::config::Config::default().seckill;
        cfg.persist_max_attempts = 1;
        assert_eq!(persist_backoff_budget(&cfg), Duration::ZERO);
        cfg.persist_max_attempts = 4;
        cfg.persist_retry_backoff_ms = 250;
        assert_eq!(persist_backoff_budget(&cfg), Duration::from_millis(750));
    }
}
