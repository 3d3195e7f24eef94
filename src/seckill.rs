//! 秒杀下单入口
//!
//! purchase：活动时间校验 → 生成订单 ID → 准入脚本（扣库存 + 入队）→ 立即返回订单 ID，
//! 落库由 `OrderWorker` 异步完成。

use crate::admission::{AdmissionGate, AdmissionOutcome};
use crate::cache::CacheClient;
use crate::error::{Result, SeckillError};
use crate::id_worker::RedisIdWorker;
use crate::models::{SeckillVoucher, Voucher};
use crate::repository::SeckillRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SECKILL_VOUCHER_KIND: &str = "seckill_voucher";
const ORDER_ID_PURPOSE: &str = "order:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Admitted { order_id: i64 },
    OutOfStock,
    DuplicateUser,
}

impl PurchaseOutcome {
    pub fn order_id(&self) -> Option<i64> {
        match self {
            PurchaseOutcome::Admitted { order_id } => Some(*order_id),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SeckillService {
    repo: Arc<dyn SeckillRepository>,
    cache: CacheClient,
    id_worker: RedisIdWorker,
    gate: AdmissionGate,
    admitted_set_grace: Duration,
}

impl SeckillService {
    pub fn new(
        repo: Arc<dyn SeckillRepository>,
        cache: CacheClient,
        id_worker: RedisIdWorker,
        gate: AdmissionGate,
        admitted_set_grace: Duration,
    ) -> Self {
        Self {
            repo,
            cache,
            id_worker,
            gate,
            admitted_set_grace,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    fn sale_expire_at(&self, end_time: DateTime<Utc>) -> i64 {
        end_time.timestamp() + i64::try_from(self.admitted_set_grace.as_secs()).unwrap_or(i64::MAX / 2)
    }

    /// 发布秒杀券：写库，然后把库存写入 Redis（活动结束 + grace 后过期）
    pub async fn add_seckill_voucher(&self, voucher: &Voucher, seckill: &SeckillVoucher) -> Result<i64> {
        let voucher_id = self.repo.insert_seckill_voucher(voucher, seckill).await?;
        self.gate
            .seed_stock(voucher_id, seckill.stock, Some(self.sale_expire_at(seckill.end_time)))
            .await?;
        self.cache
            .invalidate(&self.cache.key_for(SECKILL_VOUCHER_KIND, voucher_id))
            .await?;
        info!(
            voucher_id,
            stock = seckill.stock,
            begin = %seckill.begin_time,
            end = %seckill.end_time,
            "秒杀券已发布"
        );
        Ok(voucher_id)
    }

    /// 用数据库库存行补写 Redis 库存；已有计数时不覆盖
    pub async fn bootstrap_stock(&self, voucher_id: i64) -> Result<bool> {
        let row = self
            .repo
            .load_stock_row(voucher_id)
            .await?
            .ok_or(SeckillError::VoucherNotFound(voucher_id))?;
        let written = self
            .gate
            .seed_stock_if_absent(voucher_id, row.stock, Some(self.sale_expire_at(row.end_time)))
            .await?;
        if written {
            info!(voucher_id, stock = row.stock, "Redis 库存已从数据库补写");
        }
        Ok(written)
    }

    pub async fn purchase(&self, voucher_id: i64, user_id: i64) -> Result<PurchaseOutcome> {
        let repo = &self.repo;
        let seckill = self
            .cache
            .query_with_pass_through(
                SECKILL_VOUCHER_KIND,
                voucher_id,
                |id| repo.load_stock_row(id),
                self.cache.default_ttl(),
            )
            .await?
            .ok_or(SeckillError::VoucherNotFound(voucher_id))?;

        let now = Utc::now();
        if !seckill.is_open_at(now) {
            return Err(if now < seckill.begin_time {
                SeckillError::SaleNotStarted(voucher_id)
            } else {
                SeckillError::SaleEnded(voucher_id)
            });
        }

        let order_id = self.id_worker.next_id(ORDER_ID_PURPOSE).await?;
        let outcome = match self.gate.try_admit(voucher_id, user_id, order_id).await? {
            AdmissionOutcome::Admitted => {
                info!(voucher_id, user_id, order_id, "秒杀下单成功，等待异步落库");
                PurchaseOutcome::Admitted { order_id }
            }
            AdmissionOutcome::OutOfStock => PurchaseOutcome::OutOfStock,
            AdmissionOutcome::DuplicateUser => PurchaseOutcome::DuplicateUser,
        };
        Ok(outcome)
    }

    pub async fn clear_sale(&self, voucher_id: i64) -> Result<()> {
        self.gate.clear_sale(voucher_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admitted_carries_order_id() {
        assert_eq!(PurchaseOutcome::Admitted { order_id: 42 }.order_id(), Some(42));
        assert_eq!(PurchaseOutcome::OutOfStock.order_id(), None);
        assert_eq!(PurchaseOutcome::DuplicateUser.order_id(), None);
    }
}
