//! 关系型持久层的接口
//!
//! 数据库本身不在本 crate 范围内，这里只定义核心逻辑需要的读写能力：
//! - `SeckillRepository`：券、秒杀库存行、订单
//! - `OrderTx`：一次数据库事务；drop 而未 commit 即回滚
//! - `ShopRepository`：店铺与店铺类型
//!
//! 订单落库分两层：`persist_order` 是只依赖事务对象的领域逻辑，
//! `create_order_in_tx` 是事务边界（begin / commit），worker 直接调用后者。

mod memory;

pub use memory::MemoryRepository;

use crate::error::{Result, SeckillError};
use crate::models::{OrderRecord, SeckillVoucher, Shop, ShopType, Voucher};
use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait SeckillRepository: Send + Sync {
    async fn load_voucher(&self, id: i64) -> Result<Option<Voucher>>;

    async fn load_stock_row(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>>;

    /// 新增秒杀券（券 + 秒杀行在同一事务里写入），返回 voucher_id
    async fn insert_seckill_voucher(&self, voucher: &Voucher, seckill: &SeckillVoucher) -> Result<i64>;

    async fn count_orders(&self, user_id: i64, voucher_id: i64) -> Result<i64>;

    async fn begin(&self) -> Result<Box<dyn OrderTx>>;
}

#[async_trait]
pub trait OrderTx: Send {
    async fn count_orders(&mut self, user_id: i64, voucher_id: i64) -> Result<i64>;

    /// UPDATE stock = stock - 1 WHERE voucher_id = ? AND stock > 0；返回是否扣减成功
    async fn decrement_stock_row(&mut self, voucher_id: i64) -> Result<bool>;

    /// 违反 (user_id, voucher_id) 唯一约束时返回 PersistenceConflict
    async fn insert_order(&mut self, order: &OrderRecord) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ShopRepository: Send + Sync {
    async fn load_shop(&self, id: i64) -> Result<Option<Shop>>;

    /// 返回 false 表示店铺不存在
    async fn update_shop(&self, shop: &Shop) -> Result<bool>;

    async fn list_shop_types(&self) -> Result<Vec<ShopType>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Created,
    /// 同一用户同一张券已有订单，本次什么也没写
    AlreadyExists,
}

/// 一人一单复查 + 扣减库存行 + 插入订单
pub async fn persist_order(tx: &mut dyn OrderTx, order: &OrderRecord) -> Result<PersistOutcome> {
    let count = tx.count_orders(order.user_id, order.voucher_id).await?;
    if count > 0 {
        warn!(
            order_id = order.id,
            user_id = order.user_id,
            voucher_id = order.voucher_id,
            "用户已购买过该秒杀券，跳过落库"
        );
        return Ok(PersistOutcome::AlreadyExists);
    }

    if !tx.decrement_stock_row(order.voucher_id).await? {
        // 缓存侧库存是准入依据，这里扣不动只记录，订单照常写入
        warn!(voucher_id = order.voucher_id, order_id = order.id, "数据库库存行扣减失败（stock 已为 0）");
    }

    tx.insert_order(order).await?;
    Ok(PersistOutcome::Created)
}

/// 事务边界：begin → persist_order → commit；唯一约束冲突按已存在处理
pub async fn create_order_in_tx(repo: &dyn SeckillRepository, order: &OrderRecord) -> Result<PersistOutcome> {
    let mut tx = repo.begin().await?;
    let persisted = persist_order(tx.as_mut(), order).await;
    match persisted {
        Ok(PersistOutcome::Created) => {
            tx.commit().await?;
            info!(order_id = order.id, user_id = order.user_id, voucher_id = order.voucher_id, "订单已落库");
            Ok(PersistOutcome::Created)
        }
        Ok(PersistOutcome::AlreadyExists) => Ok(PersistOutcome::AlreadyExists),
        Err(SeckillError::PersistenceConflict { user_id, voucher_id }) => {
            warn!(user_id, voucher_id, order_id = order.id, "唯一约束冲突，按重复订单处理");
            Ok(PersistOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn seckill_row(voucher_id: i64, stock: i64) -> SeckillVoucher {
        let now = Utc::now();
        SeckillVoucher {
            voucher_id,
            stock,
            begin_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
        }
    }

    fn voucher(id: i64) -> Voucher {
        Voucher {
            id,
            shop_id: 1,
            title: "100 元代金券".to_string(),
            sub_title: None,
            rules: None,
            pay_value: 8000,
            actual_value: 10000,
        }
    }

    fn order(id: i64, user_id: i64, voucher_id: i64) -> OrderRecord {
        OrderRecord {
            id,
            user_id,
            voucher_id,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_order_commits_and_decrements() {
        let repo = MemoryRepository::new();
        repo.insert_seckill_voucher(&voucher(10), &seckill_row(10, 2)).await.unwrap();

        let out = create_order_in_tx(&repo, &order(1, 7, 10)).await.unwrap();
        assert_eq!(out, PersistOutcome::Created);
        assert_eq!(repo.count_orders(7, 10).await.unwrap(), 1);
        assert_eq!(repo.load_stock_row(10).await.unwrap().unwrap().stock, 1);
    }

    #[tokio::test]
    async fn second_order_for_same_user_is_noop() {
        let repo = MemoryRepository::new();
        repo.insert_seckill_voucher(&voucher(10), &seckill_row(10, 5)).await.unwrap();

        create_order_in_tx(&repo, &order(1, 7, 10)).await.unwrap();
        let out = create_order_in_tx(&repo, &order(2, 7, 10)).await.unwrap();
        assert_eq!(out, PersistOutcome::AlreadyExists);
        assert_eq!(repo.order_count(), 1);
        assert_eq!(repo.load_stock_row(10).await.unwrap().unwrap().stock, 4);
    }

    #[tokio::test]
    async fn dropped_tx_rolls_back() {
        let repo = MemoryRepository::new();
        repo.insert_seckill_voucher(&voucher(10), &seckill_row(10, 5)).await.unwrap();
        {
            let mut tx = repo.begin().await.unwrap();
            assert!(tx.decrement_stock_row(10).await.unwrap());
            tx.insert_order(&order(1, 7, 10)).await.unwrap();
            assert_eq!(tx.count_orders(7, 10).await.unwrap(), 1);
        }
        assert_eq!(repo.order_count(), 0);
        assert_eq!(repo.load_stock_row(10).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_persistence_error() {
        let repo = MemoryRepository::new();
        repo.insert_seckill_voucher(&voucher(10), &seckill_row(10, 5)).await.unwrap();
        repo.fail_next_commits(1);

        let err = create_order_in_tx(&repo, &order(1, 7, 10)).await.unwrap_err();
        assert!(matches!(err, SeckillError::Persistence(_)));
        assert_eq!(repo.order_count(), 0);

        let out = create_order_in_tx(&repo, &order(1, 7, 10)).await.unwrap();
        assert_eq!(out, PersistOutcome::Created);
    }
}
