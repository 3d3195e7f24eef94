//! 进程内存实现：本地演示和测试用
//!
//! 事务用一把 tokio 互斥锁串行化（相当于表级锁），事务内的写入先暂存，
//! commit 时一次性落到共享状态；事务对象被 drop 即回滚。

use super::{OrderTx, SeckillRepository, ShopRepository};
use crate::error::{Result, SeckillError};
use crate::models::{OrderRecord, SeckillVoucher, Shop, ShopType, Voucher};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
struct State {
    vouchers: HashMap<i64, Voucher>,
    seckill: HashMap<i64, SeckillVoucher>,
    /// (user_id, voucher_id) -> 订单，天然满足唯一约束
    orders: HashMap<(i64, i64), OrderRecord>,
    shops: HashMap<i64, Shop>,
    shop_types: Vec<ShopType>,
}

struct Inner {
    state: Mutex<State>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
    fail_commits: AtomicU32,
    shop_loads: AtomicUsize,
    voucher_loads: AtomicUsize,
    shop_load_delay: Duration,
}

#[derive(Clone)]
pub struct MemoryRepository {
    inner: Arc<Inner>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::with_shop_load_delay(Duration::ZERO)
    }

    /// 每次 load_shop 人为延迟，用来放大缓存重建的并发窗口
    pub fn with_shop_load_delay(delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                tx_lock: Arc::new(tokio::sync::Mutex::new(())),
                fail_commits: AtomicU32::new(0),
                shop_loads: AtomicUsize::new(0),
                voucher_loads: AtomicUsize::new(0),
                shop_load_delay: delay,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_shop(&self, shop: Shop) {
        self.state().shops.insert(shop.id, shop);
    }

    pub fn insert_shop_type(&self, shop_type: ShopType) {
        let mut st = self.state();
        st.shop_types.retain(|t| t.id != shop_type.id);
        st.shop_types.push(shop_type);
    }

    /// 接下来 n 次 commit 返回 Persistence 错误
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.fail_commits.store(n, Ordering::SeqCst);
    }

    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    pub fn orders_for_voucher(&self, voucher_id: i64) -> Vec<OrderRecord> {
        let mut v: Vec<OrderRecord> = self
            .state()
            .orders
            .values()
            .filter(|o| o.voucher_id == voucher_id)
            .cloned()
            .collect();
        v.sort_by_key(|o| o.id);
        v
    }

    pub fn shop_load_count(&self) -> usize {
        self.inner.shop_loads.load(Ordering::SeqCst)
    }

    pub fn voucher_load_count(&self) -> usize {
        self.inner.voucher_loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SeckillRepository for MemoryRepository {
    async fn load_voucher(&self, id: i64) -> Result<Option<Voucher>> {
        self.inner.voucher_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().vouchers.get(&id).cloned())
    }

    async fn load_stock_row(&self, voucher_id: i64) -> Result<Option<SeckillVoucher>> {
        Ok(self.state().seckill.get(&voucher_id).cloned())
    }

    async fn insert_seckill_voucher(&self, voucher: &Voucher, seckill: &SeckillVoucher) -> Result<i64> {
        let _tx = self.inner.tx_lock.lock().await;
        let mut st = self.state();
        let mut row = seckill.clone();
        row.voucher_id = voucher.id;
        st.vouchers.insert(voucher.id, voucher.clone());
        st.seckill.insert(voucher.id, row);
        Ok(voucher.id)
    }

    async fn count_orders(&self, user_id: i64, voucher_id: i64) -> Result<i64> {
        Ok(i64::from(self.state().orders.contains_key(&(user_id, voucher_id))))
    }

    async fn begin(&self) -> Result<Box<dyn OrderTx>> {
        let guard = self.inner.tx_lock.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            repo: self.clone(),
            _guard: guard,
            new_orders: Vec::new(),
            stock_taken: HashMap::new(),
        }))
    }
}

#[async_trait]
impl ShopRepository for MemoryRepository {
    async fn load_shop(&self, id: i64) -> Result<Option<Shop>> {
        self.inner.shop_loads.fetch_add(1, Ordering::SeqCst);
        if !self.inner.shop_load_delay.is_zero() {
            tokio::time::sleep(self.inner.shop_load_delay).await;
        }
        Ok(self.state().shops.get(&id).cloned())
    }

    async fn update_shop(&self, shop: &Shop) -> Result<bool> {
        let mut st = self.state();
        match st.shops.get_mut(&shop.id) {
            Some(existing) => {
                *existing = shop.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_shop_types(&self) -> Result<Vec<ShopType>> {
        let mut v = self.state().shop_types.clone();
        v.sort_by_key(|t| (t.sort, t.id));
        Ok(v)
    }
}

struct MemoryTx {
    repo: MemoryRepository,
    _guard: OwnedMutexGuard<()>,
    new_orders: Vec<OrderRecord>,
    /// voucher_id -> 本事务内扣减的数量
    stock_taken: HashMap<i64, i64>,
}

#[async_trait]
impl OrderTx for MemoryTx {
    async fn count_orders(&mut self, user_id: i64, voucher_id: i64) -> Result<i64> {
        let committed = i64::from(self.repo.state().orders.contains_key(&(user_id, voucher_id)));
        let staged = self
            .new_orders
            .iter()
            .filter(|o| o.user_id == user_id && o.voucher_id == voucher_id)
            .count() as i64;
        Ok(committed + staged)
    }

    async fn decrement_stock_row(&mut self, voucher_id: i64) -> Result<bool> {
        let stock = match self.repo.state().seckill.get(&voucher_id) {
            Some(row) => row.stock,
            None => return Ok(false),
        };
        let taken = self.stock_taken.entry(voucher_id).or_insert(0);
        if stock - *taken > 0 {
            *taken += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn insert_order(&mut self, order: &OrderRecord) -> Result<()> {
        if self.count_orders(order.user_id, order.voucher_id).await? > 0 {
            return Err(SeckillError::PersistenceConflict {
                user_id: order.user_id,
                voucher_id: order.voucher_id,
            });
        }
        self.new_orders.push(order.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let injected = self
            .repo
            .inner
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SeckillError::Persistence("injected commit failure".to_string()));
        }

        let mut st = self.repo.state();
        for (voucher_id, taken) in &self.stock_taken {
            if let Some(row) = st.seckill.get_mut(voucher_id) {
                row.stock -= taken;
            }
        }
        for order in &self.new_orders {
            st.orders.insert((order.user_id, order.voucher_id), order.clone());
        }
        Ok(())
    }
}
