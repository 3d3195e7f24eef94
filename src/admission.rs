//! 秒杀准入闸门
//!
//! 库存和已下单用户集合只允许通过 `seckill_admit.lua` 修改，
//! 同一张券的所有准入请求在 Redis 内串行执行，库存不会变成负数，同一用户最多准入一次。

use crate::error::{Result, SeckillError};
use crate::keys::RedisKeys;
use crate::metrics;
use crate::redis_handle::RedisHandle;
use chrono::Utc;
use tracing::{debug, info};

pub(crate) const ADMIT_SCRIPT: &str = include_str!("../scripts/lua/seckill_admit.lua");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    OutOfStock,
    DuplicateUser,
}

impl AdmissionOutcome {
    pub fn from_script_reply(code: i64) -> Result<Self> {
        match code {
            0 => Ok(AdmissionOutcome::Admitted),
            1 => Ok(AdmissionOutcome::OutOfStock),
            2 => Ok(AdmissionOutcome::DuplicateUser),
            other => Err(SeckillError::ScriptReply(format!("seckill_admit returned {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Admitted => "admitted",
            AdmissionOutcome::OutOfStock => "out_of_stock",
            AdmissionOutcome::DuplicateUser => "duplicate_user",
        }
    }
}

#[derive(Clone)]
pub struct AdmissionGate {
    redis: RedisHandle,
    keys: RedisKeys,
    stream_maxlen: usize,
}

impl AdmissionGate {
    pub fn new(redis: RedisHandle, keys: RedisKeys, stream_maxlen: usize) -> Self {
        Self {
            redis,
            keys,
            stream_maxlen,
        }
    }

    /// 一次往返完成校验 + 预占 + 入队；order_id 由调用方预先生成
    pub async fn try_admit(&self, voucher_id: i64, user_id: i64, order_id: i64) -> Result<AdmissionOutcome> {
        let stock_key = self.keys.seckill_stock(voucher_id);
        let admitted_key = self.keys.seckill_admitted(voucher_id);
        let stream_key = self.keys.order_stream();
        let args = [
            user_id.to_string(),
            voucher_id.to_string(),
            order_id.to_string(),
            Utc::now().timestamp_millis().to_string(),
            self.stream_maxlen.to_string(),
        ];

        let reply: i64 = self
            .redis
            .eval(
                ADMIT_SCRIPT,
                &[stock_key.as_str(), admitted_key.as_str(), stream_key.as_str()],
                &args,
            )
            .await
            .map_err(|e| {
                metrics::redis_op("seckill_admit", false);
                SeckillError::from(e)
            })?;
        metrics::redis_op("seckill_admit", true);

        let outcome = AdmissionOutcome::from_script_reply(reply)?;
        metrics::on_admission(outcome.as_str());
        debug!(voucher_id, user_id, order_id, outcome = outcome.as_str(), "准入判定");
        Ok(outcome)
    }

    /// 覆盖写库存；expire_at 为库存 key 的过期时间（unix 秒），已下单集合在准入时跟随该过期时间
    pub async fn seed_stock(&self, voucher_id: i64, stock: i64, expire_at: Option<i64>) -> Result<()> {
        let key = self.keys.seckill_stock(voucher_id);
        self.redis.set_string(&key, &stock.max(0).to_string()).await?;
        if let Some(ts) = expire_at {
            self.redis.expire_at(&key, ts).await?;
        }
        info!(voucher_id, stock, ?expire_at, "秒杀库存已写入缓存");
        Ok(())
    }

    /// 只在库存 key 不存在时写入，返回是否写入
    pub async fn seed_stock_if_absent(&self, voucher_id: i64, stock: i64, expire_at: Option<i64>) -> Result<bool> {
        let key = self.keys.seckill_stock(voucher_id);
        let written = self.redis.set_nx(&key, &stock.max(0).to_string()).await?;
        if written {
            if let Some(ts) = expire_at {
                self.redis.expire_at(&key, ts).await?;
            }
        }
        Ok(written)
    }

    pub async fn remaining_stock(&self, voucher_id: i64) -> Result<Option<i64>> {
        let v = self.redis.get_string(&self.keys.seckill_stock(voucher_id)).await?;
        Ok(v.and_then(|s| s.parse().ok()))
    }

    pub async fn admitted_count(&self, voucher_id: i64) -> Result<u64> {
        Ok(self.redis.scard(&self.keys.seckill_admitted(voucher_id)).await?)
    }

    pub async fn is_admitted(&self, voucher_id: i64, user_id: i64) -> Result<bool> {
        Ok(self
            .redis
            .sismember(&self.keys.seckill_admitted(voucher_id), &user_id.to_string())
            .await?)
    }

    /// 活动结束后清理库存计数和已下单用户集合
    pub async fn clear_sale(&self, voucher_id: i64) -> Result<()> {
        self.redis.del(&self.keys.seckill_stock(voucher_id)).await?;
        self.redis.del(&self.keys.seckill_admitted(voucher_id)).await?;
        info!(voucher_id, "秒杀缓存数据已清理");
        Ok(())
    }
}
