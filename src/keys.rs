//! Redis key 命名（全部集中在这里）
//!
//! 秒杀相关的 key（库存、已下单用户集合、订单 stream）共用 hash tag `{seckill}`，
//! 保证下单 Lua 脚本在 Cluster 下访问的多个 key 落在同一个 slot。

use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 分布式 ID 计数器：{p}:icr:{purpose}:{yyyy:MM:dd}
    pub fn id_counter(&self, purpose: &str, day: NaiveDate) -> String {
        let purpose = purpose.trim_end_matches(':');
        format!("{}:icr:{}:{}", self.prefix, purpose, day.format("%Y:%m:%d"))
    }

    pub fn lock(&self, name: &str) -> String {
        format!("{}:lock:{}", self.prefix, name)
    }

    /// 缓存 key 前缀，例如 `{p}:cache:shop:`，后面直接拼 id
    pub fn cache_prefix(&self, kind: &str) -> String {
        format!("{}:cache:{}:", self.prefix, kind)
    }

    pub fn shop_type_list(&self) -> String {
        format!("{}:cache:shop_type:list", self.prefix)
    }

    pub fn seckill_stock(&self, voucher_id: i64) -> String {
        format!("{}:{{seckill}}:stock:{}", self.prefix, voucher_id)
    }

    /// 已下单用户集合（按券划分）
    pub fn seckill_admitted(&self, voucher_id: i64) -> String {
        format!("{}:{{seckill}}:order:{}", self.prefix, voucher_id)
    }

    pub fn order_stream(&self) -> String {
        format!("{}:{{seckill}}:stream:orders", self.prefix)
    }
}
