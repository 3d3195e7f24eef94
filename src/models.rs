use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 优惠券（普通券 + 秒杀券共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: i64,
    pub shop_id: i64,
    pub title: String,
    #[serde(default)]
    pub sub_title: Option<String>,
    #[serde(default)]
    pub rules: Option<String>,
    /// 支付金额（分）
    pub pay_value: i64,
    /// 抵扣金额（分）
    pub actual_value: i64,
}

/// 秒杀券：库存 + 活动时间窗
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: i64,
    pub stock: i64,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SeckillVoucher {
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.begin_time && now <= self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
    #[serde(default)]
    pub area: Option<String>,
    pub address: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub avg_price: Option<i64>,
    #[serde(default)]
    pub sold: i64,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub open_hours: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopType {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub sort: i32,
}

/// 已落库订单；(user_id, voucher_id) 全局唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: i64,
    pub user_id: i64,
    pub voucher_id: i64,
    pub created_at: DateTime<Utc>,
}

/// 已通过准入、尚未落库的订单，躺在 stream 里
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrderEntry {
    /// stream 分配的消息 ID，与订单 ID 无关
    pub entry_id: String,
    pub order_id: i64,
    pub user_id: i64,
    pub voucher_id: i64,
    pub admitted_at_ms: i64,
}

impl PendingOrderEntry {
    /// 字段名与 seckill_admit.lua 里 XADD 写入的一致
    pub fn from_fields(entry_id: &str, fields: &HashMap<String, String>) -> Option<Self> {
        let num = |k: &str| fields.get(k).and_then(|v| v.parse::<i64>().ok());
        Some(Self {
            entry_id: entry_id.to_string(),
            order_id: num("order_id")?,
            user_id: num("user_id")?,
            voucher_id: num("voucher_id")?,
            admitted_at_ms: num("admitted_at_ms").unwrap_or(0),
        })
    }

    pub fn to_order_record(&self) -> OrderRecord {
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.admitted_at_ms)
            .filter(|_| self.admitted_at_ms > 0)
            .unwrap_or_else(Utc::now);
        OrderRecord {
            id: self.order_id,
            user_id: self.user_id,
            voucher_id: self.voucher_id,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pending_entry_from_stream_fields() {
        let mut f = HashMap::new();
        f.insert("order_id".to_string(), "99".to_string());
        f.insert("user_id".to_string(), "7".to_string());
        f.insert("voucher_id".to_string(), "10".to_string());
        f.insert("admitted_at_ms".to_string(), "1700000000000".to_string());
        let e = PendingOrderEntry::from_fields("1-0", &f).unwrap();
        assert_eq!((e.order_id, e.user_id, e.voucher_id), (99, 7, 10));
        assert_eq!(e.to_order_record().created_at.timestamp_millis(), 1_700_000_000_000);

        f.remove("user_id");
        assert!(PendingOrderEntry::from_fields("1-0", &f).is_none());
    }

    #[test]
    fn sale_window_is_inclusive() {
        let now = Utc::now();
        let v = SeckillVoucher {
            voucher_id: 1,
            stock: 1,
            begin_time: now - Duration::minutes(1),
            end_time: now + Duration::minutes(1),
        };
        assert!(v.is_open_at(now));
        assert!(v.is_open_at(v.begin_time));
        assert!(!v.is_open_at(v.end_time + Duration::seconds(1)));
    }
}
