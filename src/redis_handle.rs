//! Redis 访问层
//!
//! 所有命令都用 `redis::cmd` 拼装，经 `RedisHandle::query` 发出；单实例与 Cluster 共用同一套调用点。
//! 连接是多路复用的，克隆开销很小，每次查询克隆一份即可并发使用。
//! 注意：阻塞类命令（XREADGROUP BLOCK）会拖慢同一连接上的其他请求，订单 worker 应使用独立的 handle。

use crate::config::RedisConnectionConfig;
use crate::metrics;
use std::collections::HashMap;

#[derive(Clone)]
pub struct RedisHandle {
    conn: RedisConn,
}

#[derive(Clone)]
enum RedisConn {
    Single(redis::aio::MultiplexedConnection),
    Cluster(redis::cluster_async::ClusterConnection),
}

/// 一条 stream 消息：id + 字段表；字段为 None 表示消息已被 XDEL（pending 里只剩 id）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub id: String,
    pub fields: Option<HashMap<String, String>>,
}

impl RedisHandle {
    pub async fn connect(cfg: &RedisConnectionConfig) -> redis::RedisResult<Self> {
        let conn = match cfg.mode.as_str() {
            "cluster" => {
                let urls = if cfg.cluster_urls.is_empty() {
                    vec![cfg.url.clone()]
                } else {
                    cfg.cluster_urls.clone()
                };
                let client = redis::cluster::ClusterClient::new(urls)?;
                RedisConn::Cluster(client.get_async_connection().await?)
            }
            _ => {
                let client = redis::Client::open(cfg.url.as_str())?;
                RedisConn::Single(client.get_multiplexed_tokio_connection().await?)
            }
        };
        Ok(Self { conn })
    }

    pub async fn query<T: redis::FromRedisValue>(&self, cmd: redis::Cmd) -> redis::RedisResult<T> {
        match self.conn.clone() {
            RedisConn::Single(mut c) => cmd.query_async(&mut c).await,
            RedisConn::Cluster(mut c) => cmd.query_async(&mut c).await,
        }
    }

    pub async fn ping(&self) -> redis::RedisResult<()> {
        let _: String = self.query(redis::cmd("PING")).await?;
        Ok(())
    }

    pub async fn get_string(&self, key: &str) -> redis::RedisResult<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    pub async fn set_string(&self, key: &str, val: &str) -> redis::RedisResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(val);
        self.query(cmd).await
    }

    pub async fn set_ex_string(&self, key: &str, val: &str, ttl_seconds: u64) -> redis::RedisResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(val).arg("EX").arg(ttl_seconds.max(1));
        self.query(cmd).await
    }

    /// SET key val NX PX ttl：成功返回 true
    pub async fn set_nx_px(&self, key: &str, val: &str, ttl_ms: u64) -> redis::RedisResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(val).arg("NX").arg("PX").arg(ttl_ms.max(1));
        // OK => Some("OK")；失败 => Nil
        let r: Option<String> = self.query(cmd).await?;
        Ok(r.is_some())
    }

    /// SET key val NX（无 TTL）
    pub async fn set_nx(&self, key: &str, val: &str) -> redis::RedisResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(val).arg("NX");
        let r: Option<String> = self.query(cmd).await?;
        Ok(r.is_some())
    }

    pub async fn del(&self, key: &str) -> redis::RedisResult<u64> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.query(cmd).await
    }

    pub async fn exists(&self, key: &str) -> redis::RedisResult<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        let v: u64 = self.query(cmd).await?;
        Ok(v > 0)
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> redis::RedisResult<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(delta);
        self.query(cmd).await
    }

    /// EXPIREAT key unix_seconds
    pub async fn expire_at(&self, key: &str, unix_seconds: i64) -> redis::RedisResult<bool> {
        let mut cmd = redis::cmd("EXPIREAT");
        cmd.arg(key).arg(unix_seconds);
        let v: i64 = self.query(cmd).await?;
        Ok(v == 1)
    }

    pub async fn sismember(&self, key: &str, member: &str) -> redis::RedisResult<bool> {
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(key).arg(member);
        let v: i64 = self.query(cmd).await?;
        Ok(v == 1)
    }

    pub async fn scard(&self, key: &str) -> redis::RedisResult<u64> {
        let mut cmd = redis::cmd("SCARD");
        cmd.arg(key);
        self.query(cmd).await
    }

    /// 用 Lua 一次写入整个 list 并设置 TTL（先 DEL，避免与旧数据拼接）
    pub async fn replace_list_ex(&self, key: &str, items: &[String], ttl_seconds: u64) -> redis::RedisResult<u64> {
        let script = r#"
redis.call('DEL', KEYS[1])
local ttl = tonumber(ARGV[1])
for i = 2, #ARGV do
  redis.call('RPUSH', KEYS[1], ARGV[i])
end
redis.call('EXPIRE', KEYS[1], ttl)
return #ARGV - 1
"#;
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(1).arg(key).arg(ttl_seconds.max(1));
        for item in items {
            cmd.arg(item);
        }
        self.query(cmd).await
    }

    pub async fn lrange_all(&self, key: &str) -> redis::RedisResult<Vec<String>> {
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(key).arg(0).arg(-1);
        self.query(cmd).await
    }

    /// EVAL <script> <numkeys> keys... args...
    pub async fn eval<T: redis::FromRedisValue>(&self, script: &str, keys: &[&str], args: &[String]) -> redis::RedisResult<T> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for k in keys {
            cmd.arg(*k);
        }
        for a in args {
            cmd.arg(a.as_str());
        }
        self.query(cmd).await
    }

    /// Lua: if GET == expected then DEL
    pub async fn del_if_value_matches(&self, key: &str, expected: &str) -> redis::RedisResult<u64> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(crate::lock::UNLOCK_SCRIPT).arg(1).arg(key).arg(expected);
        self.query(cmd).await
    }

    /// XGROUP CREATE <stream> <group> 0 MKSTREAM；BUSYGROUP 视为成功
    pub async fn xgroup_create(&self, stream: &str, group: &str) -> redis::RedisResult<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg("0").arg("MKSTREAM");
        let r: redis::RedisResult<()> = self.query(cmd).await;
        metrics::redis_op("xgroup_create", r.is_ok());
        match r {
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            other => other,
        }
    }

    /// XREADGROUP GROUP <group> <consumer> COUNT <count> [BLOCK <ms>] STREAMS <stream> <id>
    /// start_id 为 ">" 读新消息；为 "0" 读本 consumer 的 pending 列表
    pub async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start_id: &str,
        block_ms: Option<u64>,
        count: usize,
    ) -> redis::RedisResult<Vec<StreamRecord>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count.max(1));
        if let Some(ms) = block_ms {
            cmd.arg("BLOCK").arg(ms.max(1));
        }
        cmd.arg("STREAMS").arg(stream).arg(start_id);

        let value: redis::Value = match self.query(cmd).await {
            Ok(v) => {
                metrics::redis_op("xreadgroup", true);
                v
            }
            Err(e) => {
                metrics::redis_op("xreadgroup", false);
                return Err(e);
            }
        };
        Ok(parse_xread_records(value))
    }

    pub async fn xack(&self, stream: &str, group: &str, id: &str) -> redis::RedisResult<u64> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(id);
        let r = self.query(cmd).await;
        metrics::redis_op("xack", r.is_ok());
        r
    }

    /// XAUTOCLAIM <stream> <group> <consumer> <min-idle> 0-0 COUNT N
    pub async fn xautoclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> redis::RedisResult<Vec<StreamRecord>> {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms.max(1))
            .arg("0-0")
            .arg("COUNT")
            .arg(count.max(1));
        let value: redis::Value = match self.query(cmd).await {
            Ok(v) => {
                metrics::redis_op("xautoclaim", true);
                v
            }
            Err(e) => {
                metrics::redis_op("xautoclaim", false);
                return Err(e);
            }
        };
        Ok(parse_xautoclaim_records(value))
    }

    /// XPENDING <stream> <group>：返回整个 group 的 pending 总数
    pub async fn xpending_total(&self, stream: &str, group: &str) -> redis::RedisResult<u64> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream).arg(group);
        let value: redis::Value = self.query(cmd).await?;
        parse_xpending_summary_total(value).ok_or_else(|| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "invalid XPENDING summary reply"))
        })
    }
}

fn parse_xread_records(value: redis::Value) -> Vec<StreamRecord> {
    // 期望格式（超时为 Nil）：
    // [ [stream_name, [ [id, [field, value, ...]], ... ]], ... ]
    let mut out = Vec::new();
    let redis::Value::Bulk(streams) = value else { return out };
    for s in streams {
        let redis::Value::Bulk(parts) = s else { continue };
        if parts.len() < 2 {
            continue;
        }
        out.extend(parse_entry_list(&parts[1]));
    }
    out
}

fn parse_xautoclaim_records(value: redis::Value) -> Vec<StreamRecord> {
    // [ next_start_id, [ [id, [field, value, ...]], ... ], [deleted_id...] ]
    let redis::Value::Bulk(parts) = value else { return Vec::new() };
    if parts.len() < 2 {
        return Vec::new();
    }
    parse_entry_list(&parts[1])
}

fn parse_entry_list(value: &redis::Value) -> Vec<StreamRecord> {
    let mut out = Vec::new();
    let redis::Value::Bulk(entries) = value else { return out };
    for e in entries {
        let redis::Value::Bulk(kv) = e else { continue };
        if kv.is_empty() {
            continue;
        }
        let Ok(id) = redis::from_redis_value::<String>(&kv[0]) else { continue };
        let fields = kv.get(1).and_then(field_list_to_map);
        out.push(StreamRecord { id, fields });
    }
    out
}

fn field_list_to_map(value: &redis::Value) -> Option<HashMap<String, String>> {
    // fields = [field, value, field, value, ...]
    let redis::Value::Bulk(items) = value else { return None };
    let mut out = HashMap::new();
    let mut i = 0;
    while i + 1 < items.len() {
        let k = redis::from_redis_value::<String>(&items[i]).ok()?;
        let v = redis::from_redis_value::<String>(&items[i + 1]).ok()?;
        out.insert(k, v);
        i += 2;
    }
    Some(out)
}

fn parse_xpending_summary_total(value: redis::Value) -> Option<u64> {
    // [count, smallest_id, greatest_id, [ [consumer, count], ... ] ]
    let redis::Value::Bulk(parts) = value else { return None };
    if parts.is_empty() {
        return None;
    }
    redis::from_redis_value::<u64>(&parts[0]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, kv: &[(&str, &str)]) -> Value {
        let mut fields = Vec::new();
        for (k, v) in kv {
            fields.push(data(k));
            fields.push(data(v));
        }
        Value::Bulk(vec![data(id), Value::Bulk(fields)])
    }

    #[test]
    fn xread_timeout_yields_nothing() {
        assert!(parse_xread_records(Value::Nil).is_empty());
    }

    #[test]
    fn xread_reply_is_flattened() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("seckill:{seckill}:stream:orders"),
            Value::Bulk(vec![
                entry("1-0", &[("order_id", "42"), ("user_id", "7")]),
                entry("2-0", &[("order_id", "43"), ("user_id", "8")]),
            ]),
        ])]);
        let records = parse_xread_records(reply);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1-0");
        let f = records[1].fields.as_ref().unwrap();
        assert_eq!(f.get("order_id").map(String::as_str), Some("43"));
    }

    #[test]
    fn deleted_pending_entry_has_no_fields() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("s"),
            Value::Bulk(vec![Value::Bulk(vec![data("3-0"), Value::Nil])]),
        ])]);
        let records = parse_xread_records(reply);
        assert_eq!(
            records,
            vec![StreamRecord {
                id: "3-0".to_string(),
                fields: None
            }]
        );
    }

    #[test]
    fn xautoclaim_reply_reads_message_list() {
        let reply = Value::Bulk(vec![
            data("0-0"),
            Value::Bulk(vec![entry("5-1", &[("user_id", "1")])]),
            Value::Bulk(vec![]),
        ]);
        let records = parse_xautoclaim_records(reply);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "5-1");
    }

    #[test]
    fn xpending_summary_total() {
        let reply = Value::Bulk(vec![Value::Int(3), data("1-0"), data("3-0"), Value::Bulk(vec![])]);
        assert_eq!(parse_xpending_summary_total(reply), Some(3));
        assert_eq!(parse_xpending_summary_total(Value::Nil), None);
    }
}
