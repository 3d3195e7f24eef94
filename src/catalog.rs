//! 读多写少的实体（店铺、优惠券、店铺类型）的缓存读写
//!
//! - 店铺详情：互斥重建，key `{p}:cache:shop:{id}`
//! - 热点店铺：逻辑过期（需先 warm_up_shop 预热），key `{p}:cache:shop_hot:{id}`；
//!   两种编码不兼容，必须分开存
//! - 优惠券：空值缓存
//! - 更新店铺：先写库，再同步删普通缓存；热点条目直接用新数据覆盖，完成后才返回

use crate::cache::CacheClient;
use crate::error::{Result, SeckillError};
use crate::keys::RedisKeys;
use crate::models::{Shop, ShopType, Voucher};
use crate::redis_handle::RedisHandle;
use crate::repository::{SeckillRepository, ShopRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Shop,
    Voucher,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Shop => "shop",
            EntityKind::Voucher => "voucher",
        }
    }
}

const HOT_SHOP_KIND: &str = "shop_hot";

#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntity {
    Shop(Shop),
    Voucher(Voucher),
}

#[derive(Clone)]
pub struct CatalogService {
    shops: Arc<dyn ShopRepository>,
    vouchers: Arc<dyn SeckillRepository>,
    cache: CacheClient,
    redis: RedisHandle,
    keys: RedisKeys,
    shop_type_ttl_seconds: u64,
}

impl CatalogService {
    pub fn new(
        shops: Arc<dyn ShopRepository>,
        vouchers: Arc<dyn SeckillRepository>,
        cache: CacheClient,
        redis: RedisHandle,
        keys: RedisKeys,
        shop_type_ttl_seconds: u64,
    ) -> Self {
        Self {
            shops,
            vouchers,
            cache,
            redis,
            keys,
            shop_type_ttl_seconds,
        }
    }

    pub async fn get_cached_entity(&self, kind: EntityKind, id: i64) -> Result<Option<CachedEntity>> {
        let ttl = self.cache.default_ttl();
        match kind {
            EntityKind::Shop => {
                let shops = &self.shops;
                let shop = self
                    .cache
                    .query_with_mutex(kind.as_str(), id, |id| shops.load_shop(id), ttl)
                    .await?;
                Ok(shop.map(CachedEntity::Shop))
            }
            EntityKind::Voucher => {
                let vouchers = &self.vouchers;
                let voucher = self
                    .cache
                    .query_with_pass_through(kind.as_str(), id, |id| vouchers.load_voucher(id), ttl)
                    .await?;
                Ok(voucher.map(CachedEntity::Voucher))
            }
        }
    }

    /// 热点店铺：逻辑过期读，永不因重建阻塞；未预热返回 None
    pub async fn get_hot_shop(&self, id: i64) -> Result<Option<Shop>> {
        let shops = self.shops.clone();
        self.cache
            .query_with_logical_expire(
                HOT_SHOP_KIND,
                id,
                move |id: i64| {
                    let shops = shops.clone();
                    async move { shops.load_shop(id).await }
                },
                self.cache.logical_window(),
            )
            .await
    }

    pub fn hot_shop_key(&self, id: i64) -> String {
        self.cache.key_for(HOT_SHOP_KIND, id)
    }

    /// 删除实体缓存；店铺会同时删掉热点条目
    pub async fn invalidate(&self, kind: EntityKind, id: i64) -> Result<()> {
        self.cache.invalidate(&self.cache.key_for(kind.as_str(), id)).await?;
        if kind == EntityKind::Shop {
            self.cache.invalidate(&self.hot_shop_key(id)).await?;
        }
        Ok(())
    }

    pub async fn update_shop(&self, shop: &Shop) -> Result<()> {
        if !self.shops.update_shop(shop).await? {
            return Err(SeckillError::EntityNotFound {
                kind: EntityKind::Shop.as_str(),
                id: shop.id,
            });
        }
        let key = self.cache.key_for(EntityKind::Shop.as_str(), shop.id);
        self.cache.invalidate(&key).await?;
        // 已预热的热点条目不能删（逻辑过期读会变成 None），直接写入新值
        let hot_key = self.hot_shop_key(shop.id);
        if self.redis.exists(&hot_key).await? {
            self.cache
                .set_with_logical_expire(&hot_key, shop, self.cache.logical_window())
                .await?;
        }
        info!(shop_id = shop.id, "店铺已更新，缓存已同步");
        Ok(())
    }

    /// 预热逻辑过期缓存；数据源没有该店铺时返回 false
    pub async fn warm_up_shop(&self, id: i64, window: Duration) -> Result<bool> {
        let Some(shop) = self.shops.load_shop(id).await? else {
            return Ok(false);
        };
        self.cache
            .set_with_logical_expire(&self.hot_shop_key(id), &shop, window)
            .await?;
        info!(shop_id = id, window_secs = window.as_secs(), "店铺缓存已预热");
        Ok(true)
    }

    /// 店铺类型列表整体缓存在一个 Redis list 里
    pub async fn shop_types(&self) -> Result<Vec<ShopType>> {
        let key = self.keys.shop_type_list();
        let cached = self.redis.lrange_all(&key).await?;
        if !cached.is_empty() {
            let decoded: std::result::Result<Vec<ShopType>, _> =
                cached.iter().map(|s| serde_json::from_str::<ShopType>(s)).collect();
            match decoded {
                Ok(types) => return Ok(types),
                Err(e) => warn!(key = %key, error = %e, "店铺类型缓存无法解析，重新加载"),
            }
        }

        let types = self.shops.list_shop_types().await?;
        if !types.is_empty() {
            let encoded = types
                .iter()
                .map(serde_json::to_string)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            self.redis
                .replace_list_ex(&key, &encoded, self.shop_type_ttl_seconds)
                .await?;
        }
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_cache_namespaces() {
        assert_eq!(EntityKind::Shop.as_str(), "shop");
        assert_eq!(EntityKind::Voucher.as_str(), "voucher");
        assert_ne!(HOT_SHOP_KIND, EntityKind::Shop.as_str());
    }
}
