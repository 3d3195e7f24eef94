mod common;

use common::{shop, test_app, test_app_with, test_config};
use seckill_gate::catalog::{CachedEntity, EntityKind};
use seckill_gate::models::Shop;
use seckill_gate::{MemoryRepository, SeckillError, ShopRepository};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// set 之后 pass-through 读到同一个值，不调用 loader
#[tokio::test]
async fn test_pass_through_hit_skips_loader() {
    let Some(app) = test_app(Arc::new(MemoryRepository::new())).await else {
        return;
    };
    let key = app.cache.key_for("shop", 5);
    let value = shop(5, "缓存里的店");
    app.cache.set(&key, &value, Duration::from_secs(60)).await.unwrap();

    let calls = AtomicUsize::new(0);
    let got: Option<Shop> = app
        .cache
        .query_with_pass_through(
            "shop",
            5i64,
            |_id| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<Shop>, SeckillError>(None) }
            },
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert_eq!(got, Some(value));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// 不存在的 id：第一次回源并写空值，之后命中空值不再回源
#[tokio::test]
async fn test_pass_through_caches_absence() {
    let Some(app) = test_app(Arc::new(MemoryRepository::new())).await else {
        return;
    };
    let calls = AtomicUsize::new(0);
    for _ in 0..3 {
        let got: Option<Shop> = app
            .cache
            .query_with_pass_through(
                "shop",
                404i64,
                |_id| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<Option<Shop>, SeckillError>(None) }
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(got, None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let raw = app.redis.get_string(&app.cache.key_for("shop", 404)).await.unwrap();
    assert_eq!(raw.as_deref(), Some(""));
}

/// 缓存里是坏数据：按未命中处理，回源后覆盖
#[tokio::test]
async fn test_malformed_entry_is_rebuilt() {
    let repo = Arc::new(MemoryRepository::new());
    repo.insert_shop(shop(6, "正常的店"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    let key = app.cache.key_for("shop", 6);
    app.redis.set_string(&key, "{not json").await.unwrap();

    let got = app.catalog.get_cached_entity(EntityKind::Shop, 6).await.unwrap();
    assert_eq!(got, Some(CachedEntity::Shop(shop(6, "正常的店"))));
    assert_eq!(repo.shop_load_count(), 1);

    let raw = app.redis.get_string(&key).await.unwrap().unwrap();
    assert!(serde_json::from_str::<Shop>(&raw).is_ok());
}

/// 50 个并发读同一个冷 key：全部拿到结果、不死锁，只回源一次
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_rebuild_single_flight() {
    let repo = Arc::new(MemoryRepository::with_shop_load_delay(Duration::from_millis(100)));
    repo.insert_shop(shop(7, "热点店"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };

    let mut handles = Vec::new();
    for _ in 0..50 {
        let catalog = app.catalog.clone();
        handles.push(tokio::spawn(async move {
            catalog.get_cached_entity(EntityKind::Shop, 7).await
        }));
    }
    for h in handles {
        let got = tokio::time::timeout(Duration::from_secs(10), h)
            .await
            .expect("mutex rebuild must not deadlock")
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(CachedEntity::Shop(shop(7, "热点店"))));
    }
    assert_eq!(repo.shop_load_count(), 1);
}

/// 锁一直被占着：等到 deadline 返回 LockTimeout
#[tokio::test]
async fn test_mutex_wait_is_bounded() {
    let mut cfg = test_config();
    cfg.cache.mutex_deadline_ms = 300;
    let repo = Arc::new(MemoryRepository::new());
    repo.insert_shop(shop(8, "被锁住的店"));
    let Some(app) = test_app_with(cfg, repo.clone()).await else {
        return;
    };
    let _held = app
        .lock
        .try_lock("shop:8", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let err = app.catalog.get_cached_entity(EntityKind::Shop, 8).await.unwrap_err();
    assert!(matches!(err, SeckillError::LockTimeout { ref resource } if resource == "shop:8"));
    assert_eq!(repo.shop_load_count(), 0);
}

/// 逻辑过期：未预热直接返回 None，不回源
#[tokio::test]
async fn test_logical_cold_miss_returns_none() {
    let repo = Arc::new(MemoryRepository::new());
    repo.insert_shop(shop(9, "没预热的店"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    assert_eq!(app.catalog.get_hot_shop(9).await.unwrap(), None);
    assert_eq!(repo.shop_load_count(), 0);
}

/// 过期数据 + 100 个并发读：全部立即拿到旧值，只触发一次后台重建
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logical_stale_read_triggers_one_rebuild() {
    let repo = Arc::new(MemoryRepository::with_shop_load_delay(Duration::from_millis(1000)));
    repo.insert_shop(shop(11, "旧名字"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };

    let key = app.catalog.hot_shop_key(11);
    app.cache
        .set_with_logical_expire(&key, &shop(11, "旧名字"), Duration::ZERO)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    repo.update_shop(&shop(11, "新名字")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..100 {
        let catalog = app.catalog.clone();
        handles.push(tokio::spawn(async move { catalog.get_hot_shop(11).await }));
    }
    for h in handles {
        let got = h.await.unwrap().unwrap().expect("stale value must be served");
        assert_eq!(got.name, "旧名字");
    }

    let mut refreshed = None;
    for _ in 0..100 {
        let got = app.catalog.get_hot_shop(11).await.unwrap();
        if got.as_ref().map(|s| s.name.as_str()) == Some("新名字") {
            refreshed = got;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refreshed.is_some(), "background rebuild should refresh the entry");
    assert_eq!(repo.shop_load_count(), 1);
    assert!(app.lock.current_owner("shop_hot:11").await.unwrap().is_none());
}

/// 互斥读和逻辑过期读编码不同，互不覆盖：预热后走一次互斥读，热点读仍然命中
#[tokio::test]
async fn test_mutex_read_does_not_clobber_hot_entry() {
    let repo = Arc::new(MemoryRepository::new());
    repo.insert_shop(shop(13, "两种读法"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    assert!(app.catalog.warm_up_shop(13, Duration::from_secs(60)).await.unwrap());
    assert_ne!(app.catalog.hot_shop_key(13), app.cache.key_for("shop", 13));

    let cached = app.catalog.get_cached_entity(EntityKind::Shop, 13).await.unwrap();
    assert_eq!(cached, Some(CachedEntity::Shop(shop(13, "两种读法"))));

    for _ in 0..3 {
        let hot = app.catalog.get_hot_shop(13).await.unwrap();
        assert_eq!(hot, Some(shop(13, "两种读法")));
        let cached = app.catalog.get_cached_entity(EntityKind::Shop, 13).await.unwrap();
        assert!(cached.is_some());
    }
    // 预热 1 次 + 互斥读首次回源 1 次
    assert_eq!(repo.shop_load_count(), 2);
}

/// 更新店铺时已预热的热点条目被新值覆盖而不是删除；invalidate 两个 key 都删
#[tokio::test]
async fn test_update_shop_refreshes_hot_entry() {
    let repo = Arc::new(MemoryRepository::new());
    repo.insert_shop(shop(14, "旧招牌"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    app.catalog.warm_up_shop(14, Duration::from_secs(60)).await.unwrap();
    app.catalog.get_cached_entity(EntityKind::Shop, 14).await.unwrap();

    app.catalog.update_shop(&shop(14, "新招牌")).await.unwrap();
    assert!(!app.redis.exists(&app.cache.key_for("shop", 14)).await.unwrap());
    assert_eq!(app.catalog.get_hot_shop(14).await.unwrap(), Some(shop(14, "新招牌")));

    app.catalog.invalidate(EntityKind::Shop, 14).await.unwrap();
    assert!(!app.redis.exists(&app.catalog.hot_shop_key(14)).await.unwrap());
    assert_eq!(app.catalog.get_hot_shop(14).await.unwrap(), None);
}

/// key 上是别的类型（GET 返回 WRONGTYPE）：三种读法都报错，不当作未命中去回源
#[tokio::test]
async fn test_store_error_is_not_a_miss() {
    let Some(app) = test_app(Arc::new(MemoryRepository::new())).await else {
        return;
    };
    for kind in ["shop", "shop_hot"] {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(app.cache.key_for(kind, 30)).arg("x");
        let _: i64 = app.redis.query(cmd).await.unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));

    let pass: Result<Option<Shop>, SeckillError> = app
        .cache
        .query_with_pass_through(
            "shop",
            30i64,
            |_id| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<Shop>, SeckillError>(Some(shop(30, "不该回源"))) }
            },
            Duration::from_secs(60),
        )
        .await;
    assert!(matches!(pass, Err(SeckillError::StoreCommand(_))), "{pass:?}");

    let mutex: Result<Option<Shop>, SeckillError> = app
        .cache
        .query_with_mutex(
            "shop",
            30i64,
            |_id| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<Shop>, SeckillError>(Some(shop(30, "不该回源"))) }
            },
            Duration::from_secs(60),
        )
        .await;
    assert!(mutex.is_err(), "{mutex:?}");

    let logical_calls = calls.clone();
    let logical: Result<Option<Shop>, SeckillError> = app
        .cache
        .query_with_logical_expire(
            "shop_hot",
            30i64,
            move |_id: i64| {
                logical_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<Shop>, SeckillError>(Some(shop(30, "不该回源"))) }
            },
            Duration::from_secs(60),
        )
        .await;
    assert!(logical.is_err(), "{logical:?}");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // 没有留下重建锁
    assert!(app.lock.current_owner("shop:30").await.unwrap().is_none());
    assert!(app.lock.current_owner("shop_hot:30").await.unwrap().is_none());
}

/// 更新店铺：先写库再删缓存，下一次读拿到新值
#[tokio::test]
async fn test_update_shop_invalidates_cache() {
    let repo = Arc::new(MemoryRepository::new());
    repo.insert_shop(shop(12, "改名前"));
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    let before = app.catalog.get_cached_entity(EntityKind::Shop, 12).await.unwrap();
    assert_eq!(before, Some(CachedEntity::Shop(shop(12, "改名前"))));

    app.catalog.update_shop(&shop(12, "改名后")).await.unwrap();
    assert!(!app.redis.exists(&app.cache.key_for("shop", 12)).await.unwrap());

    let after = app.catalog.get_cached_entity(EntityKind::Shop, 12).await.unwrap();
    assert_eq!(after, Some(CachedEntity::Shop(shop(12, "改名后"))));

    let err = app.catalog.update_shop(&shop(999, "不存在")).await.unwrap_err();
    assert!(matches!(err, SeckillError::EntityNotFound { kind: "shop", id: 999 }));
}

#[tokio::test]
async fn test_voucher_entity_and_invalidate() {
    let repo = Arc::new(MemoryRepository::new());
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    app.seckill
        .add_seckill_voucher(&common::voucher(70), &common::open_sale(70, 1))
        .await
        .unwrap();

    let first = app.catalog.get_cached_entity(EntityKind::Voucher, 70).await.unwrap();
    assert!(matches!(first, Some(CachedEntity::Voucher(ref v)) if v.id == 70));
    app.catalog.get_cached_entity(EntityKind::Voucher, 70).await.unwrap();
    assert_eq!(repo.voucher_load_count(), 1);

    app.catalog.invalidate(EntityKind::Voucher, 70).await.unwrap();
    app.catalog.get_cached_entity(EntityKind::Voucher, 70).await.unwrap();
    assert_eq!(repo.voucher_load_count(), 2);
}

#[tokio::test]
async fn test_shop_types_cached_as_list() {
    let repo = Arc::new(MemoryRepository::new());
    for (id, name, sort) in [(2, "KTV", 2), (1, "美食", 1)] {
        repo.insert_shop_type(seckill_gate::models::ShopType {
            id,
            name: name.to_string(),
            icon: None,
            sort,
        });
    }
    let Some(app) = test_app(repo.clone()).await else {
        return;
    };
    let types = app.catalog.shop_types().await.unwrap();
    assert_eq!(types.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);

    let cached = app.redis.lrange_all(&app.keys.shop_type_list()).await.unwrap();
    assert_eq!(cached.len(), 2);

    let mut cmd = redis::cmd("TTL");
    cmd.arg(app.keys.shop_type_list());
    let ttl: i64 = app.redis.query(cmd).await.unwrap();
    assert!(ttl > 0);

    let again = app.catalog.shop_types().await.unwrap();
    assert_eq!(again, types);
}
