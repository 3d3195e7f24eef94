// 库入口，用于测试和外部使用

pub mod admission;
pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod id_worker;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod order_worker;
pub mod redis_handle;
pub mod repository;
pub mod seckill;
pub mod utils;

pub use admission::{AdmissionGate, AdmissionOutcome};
pub use app::{initialize_app, SeckillApp};
pub use cache::CacheClient;
pub use catalog::{CachedEntity, CatalogService, EntityKind};
pub use config::Config;
pub use error::{Result, SeckillError};
pub use id_worker::RedisIdWorker;
pub use lock::{LockHandle, RedisLock};
pub use order_worker::{EntryOutcome, OrderWorker};
pub use repository::{MemoryRepository, PersistOutcome, SeckillRepository, ShopRepository};
pub use seckill::{PurchaseOutcome, SeckillService};
