//! 逻辑过期重建用的固定大小任务池
//! 队列满时 submit 返回 false，由调用方释放已拿到的重建锁

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type RebuildJob = BoxFuture<'static, ()>;

pub struct RebuildPool {
    tx: mpsc::Sender<RebuildJob>,
    workers: Vec<JoinHandle<()>>,
}

impl RebuildPool {
    /// 必须在 tokio runtime 内调用
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RebuildJob>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|idx| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(worker = idx, "缓存重建 worker 退出");
                })
            })
            .collect();
        Self { tx, workers }
    }

    pub fn submit(&self, job: RebuildJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("缓存重建队列已满，本次重建被丢弃");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("缓存重建队列已关闭");
                false
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for RebuildPool {
    fn drop(&mut self) {
        for w in &self.workers {
            w.abort();
        }
    }
}
