//! 同步引擎 - 单个同步目标的一次完整运行
//!
//! 运行记录 -> 暂停任务队列 -> 遍历并落地 STRM -> 本地清理 -> 结束运行 -> 恢复队列 -> 目录对账

use super::bulk::BulkDispatcher;
use super::error::SyncError;
use super::filter::NodeFilter;
use super::janitor::{Janitor, JanitorOptions};
use super::materializer::{MaterializeOptions, Materializer};
use super::paths::PathMapper;
use super::reconcile::{ReconcileReport, Reconciler};
use super::scanner::{TraversalContext, TreeWalker};
use super::snapshot::SnapshotCache;
use super::stats::RunStats;
use super::task_queue::TaskQueue;
use crate::config::SyncTargetConfig;
use crate::db::{Catalogue, RunStatus, SyncRun};
use crate::driver::{Driver, DriverRegistry, PointerOptions, TraversalStrategy};
use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 目录对账的执行方式
pub enum Reconciliation {
    /// 运行失败，不提交本轮发现
    Skipped,
    /// 临时目标在运行内同步完成
    Done(ReconcileReport),
    /// 常规目标在后台执行
    Background(JoinHandle<ReconcileReport>),
}

pub struct RunOutcome {
    pub run: SyncRun,
    pub reconciliation: Reconciliation,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.run.status == RunStatus::Complete
    }

    /// 等待后台对账结束
    pub async fn wait(self) -> (SyncRun, Option<ReconcileReport>) {
        let report = match self.reconciliation {
            Reconciliation::Skipped => None,
            Reconciliation::Done(report) => Some(report),
            Reconciliation::Background(handle) => match handle.await {
                Ok(report) => Some(report),
                Err(e) => {
                    error!("后台对账任务异常: {}", e);
                    None
                }
            },
        };
        (self.run, report)
    }
}

pub struct SyncEngine {
    db: Arc<SqlitePool>,
    registry: Arc<DriverRegistry>,
    queue: Arc<dyn TaskQueue>,
    strm_base_url: String,
    max_workers: usize,
    /// 每个同步目标一把锁，从遍历开始持有到目录对账结束
    target_locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<SqlitePool>,
        registry: Arc<DriverRegistry>,
        queue: Arc<dyn TaskQueue>,
        strm_base_url: impl Into<String>,
        max_workers: usize,
    ) -> Self {
        Self {
            db,
            registry,
            queue,
            strm_base_url: strm_base_url.into(),
            max_workers: max_workers.max(1),
            target_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// 获取目标锁；上一次运行的后台对账未结束时在此等待
    async fn lock_target(&self, target_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.target_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(target_id).or_default().clone()
        };
        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }
        info!("等待 target={} 的上一次运行结束", target_id);
        lock.lock_owned().await
    }

    /// 执行一次同步
    ///
    /// 只有运行记录本身无法创建时返回错误；遍历失败体现在运行状态中。
    /// 同一目标的运行串行执行，后台对账也计入上一次运行。
    pub async fn run_target(&self, target: &SyncTargetConfig, cancel: CancellationToken) -> Result<RunOutcome> {
        let driver = self
            .registry
            .get(target.account_id)
            .ok_or_else(|| anyhow!("同步目标 {} 引用的账号 {} 不存在", target.id, target.account_id))?;
        let guard = self.lock_target(target.id).await;

        let mut run = SyncRun::create(&self.db, target.id).await?;
        run.start();
        run.save(&self.db).await?;
        info!(
            "开始同步 target={} run={}: {} -> {:?} ({})",
            target.id,
            run.id,
            target.source_path,
            target.target_path,
            driver.name()
        );

        self.queue.pause();
        let stats = Arc::new(RunStats::default());
        let catalogue = Catalogue::new(self.db.clone(), target.account_id, target.id, driver.backend());
        let result = self.execute(target, driver, &catalogue, &stats, &cancel).await;

        stats.apply_to(&mut run);
        let cache = match result {
            Ok(cache) => {
                run.complete();
                info!(
                    "同步完成 target={}: STRM {}, 元数据 {}, 上传 {}, 共 {} 个文件",
                    target.id, run.new_strm, run.new_meta, run.new_upload, run.total
                );
                Some(cache)
            }
            Err(e) => {
                if e.downcast_ref::<SyncError>().is_some_and(SyncError::is_cancelled) {
                    warn!("同步已取消 target={}", target.id);
                } else {
                    error!("同步失败 target={}: {}", target.id, e);
                }
                run.fail(e.to_string());
                None
            }
        };
        if let Err(e) = run.save(&self.db).await {
            warn!("保存运行记录失败 run={}: {}", run.id, e);
        }
        self.queue.resume();

        let reconciliation = match cache {
            None => Reconciliation::Skipped,
            Some(cache) => {
                let reconciler = Reconciler::new(catalogue, cache);
                if target.temporary {
                    Reconciliation::Done(reconciler.run().await)
                } else {
                    Reconciliation::Background(tokio::spawn(async move {
                        let report = reconciler.run().await;
                        drop(guard);
                        report
                    }))
                }
            }
        };

        Ok(RunOutcome { run, reconciliation })
    }

    async fn execute(
        &self,
        target: &SyncTargetConfig,
        driver: Arc<dyn Driver>,
        catalogue: &Catalogue,
        stats: &Arc<RunStats>,
        cancel: &CancellationToken,
    ) -> Result<Arc<SnapshotCache>> {
        // 全量同步不走重命名
        let prior = if target.full_sync {
            HashMap::new()
        } else {
            catalogue.prior_index().await?
        };

        let cache = Arc::new(SnapshotCache::new(PathMapper::new(
            &target.source_path,
            target.target_path.clone(),
        )));
        let filter = Arc::new(NodeFilter::from_target(target));
        let options = MaterializeOptions {
            pointer: PointerOptions {
                base_url: self.strm_base_url.clone(),
                embed_path: target.strm_url_need_path,
            },
            full_sync: target.full_sync,
            download_meta: target.download_meta_enabled(),
        };
        let materializer = Arc::new(Materializer::new(
            driver.clone(),
            cache.clone(),
            stats.clone(),
            options,
            prior,
        ));

        let ctx = Arc::new(TraversalContext {
            driver: driver.clone(),
            cache: cache.clone(),
            filter: filter.clone(),
            materializer,
            stats: stats.clone(),
            max_workers: self.max_workers,
        });
        match driver.strategy() {
            TraversalStrategy::Recursive => TreeWalker::new(ctx).walk(&target.source_path, cancel).await?,
            TraversalStrategy::Bulk => BulkDispatcher::new(ctx).dispatch(&target.source_path, cancel).await?,
        }

        let janitor = Janitor::new(
            driver,
            cache.clone(),
            filter,
            stats.clone(),
            self.queue.clone(),
            JanitorOptions {
                account_id: target.account_id,
                not_found_action: target.net_not_found_file_action,
                prune_empty_dirs: target.del_empty_local_dir,
            },
        );
        janitor.sweep(cancel).await;
        janitor.flush_pending_downloads().await;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task_queue::SqliteTaskQueue;
    use crate::db::connect_memory;

    #[tokio::test]
    async fn test_unknown_account_is_rejected() {
        let pool = Arc::new(connect_memory().await.unwrap());
        let engine = SyncEngine::new(
            pool.clone(),
            Arc::new(DriverRegistry::new()),
            Arc::new(SqliteTaskQueue::new(pool.clone())),
            "http://127.0.0.1:12333",
            4,
        );
        let target = SyncTargetConfig::new(1, 42, "/Movies", "/media");
        assert!(engine.run_target(&target, CancellationToken::new()).await.is_err());
        assert!(SyncRun::load_history(&pool, 1, 10).await.unwrap().is_empty());
    }
}
