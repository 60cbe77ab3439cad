//! 通用递归遍历 - 逐层列目录，子目录作为新任务提交

use super::error::SyncError;
use super::filter::{Classification, NodeFilter};
use super::materializer::Materializer;
use super::node::{normalize_remote, RemoteNode};
use super::snapshot::SnapshotCache;
use super::stats::RunStats;
use crate::driver::Driver;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 任务组在并发上限之外额外保留的名额，保证父子两层任务可以同时存活
pub const WORKER_HEADROOM: usize = 2;

/// 遍历任务共享的上下文
pub struct TraversalContext {
    pub driver: Arc<dyn Driver>,
    pub cache: Arc<SnapshotCache>,
    pub filter: Arc<NodeFilter>,
    pub materializer: Arc<Materializer>,
    pub stats: Arc<RunStats>,
    pub max_workers: usize,
}

impl TraversalContext {
    /// 按扩展名和大小分类，被拒绝的文件返回 None
    pub fn accept_file(&self, mut node: RemoteNode) -> Option<RemoteNode> {
        match self.filter.classify(&node.file_name, node.file_size) {
            Classification::Video => node.is_video = true,
            Classification::Meta => {
                node.is_meta = true;
                node.need_download = true;
            }
            Classification::Rejected => return None,
        }
        RunStats::inc(&self.stats.total);
        Some(node)
    }

    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }
}

/// 取消时立即返回
pub(crate) async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

/// 递归遍历器
pub struct TreeWalker {
    ctx: Arc<TraversalContext>,
}

impl TreeWalker {
    pub fn new(ctx: Arc<TraversalContext>) -> Self {
        Self { ctx }
    }

    /// 遍历源目录；任一目录列举失败会取消整组任务
    ///
    /// 任务组最多同时存活 `workers + WORKER_HEADROOM` 个任务，其余目录在本地队列中等待。
    pub async fn walk(&self, root_path: &str, cancel: &CancellationToken) -> Result<(), SyncError> {
        let root_path = normalize_remote(root_path);
        let root_id = until_cancelled(cancel, self.ctx.driver.resolve_path_id(&root_path)).await??;
        let limit = self.ctx.workers() + WORKER_HEADROOM;
        info!("开始遍历: {} ({}), 并发 {}", root_path, self.ctx.driver.name(), limit);

        let group = cancel.child_token();
        let mut join_set = JoinSet::new();
        let mut pending = VecDeque::from([(root_path, root_id)]);
        let mut dirs = 1usize;

        loop {
            while join_set.len() < limit {
                let Some((path, id)) = pending.pop_front() else {
                    break;
                };
                self.spawn_dir(&mut join_set, &group, path, id);
            }

            let Some(result) = join_set.join_next().await else {
                break;
            };
            let subdirs = match result {
                Ok(Ok(subdirs)) => subdirs,
                Ok(Err(e)) => {
                    group.cancel();
                    join_set.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    group.cancel();
                    join_set.abort_all();
                    return Err(e.into());
                }
            };

            dirs += subdirs.len();
            pending.extend(subdirs);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        info!("遍历完成: {} 个目录, 缓存 {} 个节点", dirs, self.ctx.cache.count());
        Ok(())
    }

    fn spawn_dir(
        &self,
        join_set: &mut JoinSet<Result<Vec<(String, String)>, SyncError>>,
        group: &CancellationToken,
        path: String,
        id: String,
    ) {
        let ctx = Arc::clone(&self.ctx);
        let group = group.clone();
        join_set.spawn(async move { until_cancelled(&group, scan_dir(&ctx, &path, &id)).await? });
    }
}

/// 处理一个目录，返回需要继续遍历的子目录 (路径, ID)
async fn scan_dir(
    ctx: &TraversalContext,
    path: &str,
    id: &str,
) -> Result<Vec<(String, String)>, SyncError> {
    let children = ctx.driver.list_children(path, id).await?;
    debug!("列出目录 {}: {} 项", path, children.len());

    let mut subdirs = Vec::new();
    for mut child in children {
        if ctx.filter.is_excluded(&child.file_name) {
            debug!("排除: {}/{}", path, child.file_name);
            continue;
        }
        child.remote_path = path.to_string();

        if child.is_dir() {
            child.processed = true;
            let stored = ctx.cache.insert(child)?;
            subdirs.push((stored.full_remote_path(), stored.file_id));
        } else if let Some(file) = ctx.accept_file(child) {
            let stored = ctx.cache.insert(file)?;
            ctx.materializer.materialize(&stored).await;
        }
    }
    Ok(subdirs)
}
