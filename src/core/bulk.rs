//! 批量遍历 - 适用于按 ID 寻址、单目录文件量大的网盘
//!
//! 1. 预加载：探测第一个文件估算深度，广度展开到该深度并缓存目录路径
//! 2. 批量列文件：按总数分页并发拉取全部后代文件
//! 3. 路径补全：对仍未解析的父目录拉取祖先链，逐级过滤后回填路径

use super::error::SyncError;
use super::node::{join_remote, normalize_remote, RemoteNode};
use super::scanner::{until_cancelled, TraversalContext};
use crate::driver::PathSegment;
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 每页文件数
pub const BULK_PAGE_SIZE: u64 = 1000;
/// 网盘对受限目录名的打码标记
pub const REDACTION_MARKER: &str = "***";

/// 预加载结果
#[derive(Debug, Default)]
struct Preload {
    root_id: String,
    /// 目录 ID -> 完整远端路径
    paths: HashMap<String, String>,
    /// 命中排除规则的目录 ID
    excluded: HashSet<String>,
}

/// 源目录在链中的位置之后还有几层
fn depth_below(chain: &[PathSegment], root_id: &str) -> usize {
    chain
        .iter()
        .position(|s| s.file_id == root_id)
        .map_or(0, |pos| chain.len() - pos - 1)
}

pub struct BulkDispatcher {
    ctx: Arc<TraversalContext>,
}

impl BulkDispatcher {
    pub fn new(ctx: Arc<TraversalContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, source_root: &str, cancel: &CancellationToken) -> Result<(), SyncError> {
        let source_root = normalize_remote(source_root);
        let root_id = until_cancelled(cancel, self.ctx.driver.resolve_path_id(&source_root)).await??;
        info!("开始批量遍历: {} ({})", source_root, root_id);

        let preload = self.preload(&root_id, &source_root, cancel).await?;
        self.list_files(&preload, cancel).await?;
        self.resolve_paths(&root_id, &source_root, cancel).await?;

        info!("批量遍历完成: 缓存 {} 个节点", self.ctx.cache.count());
        Ok(())
    }

    async fn preload(
        &self,
        root_id: &str,
        source_root: &str,
        cancel: &CancellationToken,
    ) -> Result<Preload, SyncError> {
        let driver = &self.ctx.driver;
        let probe = until_cancelled(cancel, driver.list_descendant_files(root_id, 0, 1)).await??;
        let depth = match probe.first() {
            None => 0,
            Some(file) if file.parent_id == root_id => 0,
            Some(file) => {
                let detail = until_cancelled(cancel, driver.detail_with_ancestors(&file.parent_id)).await??;
                depth_below(&detail.chain(), root_id)
            }
        };
        debug!("探测深度: {}", depth);

        let mut preload = Preload {
            root_id: root_id.to_string(),
            ..Default::default()
        };
        preload.paths.insert(root_id.to_string(), source_root.to_string());

        let mut frontier = vec![(root_id.to_string(), source_root.to_string())];
        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let listing = stream::iter(frontier.drain(..))
                .map(|(id, path)| async move {
                    driver
                        .list_descendant_dirs(&id)
                        .await
                        .map(|dirs| (id, path, dirs))
                })
                .buffer_unordered(self.ctx.workers())
                .try_collect::<Vec<_>>();
            let levels = until_cancelled(cancel, listing).await??;

            let mut next = Vec::new();
            for (parent_id, parent_path, dirs) in levels {
                for mut dir in dirs {
                    if self.ctx.filter.is_excluded(&dir.file_name) {
                        debug!("排除目录: {}/{}", parent_path, dir.file_name);
                        preload.excluded.insert(dir.file_id);
                        continue;
                    }
                    dir.parent_id = parent_id.clone();
                    dir.remote_path = parent_path.clone();
                    dir.processed = true;
                    let full = dir.full_remote_path();
                    preload.paths.insert(dir.file_id.clone(), full.clone());
                    next.push((dir.file_id.clone(), full));
                    self.ctx.cache.insert(dir)?;
                }
            }
            frontier = next;
        }

        info!(
            "预加载完成: {} 个目录, 排除 {} 个",
            preload.paths.len() - 1,
            preload.excluded.len()
        );
        Ok(preload)
    }

    async fn list_files(&self, preload: &Preload, cancel: &CancellationToken) -> Result<(), SyncError> {
        let total = until_cancelled(cancel, self.ctx.driver.count_all(&preload.root_id)).await??;
        let pages = total.div_ceil(BULK_PAGE_SIZE);
        if pages == 0 {
            return Ok(());
        }
        let parallel = (pages as usize).min(self.ctx.workers());
        info!("批量列文件: {} 个文件, {} 页, 并发 {}", total, pages, parallel);

        let fetch = stream::iter(0..pages)
            .map(|page| self.process_page(preload, page))
            .buffer_unordered(parallel)
            .try_collect::<Vec<usize>>();
        let accepted: usize = until_cancelled(cancel, fetch).await??.into_iter().sum();
        debug!("批量列文件完成: 接受 {} 个", accepted);
        Ok(())
    }

    async fn process_page(&self, preload: &Preload, page: u64) -> Result<usize, SyncError> {
        let files = self
            .ctx
            .driver
            .list_descendant_files(&preload.root_id, page * BULK_PAGE_SIZE, BULK_PAGE_SIZE)
            .await?;

        let mut accepted = 0;
        for file in files {
            if preload.excluded.contains(&file.parent_id) || self.ctx.filter.is_excluded(&file.file_name) {
                continue;
            }
            let Some(mut file) = self.ctx.accept_file(file) else {
                continue;
            };
            accepted += 1;

            match preload.paths.get(&file.parent_id) {
                Some(path) => {
                    file.remote_path = path.clone();
                    let stored = self.ctx.cache.insert(file)?;
                    self.ctx.materializer.materialize(&stored).await;
                }
                None => {
                    file.remote_path.clear();
                    self.ctx.cache.insert(file)?;
                }
            }
        }
        Ok(accepted)
    }

    async fn resolve_paths(
        &self,
        root_id: &str,
        source_root: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let parents = self.ctx.cache.unresolved_parents();
        if parents.is_empty() {
            return Ok(());
        }
        info!("补全路径: {} 个父目录", parents.len());

        let resolve = stream::iter(parents)
            .map(|parent_id| self.resolve_parent(root_id, source_root, parent_id))
            .buffer_unordered(self.ctx.workers())
            .try_collect::<Vec<()>>();
        until_cancelled(cancel, resolve).await??;
        Ok(())
    }

    /// 从源目录向下逐级拼出路径，任一级命中排除或打码时丢弃该父目录下的节点
    async fn resolve_parent(&self, root_id: &str, source_root: &str, parent_id: String) -> Result<(), SyncError> {
        let detail = self.ctx.driver.detail_with_ancestors(&parent_id).await?;
        let chain = detail.chain();
        let Some(pos) = chain.iter().position(|s| s.file_id == root_id) else {
            warn!("目录 {} 不在源目录下，丢弃", parent_id);
            self.ctx.cache.delete_subtree(&parent_id);
            return Ok(());
        };

        let mut path = source_root.to_string();
        let mut parent = root_id.to_string();
        for segment in &chain[pos + 1..] {
            if segment.name.contains(REDACTION_MARKER) {
                debug!("跳过打码目录: {}/{}", path, segment.name);
                self.ctx.cache.delete_subtree(&parent_id);
                return Ok(());
            }
            if self.ctx.filter.is_excluded(&segment.name) {
                debug!("排除目录: {}/{}", path, segment.name);
                self.ctx.cache.delete_subtree(&parent_id);
                return Ok(());
            }

            if !self.ctx.cache.contains(&segment.file_id) {
                let mut dir = RemoteNode::dir(segment.file_id.clone(), parent.clone(), segment.name.clone());
                dir.remote_path = path.clone();
                dir.processed = true;
                self.ctx.cache.insert(dir)?;
            }
            path = join_remote(&path, &segment.name);
            parent = segment.file_id.clone();
        }

        for node in self.ctx.cache.update_paths_under_parent(&parent_id, &path) {
            if !node.processed && !node.is_dir() {
                self.ctx.materializer.materialize(&node).await;
            }
        }
        Ok(())
    }
}
