//! 本地清理 - 删除远端已不存在的 STRM，按策略处理多余的元数据文件

use super::filter::NodeFilter;
use super::node::{file_extension, RemoteNode};
use super::pointer::POINTER_EXT;
use super::snapshot::SnapshotCache;
use super::stats::RunStats;
use super::task_queue::TaskQueue;
use crate::config::NotFoundAction;
use crate::driver::Driver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 其他同步工具的标记目录，不进入
const SKIP_DIRS: &[&str] = &[
    ".stfolder",
    ".stversions",
    "@eaDir",
    ".sync",
    "#recycle",
    "@Recycle",
    ".Trash",
    ".Trash-1000",
    "$RECYCLE.BIN",
    ".deletedByTMM",
];

/// 允许自动创建远端目录的元数据目录名
const META_DIRS: &[&str] = &[
    "extrafanart",
    "extrathumbs",
    "metadata",
    "subs",
    "subtitles",
    ".actors",
    "theme-music",
    "behind the scenes",
];

#[derive(Debug, Clone)]
pub struct JanitorOptions {
    pub account_id: i64,
    pub not_found_action: NotFoundAction,
    pub prune_empty_dirs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub removed_pointers: u64,
    pub removed_meta: u64,
    pub queued_uploads: u64,
    pub pruned_dirs: u64,
}

pub struct Janitor {
    driver: Arc<dyn Driver>,
    cache: Arc<SnapshotCache>,
    filter: Arc<NodeFilter>,
    stats: Arc<RunStats>,
    queue: Arc<dyn TaskQueue>,
    options: JanitorOptions,
}

impl Janitor {
    pub fn new(
        driver: Arc<dyn Driver>,
        cache: Arc<SnapshotCache>,
        filter: Arc<NodeFilter>,
        stats: Arc<RunStats>,
        queue: Arc<dyn TaskQueue>,
        options: JanitorOptions,
    ) -> Self {
        Self {
            driver,
            cache,
            filter,
            stats,
            queue,
            options,
        }
    }

    /// 扫描本地镜像目录；单个文件出错只记录日志
    pub async fn sweep(&self, cancel: &CancellationToken) -> JanitorReport {
        let mut report = JanitorReport::default();
        let root = self.cache.paths().mirror_root().to_path_buf();
        if !fs::try_exists(&root).await.unwrap_or(false) {
            return report;
        }

        let files = match collect_tracked_files(root.clone(), self.filter.clone()).await {
            Ok(files) => files,
            Err(e) => {
                warn!("扫描本地目录失败 {:?}: {}", root, e);
                return report;
            }
        };
        debug!("本地扫描: {} 个文件", files.len());

        for path in files {
            if cancel.is_cancelled() {
                info!("本地清理已取消");
                break;
            }
            if self.cache.get_by_local_path(&path).is_some() {
                continue;
            }

            if file_extension(&path.to_string_lossy()) == POINTER_EXT {
                if self.remove_file(&path, &mut report).await {
                    report.removed_pointers += 1;
                }
                continue;
            }

            match self.options.not_found_action {
                NotFoundAction::Keep => {}
                NotFoundAction::Delete => {
                    if self.remove_file(&path, &mut report).await {
                        report.removed_meta += 1;
                    }
                }
                NotFoundAction::Upload => match self.queue_upload(&path).await {
                    Ok(true) => report.queued_uploads += 1,
                    Ok(false) => {}
                    Err(e) => warn!("登记上传失败 {:?}: {}", path, e),
                },
            }
        }

        if report != JanitorReport::default() {
            info!(
                "本地清理: 删除 STRM {}, 删除元数据 {}, 上传 {}, 删除空目录 {}",
                report.removed_pointers, report.removed_meta, report.queued_uploads, report.pruned_dirs
            );
        }
        report
    }

    /// 把运行中登记的待下载元数据写入任务队列，返回新登记数量
    pub async fn flush_pending_downloads(&self) -> usize {
        let mut queued = 0;
        for node in self.cache.take_pending_downloads() {
            let token = download_token(&node);
            match self.queue.is_download_queued(token).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("查询下载队列失败 {}: {}", token, e);
                    continue;
                }
            }
            match self.queue.enqueue_download(self.options.account_id, &node).await {
                Ok(()) => {
                    RunStats::inc(&self.stats.new_meta);
                    queued += 1;
                }
                Err(e) => warn!("登记下载失败 {}: {}", node.full_remote_path(), e),
            }
        }
        if queued > 0 {
            info!("登记元数据下载 {} 个", queued);
        }
        queued
    }

    async fn remove_file(&self, path: &Path, report: &mut JanitorReport) -> bool {
        if let Err(e) = fs::remove_file(path).await {
            warn!("删除本地文件失败 {:?}: {}", path, e);
            return false;
        }
        debug!("删除本地文件: {:?}", path);
        if self.options.prune_empty_dirs {
            if let Some(parent) = path.parent() {
                report.pruned_dirs += self.prune(parent).await;
            }
        }
        true
    }

    /// 自下而上删除空目录，目标根目录本身保留
    async fn prune(&self, start: &Path) -> u64 {
        let target_root = self.cache.paths().target_root().to_path_buf();
        let mut removed = 0;
        let mut dir = start.to_path_buf();

        while dir != target_root && dir.starts_with(&target_root) {
            if !is_empty_dir(&dir).await {
                break;
            }
            if let Err(e) = fs::remove_dir(&dir).await {
                warn!("删除空目录失败 {:?}: {}", dir, e);
                break;
            }
            debug!("删除空目录: {:?}", dir);
            removed += 1;
            if let Some(node) = self.cache.get_by_local_path(&dir) {
                self.cache.delete(&node.file_id);
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }
        removed
    }

    /// 返回是否新登记了上传任务
    async fn queue_upload(&self, path: &Path) -> anyhow::Result<bool> {
        let Some(parent) = path.parent() else {
            return Ok(false);
        };
        let Some((remote_dir, remote_id)) = self.resolve_remote_parent(parent).await? else {
            debug!("父目录无法对应远端，跳过上传: {:?}", path);
            return Ok(false);
        };

        if self.queue.is_upload_queued(path).await? {
            return Ok(false);
        }
        self.queue
            .enqueue_upload(self.options.account_id, path, &remote_dir, &remote_id)
            .await?;
        RunStats::inc(&self.stats.new_upload);
        debug!("登记上传: {:?} -> {}", path, remote_dir);
        Ok(true)
    }

    async fn resolve_remote_parent(&self, parent: &Path) -> anyhow::Result<Option<(String, String)>> {
        let paths = self.cache.paths();
        if parent == paths.mirror_root() {
            let root = paths.source_root().to_string();
            let id = self.driver.resolve_path_id(&root).await?;
            return Ok(Some((root, id)));
        }
        if let Some(dir) = self.cache.get_by_local_path(parent).filter(RemoteNode::is_dir) {
            return Ok(Some((dir.full_remote_path(), dir.file_id)));
        }

        let allowed = parent
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .is_some_and(|n| META_DIRS.contains(&n.as_str()));
        if !allowed {
            return Ok(None);
        }
        let Some(remote_dir) = paths.remote_dir_for_local(parent) else {
            return Ok(None);
        };
        let (id, canonical) = self.driver.create_remote_dir_chain(&remote_dir).await?;
        Ok(Some((canonical, id)))
    }
}

fn download_token(node: &RemoteNode) -> &str {
    if node.pick_code.is_empty() {
        &node.file_id
    } else {
        &node.pick_code
    }
}

async fn is_empty_dir(dir: &Path) -> bool {
    match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// 收集 STRM 和元数据扩展名的文件
async fn collect_tracked_files(root: PathBuf, filter: Arc<NodeFilter>) -> anyhow::Result<Vec<PathBuf>> {
    let files = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir() && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let ext = file_extension(&e.file_name().to_string_lossy());
                ext == POINTER_EXT || filter.is_meta_ext(&ext)
            })
            .map(|e| e.into_path())
            .collect::<Vec<_>>()
    })
    .await?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paths::PathMapper;
    use crate::core::task_queue::SqliteTaskQueue;
    use crate::db::connect_memory;
    use crate::driver::LocalDriver;

    struct Fixture {
        _source: tempfile::TempDir,
        target: tempfile::TempDir,
        cache: Arc<SnapshotCache>,
        stats: Arc<RunStats>,
        queue: Arc<SqliteTaskQueue>,
        driver: Arc<dyn Driver>,
    }

    async fn fixture() -> Fixture {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("Movies")).unwrap();
        let target = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new(source.path()).unwrap());
        Fixture {
            cache: Arc::new(SnapshotCache::new(PathMapper::new("/Movies", target.path()))),
            stats: Arc::new(RunStats::default()),
            queue: Arc::new(SqliteTaskQueue::new(Arc::new(connect_memory().await.unwrap()))),
            driver,
            _source: source,
            target,
        }
    }

    fn janitor(f: &Fixture, action: NotFoundAction, prune: bool) -> Janitor {
        Janitor::new(
            f.driver.clone(),
            f.cache.clone(),
            Arc::new(NodeFilter::new(&[], &["mkv".to_string()], &["nfo".to_string()], 0)),
            f.stats.clone(),
            f.queue.clone(),
            JanitorOptions {
                account_id: 1,
                not_found_action: action,
                prune_empty_dirs: prune,
            },
        )
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    #[tokio::test]
    async fn test_orphan_pointer_removed_and_dirs_pruned() {
        let f = fixture().await;
        let orphan = f.target.path().join("Movies/2024/A.mkv.strm");
        touch(&orphan);

        let report = janitor(&f, NotFoundAction::Keep, true)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.removed_pointers, 1);
        assert_eq!(report.pruned_dirs, 2);
        assert!(!f.target.path().join("Movies").exists());
        assert!(f.target.path().exists());
    }

    #[tokio::test]
    async fn test_tracked_pointer_is_kept() {
        let f = fixture().await;
        let root = f.cache.paths().source_root().to_string();
        let mut node = RemoteNode::file("1", "10", "A.mkv");
        node.remote_path = root;
        node.is_video = true;
        let node = f.cache.insert(node).unwrap();
        touch(node.local_path.as_deref().unwrap());
        touch(&f.target.path().join("Movies/other.txt"));

        let report = janitor(&f, NotFoundAction::Delete, true)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report, JanitorReport::default());
        assert!(node.local_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_meta_policies() {
        let f = fixture().await;
        let nfo = f.target.path().join("Movies/A.nfo");
        touch(&nfo);

        let report = janitor(&f, NotFoundAction::Keep, false)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.removed_meta, 0);
        assert!(nfo.exists());

        let report = janitor(&f, NotFoundAction::Upload, false)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.queued_uploads, 1);
        assert!(f.queue.is_upload_queued(&nfo).await.unwrap());

        // 已在队列中不重复登记
        let report = janitor(&f, NotFoundAction::Upload, false)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.queued_uploads, 0);
        assert_eq!(f.stats.new_upload.load(std::sync::atomic::Ordering::Relaxed), 1);

        let report = janitor(&f, NotFoundAction::Delete, false)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.removed_meta, 1);
        assert!(!nfo.exists());
    }

    #[tokio::test]
    async fn test_upload_requires_known_or_meta_parent() {
        let f = fixture().await;
        let unknown = f.target.path().join("Movies/Random/A.nfo");
        let extras = f.target.path().join("Movies/extrafanart/fanart.nfo");
        touch(&unknown);
        touch(&extras);

        let report = janitor(&f, NotFoundAction::Upload, false)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.queued_uploads, 1);
        assert!(f.queue.is_upload_queued(&extras).await.unwrap());
        assert!(!f.queue.is_upload_queued(&unknown).await.unwrap());
        assert!(f._source.path().join("Movies/extrafanart").is_dir());
    }

    #[tokio::test]
    async fn test_marker_dirs_are_skipped() {
        let f = fixture().await;
        let hidden = f.target.path().join("Movies/.stfolder/A.mkv.strm");
        touch(&hidden);
        let report = janitor(&f, NotFoundAction::Keep, true)
            .sweep(&CancellationToken::new())
            .await;
        assert_eq!(report.removed_pointers, 0);
        assert!(hidden.exists());
    }

    #[tokio::test]
    async fn test_flush_pending_downloads_once() {
        let f = fixture().await;
        let mut meta = RemoteNode::file("7", "10", "A.nfo");
        meta.pick_code = "pc7".to_string();
        f.cache.add_pending_download(meta.clone());

        let j = janitor(&f, NotFoundAction::Keep, false);
        assert_eq!(j.flush_pending_downloads().await, 1);
        f.cache.add_pending_download(meta);
        assert_eq!(j.flush_pending_downloads().await, 0);
        assert_eq!(f.stats.new_meta.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
