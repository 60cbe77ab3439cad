//! STRM / 元数据文件落地

use super::node::RemoteNode;
use super::pointer;
use super::snapshot::SnapshotCache;
use super::stats::RunStats;
use crate::db::PriorEntry;
use crate::driver::{Driver, PointerOptions, PointerPolicy};
use filetime::FileTime;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// 单个文件的处理开关
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub pointer: PointerOptions,
    /// 强制重写全部 STRM，不走重命名
    pub full_sync: bool,
    pub download_meta: bool,
}

pub struct Materializer {
    driver: Arc<dyn Driver>,
    cache: Arc<SnapshotCache>,
    stats: Arc<RunStats>,
    options: MaterializeOptions,
    policy: PointerPolicy,
    /// 上一轮目录，用于本地重命名
    prior: HashMap<String, PriorEntry>,
}

impl Materializer {
    pub fn new(
        driver: Arc<dyn Driver>,
        cache: Arc<SnapshotCache>,
        stats: Arc<RunStats>,
        options: MaterializeOptions,
        prior: HashMap<String, PriorEntry>,
    ) -> Self {
        let policy = driver.pointer_policy();
        Self {
            driver,
            cache,
            stats,
            options,
            policy,
            prior,
        }
    }

    /// 处理一个已入缓存的节点；失败只记录日志，节点保持未处理
    pub async fn materialize(&self, node: &RemoteNode) {
        if node.is_dir() {
            return;
        }

        let result = if node.is_video {
            self.materialize_video(node).await
        } else if node.is_meta {
            self.materialize_meta(node).await
        } else {
            Ok(())
        };

        match result {
            Ok(()) => self.cache.mark_processed(&node.file_id),
            Err(e) => warn!("处理文件失败 {}: {}", node.full_remote_path(), e),
        }
    }

    async fn materialize_video(&self, node: &RemoteNode) -> io::Result<()> {
        let local = node
            .local_path
            .as_deref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "本地路径未解析"))?;

        if !self.options.full_sync {
            self.try_rename(node, local).await;
        }

        let expected = self.driver.format_pointer(node, &self.options.pointer);
        if !self.options.full_sync && self.is_up_to_date(local, &expected).await {
            debug!("STRM 无变化: {:?}", local);
            return Ok(());
        }

        write_pointer(local, &expected, node.mtime).await?;
        RunStats::inc(&self.stats.new_strm);
        debug!("写入 STRM: {:?}", local);
        Ok(())
    }

    async fn materialize_meta(&self, node: &RemoteNode) -> io::Result<()> {
        let local = node
            .local_path
            .as_deref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "本地路径未解析"))?;

        if node.need_download
            && self.options.download_meta
            && !fs::try_exists(local).await.unwrap_or(false)
        {
            debug!("元数据待下载: {}", node.full_remote_path());
            self.cache.add_pending_download(node.clone());
        }
        Ok(())
    }

    async fn is_up_to_date(&self, local: &Path, expected: &str) -> bool {
        if !fs::try_exists(local).await.unwrap_or(false) {
            return false;
        }
        if !self.policy.validate_content {
            return true;
        }
        match fs::read_to_string(local).await {
            Ok(existing) => {
                pointer::is_current(&existing, expected, &self.policy, self.options.pointer.embed_path)
            }
            Err(e) => {
                debug!("读取 STRM 失败 {:?}: {}", local, e);
                false
            }
        }
    }

    /// 同一父目录下改名时直接重命名本地文件，失败后走正常写入流程
    async fn try_rename(&self, node: &RemoteNode, local: &Path) {
        let Some(prior) = self.prior.get(&node.file_id) else {
            return;
        };
        if prior.parent_id != node.parent_id
            || prior.file_name == node.file_name
            || prior.local_path.is_empty()
        {
            return;
        }

        let old = Path::new(&prior.local_path);
        if old == local
            || !fs::try_exists(old).await.unwrap_or(false)
            || fs::try_exists(local).await.unwrap_or(false)
        {
            return;
        }

        if let Some(parent) = local.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                warn!("创建目录失败 {:?}: {}", parent, e);
                return;
            }
        }
        match fs::rename(old, local).await {
            Ok(()) => info!("本地重命名: {:?} -> {:?}", old, local),
            Err(e) => warn!("本地重命名失败 {:?} -> {:?}: {}，改为重新生成", old, local, e),
        }
    }
}

/// 写入 STRM 并把修改时间设为远端时间
pub async fn write_pointer(local: &Path, content: &str, mtime: i64) -> io::Result<()> {
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(local, content).await?;
    filetime::set_file_mtime(local, FileTime::from_unix_time(mtime, 0))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paths::PathMapper;
    use crate::driver::{DriverResult, LocalDriver};
    use crate::driver::{PointerPolicy, TraversalStrategy};
    use crate::db::BackendType;
    use async_trait::async_trait;

    /// 只负责生成 STRM 内容的驱动
    struct FixedDriver;

    #[async_trait]
    impl Driver for FixedDriver {
        fn backend(&self) -> BackendType {
            BackendType::Pan115
        }
        fn strategy(&self) -> TraversalStrategy {
            TraversalStrategy::Recursive
        }
        fn pointer_policy(&self) -> PointerPolicy {
            PointerPolicy {
                validate_content: true,
                signed: false,
                user_id: Some("u1".to_string()),
            }
        }
        async fn list_children(&self, _: &str, _: &str) -> DriverResult<Vec<RemoteNode>> {
            Ok(Vec::new())
        }
        async fn resolve_path_id(&self, path: &str) -> DriverResult<String> {
            Ok(path.to_string())
        }
        fn format_pointer(&self, node: &RemoteNode, options: &PointerOptions) -> String {
            pointer::PointerTokens::new(self.backend(), &node.extension())
                .with_pick_code(node.pick_code.clone())
                .with_user_id(Some("u1"))
                .with_path(options.embed_path.then(|| node.full_remote_path()))
                .to_url(&options.base_url)
        }
        async fn create_remote_dir_chain(&self, path: &str) -> DriverResult<(String, String)> {
            Ok((path.to_string(), path.to_string()))
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: Arc<SnapshotCache>,
        stats: Arc<RunStats>,
        target: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().to_path_buf();
        Fixture {
            cache: Arc::new(SnapshotCache::new(PathMapper::new("/Movies", &target))),
            stats: Arc::new(RunStats::default()),
            target,
            _dir: dir,
        }
    }

    fn options(embed_path: bool, full_sync: bool) -> MaterializeOptions {
        MaterializeOptions {
            pointer: PointerOptions {
                base_url: "http://127.0.0.1:12333".to_string(),
                embed_path,
            },
            full_sync,
            download_meta: true,
        }
    }

    fn materializer(f: &Fixture, driver: Arc<dyn Driver>, opts: MaterializeOptions, prior: HashMap<String, PriorEntry>) -> Materializer {
        Materializer::new(driver, f.cache.clone(), f.stats.clone(), opts, prior)
    }

    fn video(name: &str) -> RemoteNode {
        let mut node = RemoteNode::file("1", "10", name);
        node.remote_path = "/Movies".to_string();
        node.is_video = true;
        node.pick_code = "abc".to_string();
        node.mtime = 1000;
        node
    }

    fn strm_count(f: &Fixture) -> u64 {
        f.stats.new_strm.load(std::sync::atomic::Ordering::Relaxed)
    }

    #[tokio::test]
    async fn test_write_then_idempotent() {
        let f = fixture();
        let m = materializer(&f, Arc::new(FixedDriver), options(false, false), HashMap::new());
        let node = f.cache.insert(video("A.mkv")).unwrap();

        m.materialize(&node).await;
        let local = f.target.join("Movies/A.mkv.strm");
        let content = std::fs::read_to_string(&local).unwrap();
        assert!(content.contains("pickcode=abc"));
        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&local).unwrap());
        assert_eq!(mtime.unix_seconds(), 1000);
        assert_eq!(strm_count(&f), 1);
        assert!(f.cache.get("1").unwrap().processed);

        m.materialize(&node).await;
        assert_eq!(strm_count(&f), 1);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), content);
    }

    #[tokio::test]
    async fn test_config_change_and_full_sync_rewrite() {
        let f = fixture();
        let node = f.cache.insert(video("A.mkv")).unwrap();
        materializer(&f, Arc::new(FixedDriver), options(false, false), HashMap::new())
            .materialize(&node)
            .await;

        materializer(&f, Arc::new(FixedDriver), options(true, false), HashMap::new())
            .materialize(&node)
            .await;
        assert_eq!(strm_count(&f), 2);
        let content = std::fs::read_to_string(f.target.join("Movies/A.mkv.strm")).unwrap();
        assert!(content.contains("path=%2FMovies%2FA.mkv"));

        materializer(&f, Arc::new(FixedDriver), options(true, true), HashMap::new())
            .materialize(&node)
            .await;
        assert_eq!(strm_count(&f), 3);
    }

    #[tokio::test]
    async fn test_rename_in_place() {
        let f = fixture();
        let old = f.target.join("Movies/A.mkv.strm");
        let first = f.cache.insert(video("A.mkv")).unwrap();
        materializer(&f, Arc::new(FixedDriver), options(false, false), HashMap::new())
            .materialize(&first)
            .await;
        f.cache.clear();

        let prior = HashMap::from([(
            "1".to_string(),
            PriorEntry {
                parent_id: "10".to_string(),
                file_name: "A.mkv".to_string(),
                local_path: old.to_string_lossy().into_owned(),
            },
        )]);
        let renamed = f.cache.insert(video("B.mkv")).unwrap();
        materializer(&f, Arc::new(FixedDriver), options(false, false), prior)
            .materialize(&renamed)
            .await;

        assert!(!old.exists());
        assert!(f.target.join("Movies/B.mkv.strm").exists());
        assert_eq!(strm_count(&f), 1);
    }

    #[tokio::test]
    async fn test_failed_rename_falls_back_to_write() {
        let f = fixture();
        // 旧路径是新文件的父目录，重命名一定失败
        let old = f.target.join("Movies");
        std::fs::create_dir_all(&old).unwrap();
        let prior = HashMap::from([(
            "1".to_string(),
            PriorEntry {
                parent_id: "10".to_string(),
                file_name: "A.mkv".to_string(),
                local_path: old.to_string_lossy().into_owned(),
            },
        )]);
        let renamed = f.cache.insert(video("B.mkv")).unwrap();
        materializer(&f, Arc::new(FixedDriver), options(false, false), prior)
            .materialize(&renamed)
            .await;

        let local = f.target.join("Movies/B.mkv.strm");
        assert!(std::fs::read_to_string(&local).unwrap().contains("pickcode=abc"));
        assert!(old.is_dir());
        assert_eq!(strm_count(&f), 1);
        assert!(f.cache.get("1").unwrap().processed);
    }

    #[tokio::test]
    async fn test_local_backend_checks_existence_only() {
        let f = fixture();
        let source = tempfile::tempdir().unwrap();
        let driver = Arc::new(LocalDriver::new(source.path()).unwrap());
        let node = f.cache.insert(video("A.mkv")).unwrap();
        let local = f.target.join("Movies/A.mkv.strm");
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, "stale").unwrap();

        materializer(&f, driver, options(false, false), HashMap::new())
            .materialize(&node)
            .await;
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "stale");
        assert_eq!(strm_count(&f), 0);
    }

    #[tokio::test]
    async fn test_missing_meta_registers_pending_download() {
        let f = fixture();
        let m = materializer(&f, Arc::new(FixedDriver), options(false, false), HashMap::new());
        let mut meta = RemoteNode::file("7", "10", "A.nfo");
        meta.remote_path = "/Movies".to_string();
        meta.is_meta = true;
        meta.need_download = true;
        let meta = f.cache.insert(meta).unwrap();

        m.materialize(&meta).await;
        assert_eq!(f.cache.pending_download_count(), 1);
        assert_eq!(strm_count(&f), 0);
    }
}
