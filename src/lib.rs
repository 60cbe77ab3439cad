use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod core;
pub mod db;
pub mod driver;
pub mod logging;

pub use config::{AppConfig, SyncTargetConfig};
pub use crate::core::{RunOutcome, SyncEngine};
pub use driver::DriverRegistry;

/// 应用状态，在 CLI 和后台任务之间共享
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub data_dir: PathBuf,
    pub config: Arc<AppConfig>,
    pub registry: Arc<DriverRegistry>,
    pub queue: Arc<crate::core::SqliteTaskQueue>,
    pub engine: Arc<SyncEngine>,
    /// 正在运行的同步目标的取消令牌
    pub cancels: Arc<Mutex<HashMap<i64, CancellationToken>>>,
}

impl AppState {
    /// 从默认数据目录初始化
    pub async fn new() -> anyhow::Result<Self> {
        let data_dir = config::resolve_data_dir()?;
        let config = AppConfig::load(&data_dir)?;
        Self::open(&data_dir, config).await
    }

    /// 指定数据目录和配置初始化
    pub async fn open(data_dir: &Path, config: AppConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Arc::new(db::connect(&data_dir.join("strmsync.db")).await?);

        let registry = Arc::new(DriverRegistry::from_accounts(&config.accounts, config.max_workers)?);
        let queue = Arc::new(crate::core::SqliteTaskQueue::new(db.clone()));
        let engine = Arc::new(SyncEngine::new(
            db.clone(),
            registry.clone(),
            queue.clone(),
            config.strm_base_url.clone(),
            config.max_workers,
        ));
        tracing::debug!("已加载 {} 个账号, {} 个同步目标", registry.len(), config.sync_targets.len());

        Ok(Self {
            db,
            data_dir: data_dir.to_path_buf(),
            config: Arc::new(config),
            registry,
            queue,
            engine,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// 运行一个同步目标；同一目标正在遍历时拒绝，上一次的后台对账未结束时等待
    pub async fn run_target(&self, target_id: i64) -> anyhow::Result<RunOutcome> {
        let target = self
            .config
            .target(target_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("同步目标不存在: {}", target_id))?;

        let cancel = CancellationToken::new();
        {
            let mut cancels = self.cancels.lock().await;
            if cancels.contains_key(&target_id) {
                anyhow::bail!("同步目标 {} 正在运行", target_id);
            }
            cancels.insert(target_id, cancel.clone());
        }

        let result = self.engine.run_target(&target, cancel).await;
        self.cancels.lock().await.remove(&target_id);
        result
    }

    /// 取消正在运行的同步目标，返回是否找到
    pub async fn cancel_target(&self, target_id: i64) -> bool {
        match self.cancels.lock().await.get(&target_id) {
            Some(token) => {
                tracing::info!("取消同步目标: {}", target_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 清理资源（退出前调用）
    pub async fn cleanup(&self) {
        tracing::info!("正在清理应用资源...");

        {
            let mut cancels = self.cancels.lock().await;
            for (target_id, token) in cancels.drain() {
                tracing::debug!("取消同步目标: {}", target_id);
                token.cancel();
            }
        }

        tracing::debug!("关闭数据库连接池...");
        self.db.close().await;

        tracing::info!("资源清理完成");
    }
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_unknown_target() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path(), AppConfig::default()).await.unwrap();
        assert!(dir.path().join("strmsync.db").exists());
        assert!(state.registry.is_empty());
        assert!(state.run_target(1).await.is_err());
        assert!(!state.cancel_target(1).await);
        state.cleanup().await;
    }
}
