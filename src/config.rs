//! 应用配置模块

use crate::db::BackendType;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 应用配置（config.json）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// STRM 链接中使用的服务地址
    #[serde(default = "default_strm_base_url")]
    pub strm_base_url: String,
    /// 遍历并发上限
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub sync_targets: Vec<SyncTargetConfig>,
}

fn default_strm_base_url() -> String {
    "http://127.0.0.1:12333".to_string()
}

fn default_max_workers() -> usize {
    8
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            strm_base_url: default_strm_base_url(),
            max_workers: default_max_workers(),
            log: LogConfig::default(),
            accounts: Vec::new(),
            sync_targets: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 从配置目录加载，文件不存在时返回默认配置
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let config_file = config_dir.join("config.json");
        if !config_file.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_file)?;
        let config = serde_json::from_str::<AppConfig>(&content)
            .map_err(|e| anyhow::anyhow!("解析配置文件失败 {:?}: {}", config_file, e))?;
        Ok(config)
    }

    pub fn target(&self, id: i64) -> Option<&SyncTargetConfig> {
        self.sync_targets.iter().find(|t| t.id == id)
    }
}

/// 网盘账号
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub backend: BackendType,
    /// 接口地址（OpenList / WebDAV / 115 开放平台）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// 写入 STRM 的用户标识（115）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// 本地挂载根目录 / WebDAV 根目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// 两次请求之间的最小间隔（毫秒）
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    200
}

/// 元数据在远端不存在时的处理方式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotFoundAction {
    #[default]
    Keep,
    Delete,
    Upload,
}

/// 同步目标配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTargetConfig {
    pub id: i64,
    #[serde(rename = "accountId")]
    pub account_id: i64,
    /// 远端源目录
    #[serde(rename = "sourcePath")]
    pub source_path: String,
    /// 本地目标目录
    #[serde(rename = "targetPath")]
    pub target_path: PathBuf,
    /// 临时目标：目录对账在运行结束前同步完成
    #[serde(default)]
    pub temporary: bool,
    #[serde(rename = "EnableDownloadMeta", default)]
    pub enable_download_meta: u8,
    #[serde(rename = "MinVideoSize", default = "default_min_video_size")]
    pub min_video_size: u64,
    #[serde(rename = "VideoExt", default = "default_video_ext")]
    pub video_ext: Vec<String>,
    #[serde(rename = "MetaExt", default = "default_meta_ext")]
    pub meta_ext: Vec<String>,
    #[serde(rename = "ExcludeNames", default)]
    pub exclude_names: Vec<String>,
    #[serde(rename = "NetNotFoundFileAction", default)]
    pub net_not_found_file_action: NotFoundAction,
    #[serde(rename = "StrmUrlNeedPath", default)]
    pub strm_url_need_path: bool,
    #[serde(rename = "DelEmptyLocalDir", default)]
    pub del_empty_local_dir: bool,
    #[serde(rename = "FullSync", default)]
    pub full_sync: bool,
}

fn default_min_video_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_video_ext() -> Vec<String> {
    ["mkv", "mp4", "avi", "ts", "m2ts", "iso", "rmvb", "mov", "wmv", "flv", "webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_meta_ext() -> Vec<String> {
    ["nfo", "jpg", "jpeg", "png", "webp", "srt", "ass", "ssa", "sub"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl SyncTargetConfig {
    /// 以默认选项创建目标
    pub fn new(id: i64, account_id: i64, source_path: &str, target_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            account_id,
            source_path: source_path.to_string(),
            target_path: target_path.into(),
            temporary: false,
            enable_download_meta: 0,
            min_video_size: default_min_video_size(),
            video_ext: default_video_ext(),
            meta_ext: default_meta_ext(),
            exclude_names: Vec::new(),
            net_not_found_file_action: NotFoundAction::Keep,
            strm_url_need_path: false,
            del_empty_local_dir: false,
            full_sync: false,
        }
    }

    pub fn download_meta_enabled(&self) -> bool {
        self.enable_download_meta != 0
    }
}

/// 读取数据目录：环境变量优先，其次默认目录下 config.json 中的 data_path
pub fn resolve_data_dir() -> io::Result<PathBuf> {
    if let Ok(dir) = std::env::var("STRMSYNC_DATA_DIR") {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir)?;
        return Ok(dir);
    }

    let default_config_dir = crate::dirs::config_dir()
        .map(|p| p.join("strmsync"))
        .unwrap_or_else(|| PathBuf::from(".strmsync"));
    fs::create_dir_all(&default_config_dir)?;

    let data_dir = fs::read_to_string(default_config_dir.join("config.json"))
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get("data_path")?.as_str().map(PathBuf::from))
        .filter(|p| p.exists() && p.is_dir())
        .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
        .unwrap_or(default_config_dir);

    Ok(data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_options_use_wire_names() {
        let json = serde_json::json!({
            "id": 3,
            "accountId": 1,
            "sourcePath": "/Movies",
            "targetPath": "/media",
            "EnableDownloadMeta": 1,
            "MinVideoSize": 0,
            "ExcludeNames": ["Extras"],
            "NetNotFoundFileAction": "upload",
            "StrmUrlNeedPath": true,
            "DelEmptyLocalDir": true
        });
        let target: SyncTargetConfig = serde_json::from_value(json).unwrap();
        assert!(target.download_meta_enabled());
        assert_eq!(target.min_video_size, 0);
        assert_eq!(target.net_not_found_file_action, NotFoundAction::Upload);
        assert!(target.strm_url_need_path);
        assert!(target.del_empty_local_dir);
        assert!(!target.full_sync);
        assert!(target.video_ext.iter().any(|e| e == "mkv"));
    }

    #[test]
    fn test_load_missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_workers, 8);
        assert!(config.accounts.is_empty());
    }
}
