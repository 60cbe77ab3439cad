use crate::core::node::{FileType, RemoteNode};
use serde::{Deserialize, Serialize};

/// 网盘类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// 本地挂载目录
    Local,
    /// OpenList / Alist 兼容接口
    OpenList,
    /// 标准 WebDAV
    WebDav,
    /// 115 网盘
    Pan115,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Local => "local",
            BackendType::OpenList => "openlist",
            BackendType::WebDav => "webdav",
            BackendType::Pan115 => "pan115",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BackendType {
    fn from(s: &str) -> Self {
        match s {
            "openlist" => BackendType::OpenList,
            "webdav" => BackendType::WebDav,
            "pan115" => BackendType::Pan115,
            _ => BackendType::Local,
        }
    }
}

/// 运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::InProgress => write!(f, "in_progress"),
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        match s {
            "in_progress" => RunStatus::InProgress,
            "complete" => RunStatus::Complete,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Pending,
        }
    }
}

/// 一次同步运行的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: i64,
    pub sync_target_id: i64,
    pub status: RunStatus,
    pub reason: Option<String>,
    /// 新增的元数据下载
    pub new_meta: u64,
    /// 新写入的 STRM 文件
    pub new_strm: u64,
    /// 新增的上传任务
    pub new_upload: u64,
    /// 本次遍历见到的文件总数
    pub total: u64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncRunRow {
    pub id: i64,
    pub sync_target_id: i64,
    pub status: String,
    pub reason: Option<String>,
    pub new_meta: i64,
    pub new_strm: i64,
    pub new_upload: i64,
    pub total: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl From<SyncRunRow> for SyncRun {
    fn from(row: SyncRunRow) -> Self {
        SyncRun {
            id: row.id,
            sync_target_id: row.sync_target_id,
            status: RunStatus::from(row.status.as_str()),
            reason: row.reason,
            new_meta: row.new_meta.max(0) as u64,
            new_strm: row.new_strm.max(0) as u64,
            new_upload: row.new_upload.max(0) as u64,
            total: row.total.max(0) as u64,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

/// 持久化目录中的一行，对应上一次运行发现的远端节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFileRecord {
    pub id: i64,
    pub account_id: i64,
    pub sync_target_id: i64,
    pub backend_type: BackendType,
    pub file_id: String,
    pub parent_id: String,
    pub path: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: FileType,
    pub mtime: i64,
    pub pick_code: String,
    pub sign: String,
    pub thumb_url: String,
    pub sha1: String,
    pub is_video: bool,
    pub is_meta: bool,
    pub processed: bool,
    pub local_path: String,
}

impl SyncFileRecord {
    /// 可变字段是否与当前节点一致（一致时不需要写库）
    pub fn matches_node(&self, node: &RemoteNode) -> bool {
        self.parent_id == node.parent_id
            && self.path == node.remote_path
            && self.file_name == node.file_name
            && self.file_size == node.file_size
            && self.mtime == node.mtime
            && self.pick_code == node.pick_code
            && self.sign == node.sign
            && self.thumb_url == node.thumb_url
            && self.sha1 == node.sha1
            && self.is_video == node.is_video
            && self.is_meta == node.is_meta
            && self.processed == node.processed
            && self.local_path == node.local_path_string()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncFileRow {
    pub id: i64,
    pub account_id: i64,
    pub sync_target_id: i64,
    pub backend_type: String,
    pub file_id: String,
    pub parent_id: String,
    pub path: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub mtime: i64,
    pub pick_code: String,
    pub sign: String,
    pub thumb_url: String,
    pub sha1: String,
    pub is_video: bool,
    pub is_meta: bool,
    pub processed: bool,
    pub local_path: String,
}

impl From<SyncFileRow> for SyncFileRecord {
    fn from(row: SyncFileRow) -> Self {
        SyncFileRecord {
            id: row.id,
            account_id: row.account_id,
            sync_target_id: row.sync_target_id,
            backend_type: BackendType::from(row.backend_type.as_str()),
            file_id: row.file_id,
            parent_id: row.parent_id,
            path: row.path,
            file_name: row.file_name,
            file_size: row.file_size.max(0) as u64,
            file_type: FileType::from(row.file_type.as_str()),
            mtime: row.mtime,
            pick_code: row.pick_code,
            sign: row.sign,
            thumb_url: row.thumb_url,
            sha1: row.sha1,
            is_video: row.is_video,
            is_meta: row.is_meta,
            processed: row.processed,
            local_path: row.local_path,
        }
    }
}

/// 重命名快速路径需要的上一轮信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorEntry {
    pub parent_id: String,
    pub file_name: String,
    pub local_path: String,
}
