//! 下载/上传任务队列
//!
//! 同步运行只负责登记任务；真正的传输由队列的消费者完成，运行期间队列被暂停。

use crate::core::node::RemoteNode;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Download,
    Upload,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Download => "download",
            TaskKind::Upload => "upload",
        }
    }
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self {
        match s {
            "upload" => TaskKind::Upload,
            _ => TaskKind::Download,
        }
    }
}

/// 传输状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::InProgress => write!(f, "in_progress"),
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

impl From<&str> for TransferStatus {
    fn from(s: &str) -> Self {
        match s {
            "in_progress" => TransferStatus::InProgress,
            "completed" => TransferStatus::Completed,
            "failed" => TransferStatus::Failed,
            _ => TransferStatus::Pending,
        }
    }
}

/// 队列中的一条任务
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: String,
    pub kind: TaskKind,
    pub account_id: i64,
    /// 下载任务为 pickcode（或文件 ID），上传任务为空
    pub token: String,
    pub local_path: String,
    pub remote_path: String,
    pub remote_parent_id: String,
    pub status: TransferStatus,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct TransferTaskRow {
    id: String,
    kind: String,
    account_id: i64,
    token: String,
    local_path: String,
    remote_path: String,
    remote_parent_id: String,
    status: String,
    created_at: i64,
    updated_at: Option<i64>,
}

impl From<TransferTaskRow> for TransferTask {
    fn from(row: TransferTaskRow) -> Self {
        TransferTask {
            id: row.id,
            kind: TaskKind::from(row.kind.as_str()),
            account_id: row.account_id,
            token: row.token,
            local_path: row.local_path,
            remote_path: row.remote_path,
            remote_parent_id: row.remote_parent_id,
            status: TransferStatus::from(row.status.as_str()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 同步引擎看到的队列接口
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 登记元数据下载
    async fn enqueue_download(&self, account_id: i64, node: &RemoteNode) -> Result<()>;

    /// 登记本地元数据上传
    async fn enqueue_upload(
        &self,
        account_id: i64,
        local_path: &Path,
        remote_parent_path: &str,
        remote_parent_id: &str,
    ) -> Result<()>;

    /// 该 token 是否已有未完成的下载任务
    async fn is_download_queued(&self, token: &str) -> Result<bool>;

    /// 该本地文件是否已有未完成的上传任务
    async fn is_upload_queued(&self, local_path: &Path) -> Result<bool>;

    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;
}

/// SQLite 实现；暂停计数支持多个运行嵌套暂停
pub struct SqliteTaskQueue {
    db: Arc<SqlitePool>,
    paused: AtomicUsize,
}

impl SqliteTaskQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            db,
            paused: AtomicUsize::new(0),
        }
    }

    async fn insert(&self, task: &TransferTask) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO transfer_tasks
                   (id, kind, account_id, token, local_path, remote_path, remote_parent_id, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&task.id)
        .bind(task.kind.as_str())
        .bind(task.account_id)
        .bind(&task.token)
        .bind(&task.local_path)
        .bind(&task.remote_path)
        .bind(&task.remote_parent_id)
        .bind(task.status.to_string())
        .bind(task.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn exists_active(&self, kind: TaskKind, column: &str, value: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM transfer_tasks WHERE kind = ? AND {} = ? AND status IN ('pending', 'in_progress')",
            column
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(kind.as_str())
            .bind(value)
            .fetch_one(&*self.db)
            .await?;
        Ok(count > 0)
    }

    /// 未完成的任务（按创建时间）
    pub async fn pending_tasks(&self, kind: TaskKind) -> Result<Vec<TransferTask>> {
        let rows = sqlx::query_as::<_, TransferTaskRow>(
            "SELECT * FROM transfer_tasks WHERE kind = ? AND status IN ('pending', 'in_progress') ORDER BY created_at, id",
        )
        .bind(kind.as_str())
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(TransferTask::from).collect())
    }

    /// 更新任务状态（供消费者使用）
    pub async fn set_status(&self, id: &str, status: TransferStatus) -> Result<()> {
        sqlx::query("UPDATE transfer_tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue_download(&self, account_id: i64, node: &RemoteNode) -> Result<()> {
        let token = if node.pick_code.is_empty() {
            node.file_id.clone()
        } else {
            node.pick_code.clone()
        };
        let task = TransferTask {
            id: uuid::Uuid::new_v4().to_string(),
            kind: TaskKind::Download,
            account_id,
            token,
            local_path: node.local_path_string(),
            remote_path: node.full_remote_path(),
            remote_parent_id: node.parent_id.clone(),
            status: TransferStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            updated_at: None,
        };
        self.insert(&task).await?;
        debug!("登记下载任务: {} -> {}", task.remote_path, task.local_path);
        Ok(())
    }

    async fn enqueue_upload(
        &self,
        account_id: i64,
        local_path: &Path,
        remote_parent_path: &str,
        remote_parent_id: &str,
    ) -> Result<()> {
        let task = TransferTask {
            id: uuid::Uuid::new_v4().to_string(),
            kind: TaskKind::Upload,
            account_id,
            token: String::new(),
            local_path: local_path.to_string_lossy().into_owned(),
            remote_path: remote_parent_path.to_string(),
            remote_parent_id: remote_parent_id.to_string(),
            status: TransferStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            updated_at: None,
        };
        self.insert(&task).await?;
        debug!("登记上传任务: {} -> {}", task.local_path, task.remote_path);
        Ok(())
    }

    async fn is_download_queued(&self, token: &str) -> Result<bool> {
        self.exists_active(TaskKind::Download, "token", token).await
    }

    async fn is_upload_queued(&self, local_path: &Path) -> Result<bool> {
        self.exists_active(TaskKind::Upload, "local_path", &local_path.to_string_lossy())
            .await
    }

    fn pause(&self) {
        let depth = self.paused.fetch_add(1, Ordering::SeqCst) + 1;
        info!("任务队列暂停 (层数 {})", depth);
    }

    fn resume(&self) {
        let prev = self
            .paused
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if prev <= 1 {
            info!("任务队列恢复");
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst) > 0
    }
}
