//! 持久化目录 - 保存每个同步目标上一次运行的结果，用于下次对账

use super::models::{BackendType, PriorEntry, SyncFileRecord, SyncFileRow};
use crate::core::node::RemoteNode;
use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const SELECT_COLUMNS: &str = "id, account_id, sync_target_id, backend_type, file_id, parent_id, path, \
     file_name, file_size, file_type, mtime, pick_code, sign, thumb_url, sha1, is_video, is_meta, \
     processed, local_path";

/// 单个同步目标的目录访问
#[derive(Clone)]
pub struct Catalogue {
    db: Arc<SqlitePool>,
    account_id: i64,
    sync_target_id: i64,
    backend: BackendType,
}

impl Catalogue {
    pub fn new(db: Arc<SqlitePool>, account_id: i64, sync_target_id: i64, backend: BackendType) -> Self {
        Self {
            db,
            account_id,
            sync_target_id,
            backend,
        }
    }

    pub fn sync_target_id(&self) -> i64 {
        self.sync_target_id
    }

    /// 行数
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_files WHERE sync_target_id = ?")
                .bind(self.sync_target_id)
                .fetch_one(&*self.db)
                .await?;
        Ok(count.max(0) as u64)
    }

    /// 分页读取（按 id 升序）
    pub async fn page(&self, offset: u64, limit: u64) -> Result<Vec<SyncFileRecord>> {
        let sql = format!(
            "SELECT {} FROM sync_files WHERE sync_target_id = ? ORDER BY id LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SyncFileRow>(&sql)
            .bind(self.sync_target_id)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(SyncFileRecord::from).collect())
    }

    /// 读取全部行
    pub async fn list_all(&self) -> Result<Vec<SyncFileRecord>> {
        let sql = format!(
            "SELECT {} FROM sync_files WHERE sync_target_id = ? ORDER BY id",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SyncFileRow>(&sql)
            .bind(self.sync_target_id)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(SyncFileRecord::from).collect())
    }

    pub async fn get_by_file_id(&self, file_id: &str) -> Result<Option<SyncFileRecord>> {
        let sql = format!(
            "SELECT {} FROM sync_files WHERE sync_target_id = ? AND file_id = ?",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, SyncFileRow>(&sql)
            .bind(self.sync_target_id)
            .bind(file_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row.map(SyncFileRecord::from))
    }

    /// 上一轮的 identity -> (父目录, 文件名, 本地路径)，用于本地重命名
    pub async fn prior_index(&self) -> Result<HashMap<String, PriorEntry>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT file_id, parent_id, file_name, local_path FROM sync_files WHERE sync_target_id = ? AND file_type = 'file'",
        )
        .bind(self.sync_target_id)
        .fetch_all(&*self.db)
        .await?;

        let map = rows
            .into_iter()
            .map(|(file_id, parent_id, file_name, local_path)| {
                (
                    file_id,
                    PriorEntry {
                        parent_id,
                        file_name,
                        local_path,
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        debug!("加载上一轮目录 {} 条 (target={})", map.len(), self.sync_target_id);
        Ok(map)
    }

    /// 用节点更新一行的可变字段
    pub async fn update_from_node(&self, row_id: i64, node: &RemoteNode) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"UPDATE sync_files SET
                   parent_id = ?, path = ?, file_name = ?, file_size = ?, mtime = ?,
                   pick_code = ?, sign = ?, thumb_url = ?, sha1 = ?,
                   is_video = ?, is_meta = ?, processed = ?, local_path = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&node.parent_id)
        .bind(&node.remote_path)
        .bind(&node.file_name)
        .bind(node.file_size as i64)
        .bind(node.mtime)
        .bind(&node.pick_code)
        .bind(&node.sign)
        .bind(&node.thumb_url)
        .bind(&node.sha1)
        .bind(node.is_video)
        .bind(node.is_meta)
        .bind(node.processed)
        .bind(node.local_path_string())
        .bind(now)
        .bind(row_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// 一条语句删除一批行
    pub async fn delete_batch(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM sync_files WHERE sync_target_id = ? AND id IN ({})",
            placeholders.join(",")
        );

        let mut q = sqlx::query(&sql).bind(self.sync_target_id);
        for id in ids {
            q = q.bind(id);
        }

        let result = q.execute(&*self.db).await?;
        Ok(result.rows_affected())
    }

    /// 插入新发现的节点
    pub async fn insert_node(&self, node: &RemoteNode) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"INSERT INTO sync_files (
                   account_id, sync_target_id, backend_type, file_id, parent_id, path, file_name,
                   file_size, file_type, mtime, pick_code, sign, thumb_url, sha1,
                   is_video, is_meta, processed, local_path, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(self.account_id)
        .bind(self.sync_target_id)
        .bind(self.backend.as_str())
        .bind(&node.file_id)
        .bind(&node.parent_id)
        .bind(&node.remote_path)
        .bind(&node.file_name)
        .bind(node.file_size as i64)
        .bind(node.file_type.as_str())
        .bind(node.mtime)
        .bind(&node.pick_code)
        .bind(&node.sign)
        .bind(&node.thumb_url)
        .bind(&node.sha1)
        .bind(node.is_video)
        .bind(node.is_meta)
        .bind(node.processed)
        .bind(node.local_path_string())
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

}
