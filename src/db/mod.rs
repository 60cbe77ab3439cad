pub mod catalogue;
pub mod models;

pub use catalogue::Catalogue;
pub use models::*;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
pub use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// 打开（必要时创建）数据库并执行迁移
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // SQLite 连接字符串格式: sqlite:path，Windows 路径需要转换反斜杠
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
        .replace('\\', "/");

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
        .await?;

    sqlx::migrate!("./migrations").run(&db).await?;
    Ok(db)
}

/// 内存数据库（单连接，供测试和临时运行使用）
pub async fn connect_memory() -> Result<SqlitePool> {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    Ok(db)
}

impl SyncRun {
    /// 创建运行记录（pending）
    pub async fn create(pool: &SqlitePool, sync_target_id: i64) -> Result<SyncRun> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO sync_runs (sync_target_id, status, started_at) VALUES (?, ?, ?)",
        )
        .bind(sync_target_id)
        .bind(RunStatus::Pending.to_string())
        .bind(now)
        .execute(pool)
        .await?;

        Ok(SyncRun {
            id: result.last_insert_rowid(),
            sync_target_id,
            status: RunStatus::Pending,
            reason: None,
            new_meta: 0,
            new_strm: 0,
            new_upload: 0,
            total: 0,
            started_at: now,
            finished_at: None,
        })
    }

    /// 加载单条运行记录
    pub async fn load(pool: &SqlitePool, id: i64) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRunRow>("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(SyncRun::from))
    }

    /// 某个同步目标的运行历史（最近的在前）
    pub async fn load_history(pool: &SqlitePool, sync_target_id: i64, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(
            "SELECT * FROM sync_runs WHERE sync_target_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(sync_target_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(SyncRun::from).collect())
    }

    /// 写回状态和计数
    pub async fn save(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"UPDATE sync_runs SET
                   status = ?, reason = ?, new_meta = ?, new_strm = ?, new_upload = ?,
                   total = ?, finished_at = ?
               WHERE id = ?"#,
        )
        .bind(self.status.to_string())
        .bind(&self.reason)
        .bind(self.new_meta as i64)
        .bind(self.new_strm as i64)
        .bind(self.new_upload as i64)
        .bind(self.total as i64)
        .bind(self.finished_at)
        .bind(self.id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub fn start(&mut self) {
        self.status = RunStatus::InProgress;
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Complete;
        self.finished_at = Some(chrono::Utc::now().timestamp());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.reason = Some(reason.into());
        self.finished_at = Some(chrono::Utc::now().timestamp());
    }
}
