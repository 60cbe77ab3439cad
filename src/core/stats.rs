use crate::db::SyncRun;
use std::sync::atomic::{AtomicU64, Ordering};

/// 运行计数，遍历任务并发累加
#[derive(Debug, Default)]
pub struct RunStats {
    pub new_meta: AtomicU64,
    pub new_strm: AtomicU64,
    pub new_upload: AtomicU64,
    pub total: AtomicU64,
}

impl RunStats {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 写入运行记录
    pub fn apply_to(&self, run: &mut SyncRun) {
        run.new_meta = self.new_meta.load(Ordering::Relaxed);
        run.new_strm = self.new_strm.load(Ordering::Relaxed);
        run.new_upload = self.new_upload.load(Ordering::Relaxed);
        run.total = self.total.load(Ordering::Relaxed);
    }
}
