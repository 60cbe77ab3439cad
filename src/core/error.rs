use super::snapshot::SnapshotError;
use crate::driver::DriverError;
use thiserror::Error;

/// 遍历阶段的致命错误，运行会被标记为失败
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("远端列举失败: {0}")]
    Driver(#[from] DriverError),
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),
    #[error("同步已取消")]
    Cancelled,
    #[error("遍历任务异常退出: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled | SyncError::Driver(DriverError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_cancelled() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(SyncError::Driver(DriverError::Cancelled).is_cancelled());
        assert!(!SyncError::Driver(DriverError::Remote("x".to_string())).is_cancelled());
    }
}
