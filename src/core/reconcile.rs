//! 目录对账 - 用本轮快照更新持久化目录
//!
//! 分页扫描已有行：快照中仍存在的行按需更新并从快照中消费掉，
//! 不存在的行批量删除，快照中剩余的节点作为新行插入。

use super::snapshot::SnapshotCache;
use crate::db::Catalogue;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 每次读取的行数
pub const RECONCILE_PAGE_SIZE: u64 = 1000;
/// 每条删除语句的最大 ID 数
pub const DELETE_CHUNK: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub inserted: u64,
    pub failed: u64,
}

pub struct Reconciler {
    catalogue: Catalogue,
    cache: Arc<SnapshotCache>,
}

impl Reconciler {
    pub fn new(catalogue: Catalogue, cache: Arc<SnapshotCache>) -> Self {
        Self { catalogue, cache }
    }

    /// 执行对账；单条失败只记录日志
    ///
    /// 执行后快照缓存被消费为空。
    pub async fn run(&self) -> ReconcileReport {
        let target = self.catalogue.sync_target_id();
        let mut report = ReconcileReport::default();
        let mut stale = Vec::new();

        let mut offset = 0;
        loop {
            let rows = match self.catalogue.page(offset, RECONCILE_PAGE_SIZE).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("读取目录失败 (target={}, offset={}): {}", target, offset, e);
                    report.failed += 1;
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }
            offset += rows.len() as u64;

            for row in rows {
                let Some(node) = self.cache.delete(&row.file_id) else {
                    stale.push(row.id);
                    continue;
                };
                if row.matches_node(&node) {
                    report.unchanged += 1;
                    continue;
                }
                match self.catalogue.update_from_node(row.id, &node).await {
                    Ok(()) => report.updated += 1,
                    Err(e) => {
                        warn!("更新目录行失败 {}: {}", row.file_id, e);
                        report.failed += 1;
                    }
                }
            }
        }

        // 先扫描完再删除，避免分页偏移错位
        for chunk in stale.chunks(DELETE_CHUNK) {
            match self.catalogue.delete_batch(chunk).await {
                Ok(n) => report.deleted += n,
                Err(e) => {
                    warn!("批量删除目录行失败 ({} 条): {}", chunk.len(), e);
                    report.failed += chunk.len() as u64;
                }
            }
        }

        for node in self.cache.snapshot() {
            match self.catalogue.insert_node(&node).await {
                Ok(()) => report.inserted += 1,
                Err(e) => {
                    warn!("插入目录行失败 {}: {}", node.file_id, e);
                    report.failed += 1;
                }
            }
            self.cache.delete(&node.file_id);
        }

        debug!("对账明细: {:?}", report);
        info!(
            "对账完成 (target={}): 更新 {}, 删除 {}, 新增 {}",
            target, report.updated, report.deleted, report.inserted
        );
        report
    }
}
