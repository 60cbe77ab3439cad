//! 快照缓存 - 一次运行中发现的远端节点
//!
//! 按 ID、本地路径、父目录三个索引保存同一组节点，另有一个待下载索引。
//! 所有修改都经过同一把写锁，调用方不能直接接触索引。

use super::node::RemoteNode;
use super::paths::PathMapper;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("节点 ID 为空: {0}")]
    EmptyIdentity(String),
}

#[derive(Debug, Default)]
struct Indices {
    by_id: HashMap<String, RemoteNode>,
    by_local_path: HashMap<PathBuf, String>,
    by_parent: HashMap<String, Vec<String>>,
    pending_downloads: HashMap<String, RemoteNode>,
}

impl Indices {
    fn unindex_local(&mut self, node: &RemoteNode) {
        if let Some(path) = &node.local_path {
            if self.by_local_path.get(path) == Some(&node.file_id) {
                self.by_local_path.remove(path);
            }
        }
    }
}

pub struct SnapshotCache {
    inner: RwLock<Indices>,
    paths: PathMapper,
}

impl SnapshotCache {
    pub fn new(paths: PathMapper) -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
            paths,
        }
    }

    pub fn paths(&self) -> &PathMapper {
        &self.paths
    }

    // 某个任务 panic 后继续使用已有数据
    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 插入节点，相同 ID 后写覆盖；返回缓存中的副本
    ///
    /// 本地路径只计算一次：已缓存过的节点沿用旧路径。
    pub fn insert(&self, mut node: RemoteNode) -> Result<RemoteNode, SnapshotError> {
        if node.file_id.is_empty() {
            return Err(SnapshotError::EmptyIdentity(node.file_name));
        }

        let mut idx = self.write();
        let previous = idx.by_id.remove(&node.file_id);
        if let Some(prev) = &previous {
            if node.local_path.is_none() {
                node.local_path = prev.local_path.clone();
            }
            idx.unindex_local(prev);
            if prev.parent_id != node.parent_id {
                if let Some(siblings) = idx.by_parent.get_mut(&prev.parent_id) {
                    siblings.retain(|id| id != &node.file_id);
                }
            }
        }
        if node.local_path.is_none() {
            node.local_path = self.paths.local_path_for(&node);
        }

        if let Some(path) = &node.local_path {
            idx.by_local_path.insert(path.clone(), node.file_id.clone());
        }
        let siblings = idx.by_parent.entry(node.parent_id.clone()).or_default();
        if !siblings.contains(&node.file_id) {
            siblings.push(node.file_id.clone());
        }
        idx.by_id.insert(node.file_id.clone(), node.clone());
        Ok(node)
    }

    /// 从三个主索引中移除，返回被移除的节点
    pub fn delete(&self, file_id: &str) -> Option<RemoteNode> {
        let mut idx = self.write();
        let node = idx.by_id.remove(file_id)?;
        idx.unindex_local(&node);
        if let Some(siblings) = idx.by_parent.get_mut(&node.parent_id) {
            siblings.retain(|id| id != file_id);
        }
        Some(node)
    }

    /// 移除父目录下的一层子节点，再移除父目录桶本身；返回移除数量
    pub fn delete_subtree(&self, parent_id: &str) -> usize {
        let mut idx = self.write();
        let Some(children) = idx.by_parent.remove(parent_id) else {
            return 0;
        };
        let mut removed = 0;
        for id in children {
            if let Some(node) = idx.by_id.remove(&id) {
                idx.unindex_local(&node);
                removed += 1;
            }
        }
        removed
    }

    /// 为父目录下的每个直接子节点写入新路径并重建本地路径索引，返回更新后的副本
    pub fn update_paths_under_parent(&self, parent_id: &str, new_path: &str) -> Vec<RemoteNode> {
        let mut idx = self.write();
        let children = idx.by_parent.get(parent_id).cloned().unwrap_or_default();

        let mut updated = Vec::with_capacity(children.len());
        for id in children {
            let Some(mut node) = idx.by_id.remove(&id) else {
                continue;
            };
            idx.unindex_local(&node);
            node.remote_path = new_path.to_string();
            // 已处理节点的本地路径保持不变
            if !node.processed || node.local_path.is_none() {
                node.local_path = self.paths.local_path_for(&node);
            }
            if let Some(path) = &node.local_path {
                idx.by_local_path.insert(path.clone(), id.clone());
            }
            updated.push(node.clone());
            idx.by_id.insert(id, node);
        }
        updated
    }

    pub fn get(&self, file_id: &str) -> Option<RemoteNode> {
        self.read().by_id.get(file_id).cloned()
    }

    pub fn get_by_local_path(&self, path: &Path) -> Option<RemoteNode> {
        let idx = self.read();
        idx.by_local_path
            .get(path)
            .and_then(|id| idx.by_id.get(id))
            .cloned()
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.read().by_id.contains_key(file_id)
    }

    pub fn children(&self, parent_id: &str) -> Vec<RemoteNode> {
        let idx = self.read();
        idx.by_parent
            .get(parent_id)
            .map(|ids| ids.iter().filter_map(|id| idx.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn mark_processed(&self, file_id: &str) {
        if let Some(node) = self.write().by_id.get_mut(file_id) {
            node.processed = true;
        }
    }

    /// 尚未解析路径的节点的父目录 ID（去重）
    pub fn unresolved_parents(&self) -> Vec<String> {
        let idx = self.read();
        let mut parents: Vec<String> = idx
            .by_id
            .values()
            .filter(|n| !n.is_resolved())
            .map(|n| n.parent_id.clone())
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }

    pub fn add_pending_download(&self, node: RemoteNode) {
        self.write()
            .pending_downloads
            .insert(node.file_id.clone(), node);
    }

    pub fn pending_download_count(&self) -> usize {
        self.read().pending_downloads.len()
    }

    pub fn take_pending_downloads(&self) -> Vec<RemoteNode> {
        self.write().pending_downloads.drain().map(|(_, n)| n).collect()
    }

    pub fn count(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn clear(&self) {
        *self.write() = Indices::default();
    }

    /// 全部节点的副本
    pub fn snapshot(&self) -> Vec<RemoteNode> {
        self.read().by_id.values().cloned().collect()
    }
}
