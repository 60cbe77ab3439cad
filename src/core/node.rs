//! 远端节点：一次运行中遍历发现的文件或目录

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 节点类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    File,
    Dir,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::File => "file",
            FileType::Dir => "dir",
        }
    }
}

impl From<&str> for FileType {
    fn from(s: &str) -> Self {
        match s {
            "dir" => FileType::Dir,
            _ => FileType::File,
        }
    }
}

/// 远端节点
///
/// `file_id` 对有 ID 的网盘是原生 ID，对按路径寻址的网盘是规范化后的完整路径。
/// `remote_path` 是父目录路径，批量策略下在路径解析完成前为空。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteNode {
    pub file_id: String,
    pub parent_id: String,
    pub file_type: FileType,
    pub file_name: String,
    pub remote_path: String,
    /// 本地路径，首次计算后固定
    pub local_path: Option<PathBuf>,
    pub file_size: u64,
    pub mtime: i64,
    pub pick_code: String,
    pub sha1: String,
    pub thumb_url: String,
    pub sign: String,
    pub is_video: bool,
    pub is_meta: bool,
    pub need_download: bool,
    pub processed: bool,
}

impl RemoteNode {
    pub fn file(id: impl Into<String>, parent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file_id: id.into(),
            parent_id: parent_id.into(),
            file_type: FileType::File,
            file_name: name.into(),
            ..Default::default()
        }
    }

    pub fn dir(id: impl Into<String>, parent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file_id: id.into(),
            parent_id: parent_id.into(),
            file_type: FileType::Dir,
            file_name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    /// 父目录路径是否已经解析
    pub fn is_resolved(&self) -> bool {
        !self.remote_path.is_empty()
    }

    /// 远端完整路径（父目录 + 文件名）
    pub fn full_remote_path(&self) -> String {
        join_remote(&self.remote_path, &self.file_name)
    }

    /// 小写扩展名，不含点
    pub fn extension(&self) -> String {
        file_extension(&self.file_name)
    }

    pub fn local_path_string(&self) -> String {
        self.local_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 规范化远端路径：以 `/` 开头，不以 `/` 结尾，合并重复分隔符
pub fn normalize_remote(path: &str) -> String {
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// 拼接远端目录和名称
pub fn join_remote(parent: &str, name: &str) -> String {
    let parent = normalize_remote(parent);
    let name = name.trim_matches('/');
    if name.is_empty() {
        parent
    } else if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 远端路径的父目录
pub fn parent_remote(path: &str) -> String {
    let path = normalize_remote(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// 小写扩展名，不含点；没有扩展名时返回空串
pub fn file_extension(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_remote() {
        assert_eq!(normalize_remote(""), "/");
        assert_eq!(normalize_remote("/"), "/");
        assert_eq!(normalize_remote("Movies//A/"), "/Movies/A");
        assert_eq!(normalize_remote("\\Movies\\A"), "/Movies/A");
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/", "Movies"), "/Movies");
        assert_eq!(join_remote("/Movies", "A.mkv"), "/Movies/A.mkv");
    }

    #[test]
    fn test_extension_is_lowercase() {
        assert_eq!(file_extension("A.MKV"), "mkv");
        assert_eq!(file_extension("README"), "");
    }
}
