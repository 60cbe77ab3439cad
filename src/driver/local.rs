use super::{Driver, DriverError, DriverResult, PointerOptions, PointerPolicy};
use crate::core::node::{join_remote, normalize_remote, RemoteNode};
use crate::db::BackendType;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// 本地挂载目录（rclone / CloudDrive 等挂载点）
///
/// 以规范化路径作为节点标识，STRM 内容直接写源文件的绝对路径。
pub struct LocalDriver {
    base_path: PathBuf,
    name: String,
}

impl LocalDriver {
    pub fn new(path: impl Into<PathBuf>) -> DriverResult<Self> {
        let base_path: PathBuf = path.into();
        if !base_path.is_dir() {
            return Err(DriverError::NotFound(base_path.to_string_lossy().into_owned()));
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = normalize_remote(path);
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl Driver for LocalDriver {
    fn backend(&self) -> BackendType {
        BackendType::Local
    }

    fn pointer_policy(&self) -> PointerPolicy {
        // 源文件本地可寻址，存在即视为最新
        PointerPolicy {
            validate_content: false,
            signed: false,
            user_id: None,
        }
    }

    async fn list_children(&self, parent_path: &str, _parent_id: &str) -> DriverResult<Vec<RemoteNode>> {
        let parent = normalize_remote(parent_path);
        let dir = self.resolve_path(&parent);
        let mut read_dir = fs::read_dir(&dir).await?;

        let mut nodes = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!("跳过非 UTF-8 文件名: {:?}", entry.path());
                continue;
            };
            let metadata = entry.metadata().await?;
            let id = join_remote(&parent, &name);

            let mut node = if metadata.is_dir() {
                RemoteNode::dir(id, parent.clone(), name)
            } else {
                RemoteNode::file(id, parent.clone(), name)
            };
            node.remote_path = parent.clone();
            if !metadata.is_dir() {
                node.file_size = metadata.len();
            }
            node.mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs() as i64);
            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn resolve_path_id(&self, path: &str) -> DriverResult<String> {
        let path = normalize_remote(path);
        if fs::metadata(self.resolve_path(&path)).await.is_ok() {
            Ok(path)
        } else {
            Err(DriverError::NotFound(path))
        }
    }

    fn format_pointer(&self, node: &RemoteNode, _options: &PointerOptions) -> String {
        self.resolve_path(&node.full_remote_path())
            .to_string_lossy()
            .into_owned()
    }

    async fn create_remote_dir_chain(&self, path: &str) -> DriverResult<(String, String)> {
        let path = normalize_remote(path);
        fs::create_dir_all(self.resolve_path(&path)).await?;
        Ok((path.clone(), path))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_children_uses_paths_as_identity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Movies/Sub")).unwrap();
        std::fs::write(dir.path().join("Movies/A.mkv"), b"12345").unwrap();

        let driver = LocalDriver::new(dir.path()).unwrap();
        let id = driver.resolve_path_id("Movies/").await.unwrap();
        assert_eq!(id, "/Movies");

        let mut nodes = driver.list_children("/Movies", &id).await.unwrap();
        nodes.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].file_id, "/Movies/A.mkv");
        assert_eq!(nodes[0].file_size, 5);
        assert!(!nodes[0].is_dir());
        assert!(nodes[1].is_dir());
        assert_eq!(nodes[1].parent_id, "/Movies");
    }

    #[tokio::test]
    async fn test_pointer_is_absolute_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(dir.path()).unwrap();
        let mut node = RemoteNode::file("/Movies/A.mkv", "/Movies", "A.mkv");
        node.remote_path = "/Movies".to_string();
        let options = PointerOptions {
            base_url: "http://ignored".to_string(),
            embed_path: true,
        };
        let content = driver.format_pointer(&node, &options);
        assert_eq!(PathBuf::from(content), dir.path().join("Movies/A.mkv"));
        assert!(!driver.pointer_policy().validate_content);
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(dir.path()).unwrap();
        assert!(matches!(
            driver.resolve_path_id("/nope").await,
            Err(DriverError::NotFound(_))
        ));
        let (id, path) = driver.create_remote_dir_chain("/a/b").await.unwrap();
        assert_eq!(id, "/a/b");
        assert_eq!(path, "/a/b");
        assert!(dir.path().join("a/b").is_dir());
        assert!(LocalDriver::new(dir.path().join("missing")).is_err());
    }
}
