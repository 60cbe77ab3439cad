//! 远端路径与本地镜像路径的映射

use super::node::{join_remote, normalize_remote, RemoteNode};
use super::pointer::POINTER_EXT;
use std::path::{Component, Path, PathBuf};

/// 本地镜像根 = 目标目录 / 源目录名
#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: String,
    target_root: PathBuf,
    mirror_root: PathBuf,
}

impl PathMapper {
    pub fn new(source_root: &str, target_root: impl Into<PathBuf>) -> Self {
        let source_root = normalize_remote(source_root);
        let target_root = target_root.into();
        let base_name = source_root.rsplit('/').next().unwrap_or_default();
        let mirror_root = if base_name.is_empty() {
            target_root.clone()
        } else {
            target_root.join(base_name)
        };
        Self {
            source_root,
            target_root,
            mirror_root,
        }
    }

    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// 远端路径相对源目录的部分，不在源目录下时返回 None
    pub fn relative(&self, remote: &str) -> Option<String> {
        let remote = normalize_remote(remote);
        if self.source_root == "/" {
            return Some(remote.trim_start_matches('/').to_string());
        }
        if remote == self.source_root {
            return Some(String::new());
        }
        remote
            .strip_prefix(&self.source_root)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
    }

    /// 远端目录对应的本地目录
    pub fn local_dir_for(&self, remote_dir: &str) -> Option<PathBuf> {
        let relative = self.relative(remote_dir)?;
        Some(
            relative
                .split('/')
                .filter(|s| !s.is_empty())
                .fold(self.mirror_root.clone(), |acc, part| acc.join(part)),
        )
    }

    /// 节点的本地路径：视频加 `.strm`，元数据保持原名，目录映射为目录
    pub fn local_path_for(&self, node: &RemoteNode) -> Option<PathBuf> {
        if !node.is_resolved() {
            return None;
        }
        let dir = self.local_dir_for(&node.remote_path)?;
        if node.is_dir() {
            Some(dir.join(&node.file_name))
        } else if node.is_video {
            Some(dir.join(format!("{}.{}", node.file_name, POINTER_EXT)))
        } else {
            Some(dir.join(&node.file_name))
        }
    }

    /// 本地目录反推远端目录
    pub fn remote_dir_for_local(&self, local_dir: &Path) -> Option<String> {
        let relative = local_dir.strip_prefix(&self.mirror_root).ok()?;
        let mut remote = self.source_root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => remote = join_remote(&remote, &part.to_string_lossy()),
                _ => return None,
            }
        }
        Some(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new("/Movies", "/media")
    }

    #[test]
    fn test_mirror_root_uses_source_basename() {
        assert_eq!(mapper().mirror_root(), Path::new("/media/Movies"));
        assert_eq!(PathMapper::new("/", "/media").mirror_root(), Path::new("/media"));
    }

    #[test]
    fn test_local_paths() {
        let m = mapper();
        let mut video = RemoteNode::file("1", "10", "A.mkv");
        video.remote_path = "/Movies/2024".to_string();
        video.is_video = true;
        assert_eq!(
            m.local_path_for(&video),
            Some(PathBuf::from("/media/Movies/2024/A.mkv.strm"))
        );

        let mut meta = RemoteNode::file("2", "10", "A.nfo");
        meta.remote_path = "/Movies".to_string();
        meta.is_meta = true;
        assert_eq!(m.local_path_for(&meta), Some(PathBuf::from("/media/Movies/A.nfo")));

        let mut dir = RemoteNode::dir("10", "0", "2024");
        dir.remote_path = "/Movies".to_string();
        assert_eq!(m.local_path_for(&dir), Some(PathBuf::from("/media/Movies/2024")));

        let unresolved = RemoteNode::file("3", "11", "B.mkv");
        assert_eq!(m.local_path_for(&unresolved), None);
    }

    #[test]
    fn test_paths_outside_source_root() {
        let m = mapper();
        assert_eq!(m.relative("/Movies2/A"), None);
        assert_eq!(m.relative("/Movies/A"), Some("A".to_string()));
        assert_eq!(m.local_dir_for("/TV"), None);
    }

    #[test]
    fn test_remote_dir_for_local() {
        let m = mapper();
        assert_eq!(
            m.remote_dir_for_local(Path::new("/media/Movies/A/extrafanart")),
            Some("/Movies/A/extrafanart".to_string())
        );
        assert_eq!(m.remote_dir_for_local(Path::new("/media/Movies")), Some("/Movies".to_string()));
        assert_eq!(m.remote_dir_for_local(Path::new("/other")), None);
    }
}
