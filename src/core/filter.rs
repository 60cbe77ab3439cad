//! 名称排除与文件分类

use super::node::file_extension;
use crate::config::SyncTargetConfig;
use regex::Regex;
use std::collections::HashSet;

/// 文件分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Video,
    Meta,
    Rejected,
}

/// 排除规则（支持 `*` / `?` 通配，大小写不敏感）
#[derive(Debug, Clone)]
enum NamePattern {
    Exact(String),
    Glob(Regex),
}

impl NamePattern {
    fn new(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() {
            return None;
        }
        if pattern.contains('*') || pattern.contains('?') {
            let regex_pattern = regex::escape(&pattern)
                .replace("\\*", ".*")
                .replace("\\?", ".");
            match Regex::new(&format!("^{}$", regex_pattern)) {
                Ok(re) => return Some(NamePattern::Glob(re)),
                Err(e) => tracing::warn!("无效的排除规则 {}: {}", pattern, e),
            }
        }
        Some(NamePattern::Exact(pattern))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(p) => *p == name,
            NamePattern::Glob(re) => re.is_match(name),
        }
    }
}

/// 节点过滤器
#[derive(Debug, Clone)]
pub struct NodeFilter {
    exclude: Vec<NamePattern>,
    video_ext: HashSet<String>,
    meta_ext: HashSet<String>,
    min_video_size: u64,
}

fn ext_set(exts: &[String]) -> HashSet<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

impl NodeFilter {
    pub fn new(exclude_names: &[String], video_ext: &[String], meta_ext: &[String], min_video_size: u64) -> Self {
        Self {
            exclude: exclude_names.iter().filter_map(|p| NamePattern::new(p)).collect(),
            video_ext: ext_set(video_ext),
            meta_ext: ext_set(meta_ext),
            min_video_size,
        }
    }

    pub fn from_target(target: &SyncTargetConfig) -> Self {
        Self::new(
            &target.exclude_names,
            &target.video_ext,
            &target.meta_ext,
            target.min_video_size,
        )
    }

    /// 名称是否命中排除规则
    pub fn is_excluded(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.exclude.iter().any(|p| p.matches(&name))
    }

    pub fn is_meta_ext(&self, ext: &str) -> bool {
        self.meta_ext.contains(&ext.to_lowercase())
    }

    /// 按扩展名和大小分类
    pub fn classify(&self, name: &str, size: u64) -> Classification {
        let ext = file_extension(name);
        if self.video_ext.contains(&ext) {
            if size >= self.min_video_size {
                Classification::Video
            } else {
                Classification::Rejected
            }
        } else if self.meta_ext.contains(&ext) {
            Classification::Meta
        } else {
            Classification::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn filter() -> NodeFilter {
        NodeFilter::new(
            &strings(&["Excluded", "*sample*", "extra?"]),
            &strings(&["mkv", ".MP4"]),
            &strings(&["nfo", "jpg"]),
            100,
        )
    }

    #[test]
    fn test_exclusion_patterns() {
        let f = filter();
        assert!(f.is_excluded("Excluded"));
        assert!(f.is_excluded("excluded"));
        assert!(f.is_excluded("Movie.Sample.mkv"));
        assert!(f.is_excluded("Extra1"));
        assert!(!f.is_excluded("Extras12"));
        assert!(!f.is_excluded("Movies"));
    }

    #[test]
    fn test_classification() {
        let f = filter();
        assert_eq!(f.classify("A.mkv", 100), Classification::Video);
        assert_eq!(f.classify("A.MP4", 500), Classification::Video);
        assert_eq!(f.classify("A.mkv", 99), Classification::Rejected);
        assert_eq!(f.classify("A.nfo", 0), Classification::Meta);
        assert_eq!(f.classify("A.txt", 1000), Classification::Rejected);
        assert!(f.is_meta_ext("JPG"));
    }
}
