pub mod http;
pub mod local;
pub mod openlist;
pub mod pan115;
pub mod registry;
pub mod webdav;

use crate::core::node::RemoteNode;
use crate::db::BackendType;
use async_trait::async_trait;
use thiserror::Error;

pub use http::{is_retryable_status, Backoff, RateLimitedDispatcher, Transport};
pub use local::LocalDriver;
pub use openlist::OpenListDriver;
pub use pan115::Pan115Driver;
pub use registry::DriverRegistry;
pub use webdav::WebDavDriver;

// ============ 公共常量 ============

/// 单次请求超时（秒）
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// 驱动错误
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("请求失败: {0}")]
    Request(#[from] reqwest::Error),
    #[error("接口返回 {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("接口错误: {0}")]
    Remote(String),
    #[error("路径不存在: {0}")]
    NotFound(String),
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebDAV 错误: {0}")]
    Dav(#[from] opendal::Error),
    #[error("无效地址: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0} 不支持 {1}")]
    Unsupported(BackendType, &'static str),
    #[error("操作已取消")]
    Cancelled,
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// 遍历策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalStrategy {
    /// 逐层列目录
    Recursive,
    /// 一次列出全部后代文件，再按父目录补路径
    Bulk,
}

/// STRM 内容里哪些字段由当前网盘决定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerPolicy {
    /// 为 false 时本地文件存在即视为最新
    pub validate_content: bool,
    /// 是否携带签名
    pub signed: bool,
    /// 需要写入的用户标识
    pub user_id: Option<String>,
}

/// 生成 STRM 内容需要的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerOptions {
    pub base_url: String,
    pub embed_path: bool,
}

/// 路径链上的一段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub file_id: String,
    pub name: String,
}

/// 目录详情及其祖先链
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirDetail {
    pub file_id: String,
    pub name: String,
    /// 从网盘根到父目录，不含自身
    pub ancestors: Vec<PathSegment>,
}

impl DirDetail {
    /// 包含自身的完整链
    pub fn chain(&self) -> Vec<PathSegment> {
        let mut chain = self.ancestors.clone();
        chain.push(PathSegment {
            file_id: self.file_id.clone(),
            name: self.name.clone(),
        });
        chain
    }
}

/// 网盘驱动接口
///
/// 所有方法出错时直接返回，重试由传输层负责。
#[async_trait]
pub trait Driver: Send + Sync {
    fn backend(&self) -> BackendType;

    fn strategy(&self) -> TraversalStrategy {
        TraversalStrategy::Recursive
    }

    fn pointer_policy(&self) -> PointerPolicy;

    /// 列出一层子节点
    async fn list_children(&self, parent_path: &str, parent_id: &str) -> DriverResult<Vec<RemoteNode>>;

    /// 路径转 ID
    async fn resolve_path_id(&self, path: &str) -> DriverResult<String>;

    /// 生成 STRM 内容，相同输入必须得到相同输出
    fn format_pointer(&self, node: &RemoteNode, options: &PointerOptions) -> String;

    /// 逐级创建缺失的远端目录，返回 (ID, 规范路径)
    async fn create_remote_dir_chain(&self, path: &str) -> DriverResult<(String, String)>;

    /// 根目录下的文件总数
    async fn count_all(&self, _root_id: &str) -> DriverResult<u64> {
        Err(DriverError::Unsupported(self.backend(), "CountAll"))
    }

    /// 列出下一层子目录
    async fn list_descendant_dirs(&self, _id: &str) -> DriverResult<Vec<RemoteNode>> {
        Err(DriverError::Unsupported(self.backend(), "ListDescendantDirs"))
    }

    /// 分页列出全部后代文件
    async fn list_descendant_files(
        &self,
        _root_id: &str,
        _offset: u64,
        _limit: u64,
    ) -> DriverResult<Vec<RemoteNode>> {
        Err(DriverError::Unsupported(self.backend(), "ListDescendantFiles"))
    }

    /// 目录详情与祖先链
    async fn detail_with_ancestors(&self, _id: &str) -> DriverResult<DirDetail> {
        Err(DriverError::Unsupported(self.backend(), "DetailWithAncestors"))
    }

    /// 驱动名称（用于日志）
    fn name(&self) -> &str;
}

/// 解析各种时间格式为 Unix 秒
pub(crate) fn parse_mtime(value: &str) -> i64 {
    if let Ok(secs) = value.parse::<i64>() {
        return secs;
    }
    chrono::DateTime::parse_from_rfc3339(value)
        .or_else(|_| chrono::DateTime::parse_from_rfc2822(value))
        .map(|t| t.timestamp())
        .unwrap_or(0)
}
