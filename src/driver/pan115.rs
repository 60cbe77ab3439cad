use super::{
    Driver, DriverError, DriverResult, DirDetail, PathSegment, PointerOptions, PointerPolicy,
    RateLimitedDispatcher, TraversalStrategy,
};
use crate::core::node::{join_remote, normalize_remote, RemoteNode};
use crate::core::pointer::PointerTokens;
use crate::db::BackendType;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use url::Url;

/// 115 根目录 ID
pub const ROOT_ID: &str = "0";
/// 单页最大条数
const PAGE_LIMIT: u64 = 1150;

/// 接口里的数字经常以字符串返回
fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_i64().unwrap_or(0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    state: bool,
    #[serde(default, alias = "error")]
    message: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    count: u64,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FileItem {
    #[serde(deserialize_with = "lenient_string")]
    fid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pid: String,
    /// "0" 目录，"1" 文件
    #[serde(default, deserialize_with = "lenient_string")]
    fc: String,
    #[serde(rename = "fn")]
    name: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    fs: u64,
    #[serde(default, deserialize_with = "lenient_i64")]
    upt: i64,
    #[serde(default)]
    pc: String,
    #[serde(default)]
    sha1: String,
    #[serde(default)]
    thumb: String,
}

#[derive(Debug, Deserialize)]
struct PathItem {
    #[serde(deserialize_with = "lenient_string")]
    file_id: String,
    #[serde(default)]
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct FolderInfo {
    #[serde(default, deserialize_with = "lenient_u64")]
    count: u64,
    #[serde(default)]
    file_name: String,
    #[serde(deserialize_with = "lenient_string")]
    file_id: String,
    #[serde(default)]
    paths: Vec<PathItem>,
}

#[derive(Debug, Deserialize)]
struct AddedFolder {
    #[serde(deserialize_with = "lenient_string")]
    file_id: String,
}

impl FileItem {
    fn into_node(self, parent_path: Option<&str>) -> RemoteNode {
        let is_dir = self.fc == "0";
        let mut node = if is_dir {
            RemoteNode::dir(self.fid, self.pid, self.name)
        } else {
            RemoteNode::file(self.fid, self.pid, self.name)
        };
        if let Some(parent) = parent_path {
            node.remote_path = normalize_remote(parent);
        }
        node.file_size = self.fs;
        node.mtime = self.upt;
        node.pick_code = self.pc;
        node.sha1 = self.sha1;
        node.thumb_url = self.thumb;
        node
    }
}

/// 115 开放平台
///
/// 原生 ID 寻址，单目录文件量大，用批量策略遍历。
pub struct Pan115Driver {
    http: Client,
    dispatcher: Arc<RateLimitedDispatcher>,
    base_url: Url,
    token: String,
    user_id: Option<String>,
    name: String,
}

impl Pan115Driver {
    pub fn new(
        base_url: &str,
        token: &str,
        user_id: Option<String>,
        dispatcher: Arc<RateLimitedDispatcher>,
    ) -> DriverResult<Self> {
        let base_url = Url::parse(base_url)?;
        let name = format!("pan115:{}", user_id.as_deref().unwrap_or("-"));
        Ok(Self {
            http: Client::new(),
            dispatcher,
            base_url,
            token: token.to_string(),
            user_id,
            name,
        })
    }

    fn check<T>(resp: ApiResponse<T>) -> DriverResult<(u64, Option<T>)> {
        if resp.state {
            Ok((resp.count, resp.data))
        } else {
            Err(DriverError::Remote(resp.message))
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> DriverResult<(u64, Option<T>)> {
        let request = self
            .http
            .get(self.base_url.join(endpoint)?)
            .bearer_auth(&self.token)
            .query(query)
            .build()?;
        Self::check(self.dispatcher.send_json(request).await?)
    }

    /// 一页文件列表，返回 (总数, 条目)
    async fn files_page(&self, query: Vec<(&str, String)>) -> DriverResult<(u64, Vec<FileItem>)> {
        let (count, data) = self.get::<Vec<FileItem>>("/open/ufile/files", &query).await?;
        Ok((count, data.unwrap_or_default()))
    }

    /// 翻页直到取完
    async fn list_all_pages(&self, cid: &str, only_dirs: bool) -> DriverResult<Vec<FileItem>> {
        let mut items = Vec::new();
        let mut offset = 0u64;
        loop {
            let mut query = vec![
                ("cid", cid.to_string()),
                ("offset", offset.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("show_dir", "1".to_string()),
                ("cur", "1".to_string()),
            ];
            if only_dirs {
                query.push(("nf", "1".to_string()));
            }
            let (count, page) = self.files_page(query).await?;
            let fetched = page.len() as u64;
            items.extend(page);
            offset += fetched;
            if fetched == 0 || offset >= count {
                break;
            }
        }
        Ok(items)
    }

    async fn folder_info(&self, query: &[(&str, String)]) -> DriverResult<FolderInfo> {
        let (_, data) = self.get::<FolderInfo>("/open/folder/get_info", query).await?;
        data.ok_or_else(|| DriverError::NotFound(format!("{:?}", query)))
    }
}

#[async_trait]
impl Driver for Pan115Driver {
    fn backend(&self) -> BackendType {
        BackendType::Pan115
    }

    fn strategy(&self) -> TraversalStrategy {
        TraversalStrategy::Bulk
    }

    fn pointer_policy(&self) -> PointerPolicy {
        PointerPolicy {
            validate_content: true,
            signed: false,
            user_id: self.user_id.clone(),
        }
    }

    async fn list_children(&self, parent_path: &str, parent_id: &str) -> DriverResult<Vec<RemoteNode>> {
        let items = self.list_all_pages(parent_id, false).await?;
        Ok(items
            .into_iter()
            .map(|item| item.into_node(Some(parent_path)))
            .collect())
    }

    async fn resolve_path_id(&self, path: &str) -> DriverResult<String> {
        let path = normalize_remote(path);
        if path == "/" {
            return Ok(ROOT_ID.to_string());
        }
        match self.folder_info(&[("path", path.clone())]).await {
            Ok(info) => Ok(info.file_id),
            Err(DriverError::Remote(msg)) => Err(DriverError::NotFound(format!("{}: {}", path, msg))),
            Err(e) => Err(e),
        }
    }

    fn format_pointer(&self, node: &RemoteNode, options: &PointerOptions) -> String {
        PointerTokens::new(self.backend(), &node.extension())
            .with_pick_code(node.pick_code.clone())
            .with_user_id(self.user_id.as_deref())
            .with_path(options.embed_path.then(|| node.full_remote_path()))
            .to_url(&options.base_url)
    }

    async fn create_remote_dir_chain(&self, path: &str) -> DriverResult<(String, String)> {
        let path = normalize_remote(path);
        let mut current_path = String::from("/");
        let mut current_id = ROOT_ID.to_string();

        for part in path.split('/').filter(|s| !s.is_empty()) {
            current_path = join_remote(&current_path, part);
            current_id = match self.resolve_path_id(&current_path).await {
                Ok(id) => id,
                Err(DriverError::NotFound(_)) => {
                    tracing::debug!("创建远端目录: {}", current_path);
                    let request = self
                        .http
                        .post(self.base_url.join("/open/folder/add")?)
                        .bearer_auth(&self.token)
                        .form(&[("pid", current_id.as_str()), ("file_name", part)])
                        .build()?;
                    let (_, data) = Self::check::<AddedFolder>(self.dispatcher.send_json(request).await?)?;
                    data.map(|f| f.file_id)
                        .ok_or_else(|| DriverError::Remote(format!("创建目录无返回: {}", current_path)))?
                }
                Err(e) => return Err(e),
            };
        }
        Ok((current_id, path))
    }

    async fn count_all(&self, root_id: &str) -> DriverResult<u64> {
        Ok(self.folder_info(&[("file_id", root_id.to_string())]).await?.count)
    }

    async fn list_descendant_dirs(&self, id: &str) -> DriverResult<Vec<RemoteNode>> {
        let items = self.list_all_pages(id, true).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.fc == "0")
            .map(|item| item.into_node(None))
            .collect())
    }

    async fn list_descendant_files(&self, root_id: &str, offset: u64, limit: u64) -> DriverResult<Vec<RemoteNode>> {
        let query = vec![
            ("cid", root_id.to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.min(PAGE_LIMIT).to_string()),
            ("show_dir", "0".to_string()),
            ("cur", "0".to_string()),
        ];
        let (_, items) = self.files_page(query).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.fc != "0")
            .map(|item| item.into_node(None))
            .collect())
    }

    async fn detail_with_ancestors(&self, id: &str) -> DriverResult<DirDetail> {
        let info = self.folder_info(&[("file_id", id.to_string())]).await?;
        Ok(DirDetail {
            file_id: info.file_id,
            name: info.file_name,
            ancestors: info
                .paths
                .into_iter()
                .map(|p| PathSegment {
                    file_id: p.file_id,
                    name: p.file_name,
                })
                .collect(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(server: &MockServer) -> Pan115Driver {
        let dispatcher = Arc::new(RateLimitedDispatcher::new(Duration::ZERO, 4).unwrap());
        Pan115Driver::new(&server.uri(), "tok", Some("u1".to_string()), dispatcher).unwrap()
    }

    #[tokio::test]
    async fn test_descendant_files_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/ufile/files"))
            .and(header("Authorization", "Bearer tok"))
            .and(query_param("cid", "10"))
            .and(query_param("cur", "0"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": true,
                "count": "1",
                "data": [
                    {"fid": "1", "pid": "12", "fc": "1", "fn": "A.mkv", "fs": "2048",
                     "upt": "1000", "pc": "abc", "sha1": "DEAD", "thumb": ""}
                ]
            })))
            .mount(&server)
            .await;

        let files = driver(&server).list_descendant_files("10", 0, 100).await.unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.file_id, "1");
        assert_eq!(file.parent_id, "12");
        assert_eq!(file.file_size, 2048);
        assert_eq!(file.mtime, 1000);
        assert_eq!(file.pick_code, "abc");
        assert!(!file.is_resolved());
    }

    #[tokio::test]
    async fn test_detail_with_ancestors_and_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/folder/get_info"))
            .and(query_param("file_id", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": true,
                "data": {
                    "count": 7, "file_name": "B", "file_id": 12,
                    "paths": [
                        {"file_id": 0, "file_name": "根目录"},
                        {"file_id": "10", "file_name": "Movies"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let driver = driver(&server);
        let detail = driver.detail_with_ancestors("12").await.unwrap();
        assert_eq!(detail.name, "B");
        let chain = detail.chain();
        let ids: Vec<&str> = chain.iter().map(|s| s.file_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "10", "12"]);
        assert_eq!(chain[1].name, "Movies");
        assert_eq!(driver.count_all("12").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failed_state_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/ufile/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": false, "message": "access token expired"
            })))
            .mount(&server)
            .await;

        let err = driver(&server).list_children("/", ROOT_ID).await.unwrap_err();
        assert!(matches!(err, DriverError::Remote(ref m) if m.contains("expired")));
    }

    #[test]
    fn test_pointer_uses_pick_code_and_user() {
        let dispatcher = Arc::new(RateLimitedDispatcher::new(Duration::ZERO, 1).unwrap());
        let driver = Pan115Driver::new("https://proapi.115.com", "tok", Some("u1".into()), dispatcher).unwrap();
        let mut node = RemoteNode::file("1", "10", "A.MKV");
        node.pick_code = "abc".to_string();
        node.remote_path = "/Movies".to_string();
        let content = driver.format_pointer(
            &node,
            &PointerOptions {
                base_url: "http://127.0.0.1:12333/".to_string(),
                embed_path: false,
            },
        );
        assert_eq!(content, "http://127.0.0.1:12333/pan115/url/video.mkv?pickcode=abc&userid=u1");
        assert_eq!(driver.pointer_policy().user_id.as_deref(), Some("u1"));
        assert_eq!(driver.strategy(), TraversalStrategy::Bulk);
    }
}
