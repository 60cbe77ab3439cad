use super::{
    parse_mtime, Driver, DriverError, DriverResult, PointerOptions, PointerPolicy,
    RateLimitedDispatcher,
};
use crate::core::node::{join_remote, normalize_remote, RemoteNode};
use crate::core::pointer::PointerTokens;
use crate::db::BackendType;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// OpenList 统一响应
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    content: Option<Vec<ObjInfo>>,
}

#[derive(Debug, Deserialize)]
struct ObjInfo {
    name: String,
    #[serde(default)]
    size: u64,
    is_dir: bool,
    #[serde(default)]
    modified: String,
    #[serde(default)]
    sign: String,
    #[serde(default)]
    thumb: String,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    path: &'a str,
    password: &'a str,
    page: u32,
    per_page: u32,
    refresh: bool,
}

#[derive(Debug, Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

/// OpenList / Alist 接口
///
/// 以完整路径作为节点标识，文件带签名。
pub struct OpenListDriver {
    http: Client,
    dispatcher: Arc<RateLimitedDispatcher>,
    base_url: Url,
    token: String,
    name: String,
}

impl OpenListDriver {
    pub fn new(base_url: &str, token: &str, dispatcher: Arc<RateLimitedDispatcher>) -> DriverResult<Self> {
        let base_url = Url::parse(base_url)?;
        let name = format!("openlist:{}", base_url);
        Ok(Self {
            http: Client::new(),
            dispatcher,
            base_url,
            token: token.to_string(),
            name,
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> DriverResult<Option<T>> {
        let request = self
            .http
            .post(self.base_url.join(endpoint)?)
            .header("Authorization", &self.token)
            .json(body)
            .build()?;
        let resp: ApiResponse<T> = self.dispatcher.send_json(request).await?;
        match resp.code {
            200 => Ok(resp.data),
            404 => Err(DriverError::NotFound(resp.message)),
            _ if resp.message.contains("not found") => Err(DriverError::NotFound(resp.message)),
            code => Err(DriverError::Remote(format!("{} ({})", resp.message, code))),
        }
    }

    async fn get_obj(&self, path: &str) -> DriverResult<ObjInfo> {
        self.post::<_, ObjInfo>("/api/fs/get", &PathRequest { path })
            .await?
            .ok_or_else(|| DriverError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl Driver for OpenListDriver {
    fn backend(&self) -> BackendType {
        BackendType::OpenList
    }

    fn pointer_policy(&self) -> PointerPolicy {
        PointerPolicy {
            validate_content: true,
            signed: true,
            user_id: None,
        }
    }

    async fn list_children(&self, parent_path: &str, _parent_id: &str) -> DriverResult<Vec<RemoteNode>> {
        let parent = normalize_remote(parent_path);
        let body = ListRequest {
            path: &parent,
            password: "",
            page: 1,
            per_page: 0,
            refresh: false,
        };
        let data: Option<ListData> = self.post("/api/fs/list", &body).await?;
        let content = data.and_then(|d| d.content).unwrap_or_default();

        Ok(content
            .into_iter()
            .map(|obj| {
                let id = join_remote(&parent, &obj.name);
                let mut node = if obj.is_dir {
                    RemoteNode::dir(id, parent.clone(), obj.name)
                } else {
                    RemoteNode::file(id, parent.clone(), obj.name)
                };
                node.remote_path = parent.clone();
                node.file_size = obj.size;
                node.mtime = parse_mtime(&obj.modified);
                node.sign = obj.sign;
                node.thumb_url = obj.thumb;
                node
            })
            .collect())
    }

    async fn resolve_path_id(&self, path: &str) -> DriverResult<String> {
        let path = normalize_remote(path);
        self.get_obj(&path).await?;
        Ok(path)
    }

    fn format_pointer(&self, node: &RemoteNode, options: &PointerOptions) -> String {
        PointerTokens::new(self.backend(), &node.extension())
            .with_pick_code(node.file_id.clone())
            .with_sign(&node.sign)
            .with_path(options.embed_path.then(|| node.full_remote_path()))
            .to_url(&options.base_url)
    }

    async fn create_remote_dir_chain(&self, path: &str) -> DriverResult<(String, String)> {
        let path = normalize_remote(path);
        let mut current = String::from("/");
        for part in path.split('/').filter(|s| !s.is_empty()) {
            current = join_remote(&current, part);
            match self.get_obj(&current).await {
                Ok(_) => continue,
                Err(DriverError::NotFound(_)) => {
                    tracing::debug!("创建远端目录: {}", current);
                    self.post::<_, serde_json::Value>("/api/fs/mkdir", &PathRequest { path: &current })
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((path.clone(), path))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(server: &MockServer) -> OpenListDriver {
        let dispatcher = Arc::new(RateLimitedDispatcher::new(Duration::ZERO, 4).unwrap());
        OpenListDriver::new(&server.uri(), "tok", dispatcher).unwrap()
    }

    #[tokio::test]
    async fn test_list_children_maps_objects() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/fs/list"))
            .and(header("Authorization", "tok"))
            .and(body_partial_json(serde_json::json!({"path": "/Movies"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200,
                "message": "success",
                "data": {
                    "content": [
                        {"name": "A.mkv", "size": 2048, "is_dir": false,
                         "modified": "1970-01-01T00:16:40Z", "sign": "s1", "thumb": ""},
                        {"name": "Sub", "size": 0, "is_dir": true,
                         "modified": "1970-01-01T00:00:00Z", "sign": "", "thumb": ""}
                    ],
                    "total": 2
                }
            })))
            .mount(&server)
            .await;

        let nodes = driver(&server).list_children("/Movies/", "/Movies").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].file_id, "/Movies/A.mkv");
        assert_eq!(nodes[0].mtime, 1000);
        assert_eq!(nodes[0].sign, "s1");
        assert_eq!(nodes[0].remote_path, "/Movies");
        assert!(nodes[1].is_dir());
    }

    #[tokio::test]
    async fn test_api_error_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/fs/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 500, "message": "object not found", "data": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fs/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 401, "message": "token is invalidated", "data": null
            })))
            .mount(&server)
            .await;

        let driver = driver(&server);
        assert!(matches!(
            driver.resolve_path_id("/missing").await,
            Err(DriverError::NotFound(_))
        ));
        assert!(matches!(
            driver.list_children("/", "/").await,
            Err(DriverError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn test_create_dir_chain_only_creates_missing_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/fs/get"))
            .and(body_partial_json(serde_json::json!({"path": "/Movies"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200, "message": "success",
                "data": {"name": "Movies", "size": 0, "is_dir": true, "modified": ""}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fs/get"))
            .and(body_partial_json(serde_json::json!({"path": "/Movies/extrafanart"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 404, "message": "object not found", "data": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/fs/mkdir"))
            .and(body_partial_json(serde_json::json!({"path": "/Movies/extrafanart"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 200, "message": "success", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (id, canonical) = driver(&server)
            .create_remote_dir_chain("Movies/extrafanart/")
            .await
            .unwrap();
        assert_eq!(id, "/Movies/extrafanart");
        assert_eq!(canonical, "/Movies/extrafanart");
    }

    #[test]
    fn test_pointer_carries_sign() {
        let dispatcher = Arc::new(RateLimitedDispatcher::new(Duration::ZERO, 1).unwrap());
        let driver = OpenListDriver::new("http://alist:5244", "tok", dispatcher).unwrap();
        let mut node = RemoteNode::file("/Movies/A.mkv", "/Movies", "A.mkv");
        node.remote_path = "/Movies".to_string();
        node.sign = "abc=:0".to_string();
        let content = driver.format_pointer(
            &node,
            &PointerOptions {
                base_url: "http://127.0.0.1:12333".to_string(),
                embed_path: true,
            },
        );
        let tokens = PointerTokens::parse(&content).unwrap();
        assert_eq!(tokens.sign.as_deref(), Some("abc=:0"));
        assert_eq!(tokens.path.as_deref(), Some("/Movies/A.mkv"));
        assert_eq!(tokens.backend, "openlist");
    }
}
