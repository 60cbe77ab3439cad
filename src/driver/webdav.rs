use super::{Driver, DriverError, DriverResult, PointerOptions, PointerPolicy};
use crate::core::node::{join_remote, normalize_remote, RemoteNode};
use crate::core::pointer::PointerTokens;
use crate::db::BackendType;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{Metakey, Operator};

pub struct WebDavDriver {
    operator: Operator,
    name: String,
}

/// opendal 的目录路径：相对根目录，以 `/` 结尾
fn dav_dir(path: &str) -> String {
    let trimmed = normalize_remote(path).trim_matches('/').to_string();
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}

impl WebDavDriver {
    pub fn new(
        endpoint: &str,
        username: Option<&str>,
        password: Option<&str>,
        root: Option<&str>,
    ) -> DriverResult<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default().endpoint(endpoint);
        if let Some(username) = username {
            builder = builder.username(username);
        }
        if let Some(password) = password {
            builder = builder.password(password);
        }
        if let Some(r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?.finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }
}

#[async_trait]
impl Driver for WebDavDriver {
    fn backend(&self) -> BackendType {
        BackendType::WebDav
    }

    fn pointer_policy(&self) -> PointerPolicy {
        PointerPolicy {
            validate_content: true,
            signed: false,
            user_id: None,
        }
    }

    async fn list_children(&self, parent_path: &str, _parent_id: &str) -> DriverResult<Vec<RemoteNode>> {
        let parent = normalize_remote(parent_path);
        let mut lister = self
            .operator
            .lister_with(&dav_dir(&parent))
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        let mut nodes = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let full = normalize_remote(entry.path());
            // 列表结果可能包含目录自身
            if full == parent {
                continue;
            }

            let meta = entry.metadata();
            let name = entry.name().trim_end_matches('/').to_string();
            let id = join_remote(&parent, &name);
            let mut node = if meta.is_dir() {
                RemoteNode::dir(id, parent.clone(), name)
            } else {
                RemoteNode::file(id, parent.clone(), name)
            };
            node.remote_path = parent.clone();
            node.file_size = if meta.is_dir() { 0 } else { meta.content_length() };
            node.mtime = meta.last_modified().map_or(0, |t| t.timestamp());
            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn resolve_path_id(&self, path: &str) -> DriverResult<String> {
        let path = normalize_remote(path);
        match self.operator.stat(&dav_dir(&path)).await {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Err(DriverError::NotFound(path)),
            Err(e) => Err(e.into()),
        }
    }

    fn format_pointer(&self, node: &RemoteNode, options: &PointerOptions) -> String {
        PointerTokens::new(self.backend(), &node.extension())
            .with_pick_code(node.file_id.clone())
            .with_path(options.embed_path.then(|| node.full_remote_path()))
            .to_url(&options.base_url)
    }

    async fn create_remote_dir_chain(&self, path: &str) -> DriverResult<(String, String)> {
        let path = normalize_remote(path);
        let mut current = String::from("/");
        for part in path.split('/').filter(|s| !s.is_empty()) {
            current = join_remote(&current, part);
            match self.operator.stat(&dav_dir(&current)).await {
                Ok(_) => continue,
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                    tracing::debug!("创建远端目录: {}", current);
                    self.operator.create_dir(&dav_dir(&current)).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok((path.clone(), path))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
