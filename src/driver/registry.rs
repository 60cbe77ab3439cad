//! 驱动注册表 - 按账号 ID 持有驱动实例，启动时构建一次

use super::{Driver, LocalDriver, OpenListDriver, Pan115Driver, RateLimitedDispatcher, WebDavDriver};
use crate::config::AccountConfig;
use crate::db::BackendType;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PAN115_DEFAULT_BASE_URL: &str = "https://proapi.115.com";

#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<i64, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据账号配置创建全部驱动
    pub fn from_accounts(accounts: &[AccountConfig], max_concurrent: usize) -> Result<Self> {
        let mut registry = Self::new();
        for account in accounts {
            let driver = create_driver(account, max_concurrent)?;
            registry.insert(account.id, driver);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, account_id: i64, driver: Arc<dyn Driver>) {
        self.drivers.insert(account_id, driver);
    }

    pub fn get(&self, account_id: i64) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&account_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// 根据账号配置创建驱动实例
pub fn create_driver(account: &AccountConfig, max_concurrent: usize) -> Result<Arc<dyn Driver>> {
    let dispatcher = || -> Result<Arc<RateLimitedDispatcher>> {
        Ok(Arc::new(RateLimitedDispatcher::new(
            Duration::from_millis(account.min_interval_ms),
            max_concurrent,
        )?))
    };

    match account.backend {
        BackendType::Local => {
            let root = account
                .root
                .as_ref()
                .ok_or_else(|| anyhow!("Local account {} requires root", account.id))?;
            tracing::info!("初始化本地驱动: {}", root);
            Ok(Arc::new(LocalDriver::new(root)?) as Arc<dyn Driver>)
        }
        BackendType::OpenList => {
            let base_url = account
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("OpenList account {} requires baseUrl", account.id))?;
            let token = account
                .token
                .as_ref()
                .ok_or_else(|| anyhow!("OpenList account {} requires token", account.id))?;
            tracing::info!("初始化 OpenList 驱动: {}", base_url);
            Ok(Arc::new(OpenListDriver::new(base_url, token, dispatcher()?)?) as Arc<dyn Driver>)
        }
        BackendType::WebDav => {
            let endpoint = account
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("WebDAV account {} requires baseUrl", account.id))?;
            tracing::info!("初始化 WebDAV 驱动: endpoint={}, root={:?}", endpoint, account.root);
            Ok(Arc::new(WebDavDriver::new(
                endpoint,
                account.username.as_deref(),
                account.password.as_deref(),
                account.root.as_deref(),
            )?) as Arc<dyn Driver>)
        }
        BackendType::Pan115 => {
            let token = account
                .token
                .as_ref()
                .ok_or_else(|| anyhow!("115 account {} requires token", account.id))?;
            let base_url = account.base_url.as_deref().unwrap_or(PAN115_DEFAULT_BASE_URL);
            tracing::info!("初始化 115 驱动: user={:?}", account.user_id);
            Ok(Arc::new(Pan115Driver::new(
                base_url,
                token,
                account.user_id.clone(),
                dispatcher()?,
            )?) as Arc<dyn Driver>)
        }
    }
}
