use std::sync::{Arc, RwLock};

use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::transport::{HttpTransport, TransportError};

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// JSON 解析錯誤。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Transport(#[from] TransportError),
    #[error("Unexpected directory status: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("Directory response is not a JSON object")]
    NotAnObject,
    #[error("Lock poisoned")]
    LockPoisoned,
}

type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// 目錄中常用的端點名稱。
pub mod endpoints {
    pub const NEW_NONCE: &str = "newNonce";
    pub const NEW_ACCOUNT: &str = "newAccount";
    pub const NEW_ORDER: &str = "newOrder";
    pub const REVOKE_CERT: &str = "revokeCert";
    pub const KEY_CHANGE: &str = "keyChange";
}

/// ACME 目錄解析器：第一次使用時抓取端點表並快取，之後只在 [`Directory::refresh`] 時重新抓取。
#[derive(Debug)]
pub struct Directory {
    url: String,
    transport: Arc<dyn HttpTransport>,
    cache: RwLock<Option<Map<String, Value>>>,
}

impl Directory {
    pub fn new(url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            url: url.into(),
            transport,
            cache: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 將端點名稱解析為 URL。
    ///
    /// 名稱不存在、或值不是非空字串時回傳 `Ok(None)`；
    /// 抓取或解析目錄失敗則回傳錯誤，不重試。
    pub fn resolve(&self, name: &str) -> DirectoryResult<Option<String>> {
        self.with_endpoints(|map| {
            map.get(name)
                .and_then(Value::as_str)
                .filter(|url| !url.is_empty())
                .map(ToString::to_string)
        })
    }

    /// 目錄 `meta.termsOfService` 欄位。
    pub fn terms_of_service(&self) -> DirectoryResult<Option<String>> {
        self.with_endpoints(|map| {
            map.get("meta")
                .and_then(|meta| meta.get("termsOfService"))
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
    }

    /// 捨棄快取並重新抓取。
    pub fn refresh(&self) -> DirectoryResult<()> {
        let fresh = self.fetch()?;
        *self.cache.write().map_err(|_| DirectoryError::LockPoisoned)? = Some(fresh);
        Ok(())
    }

    fn with_endpoints<T>(&self, f: impl FnOnce(&Map<String, Value>) -> T) -> DirectoryResult<T> {
        {
            let cache = self.cache.read().map_err(|_| DirectoryError::LockPoisoned)?;
            if let Some(map) = cache.as_ref() {
                return Ok(f(map));
            }
        }

        // 持有寫鎖抓取，避免並行的首次解析重複請求
        let mut cache = self.cache.write().map_err(|_| DirectoryError::LockPoisoned)?;
        if cache.is_none() {
            *cache = Some(self.fetch()?);
        }
        match cache.as_ref() {
            Some(map) => Ok(f(map)),
            None => Err(DirectoryError::NotAnObject),
        }
    }

    fn fetch(&self) -> DirectoryResult<Map<String, Value>> {
        debug!(url = %self.url, "fetching ACME directory");
        let response = self.transport.get(&self.url)?;
        if !response.status.is_success() {
            return Err(DirectoryError::UnexpectedStatus(response.status));
        }
        match response.json::<Value>()? {
            Value::Object(map) => {
                info!(url = %self.url, endpoints = map.len(), "loaded ACME directory");
                Ok(map)
            }
            _ => Err(DirectoryError::NotAnObject),
        }
    }
}
