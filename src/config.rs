use std::{fs, io, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::poll::PollPolicy;

/// 常見 CA 的 ACME 目錄 URL。
pub mod directories {
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
    /// 本機 Pebble 測試伺服器的預設位址。
    pub const PEBBLE: &str = "https://localhost:14000/dir";
}

/// 設定錯誤，永遠不會被重試。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Directory URL must not be empty")]
    EmptyDirectoryUrl,
    #[error("Failed to read config file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// 單一客戶端會話的設定。
///
/// 可直接以 `with_*` 方法鏈式建構，也可用 [`ClientConfig::from_file`] 從 JSON 檔載入；
/// 檔案中省略的欄位沿用 [`Default`] 的值。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    /// ACME 目錄 URL，不可為空。
    pub directory_url: String,
    /// 額外信任的 CA 根憑證 PEM 檔。
    pub ca_roots: Vec<PathBuf>,
    /// 讀取資源時是否使用已簽名的 POST-as-GET 取代匿名 GET。
    pub post_as_get: bool,
    pub user_agent: String,
    /// HTTP 逾時，`None` 表示沿用傳輸層預設值。
    #[serde(with = "optional_secs")]
    pub timeout: Option<Duration>,
    /// 狀態輪詢的預設次數與間隔。
    pub poll: PollPolicy,
    /// 新帳戶的預設聯絡方式。
    pub contact: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: directories::LETS_ENCRYPT_STAGING.to_string(),
            ca_roots: Vec::new(),
            post_as_get: true,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: None,
            poll: PollPolicy::default(),
            contact: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// 以指定目錄 URL 建立設定，其餘欄位使用預設值。
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            ..Self::default()
        }
    }

    /// 從 JSON 檔載入設定並驗證。
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory_url.trim().is_empty() {
            return Err(ConfigError::EmptyDirectoryUrl);
        }
        Ok(())
    }

    pub fn with_ca_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_roots.push(path.into());
        self
    }

    pub fn with_post_as_get(mut self, enabled: bool) -> Self {
        self.post_as_get = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_contact(mut self, contact: Vec<String>) -> Self {
        self.contact = contact;
        self
    }
}

/// 設定檔中的逾時以秒數表示。
mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
