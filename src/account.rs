//! ACME 帳戶的記憶體模型與持久化。

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    encoding::{Base64, DecodeError},
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    storage::{Storage, StorageError},
};

/// 錯誤類型，用於描述帳戶載入與儲存時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Key error: {0}")]
    KeyError(#[from] KeyError),
    #[error("Invalid private key encoding: {0}")]
    KeyEncoding(#[from] DecodeError),
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AccountError`].
pub type Result<T> = std::result::Result<T, AccountError>;

/// 表示 ACME 帳戶。
///
/// `id` 在伺服器以 `Location` 標頭回傳帳戶 URL 之前為空字串，
/// 之後才是權威身分並作為 Key-ID 模式的 `kid`。
#[derive(Clone)]
pub struct Account {
    /// ACME 帳戶 URL。
    pub id: String,
    /// `mailto:` 聯絡方式。
    pub contact: Vec<String>,
    /// 帳戶使用的密鑰對。
    pub signer: Arc<KeyPair>,
    /// 此帳戶建立過的訂單 URL。
    pub orders: Vec<String>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("contact", &self.contact)
            .field("alg", &self.signer.algorithm())
            .field("orders", &self.orders)
            .finish()
    }
}

/// 帳戶檔案的 JSON 格式。私鑰為 DER 的標準 Base64，`KeyType` 決定 DER 的解析方式。
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Contact", default)]
    pub contact: Vec<String>,
    #[serde(rename = "Orders", default)]
    pub orders: Vec<String>,
    #[serde(rename = "PrivateKey")]
    pub private_key: String,
    #[serde(rename = "KeyType")]
    pub key_type: String,
}

impl Account {
    /// 以既有的簽名金鑰建立尚未註冊的帳戶。
    pub fn new(contact: Vec<String>, signer: Arc<KeyPair>) -> Self {
        Self {
            id: String::new(),
            contact,
            signer,
            orders: Vec::new(),
        }
    }

    /// 產生新金鑰並建立尚未註冊的帳戶。
    pub fn generate(contact: Vec<String>, alg: KeyAlgorithm) -> Result<Self> {
        Ok(Self::new(contact, Arc::new(KeyPair::generate(alg)?)))
    }

    /// 是否已由伺服器指派 ID。
    pub fn is_registered(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn to_record(&self) -> Result<AccountRecord> {
        Ok(AccountRecord {
            id: self.id.clone(),
            contact: self.contact.clone(),
            orders: self.orders.clone(),
            private_key: Base64::new(self.signer.to_der()?).as_standard(),
            key_type: self.signer.algorithm().to_string(),
        })
    }

    pub fn from_record(record: AccountRecord) -> Result<Self> {
        let alg: KeyAlgorithm = record.key_type.parse()?;
        let der = Base64::from_encoded(&record.private_key)?;
        let signer = KeyPair::from_der(alg, der.as_bytes())?;
        Ok(Self {
            id: record.id,
            contact: record.contact,
            signer: Arc::new(signer),
            orders: record.orders,
        })
    }

    /// 將帳戶寫入 `storage` 的 `key`。
    pub fn save(&self, storage: &dyn Storage, key: &str) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.to_record()?)?;
        storage.write_file(key, &data)?;
        debug!(key, id = %self.id, "saved account");
        Ok(())
    }

    /// 從 `storage` 的 `key` 讀回帳戶。
    pub fn restore(storage: &dyn Storage, key: &str) -> Result<Self> {
        let record: AccountRecord = serde_json::from_slice(&storage.read_file(key)?)?;
        Self::from_record(record)
    }
}
