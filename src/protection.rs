use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    encoding::Base64,
    jwk::Jwk,
    nonce::{NonceError, NonceSource},
};

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Nonce 相關錯誤
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 保護頭如何指出簽名金鑰：嵌入公鑰，或引用伺服器指派的帳戶 ID。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBinding {
    Jwk(Jwk),
    Kid(String),
}

/// 用於生成保護頭（Protected Header）的結構體。
///
/// 每次 [`Protection::create_header`] 都會從 nonce 來源取出恰好一個 nonce；
/// 以 [`Protection::without_nonce`] 建立時（金鑰輪替的內層 JWS）則完全不帶 nonce。
pub struct Protection<'a> {
    nonce: Option<&'a dyn NonceSource>,
    alg: &'static str,
    binding: KeyBinding,
}

/// 表示數字簽章保護頭部的資料結構。
///
/// `jwk` 與 `kid` 恰有其一；兩種模式都帶 `url`，把簽名綁定到目標端點。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 用於防止重放攻擊的隨機數，金鑰輪替的內層 JWS 不帶此欄位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// 請求目標 URL
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    /// 將 [`ProtectedHeader`] 序列化後轉換為 Base64 格式。
    pub fn to_base64(&self) -> Result<Base64> {
        Ok(Base64::new(serde_json::to_vec(self)?))
    }
}

impl<'a> Protection<'a> {
    /// 建立一個新的 [`Protection`] 實例。
    ///
    /// `alg` 應來自簽名金鑰本身（[`crate::key_pair::KeyPair::jws_alg`]），
    /// 因此不會有未知演算法。
    pub fn new(nonce: &'a dyn NonceSource, alg: &'static str, binding: KeyBinding) -> Self {
        Self {
            nonce: Some(nonce),
            alg,
            binding,
        }
    }

    /// 不取 nonce 的保護頭，RFC 8555 §7.3.5 要求 key-change 內層 JWS 省略 `nonce`。
    pub fn without_nonce(alg: &'static str, binding: KeyBinding) -> Self {
        Self {
            nonce: None,
            alg,
            binding,
        }
    }

    /// 取出一個 nonce（若有來源）並生成 [`ProtectedHeader`]。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = match self.nonce {
            Some(source) => Some(source.consume()?),
            None => None,
        };

        let (jwk, kid) = match &self.binding {
            KeyBinding::Jwk(jwk) => (Some(jwk.clone()), None),
            KeyBinding::Kid(kid) => (None, Some(kid.clone())),
        };

        Ok(ProtectedHeader {
            alg: self.alg.to_string(),
            nonce,
            url: url.into(),
            jwk,
            kid,
        })
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}
