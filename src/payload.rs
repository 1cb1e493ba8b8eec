use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{encoding::Base64, jwk::Jwk, order::Identifier};

/// 載荷驗證失敗的原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Contact information is required")]
    MissingContact,
    #[error("Terms of service must be agreed")]
    TermsNotAgreed,
    #[error("At least one identifier is required")]
    NoIdentifiers,
    #[error("Unsupported identifier type: {0}")]
    UnsupportedIdentifier(String),
    #[error("Invalid identifier value: {0:?}")]
    InvalidIdentifier(String),
    #[error("Empty field: {0}")]
    EmptyField(&'static str),
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 實作者必須可序列化，並提供自定義的驗證邏輯；
/// [`PayloadT::to_bytes`] 會先驗證再序列化，因此不合法的載荷不會被簽名送出。
pub trait PayloadT: Serialize {
    /// 驗證後序列化為 JWS 載荷位元組。
    fn to_bytes(&self) -> Result<Vec<u8>, PayloadBytesError> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// [`PayloadT::to_bytes`] 的錯誤：驗證或序列化失敗。
#[derive(Debug, Error)]
pub enum PayloadBytesError {
    #[error("Invalid payload: {0}")]
    Invalid(#[from] PayloadError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 補上 `mailto:` 前綴；已有任何 URI scheme 的聯絡方式原樣保留。
fn normalize_contact(contact: &str) -> String {
    if contact.contains(':') {
        contact.to_string()
    } else {
        format!("mailto:{}", contact)
    }
}

/// 表示建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例，並同意服務條款。
    ///
    /// 未帶 scheme 的聯絡方式會自動補足 `mailto:` 前綴。
    pub fn new<S: AsRef<str>>(contacts: &[S]) -> Self {
        NewAccountPayload {
            contact: contacts
                .iter()
                .map(|c| normalize_contact(c.as_ref()))
                .collect(),
            terms_of_service_agreed: true,
        }
    }

    /// 正規化後的聯絡方式。
    pub fn contact(&self) -> &[String] {
        &self.contact
    }
}

impl PayloadT for NewAccountPayload {
    /// RFC 8555 允許沒有聯絡方式的帳戶，只要求同意條款。
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.terms_of_service_agreed {
            return Err(PayloadError::TermsNotAgreed);
        }
        Ok(())
    }
}

/// 更新帳戶聯絡方式。
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    contact: Vec<String>,
}

impl UpdateAccountPayload {
    pub fn new<S: AsRef<str>>(contacts: &[S]) -> Self {
        Self {
            contact: contacts
                .iter()
                .map(|c| normalize_contact(c.as_ref()))
                .collect(),
        }
    }

    pub fn contact(&self) -> &[String] {
        &self.contact
    }
}

impl PayloadT for UpdateAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.contact.is_empty() {
            return Err(PayloadError::MissingContact);
        }
        Ok(())
    }
}

/// 停用帳戶或授權：`{"status":"deactivated"}`。
#[derive(Debug, Serialize, Deserialize)]
pub struct DeactivatePayload {
    status: String,
}

impl Default for DeactivatePayload {
    fn default() -> Self {
        Self {
            status: "deactivated".to_string(),
        }
    }
}

impl PayloadT for DeactivatePayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 表示建立新訂單時所需的載荷資料，只包含識別項。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new(identifiers: Vec<Identifier>) -> Self {
        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    /// 至少一個識別項；`dns` 值不得為空，`ip` 值必須是合法位址。
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::NoIdentifiers);
        }
        for identifier in &self.identifiers {
            match identifier.id_type.as_str() {
                Identifier::DNS if !identifier.value.is_empty() => {}
                Identifier::IP if identifier.value.parse::<IpAddr>().is_ok() => {}
                Identifier::DNS | Identifier::IP => {
                    return Err(PayloadError::InvalidIdentifier(identifier.value.clone()))
                }
                other => return Err(PayloadError::UnsupportedIdentifier(other.to_string())),
            }
        }
        Ok(())
    }
}

/// 要求伺服器驗證挑戰，載荷固定為 `{}`。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料。
///
/// 該載荷主要包含 CSR（證書簽署請求）DER 的 Base64 URL 安全編碼字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError::EmptyField("csr"));
        }
        Ok(())
    }
}

/// 金鑰輪替內層 JWS 的載荷：帳戶 URL 與舊公鑰。
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyChangePayload {
    account: String,
    #[serde(rename = "oldKey")]
    old_key: Jwk,
}

impl KeyChangePayload {
    pub fn new(account: impl Into<String>, old_key: Jwk) -> Self {
        Self {
            account: account.into(),
            old_key,
        }
    }
}

impl PayloadT for KeyChangePayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.account.is_empty() {
            return Err(PayloadError::EmptyField("account"));
        }
        Ok(())
    }
}

/// 撤銷憑證：DER 憑證的 URL 安全 Base64 與可選的 RFC 5280 原因碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokeCertPayload {
    certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

impl RevokeCertPayload {
    pub fn new(cert_der: &[u8], reason: Option<u8>) -> Self {
        Self {
            certificate: Base64::new(cert_der).base64_url(),
            reason,
        }
    }
}

impl PayloadT for RevokeCertPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.certificate.is_empty() {
            return Err(PayloadError::EmptyField("certificate"));
        }
        Ok(())
    }
}
