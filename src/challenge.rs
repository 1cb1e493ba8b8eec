use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{encoding::Base64, resource::Resource, transport::Problem};

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
///
/// 伺服器可能提供本庫不認識的類型，以 `Other` 保留原字串。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for ChallengeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(s),
        }
    }
}

impl From<ChallengeType> for String {
    fn from(t: ChallengeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示 ACME 挑戰的狀態，用來追蹤挑戰進展。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[default]
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 判斷該狀態是否為終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }

    /// 返回狀態對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

/// 表示一個 ACME 驗證挑戰，內嵌於授權中，也可依 URL 單獨重新抓取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// 驗證挑戰的類型
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// 驗證挑戰的 URL，同時是此資源的 ID
    #[serde(default)]
    pub url: String,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub status: ChallengeStatus,
    /// 驗證成功的時間
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Challenge {
    /// HTTP-01 驗證檔案的路徑。
    pub fn http_path(&self) -> String {
        format!("/.well-known/acme-challenge/{}", self.token)
    }
}

impl Resource for Challenge {
    fn id(&self) -> &str {
        &self.url
    }

    fn set_id(&mut self, id: String) {
        self.url = id;
    }

    fn status_str(&self) -> &str {
        self.status.as_str()
    }
}

/// `token.thumbprint`（RFC 8555 §8.1）。
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}

/// 根據 key authorization 計算 DNS TXT 記錄值，使用 SHA-256 與 URL-safe Base64 編碼。
pub fn dns_txt_value(key_authorization: &str) -> String {
    Base64::new(sha256(key_authorization.as_bytes())).base64_url()
}

/// DNS-01 TXT 記錄名稱；萬用字元前綴會先移除。
pub fn dns_record_name(host: &str) -> String {
    format!("_acme-challenge.{}", host.trim_start_matches("*."))
}

/// 挑戰回應端（HTTP 伺服器、DNS 供應商等）回報的錯誤。
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Challenge type not supported by responder: {0}")]
    Unsupported(ChallengeType),
    #[error("Responder failed: {0}")]
    Failed(String),
}

impl<T> From<PoisonError<T>> for ResponderError {
    fn from(_: PoisonError<T>) -> Self {
        Self::Failed("lock poisoned".to_string())
    }
}

type ResponderResult = std::result::Result<(), ResponderError>;

/// 實際讓挑戰可被伺服器驗證的外部協作者。
///
/// 本庫只負責計算 key authorization 並呼叫此介面，不自行提供驗證服務。
pub trait ChallengeResponder: Send + Sync {
    fn add_http_one_challenge(&self, token: &str, key_authorization: &str) -> ResponderResult;

    fn delete_http_one_challenge(&self, token: &str) -> ResponderResult;

    /// `key_authorization` 是原始值，TXT 記錄內容請用 [`dns_txt_value`] 計算。
    fn add_dns_one_challenge(&self, host: &str, key_authorization: &str) -> ResponderResult;

    fn delete_dns_one_challenge(&self, host: &str) -> ResponderResult;

    fn add_tls_alpn_challenge(&self, host: &str, key_authorization: &str) -> ResponderResult;

    fn delete_tls_alpn_challenge(&self, host: &str) -> ResponderResult;
}

/// 記憶體內的回應端，記錄目前已佈署的挑戰，主要用於測試與嵌入式伺服器。
#[derive(Debug, Default)]
pub struct MemResponder {
    entries: Mutex<HashMap<(ChallengeType, String), String>>,
}

impl MemResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查詢已佈署的 key authorization；鍵為 token（HTTP-01）或主機名稱。
    pub fn get(&self, challenge_type: &ChallengeType, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(challenge_type.clone(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&self, challenge_type: ChallengeType, key: &str, value: &str) -> ResponderResult {
        debug!(%challenge_type, key, "provisioned challenge response");
        self.entries
            .lock()?
            .insert((challenge_type, key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, challenge_type: ChallengeType, key: &str) -> ResponderResult {
        self.entries.lock()?.remove(&(challenge_type, key.to_string()));
        Ok(())
    }
}

impl ChallengeResponder for MemResponder {
    fn add_http_one_challenge(&self, token: &str, key_authorization: &str) -> ResponderResult {
        self.add(ChallengeType::Http01, token, key_authorization)
    }

    fn delete_http_one_challenge(&self, token: &str) -> ResponderResult {
        self.delete(ChallengeType::Http01, token)
    }

    fn add_dns_one_challenge(&self, host: &str, key_authorization: &str) -> ResponderResult {
        self.add(ChallengeType::Dns01, host, key_authorization)
    }

    fn delete_dns_one_challenge(&self, host: &str) -> ResponderResult {
        self.delete(ChallengeType::Dns01, host)
    }

    fn add_tls_alpn_challenge(&self, host: &str, key_authorization: &str) -> ResponderResult {
        self.add(ChallengeType::TlsAlpn01, host, key_authorization)
    }

    fn delete_tls_alpn_challenge(&self, host: &str) -> ResponderResult {
        self.delete(ChallengeType::TlsAlpn01, host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_and_unknown_types() {
        let challenges: Vec<Challenge> = serde_json::from_value(json!([
            {"type": "http-01", "url": "https://ca/chall/1", "token": "tok", "status": "pending"},
            {"type": "dns-account-01", "url": "https://ca/chall/2", "token": "tok", "status": "valid",
             "validated": "2025-03-01T12:00:00Z"}
        ]))
        .unwrap();

        assert_eq!(challenges[0].challenge_type, ChallengeType::Http01);
        assert_eq!(challenges[0].http_path(), "/.well-known/acme-challenge/tok");
        assert_eq!(
            challenges[1].challenge_type,
            ChallengeType::Other("dns-account-01".to_string())
        );
        assert!(challenges[1].status.is_terminal());
        assert!(challenges[1].validated.is_some());

        let round = serde_json::to_value(&challenges[1]).unwrap();
        assert_eq!(round["type"], "dns-account-01");
    }

    #[test]
    fn test_dns_txt_value() {
        // RFC 8555 §8.4 的計算方式：base64url(SHA-256(key authorization))
        let value = dns_txt_value("token.thumb");
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert_eq!(key_authorization("token", "thumb"), "token.thumb");
        assert_eq!(dns_record_name("*.example.com"), "_acme-challenge.example.com");
    }

    #[test]
    fn test_replace_keeps_url() {
        let mut challenge = Challenge::from_response(
            "https://ca/chall/1",
            json!({"type": "dns-01", "token": "t", "status": "pending"})
                .to_string()
                .as_bytes(),
        )
        .unwrap();
        challenge
            .replace_from(json!({"type": "dns-01", "token": "t", "status": "processing"}).to_string().as_bytes())
            .unwrap();
        assert_eq!(challenge.url, "https://ca/chall/1");
        assert_eq!(challenge.status, ChallengeStatus::Processing);
    }

    #[test]
    fn test_mem_responder() {
        let responder = MemResponder::new();
        responder.add_http_one_challenge("tok", "tok.thumb").unwrap();
        responder.add_dns_one_challenge("example.com", "k").unwrap();
        assert_eq!(
            responder.get(&ChallengeType::Http01, "tok").as_deref(),
            Some("tok.thumb")
        );
        assert_eq!(responder.len(), 2);

        responder.delete_http_one_challenge("tok").unwrap();
        responder.delete_dns_one_challenge("example.com").unwrap();
        assert!(responder.is_empty());
    }
}
