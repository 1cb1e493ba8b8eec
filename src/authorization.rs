use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    challenge::{Challenge, ChallengeType},
    order::Identifier,
    resource::Resource,
};

/// 授權狀態。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthzStatus {
    #[default]
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthzStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 單一識別項的授權，一律從訂單的 `authorizations` URL 抓取，用戶端不會直接建立。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub status: AuthzStatus,
    pub identifier: Identifier,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// 識別項是否源自 `*.` 萬用字元（此時 `identifier.value` 已去除前綴）。
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    /// 取得指定類型的挑戰。
    pub fn challenge(&self, challenge_type: &ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| &c.challenge_type == challenge_type)
    }

    /// DNS 記錄與 TLS-ALPN 使用的主機名稱。
    pub fn host(&self) -> &str {
        &self.identifier.value
    }
}

impl Resource for Authorization {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn status_str(&self) -> &str {
        self.status.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_authorization() {
        let body = json!({
            "status": "pending",
            "expires": "2025-03-08T00:00:00Z",
            "identifier": {"type": "dns", "value": "example.com"},
            "wildcard": true,
            "challenges": [
                {"type": "http-01", "url": "https://ca/chall/h", "token": "a", "status": "pending"},
                {"type": "dns-01", "url": "https://ca/chall/d", "token": "b", "status": "pending"}
            ]
        });
        let authz =
            Authorization::from_response("https://ca/authz/1", body.to_string().as_bytes()).unwrap();

        assert_eq!(authz.id, "https://ca/authz/1");
        assert!(authz.wildcard);
        assert_eq!(authz.host(), "example.com");
        assert_eq!(
            authz.challenge(&ChallengeType::Dns01).map(|c| c.url.as_str()),
            Some("https://ca/chall/d")
        );
        assert!(authz.challenge(&ChallengeType::TlsAlpn01).is_none());
    }

    #[test]
    fn test_deactivated_is_terminal() {
        let body = json!({
            "status": "deactivated",
            "identifier": {"type": "ip", "value": "192.0.2.1"}
        });
        let mut authz =
            Authorization::from_response("https://ca/authz/2", b"{\"identifier\":{\"type\":\"ip\",\"value\":\"192.0.2.1\"}}")
                .unwrap();
        assert_eq!(authz.status, AuthzStatus::Pending);
        assert!(!authz.wildcard);

        authz.replace_from(body.to_string().as_bytes()).unwrap();
        assert_eq!(authz.status, AuthzStatus::Deactivated);
        assert!(authz.status.is_terminal());
        assert!(authz.identifier.is_ip());
    }
}
