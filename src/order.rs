use std::{fmt, net::IpAddr, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{resource::Resource, transport::Problem};

/// 訂單模型相關錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid status value: {0}")]
    InvalidStatus(String),
}

type Result<T> = std::result::Result<T, OrderError>;

/// 訂單狀態，目前支援的狀態有 pending、ready、processing、valid 與 invalid。
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }

    /// `valid` 與 `invalid` 之外都必須再輪詢。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    /// 根據字串內容解析對應的訂單狀態
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            other => Err(OrderError::InvalidStatus(other.to_string())),
        }
    }
}

/// 訂單涵蓋的識別項：`dns` 主機名稱或 `ip` 位址。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

impl Identifier {
    pub const DNS: &'static str = "dns";
    pub const IP: &'static str = "ip";

    pub fn new(id_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id_type: id_type.into(),
            value: value.into(),
        }
    }

    pub fn dns(value: impl Into<String>) -> Self {
        Self::new(Self::DNS, value)
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self::new(Self::IP, value)
    }

    /// 依值自動判斷類型：可解析為 IP 位址者為 `ip`，其餘為 `dns`。
    pub fn parse(value: &str) -> Self {
        if value.parse::<IpAddr>().is_ok() {
            Self::ip(value)
        } else {
            Self::dns(value)
        }
    }

    pub fn is_ip(&self) -> bool {
        self.id_type == Self::IP
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id_type, self.value)
    }
}

/// 表示訂單資料。
///
/// 所有欄位都來自伺服器；每次 `update_order` 都會整個取代，`certificate` 只在 `valid` 後出現。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// 伺服器回傳的訂單 URL（不在主體中）
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表
    #[serde(default)]
    pub authorizations: Vec<String>,
    #[serde(default)]
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Order {
    /// 尚未送出的新訂單，只帶識別項。
    pub fn new(identifiers: Vec<Identifier>) -> Self {
        Self {
            identifiers,
            ..Self::default()
        }
    }

    /// 以主機名稱或 IP 字串建立新訂單。
    pub fn for_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(names.iter().map(|n| Identifier::parse(n.as_ref())).collect())
    }
}

impl Resource for Order {
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
