use chrono::{DateTime, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is empty")]
    EmptyChain,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

/// 自定義結果型別，錯誤類型為 `CertificateError`
type Result<T> = std::result::Result<T, CertificateError>;

/// 伺服器下載的 PEM 憑證鏈，第一張為終端憑證。
#[derive(Debug, Clone)]
pub struct Certificate {
    pem: String,
    chain: Vec<X509>,
}

impl Certificate {
    /// 解析 `application/pem-certificate-chain` 內容。
    pub fn from_pem(pem: &str) -> Result<Self> {
        let chain = X509::stack_from_pem(pem.as_bytes())?;
        if chain.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Certificate {
            pem: pem.to_string(),
            chain,
        })
    }

    /// 伺服器回傳的原始 PEM 文字。
    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn leaf(&self) -> Result<&X509> {
        self.chain.first().ok_or(CertificateError::EmptyChain)
    }

    /// 終端憑證的 DER，撤銷請求使用。
    pub fn leaf_der(&self) -> Result<Vec<u8>> {
        Ok(self.leaf()?.to_der()?)
    }

    /// 終端憑證的到期時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.leaf()?.not_after())?;
        let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
        DateTime::from_timestamp(secs, 0).ok_or(CertificateError::InvalidTimestamp)
    }
}
