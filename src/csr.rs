use std::{net::IpAddr, result};

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::{key_pair::KeyPair, order::Identifier};

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
    #[error("Invalid IP address in SAN: {0}")]
    InvalidIp(String),
    #[error("Unsupported identifier type: {0}")]
    UnsupportedIdentifier(String),
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SanEntry {
    Dns(String),
    Ip(String),
}

/// CSR 建構器，生成包含主體替代名稱 (SAN) 擴展的證書簽名請求。
///
/// ```
/// # use acmeshell_core::{csr::CSR, key_pair::{KeyAlgorithm, KeyPair}};
/// let key_pair = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
/// let csr = CSR::new()
///     .set_san("example.com")
///     .set_ip_san("192.0.2.1")
///     .build(&key_pair)
///     .unwrap();
/// # assert!(csr.verify(key_pair.public_key()).unwrap());
/// ```
#[derive(Debug, Default)]
pub struct CSR {
    san_entries: Vec<SanEntry>,
}

impl CSR {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依訂單識別項建立，`dns` 與 `ip` 各自對應 SAN 類型。
    pub fn from_identifiers(identifiers: &[Identifier]) -> Result<Self> {
        identifiers
            .iter()
            .try_fold(Self::new(), |csr, id| match id.id_type.as_str() {
                Identifier::DNS => Ok(csr.set_san(&id.value)),
                Identifier::IP => Ok(csr.set_ip_san(&id.value)),
                other => Err(CsrError::UnsupportedIdentifier(other.to_string())),
            })
    }

    /// 新增一個 DNS 主體替代名稱 (SAN)。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(SanEntry::Dns(dns_name.to_string()));
        self
    }

    /// 新增一個 IP 主體替代名稱。
    pub fn set_ip_san(mut self, ip: &str) -> Self {
        self.san_entries.push(SanEntry::Ip(ip.to_string()));
        self
    }

    /// 以金鑰對簽署並產生 CSR。
    ///
    /// 第一個 DNS 名稱同時作為主體 CN；沒有任何 SAN 時回傳 `CsrError::NoSanEntries`。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let mut req_builder = X509Req::builder()?;

        if let Some(SanEntry::Dns(cn)) = self
            .san_entries
            .iter()
            .find(|e| matches!(e, SanEntry::Dns(_)))
        {
            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_text("CN", cn)?;
            req_builder.set_subject_name(&name.build())?;
        }

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            match entry {
                SanEntry::Dns(dns) => san_builder.dns(dns),
                SanEntry::Ip(ip) => {
                    ip.parse::<IpAddr>()
                        .map_err(|_| CsrError::InvalidIp(ip.clone()))?;
                    san_builder.ip(ip)
                }
            };
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(key_pair.private_key())?;
        req_builder.sign(key_pair.private_key(), MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 建構並以 DER 輸出，供 finalize 載荷使用。
    pub fn build_der(self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}
