use std::{fmt, str::FromStr};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;

use crate::{
    encoding::Base64,
    jwk::{Jwk, JwkError},
    signature::{self, SignatureError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、JWK 與簽名相關錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Key type mismatch: expected {expected}, found {found}")]
    AlgorithmMismatch {
        expected: KeyAlgorithm,
        found: KeyAlgorithm,
    },
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 支援的非對稱金鑰種類。
///
/// 每個變體決定 JWS 的 `alg` 與 JWK 的 `kty`，
/// 同時也是帳戶檔案中的金鑰類型標籤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    EcdsaP256,
    Rsa2048,
}

impl KeyAlgorithm {
    const RSA_BITS: u32 = 2048;

    /// JWS 保護頭中的 `alg` 值。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ES256",
            Self::Rsa2048 => "RS256",
        }
    }

    /// 持久化時使用的金鑰類型標籤。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EcdsaP256 => "ecdsa",
            Self::Rsa2048 => "rsa",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyError;

    /// 大小寫不敏感，同時接受標籤與 JWS 演算法名稱。
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ecdsa" | "ec" | "es256" | "p256" | "p-256" => Ok(Self::EcdsaP256),
            "rsa" | "rs256" => Ok(Self::Rsa2048),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// 表示一組非對稱加密的金鑰對，也是 JWS 的簽名者。
///
/// 私鑰與公鑰皆以 OpenSSL 的 `PKey` 封裝；演算法在建構時就已確定，
/// 之後的 JWK、縮影與簽名都依此分派。
pub struct KeyPair {
    alg: KeyAlgorithm,
    pri_key: PKey<Private>,
    pub_key: PKey<Public>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// 依指定演算法產生新的金鑰對。
    pub fn generate(alg: KeyAlgorithm) -> Result<Self> {
        let pri_key = match alg {
            KeyAlgorithm::EcdsaP256 => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
            KeyAlgorithm::Rsa2048 => PKey::from_rsa(Rsa::generate(KeyAlgorithm::RSA_BITS)?)?,
        };
        Self::from_private(pri_key)
    }

    /// 由私鑰建立金鑰對，並從私鑰判斷演算法。
    ///
    /// 只接受 RSA-2048 與 P-256；其他長度的 RSA 金鑰、其他曲線或演算法一律回傳
    /// `KeyError::UnsupportedAlgorithm`。
    pub fn from_private(pri_key: PKey<Private>) -> Result<Self> {
        let alg = Self::detect_algorithm(&pri_key)?;
        let pub_key = Self::derive_public_key(&pri_key)?;
        Ok(Self {
            alg,
            pri_key,
            pub_key,
        })
    }

    /// 由 PEM 格式（PKCS#8、SEC1 或 PKCS#1）的私鑰建立金鑰對。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        Self::from_private(PKey::private_key_from_pem(pri_key_pem)?)
    }

    /// 以 PKCS#8 PEM 匯出私鑰。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 依金鑰類型標籤解析 DER 私鑰（EC 為 SEC1，RSA 為 PKCS#1）。
    ///
    /// 解析結果的實際演算法必須與標籤一致。
    pub fn from_der(alg: KeyAlgorithm, der: &[u8]) -> Result<Self> {
        let pri_key = match alg {
            KeyAlgorithm::EcdsaP256 => PKey::from_ec_key(EcKey::private_key_from_der(der)?)?,
            KeyAlgorithm::Rsa2048 => PKey::from_rsa(Rsa::private_key_from_der(der)?)?,
        };
        let key_pair = Self::from_private(pri_key)?;
        if key_pair.alg != alg {
            return Err(KeyError::AlgorithmMismatch {
                expected: alg,
                found: key_pair.alg,
            });
        }
        Ok(key_pair)
    }

    /// 以 DER 匯出私鑰，格式與 [`KeyPair::from_der`] 對應。
    pub fn to_der(&self) -> Result<Vec<u8>> {
        match self.alg {
            KeyAlgorithm::EcdsaP256 => Ok(self.pri_key.ec_key()?.private_key_to_der()?),
            KeyAlgorithm::Rsa2048 => Ok(self.pri_key.rsa()?.private_key_to_der()?),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.alg
    }

    /// JWS `alg` 名稱，等同 `self.algorithm().jws_alg()`。
    pub fn jws_alg(&self) -> &'static str {
        self.alg.jws_alg()
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.pri_key
    }

    pub fn public_key(&self) -> &PKey<Public> {
        &self.pub_key
    }

    /// 公鑰的 JWK 表示。
    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::new(self)?)
    }

    /// 計算 RFC 7638 金鑰縮影，以 URL 安全 Base64 字串回傳。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = self.jwk()?;
        let hash = sha256(jwk.to_acme_json()?.as_bytes());
        Ok(Base64::new(hash).base64_url())
    }

    /// 以此金鑰對 `data` 進行 JWS 簽名，回傳 JWS 格式的簽名位元組。
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(signature::sign(self, data)?)
    }

    fn detect_algorithm(pri_key: &PKey<Private>) -> Result<KeyAlgorithm> {
        match pri_key.id() {
            Id::RSA => {
                let bits = pri_key.rsa()?.size() * 8;
                if bits != KeyAlgorithm::RSA_BITS {
                    return Err(KeyError::UnsupportedAlgorithm(format!("RSA-{}", bits)));
                }
                Ok(KeyAlgorithm::Rsa2048)
            }
            Id::EC => {
                let ec = pri_key.ec_key()?;
                match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => Ok(KeyAlgorithm::EcdsaP256),
                    other => Err(KeyError::UnsupportedAlgorithm(format!(
                        "EC curve {:?}",
                        other
                    ))),
                }
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }

    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            Id::EC => {
                let ec = pri_key.ec_key()?;
                let pub_ec = EcKey::from_public_key(ec.group(), ec.public_key())?;
                Ok(PKey::from_ec_key(pub_ec)?)
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }
}
