use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    encoding::Base64,
    key_pair::{KeyAlgorithm, KeyPair},
};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// P-256 座標的固定位元組長度。
const P256_COORDINATE_LEN: i32 = 32;

/// JSON Web Key (JWK) 的公鑰表示，依 `kty` 區分變體。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "EC")]
    Ec(EcJwk),
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
}

/// EC 格式的 JWK，目前僅有 P-256 曲線。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    crv: String,
    x: String,
    y: String,
}

/// RSA 格式的 JWK 結構，包含必要的公開參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    n: String,
    e: String,
}

impl EcJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let ec = key_pair.public_key().ec_key()?;
        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        ec.public_key()
            .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)?;

        Ok(EcJwk {
            crv: "P-256".to_string(),
            x: Base64::new(x.to_vec_padded(P256_COORDINATE_LEN)?).base64_url(),
            y: Base64::new(y.to_vec_padded(P256_COORDINATE_LEN)?).base64_url(),
        })
    }

    /// RFC 7638 規定的成員與順序：crv、kty、x、y。
    fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("crv".to_string(), Value::String(self.crv.clone()));
        map.insert("kty".to_string(), Value::String("EC".to_string()));
        map.insert("x".to_string(), Value::String(self.x.clone()));
        map.insert("y".to_string(), Value::String(self.y.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl RsaJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let rsa = key_pair.public_key().rsa()?;

        let n = Base64::new(rsa.n().to_vec()).base64_url();
        let e = Base64::new(rsa.e().to_vec()).base64_url();

        Ok(RsaJwk { n, e })
    }

    /// RFC 7638 規定的成員與順序：e、kty、n。
    fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("e".to_string(), Value::String(self.e.clone()));
        map.insert("kty".to_string(), Value::String("RSA".to_string()));
        map.insert("n".to_string(), Value::String(self.n.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl Jwk {
    /// 根據金鑰對的演算法建立對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        match key_pair.algorithm() {
            KeyAlgorithm::EcdsaP256 => Ok(Jwk::Ec(EcJwk::from_key_pair(key_pair)?)),
            KeyAlgorithm::Rsa2048 => Ok(Jwk::Rsa(RsaJwk::from_key_pair(key_pair)?)),
        }
    }

    /// 嵌入 JWS 保護頭或 key-change 載荷時使用的 JSON 值。
    pub fn to_value(&self) -> Result<Value, JwkError> {
        serde_json::to_value(self).map_err(JwkError::from)
    }

    /// 產生縮影計算用的標準 JSON 表示。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        match self {
            Jwk::Ec(jwk) => jwk.to_acme_json(),
            Jwk::Rsa(jwk) => jwk.to_acme_json(),
        }
    }
}
