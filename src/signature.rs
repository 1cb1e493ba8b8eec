use crate::key_pair::{KeyAlgorithm, KeyPair};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::sign::Signer;
use thiserror::Error;

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    #[error("Signing error: {0}")]
    SigningError(String),
    /// ECDSA 簽名無法轉換為 JWS 的固定長度格式。
    #[error("Signature encoding error: {0}")]
    EncodingError(String),
}

/// P-256 的 r、s 各為 32 位元組。
const ES256_COMPONENT_LEN: i32 = 32;

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 要求的簽名位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RS256：RSASSA-PKCS1-v1_5 搭配 SHA-256。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        sign_der(data, key_pair)
    }
}

/// ES256：ECDSA P-256 搭配 SHA-256。
///
/// OpenSSL 產生的是 DER 編碼的 `ECDSA-Sig-Value`，JWS（RFC 7518 §3.4）
/// 則要求 `r‖s` 兩個固定長度大端整數的串接。
struct EcdsaSignature;

impl SignatureAlgorithmT for EcdsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let der = sign_der(data, key_pair)?;
        let sig =
            EcdsaSig::from_der(&der).map_err(|e| SignatureError::EncodingError(e.to_string()))?;

        let mut raw = sig
            .r()
            .to_vec_padded(ES256_COMPONENT_LEN)
            .map_err(|e| SignatureError::EncodingError(e.to_string()))?;
        raw.extend(
            sig.s()
                .to_vec_padded(ES256_COMPONENT_LEN)
                .map_err(|e| SignatureError::EncodingError(e.to_string()))?,
        );
        Ok(raw)
    }
}

fn sign_der(data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
    let mut signer = Signer::new(MessageDigest::sha256(), key_pair.private_key())
        .map_err(|e| SignatureError::SigningError(e.to_string()))?;

    signer
        .update(data)
        .map_err(|e| SignatureError::SigningError(e.to_string()))?;

    signer
        .sign_to_vec()
        .map_err(|e| SignatureError::SigningError(e.to_string()))
}

/// 簽名演算法工廠，依金鑰演算法取得對應實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(alg: KeyAlgorithm) -> Box<dyn SignatureAlgorithmT> {
        match alg {
            KeyAlgorithm::EcdsaP256 => Box::new(EcdsaSignature),
            KeyAlgorithm::Rsa2048 => Box::new(RsaSignature),
        }
    }
}

/// 以金鑰對簽署 `data`（通常是 `protected.payload` 的簽名輸入）。
pub fn sign(key_pair: &KeyPair, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
    SignatureAlgorithmFactory::get_algorithm(key_pair.algorithm()).sign(data, key_pair)
}

/// 以公鑰驗證 JWS 格式的簽名，僅供測試使用。
#[cfg(test)]
pub(crate) fn verify(key_pair: &KeyPair, data: &[u8], signature: &[u8]) -> bool {
    use openssl::{bn::BigNum, sign::Verifier};

    let der = match key_pair.algorithm() {
        KeyAlgorithm::Rsa2048 => signature.to_vec(),
        KeyAlgorithm::EcdsaP256 => {
            if signature.len() != 64 {
                return false;
            }
            let r = BigNum::from_slice(&signature[..32]).unwrap();
            let s = BigNum::from_slice(&signature[32..]).unwrap();
            EcdsaSig::from_private_components(r, s)
                .unwrap()
                .to_der()
                .unwrap()
        }
    };
    let mut verifier = Verifier::new(MessageDigest::sha256(), key_pair.public_key()).unwrap();
    verifier.update(data).unwrap();
    verifier.verify(&der).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_es256_signature_is_fixed_width() {
        let key = KeyPair::generate(KeyAlgorithm::EcdsaP256).unwrap();
        for _ in 0..8 {
            let sig = sign(&key, b"header.payload").unwrap();
            assert_eq!(sig.len(), 64);
            assert!(verify(&key, b"header.payload", &sig));
        }
    }

    #[test]
    fn test_rs256_signature_verifies() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa2048).unwrap();
        let sig = sign(&key, b"header.payload").unwrap();
        assert_eq!(sig.len(), 256);
        assert!(verify(&key, b"header.payload", &sig));
        assert!(!verify(&key, b"header.tampered", &sig));
    }
}
