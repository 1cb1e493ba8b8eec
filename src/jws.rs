//! 此模組提供 JSON Web Signature (JWS) 的建立、序列化與解析。
//!
//! 簽名分兩種模式：嵌入公鑰（`jwk`）用於尚無帳戶身分的請求，
//! 帳戶 ID（`kid`）用於其餘所有請求。兩者互斥，並且在任何網路 I/O 之前驗證。

use std::{fmt, result, sync::Arc};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    encoding::{Base64, DecodeError},
    key_pair::{KeyError, KeyPair},
    nonce::NonceSource,
    protection::{KeyBinding, ProtectedHeader, Protection, ProtectionError},
};

/// 表示一個 Flattened JSON 序列化的 JWS 物件，三個欄位皆為 URL 安全 Base64 字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位，包含已編碼的 header 資訊。
    #[serde(rename = "protected")]
    header: String,
    /// 空字串代表 POST-as-GET。
    payload: String,
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("embed_key and key_id are mutually exclusive")]
    EmbedKeyWithKeyId,
    #[error("Either embed_key or a non-empty key_id is required")]
    MissingKeyBinding,
    #[error("No nonce source configured")]
    MissingNonceSource,
    #[error("No signer configured")]
    MissingSigner,
    #[error("Protected header error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    /// 當 Base64 解碼失敗時回傳此錯誤。
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] DecodeError),
    /// 當 JSON 序列化或反序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl JwsError {
    /// 是否為簽名選項本身的設定錯誤（不涉及任何 I/O）。
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::EmbedKeyWithKeyId
                | Self::MissingKeyBinding
                | Self::MissingNonceSource
                | Self::MissingSigner
        )
    }
}

type Result<T> = result::Result<T, JwsError>;

/// 一次簽名所需的全部選項。
///
/// ```
/// # use acmeshell_core::jws::SignOptions;
/// let opts = SignOptions::key_id("https://ca/acct/1");
/// assert!(!opts.embed_key);
/// ```
#[derive(Clone, Default)]
pub struct SignOptions {
    /// 在保護頭中嵌入簽名者的公鑰 JWK。
    pub embed_key: bool,
    /// 帳戶 URL；空字串視同未設定。
    pub key_id: Option<String>,
    pub signer: Option<Arc<KeyPair>>,
    pub nonce_source: Option<Arc<dyn NonceSource>>,
}

impl fmt::Debug for SignOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignOptions")
            .field("embed_key", &self.embed_key)
            .field("key_id", &self.key_id)
            .field("signer", &self.signer)
            .field("nonce_source", &self.nonce_source.is_some())
            .finish()
    }
}

impl SignOptions {
    /// 嵌入公鑰模式。
    pub fn embedded() -> Self {
        Self {
            embed_key: true,
            ..Self::default()
        }
    }

    /// Key-ID 模式。
    pub fn key_id(kid: impl Into<String>) -> Self {
        Self {
            key_id: Some(kid.into()),
            ..Self::default()
        }
    }

    pub fn with_signer(mut self, signer: Arc<KeyPair>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_nonce_source(mut self, nonce_source: Arc<dyn NonceSource>) -> Self {
        self.nonce_source = Some(nonce_source);
        self
    }

    fn non_empty_key_id(&self) -> Option<&str> {
        self.key_id.as_deref().filter(|kid| !kid.is_empty())
    }

    /// 依序檢查：模式互斥、模式存在、nonce 來源、簽名者。
    pub fn validate(&self) -> Result<()> {
        match (self.embed_key, self.non_empty_key_id()) {
            (true, Some(_)) => return Err(JwsError::EmbedKeyWithKeyId),
            (false, None) => return Err(JwsError::MissingKeyBinding),
            _ => {}
        }
        if self.nonce_source.is_none() {
            return Err(JwsError::MissingNonceSource);
        }
        if self.signer.is_none() {
            return Err(JwsError::MissingSigner);
        }
        Ok(())
    }
}

/// 簽名結果：可直接送出的序列化位元組，以及重新解析後的結構。
#[derive(Debug, Clone)]
pub struct SignedJws {
    pub serialized: Vec<u8>,
    pub parsed: ParsedJws,
}

/// 解碼後的 JWS。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJws {
    pub header: ProtectedHeader,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    /// `protected.payload`，即實際被簽名的位元組。
    pub signing_input: String,
}

impl ParsedJws {
    /// 將載荷解析為 JSON。
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

impl Jws {
    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 解析序列化的 JWS，解碼保護頭、載荷與簽名。
    pub fn parse(serialized: &[u8]) -> Result<ParsedJws> {
        let jws: Jws = serde_json::from_slice(serialized)?;
        let header = serde_json::from_slice(Base64::from_url(&jws.header)?.as_bytes())?;
        Ok(ParsedJws {
            header,
            payload: Base64::from_url(&jws.payload)?.into_bytes(),
            signature: Base64::from_url(&jws.signature)?.into_bytes(),
            signing_input: format!("{}.{}", jws.header, jws.payload),
        })
    }
}

/// 以 `options` 對 `url` 與 `payload` 簽名。
///
/// 空的 `payload` 會編碼為空字串（POST-as-GET）。每次呼叫恰好取出一個 nonce；
/// 選項不合法時在取 nonce 之前就失敗。
pub fn sign(url: &str, payload: &[u8], options: &SignOptions) -> Result<SignedJws> {
    options.validate()?;
    let signer = options.signer.as_ref().ok_or(JwsError::MissingSigner)?;
    let nonce_source = options
        .nonce_source
        .as_ref()
        .ok_or(JwsError::MissingNonceSource)?;

    let binding = match options.non_empty_key_id() {
        Some(kid) => KeyBinding::Kid(kid.to_string()),
        None => KeyBinding::Jwk(signer.jwk()?),
    };

    let header = Protection::new(&**nonce_source, signer.jws_alg(), binding).create_header(url)?;
    seal(&header, payload, signer)
}

/// 金鑰輪替的內層 JWS：嵌入 `signer` 的公鑰，且不帶 `nonce`（RFC 8555 §7.3.5）。
///
/// 不取用任何 nonce，因此外層請求仍是唯一消耗 nonce 的簽名。
pub fn sign_inner(url: &str, payload: &[u8], signer: &KeyPair) -> Result<SignedJws> {
    let header = Protection::without_nonce(signer.jws_alg(), KeyBinding::Jwk(signer.jwk()?))
        .create_header(url)?;
    seal(&header, payload, signer)
}

fn seal(header: &ProtectedHeader, payload: &[u8], signer: &KeyPair) -> Result<SignedJws> {
    let header = header.to_base64()?.base64_url();
    let payload = Base64::new(payload).base64_url();
    let signature = signer.sign(format!("{}.{}", header, payload).as_bytes())?;

    let jws = Jws {
        header,
        payload,
        signature: Base64::new(signature).base64_url(),
    };
    let serialized = serde_json::to_vec(&jws)?;
    let parsed = Jws::parse(&serialized)?;
    Ok(SignedJws { serialized, parsed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_pair::KeyAlgorithm, nonce::MockNonce, signature};
    use serde_json::{json, Value};

    fn signer(alg: KeyAlgorithm) -> Arc<KeyPair> {
        Arc::new(KeyPair::generate(alg).unwrap())
    }

    #[test]
    fn test_option_matrix() {
        let key = signer(KeyAlgorithm::EcdsaP256);
        let cases = [
            (true, None, true),
            (true, Some(""), true),
            (false, Some("https://ca/acct/1"), true),
            (true, Some("https://ca/acct/1"), false),
            (false, None, false),
            (false, Some(""), false),
        ];

        for (embed_key, key_id, ok) in cases {
            let nonce = Arc::new(MockNonce::new("n"));
            let opts = SignOptions {
                embed_key,
                key_id: key_id.map(ToString::to_string),
                signer: Some(key.clone()),
                nonce_source: Some(nonce.clone() as Arc<dyn NonceSource>),
            };
            let result = sign("https://ca/x", b"{}", &opts);
            assert_eq!(result.is_ok(), ok, "embed_key={embed_key} key_id={key_id:?}");
            if !ok {
                assert!(result.unwrap_err().is_config());
                assert_eq!(nonce.calls(), 0);
            }
        }
    }

    #[test]
    fn test_missing_nonce_source_and_signer() {
        let key = signer(KeyAlgorithm::EcdsaP256);
        let nonce: Arc<dyn NonceSource> = Arc::new(MockNonce::new("n"));

        let no_nonce = SignOptions::embedded().with_signer(key);
        assert!(matches!(
            sign("https://ca/x", b"", &no_nonce),
            Err(JwsError::MissingNonceSource)
        ));

        let no_signer = SignOptions::embedded().with_nonce_source(nonce);
        assert!(matches!(
            sign("https://ca/x", b"", &no_signer),
            Err(JwsError::MissingSigner)
        ));
    }

    #[test]
    fn test_embedded_key_mode() {
        let key = signer(KeyAlgorithm::EcdsaP256);
        let opts = SignOptions::embedded()
            .with_signer(key.clone())
            .with_nonce_source(Arc::new(MockNonce::new("abc")));

        let signed = sign("https://ca/acct", br#"{"contact":[]}"#, &opts).unwrap();
        let header = &signed.parsed.header;
        assert_eq!(header.alg, "ES256");
        assert_eq!(header.nonce.as_deref(), Some("abc"));
        assert_eq!(header.url, "https://ca/acct");
        assert_eq!(header.jwk.as_ref(), Some(&key.jwk().unwrap()));
        assert!(header.kid.is_none());
        assert!(signature::verify(
            &key,
            signed.parsed.signing_input.as_bytes(),
            &signed.parsed.signature
        ));
    }

    #[test]
    fn test_inner_jws_has_no_nonce() {
        let key = signer(KeyAlgorithm::EcdsaP256);

        let signed = sign_inner("https://ca/key-change", br#"{"account":"a"}"#, &key).unwrap();
        let header = &signed.parsed.header;
        assert!(header.nonce.is_none());
        assert_eq!(header.url, "https://ca/key-change");
        assert_eq!(header.jwk.as_ref(), Some(&key.jwk().unwrap()));
        assert!(header.kid.is_none());

        let outer: Value = serde_json::from_slice(&signed.serialized).unwrap();
        let protected = Base64::from_url(outer["protected"].as_str().unwrap()).unwrap();
        let raw: Value = serde_json::from_slice(protected.as_bytes()).unwrap();
        assert!(raw.get("nonce").is_none());
        assert!(signature::verify(
            &key,
            signed.parsed.signing_input.as_bytes(),
            &signed.parsed.signature
        ));
    }

    #[test]
    fn test_key_id_mode_rs256() {
        let key = signer(KeyAlgorithm::Rsa2048);
        let opts = SignOptions::key_id("https://ca/acct/1")
            .with_signer(key.clone())
            .with_nonce_source(Arc::new(MockNonce::new("abc")));

        let signed = sign("https://ca/order", b"{}", &opts).unwrap();
        assert_eq!(signed.parsed.header.alg, "RS256");
        assert_eq!(signed.parsed.header.kid.as_deref(), Some("https://ca/acct/1"));
        assert!(signed.parsed.header.jwk.is_none());
        assert!(signature::verify(
            &key,
            signed.parsed.signing_input.as_bytes(),
            &signed.parsed.signature
        ));
    }

    #[test]
    fn test_reparse_matches_input() {
        let opts = SignOptions::key_id("kid")
            .with_signer(signer(KeyAlgorithm::EcdsaP256))
            .with_nonce_source(Arc::new(MockNonce::new("n")));
        let payload = json!({"identifiers": [{"type": "dns", "value": "example.com"}]});

        let signed = sign("https://ca/new-order", payload.to_string().as_bytes(), &opts).unwrap();
        let reparsed = Jws::parse(&signed.serialized).unwrap();

        assert_eq!(reparsed, signed.parsed);
        assert_eq!(reparsed.header.url, "https://ca/new-order");
        assert_eq!(reparsed.payload_json::<Value>().unwrap(), payload);
    }

    #[test]
    fn test_empty_payload_is_empty_string() {
        let opts = SignOptions::key_id("kid")
            .with_signer(signer(KeyAlgorithm::EcdsaP256))
            .with_nonce_source(Arc::new(MockNonce::new("n")));

        let signed = sign("https://ca/order/1", b"", &opts).unwrap();
        let raw: Value = serde_json::from_slice(&signed.serialized).unwrap();
        assert_eq!(raw["payload"], "");
        assert!(signed.parsed.payload.is_empty());
        assert!(signed.parsed.signing_input.ends_with('.'));
    }
}
