use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};

pub use base64::DecodeError;

/// 位元組資料的 Base64 封裝。
///
/// ACME 的所有 JWS 欄位都使用無填充的 URL 安全編碼（RFC 7515 §2），
/// 帳戶檔案中的私鑰則使用標準編碼，兩者都由這個型別提供。
///
/// ```
/// # use acmeshell_core::encoding::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    bytes: Vec<u8>,
}

impl Base64 {
    /// 以任意可轉為位元組切片的資料建立實例。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            bytes: input.as_ref().to_vec(),
        }
    }

    /// 解析 URL 安全、無填充的 Base64 字串。
    ///
    /// 為了容錯，尾端多餘的 `=` 會先被去除。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let bytes = URL_SAFE_NO_PAD.decode(url_encoded.trim_end_matches('='))?;
        Ok(Self { bytes })
    }

    /// 解析標準（含填充）Base64 字串。
    pub fn from_encoded(encoded: &str) -> Result<Self, DecodeError> {
        Ok(Self {
            bytes: STANDARD.decode(encoded)?,
        })
    }

    /// URL 安全、無填充的編碼結果。
    pub fn base64_url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes)
    }

    /// 標準編碼結果。
    pub fn as_standard(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_safe_alphabet() {
        let b64 = Base64::new([0xfb, 0xff, 0xbf]);
        assert_eq!(b64.as_standard(), "+/+/");
        assert_eq!(b64.base64_url(), "-_-_");
    }

    #[test]
    fn test_no_padding() {
        assert_eq!(Base64::new("a").base64_url(), "YQ");
        assert_eq!(Base64::new("ab").base64_url(), "YWI");
        assert_eq!(Base64::new("abc").base64_url(), "YWJj");
    }

    #[test]
    fn test_from_url_tolerates_padding() {
        let plain = Base64::from_url("SGVsbG8sIFdvcmxkIQ").unwrap();
        let padded = Base64::from_url("SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(plain.as_bytes(), b"Hello, World!");
        assert_eq!(plain, padded);
    }

    #[test]
    fn test_invalid_char() {
        assert!(Base64::from_url("SGVsbG8$").is_err());
        assert!(Base64::from_encoded("A===").is_err());
    }
}
