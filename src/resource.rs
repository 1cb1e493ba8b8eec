use serde::de::DeserializeOwned;

/// 伺服器端權威的 ACME 資源（訂單、授權、挑戰）。
///
/// 資源的 URL 不在伺服器回傳的主體中，因此由本地保存；
/// 其餘欄位每次抓取都整個以伺服器的表示取代，從不合併。
pub trait Resource: DeserializeOwned {
    /// 資源自身的 URL，尚未建立時為空字串。
    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// 目前的 `status` 字串，供輪詢比對。
    fn status_str(&self) -> &str;

    /// 以伺服器回傳的 JSON 完整取代所有欄位，保留本地 URL。
    ///
    /// 解析失敗時維持原狀。
    fn replace_from(&mut self, body: &[u8]) -> Result<(), serde_json::Error> {
        let mut fresh: Self = serde_json::from_slice(body)?;
        fresh.set_id(self.id().to_string());
        *self = fresh;
        Ok(())
    }

    /// 由 URL 與伺服器主體建立資源。
    fn from_response(id: impl Into<String>, body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut resource: Self = serde_json::from_slice(body)?;
        resource.set_id(id.into());
        Ok(resource)
    }
}
