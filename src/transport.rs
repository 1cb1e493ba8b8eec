//! HTTP 傳輸層：以 `reqwest` 阻塞式客戶端實作 GET/HEAD/POST，
//! 並提供可腳本化的 [`MockTransport`] 供測試使用。

use std::{
    collections::{HashMap, VecDeque},
    fmt, fs, io,
    path::PathBuf,
    sync::Mutex,
};

use reqwest::{
    blocking::{Client, Response},
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION},
    Certificate, Method, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ClientConfig;

/// 傳輸層錯誤。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Failed to read CA roots from {path}: {source}")]
    CaRoots { path: PathBuf, source: io::Error },
    #[error("No scripted response for {method} {url}")]
    Unscripted { method: Method, url: String },
}

type Result<T> = std::result::Result<T, TransportError>;

/// 防重放 nonce 的回應標頭。
pub const REPLAY_NONCE: &str = "Replay-Nonce";
/// 已簽名請求的 Content-Type。
pub const JOSE_JSON: &str = "application/jose+json";
/// RFC 7807 錯誤文件的 Content-Type。
pub const PROBLEM_JSON: &str = "application/problem+json";

/// 結構化的 HTTP 回應：狀態碼、標頭與完整主體。
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 建立一個空主體的回應，主要供 [`MockTransport`] 腳本使用。
    pub fn new(status: u16) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// 加入一個標頭；名稱或值不合法時忽略。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header(CONTENT_TYPE.as_str(), "application/json")
            .with_body(value.to_string())
    }

    /// 取得標頭值；不存在或非 ASCII 時回傳 `None`。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 非空的 `Replay-Nonce` 標頭值。
    pub fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE).filter(|n| !n.is_empty())
    }

    /// 非空的 `Location` 標頭值。
    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str()).filter(|l| !l.is_empty())
    }

    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 若主體是 RFC 7807 錯誤文件則解析之。
    ///
    /// 部分伺服器不會正確設定 Content-Type，因此只要主體帶有 `type` 欄位也會嘗試解析。
    pub fn problem(&self) -> Option<Problem> {
        let is_problem = self
            .header(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with(PROBLEM_JSON));
        let problem: Problem = self.json().ok()?;
        if is_problem || !problem.problem_type.is_empty() {
            Some(problem)
        } else {
            None
        }
    }
}

/// ACME 伺服器回傳的錯誤文件（RFC 7807）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.problem_type, self.detail)
    }
}

/// 協議引擎對 HTTP 的全部需求。
///
/// 實作必須回傳完整主體，不得對非 2xx 狀態碼自行報錯；狀態碼的判斷由呼叫端負責。
pub trait HttpTransport: Send + Sync + fmt::Debug {
    fn get(&self, url: &str) -> Result<HttpResponse>;

    fn head(&self, url: &str) -> Result<HttpResponse>;

    fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<HttpResponse>;
}

/// 以 `reqwest::blocking::Client` 實作的傳輸層。
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 依設定建立客戶端：使用者代理、可選逾時，以及額外信任的 CA 根憑證。
    ///
    /// # Errors
    ///
    /// 讀取或解析 `ca_roots` 中任一 PEM 檔失敗時回傳錯誤。
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        for path in &config.ca_roots {
            let pem = fs::read(path).map_err(|source| TransportError::CaRoots {
                path: path.clone(),
                source,
            })?;
            for cert in Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(cert);
            }
            debug!(path = %path.display(), "added CA roots");
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    fn collect(response: Response) -> Result<HttpResponse> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        Self::collect(self.client.get(url).send()?)
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        Self::collect(self.client.head(url).send()?)
    }

    fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<HttpResponse> {
        Self::collect(
            self.client
                .post(url)
                .header(CONTENT_TYPE, content_type)
                .body(body)
                .send()?,
        )
    }
}

/// [`MockTransport`] 記錄下的一次請求。
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn json(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// 模擬傳輸層，依 (方法, URL) 依序回放預先排入的回應，並記錄每一次請求。
///
/// 沒有可用回應時回傳 [`TransportError::Unscripted`]。
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 為指定方法與 URL 排入下一個回應。
    pub fn push(&self, method: Method, url: &str, response: HttpResponse) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    /// 目前為止收到的所有請求（依時間順序）。
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn respond(&self, request: RecordedRequest) -> Result<HttpResponse> {
        let key = (request.method.clone(), request.url.clone());
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .ok_or(TransportError::Unscripted {
                method: key.0,
                url: key.1,
            })
    }
}

impl HttpTransport for MockTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.respond(RecordedRequest {
            method: Method::GET,
            url: url.to_string(),
            content_type: None,
            body: Vec::new(),
        })
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        self.respond(RecordedRequest {
            method: Method::HEAD,
            url: url.to_string(),
            content_type: None,
            body: Vec::new(),
        })
    }

    fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<HttpResponse> {
        self.respond(RecordedRequest {
            method: Method::POST,
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            body,
        })
    }
}
