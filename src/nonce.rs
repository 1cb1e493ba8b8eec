use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::{
    directory::{endpoints, Directory, DirectoryError},
    transport::{HttpResponse, HttpTransport, TransportError},
};

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    Transport(#[from] TransportError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Directory has no newNonce endpoint")]
    NoNewNonceEndpoint,
    #[error("Unexpected newNonce status: {0}")]
    UnexpectedStatus(StatusCode),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    /// 伺服器回傳了與目前持有值相同的 nonce。
    #[error("Server reused nonce {0}")]
    Duplicate(String),
    #[error("Lock poisoned")]
    LockPoisoned,
    #[error("Nonce source exhausted")]
    Exhausted,
}

type Result<T> = std::result::Result<T, NonceError>;

/// 提供簽名用 nonce 的來源。
pub trait NonceSource: Send + Sync {
    /// 取出一個 nonce；同一個值不會被交出兩次。
    fn consume(&self) -> Result<String>;
}

/// 會話中唯一的 nonce 持有者。
///
/// 每次 [`NonceSource::consume`] 交出目前的值後，立刻以 HEAD `newNonce` 換取下一個，
/// 取出與補充在同一把鎖內完成。
#[derive(Debug)]
pub struct NonceManager {
    current: Mutex<String>,
    transport: Arc<dyn HttpTransport>,
    directory: Arc<Directory>,
}

impl NonceManager {
    pub fn new(transport: Arc<dyn HttpTransport>, directory: Arc<Directory>) -> Self {
        Self {
            current: Mutex::new(String::new()),
            transport,
            directory,
        }
    }

    /// 目前持有的 nonce，尚未取得時為 `None`。
    pub fn current(&self) -> Result<Option<String>> {
        let current = self.current.lock().map_err(|_| NonceError::LockPoisoned)?;
        Ok(Some(current.clone()).filter(|n| !n.is_empty()))
    }

    /// 向 `newNonce` 端點取得新的 nonce 並取代目前的值。
    ///
    /// 接受 200 與 204（依 RFC 8555，HEAD 與 GET 分別使用兩者，部分伺服器互換）。
    /// 新值與目前的值相同時視為協議違規。
    pub fn refresh(&self) -> Result<()> {
        let mut current = self.current.lock().map_err(|_| NonceError::LockPoisoned)?;
        self.refresh_locked(&mut current)
    }

    /// 吸收任意 ACME 回應中的 `Replay-Nonce` 標頭。沒有標頭時不做任何事。
    pub fn absorb(&self, response: &HttpResponse) -> Result<()> {
        let Some(nonce) = response.replay_nonce() else {
            return Ok(());
        };
        let mut current = self.current.lock().map_err(|_| NonceError::LockPoisoned)?;
        if *current == nonce {
            return Err(NonceError::Duplicate(nonce.to_string()));
        }
        debug!(nonce, "absorbed Replay-Nonce from response");
        *current = nonce.to_string();
        Ok(())
    }

    fn refresh_locked(&self, current: &mut String) -> Result<()> {
        let url = self
            .directory
            .resolve(endpoints::NEW_NONCE)?
            .ok_or(NonceError::NoNewNonceEndpoint)?;

        let response = self.transport.head(&url)?;
        if response.status != StatusCode::OK && response.status != StatusCode::NO_CONTENT {
            return Err(NonceError::UnexpectedStatus(response.status));
        }
        let nonce = response.replay_nonce().ok_or(NonceError::NoNonceHeader)?;
        if *current == nonce {
            return Err(NonceError::Duplicate(nonce.to_string()));
        }

        debug!(nonce, "refreshed nonce");
        *current = nonce.to_string();
        Ok(())
    }
}

impl NonceSource for NonceManager {
    fn consume(&self) -> Result<String> {
        let mut current = self.current.lock().map_err(|_| NonceError::LockPoisoned)?;
        if current.is_empty() {
            self.refresh_locked(&mut current)?;
        }
        let nonce = current.clone();
        self.refresh_locked(&mut current)?;
        Ok(nonce)
    }
}

/// 模擬 Nonce 來源，用於測試環境。
///
/// 依序交出預先給定的值；用完後若有固定值則一直回傳固定值，否則回傳
/// [`NonceError::Exhausted`]。同時記錄被呼叫的次數。
#[derive(Debug, Default)]
pub struct MockNonce {
    values: Mutex<VecDeque<String>>,
    fixed: Option<String>,
    calls: AtomicUsize,
}

impl MockNonce {
    /// 永遠回傳同一個值。
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            fixed: Some(value.into()),
            ..Self::default()
        }
    }

    /// 依序回傳給定的值。
    pub fn sequence<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: Mutex::new(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NonceSource for MockNonce {
    fn consume(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock().map_err(|_| NonceError::LockPoisoned)?;
        values
            .pop_front()
            .or_else(|| self.fixed.clone())
            .ok_or(NonceError::Exhausted)
    }
}
