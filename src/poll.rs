//! 有界重試的狀態輪詢。
//!
//! 固定間隔、無指數退避；間隔中的等待可由 [`CancelToken`] 中斷。

use std::{
    sync::{Arc, Condvar, Mutex},
    thread,
    time::Duration,
};

use serde::Deserialize;
use tracing::debug;

/// 輪詢次數與間隔。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// 最多抓取次數，0 視為 1。
    pub max_tries: u32,
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
}

impl PollPolicy {
    pub const DEFAULT_MAX_TRIES: u32 = 5;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(max_tries: u32, interval: Duration) -> Self {
        Self {
            max_tries,
            interval,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_TRIES, Self::DEFAULT_INTERVAL)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// 輪詢結果。未達目標狀態不是錯誤，由呼叫端決定如何處理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// 第 `attempts` 次抓取時狀態符合目標。
    Matched { attempts: u32 },
    /// 用盡次數仍未符合，附上最後一次看到的狀態。
    Exhausted { attempts: u32, last_status: String },
    /// 在等待間隔中被取消。
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Matched { attempts }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// 可跨執行緒共用的取消旗標，取消時會立刻喚醒正在等待的輪詢。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 最多等待 `timeout`；回傳是否已被取消。
    fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// 反覆呼叫 `fetch` 取得資源狀態，直到等於 `target` 或用盡次數。
///
/// 第一次抓取前不等待；兩次抓取之間等待 `policy.interval`。
/// `fetch` 的錯誤會立即傳回，不計入重試。
pub fn poll_until<F, E>(
    policy: &PollPolicy,
    target: &str,
    cancel: Option<&CancelToken>,
    mut fetch: F,
) -> Result<PollOutcome, E>
where
    F: FnMut() -> Result<String, E>,
{
    let max_tries = policy.max_tries.max(1);
    let mut last_status = String::new();

    for attempt in 1..=max_tries {
        last_status = fetch()?;
        debug!(attempt, max_tries, status = %last_status, target, "polled resource status");
        if last_status == target {
            return Ok(PollOutcome::Matched { attempts: attempt });
        }
        if attempt == max_tries {
            break;
        }
        let cancelled = match cancel {
            Some(token) => token.wait(policy.interval),
            None => {
                thread::sleep(policy.interval);
                false
            }
        };
        if cancelled {
            return Ok(PollOutcome::Cancelled { attempts: attempt });
        }
    }

    Ok(PollOutcome::Exhausted {
        attempts: max_tries,
        last_status,
    })
}
