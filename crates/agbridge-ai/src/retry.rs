use std::sync::atomic::{AtomicU64, Ordering};

use agbridge_core::current_unix_timestamp_ms;
use chrono::{DateTime, Utc};

use crate::BridgeAiError;

const BASE_BACKOFF_MS: u64 = 200;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Retry limits for one provider call.
pub(crate) struct RetryPolicy {
    pub max_retries: usize,
    /// Total wall-clock budget in milliseconds; zero disables the budget.
    pub budget_ms: u64,
}

impl RetryPolicy {
    /// Exponential backoff, raised to the server's `retry-after` when larger.
    pub fn delay_ms(&self, attempt: usize, retry_after_ms: Option<u64>) -> u64 {
        let backoff = BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(6));
        retry_after_ms.map_or(backoff, |floor| backoff.max(floor))
    }

    pub fn allows(&self, attempt: usize, elapsed_ms: u64, delay_ms: u64) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        self.budget_ms == 0 || elapsed_ms.saturating_add(delay_ms) <= self.budget_ms
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub(crate) fn is_retryable_error(error: &BridgeAiError) -> bool {
    match error {
        BridgeAiError::Http(error) => error.is_timeout() || error.is_connect(),
        _ => false,
    }
}

pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub(crate) fn new_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("agbridge-{}-{count}", current_unix_timestamp_ms())
}
