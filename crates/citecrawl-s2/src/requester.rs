//! Rate-limited requester with bounded retry

use std::sync::Arc;
use std::time::Duration;

use citecrawl_core::{RetryPolicy, UpstreamError};
use serde::de::DeserializeOwned;

use crate::pacer::Pacer;
use crate::transport::{ApiRequest, RawResponse, Transport};

/// Longest body excerpt carried in an error message.
const BODY_EXCERPT: usize = 200;

/// Sends API requests through a [`Transport`], pacing every attempt and
/// retrying 429 / 5xx / connection failures according to `retry`.
pub struct Requester {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    pacer: Pacer,
}

impl Requester {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, pacer: Pacer) -> Self {
        Self {
            transport,
            retry,
            pacer,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send `request`, returning the first 2xx response.
    ///
    /// Transient failures are retried until the attempt budget runs out and
    /// then reported as [`UpstreamError::Transient`]; anything else comes back
    /// as [`UpstreamError::Permanent`] without a retry.
    pub fn send(&self, request: &ApiRequest) -> Result<RawResponse, UpstreamError> {
        let max = self.retry.attempts();
        let mut attempt = 1u32;
        loop {
            self.pacer.acquire();
            let (status, retry_after, message) = match self.transport.execute(request) {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) if is_transient_status(resp.status) => {
                    (Some(resp.status), resp.retry_after, excerpt(&resp.body))
                }
                Ok(resp) => {
                    return Err(UpstreamError::permanent(
                        Some(resp.status),
                        format!("{request}: {}", excerpt(&resp.body)),
                    ));
                }
                Err(e) => (None, None, e.message),
            };

            if attempt >= max {
                return Err(UpstreamError::transient(
                    status,
                    attempt,
                    format!("{request}: {message}"),
                ));
            }

            let delay = self.retry_delay(attempt, retry_after);
            log::warn!(
                "{request} failed (status {}), retry {attempt}/{} in {delay:?}",
                status.map_or("?".to_string(), |s| s.to_string()),
                max - 1,
            );
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    /// [`send`](Self::send) and decode the body as JSON. A body that does not
    /// decode is a permanent failure.
    pub fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, UpstreamError> {
        let response = self.send(request)?;
        serde_json::from_str(&response.body)
            .map_err(|e| UpstreamError::malformed(format!("{request}: {e}")))
    }

    /// Policy backoff, stretched to the server's Retry-After when it asks for
    /// longer, never beyond the policy maximum.
    fn retry_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.retry.delay(attempt);
        match retry_after {
            Some(ra) => ra.max(backoff).min(self.retry.max_delay),
            None => backoff,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT {
        return trimmed.to_string();
    }
    let mut s: String = trimmed.chars().take(BODY_EXCERPT).collect();
    s.push('…');
    s
}
