//! Feed retrieval with bounded retry.
//!
//! One call to [`fetch_feed`] drives a small retry loop: each attempt gets
//! its own timeout, failures back off exponentially, and exhaustion surfaces
//! whatever the last attempt reported.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::RawPayload;
use crate::registry::FeedDescriptor;

/// Knobs for the retry loop. Defaults match the provider's behavior under
/// normal load; the CLI can override all three.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Per-attempt deadline covering connect, headers, and body.
    pub timeout: Duration,
    /// Retries after the first attempt, so `max_retries = 3` means up to
    /// four requests on the wire.
    pub max_retries: u32,
    /// First backoff delay; doubles on each further failure.
    pub backoff_base: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("connection failed: {detail}")]
    ConnectionFailed { detail: String },
    #[error("upstream returned HTTP {status}")]
    HttpStatus { status: u16 },
}

enum RetryState {
    Attempting { attempt: u32 },
    Backoff { next_attempt: u32, delay: Duration },
}

/// Fetches one feed's current payload, retrying transient failures.
///
/// All three error variants are considered transient and retried up to
/// `options.max_retries` times. When attempts run out, the error from the
/// final attempt is returned.
pub async fn fetch_feed<C: HttpClient + ?Sized>(
    client: &C,
    feed: &FeedDescriptor,
    options: &FetchOptions,
) -> Result<RawPayload, FetchError> {
    let attempts_allowed = options.max_retries + 1;
    let mut state = RetryState::Attempting { attempt: 1 };

    loop {
        match state {
            RetryState::Attempting { attempt } => {
                debug!(feed_id = %feed.id, attempt, "requesting feed");
                match attempt_fetch(client, feed, options.timeout).await {
                    Ok(payload) => return Ok(payload),
                    Err(err) if attempt < attempts_allowed => {
                        let delay = options.backoff_base * 2u32.pow(attempt - 1);
                        warn!(
                            feed_id = %feed.id,
                            attempt,
                            error = %err,
                            retry_in_ms = delay.as_millis() as u64,
                            "fetch attempt failed, backing off"
                        );
                        state = RetryState::Backoff {
                            next_attempt: attempt + 1,
                            delay,
                        };
                    }
                    Err(err) => {
                        warn!(feed_id = %feed.id, attempt, error = %err, "fetch attempts exhausted");
                        return Err(err);
                    }
                }
            }
            RetryState::Backoff {
                next_attempt,
                delay,
            } => {
                tokio::time::sleep(delay).await;
                state = RetryState::Attempting {
                    attempt: next_attempt,
                };
            }
        }
    }
}

async fn attempt_fetch<C: HttpClient + ?Sized>(
    client: &C,
    feed: &FeedDescriptor,
    timeout: Duration,
) -> Result<RawPayload, FetchError> {
    let url =
        reqwest::Url::parse(&feed.endpoint).map_err(|e| FetchError::ConnectionFailed {
            detail: format!("bad endpoint {}: {e}", feed.endpoint),
        })?;
    let mut request = reqwest::Request::new(reqwest::Method::GET, url);
    request.headers_mut().insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/x-protobuf"),
    );

    let response = tokio::time::timeout(timeout, client.execute(request))
        .await
        .map_err(|_| FetchError::Timeout { timeout })?
        .map_err(|e| FetchError::ConnectionFailed {
            detail: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
        });
    }

    let bytes = tokio::time::timeout(timeout, response.bytes())
        .await
        .map_err(|_| FetchError::Timeout { timeout })?
        .map_err(|e| FetchError::ConnectionFailed {
            detail: e.to_string(),
        })?;

    Ok(RawPayload {
        feed_id: feed.id.clone(),
        fetched_at: Utc::now(),
        bytes,
        http_status: status.as_u16(),
    })
}


#[cfg(test)]
mod tests {
    use super::mock::{MockClient, MockResponse};
    use super::*;
    use crate::registry::FeedDescriptor;

    fn descriptor() -> FeedDescriptor {
        FeedDescriptor {
            id: "l".to_string(),
            endpoint: "http://mock.test/gtfs-l".to_string(),
            lines: ["L".to_string()].into_iter().collect(),
        }
    }

    fn options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let client = MockClient::new(vec![MockResponse::Status(200, b"\x0a\x00".to_vec())]);

        let payload = fetch_feed(&client, &descriptor(), &options()).await.unwrap();

        assert_eq!(payload.feed_id, "l");
        assert_eq!(payload.http_status, 200);
        assert_eq!(payload.bytes.as_ref(), b"\x0a\x00");
        assert_eq!(client.calls(), 1);
        assert_eq!(client.accept_headers(), vec!["application/x-protobuf"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_then_succeeds() {
        let client = MockClient::new(vec![
            MockResponse::Status(503, vec![]),
            MockResponse::Status(503, vec![]),
            MockResponse::Status(200, b"ok".to_vec()),
        ]);

        let payload = fetch_feed(&client, &descriptor(), &options()).await.unwrap();

        assert_eq!(payload.http_status, 200);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let client = MockClient::new(vec![
            MockResponse::Status(500, vec![]),
            MockResponse::Status(502, vec![]),
            MockResponse::Status(503, vec![]),
            MockResponse::Status(504, vec![]),
        ]);

        let err = fetch_feed(&client, &descriptor(), &options())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { status: 504 }));
        // max_retries = 3 means four requests total.
        assert_eq!(client.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let client = MockClient::new(vec![
            MockResponse::Hang,
            MockResponse::Status(200, b"late but fine".to_vec()),
        ]);

        let payload = fetch_feed(&client, &descriptor(), &options()).await.unwrap();

        assert_eq!(payload.http_status, 200);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exhaustion_surfaces_timeout_error() {
        let client = MockClient::new(vec![
            MockResponse::Hang,
            MockResponse::Hang,
        ]);
        let opts = FetchOptions {
            max_retries: 1,
            ..options()
        };

        let err = fetch_feed(&client, &descriptor(), &opts).await.unwrap_err();

        assert!(matches!(err, FetchError::Timeout { .. }));
        assert_eq!(client.calls(), 2);
    }
}
