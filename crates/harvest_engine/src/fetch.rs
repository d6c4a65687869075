use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::decode::{decode_page_body, DecodedBody};
use crate::transport::{PageRequest, Transport, TransportError, TransportResponse};
use crate::types::{FailureKind, FetchFailure, PageResult};

/// Substring identifying the backend-busy condition that is worth waiting out.
const TRANSIENT_BACKEND_SIGNATURE: &str = "backend search database";

/// How much of a non-200 body is kept in the failure message.
const BODY_PREVIEW_BYTES: usize = 200;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Attempts per page before the page counts as failed.
    pub retry_count: usize,
    /// Base delay the backoff schedule scales from.
    pub retry_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Outcome of classifying one attempt at one page.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(PageResult),
    /// Transient condition; wait `delay` and try the same page again.
    RetryAfter { delay: Duration, reason: String },
    /// Not worth retrying; surface immediately.
    Fail(FetchFailure),
}

/// Classify one transport attempt. `attempt` is 0-based.
///
/// The backoff schedule: a busy backend waits longest
/// (`retry_delay * (attempt + 2)`), server errors and connection failures
/// escalate (`retry_delay * (attempt + 1)`), timeouts and unexpected
/// transport failures wait the flat base delay.
pub fn classify_attempt(
    outcome: Result<TransportResponse, TransportError>,
    attempt: usize,
    retry_delay: Duration,
) -> AttemptOutcome {
    let escalation = attempt as u32;
    match outcome {
        Ok(response) if response.status == 200 => {
            classify_body(&response.body, escalation, retry_delay)
        }
        Ok(response) if response.status >= 500 => AttemptOutcome::RetryAfter {
            delay: retry_delay * (escalation + 1),
            reason: format!("HTTP {}", response.status),
        },
        Ok(response) => {
            let message = format!("HTTP {}: {}", response.status, body_preview(&response.body));
            AttemptOutcome::Fail(FetchFailure::new(
                FailureKind::HttpStatus(response.status),
                message,
            ))
        }
        Err(TransportError::Timeout) => AttemptOutcome::RetryAfter {
            delay: retry_delay,
            reason: "request timed out".to_string(),
        },
        Err(TransportError::Connection(message)) => AttemptOutcome::RetryAfter {
            delay: retry_delay * (escalation + 1),
            reason: format!("connection error: {message}"),
        },
        Err(TransportError::Other(message)) => AttemptOutcome::RetryAfter {
            delay: retry_delay,
            reason: format!("unexpected error: {message}"),
        },
    }
}

fn classify_body(body: &[u8], escalation: u32, retry_delay: Duration) -> AttemptOutcome {
    match decode_page_body(body) {
        Some(DecodedBody::Page(page)) => AttemptOutcome::Success(page),
        Some(DecodedBody::Errors(errors)) => {
            let message = errors
                .into_iter()
                .next()
                .unwrap_or_else(|| "unknown error".to_string());
            if message.contains(TRANSIENT_BACKEND_SIGNATURE) {
                AttemptOutcome::RetryAfter {
                    delay: retry_delay * (escalation + 2),
                    reason: message,
                }
            } else {
                AttemptOutcome::Fail(FetchFailure::new(FailureKind::Backend, message))
            }
        }
        None => AttemptOutcome::Fail(FetchFailure::new(
            FailureKind::Malformed,
            "unrecognized response structure",
        )),
    }
}

fn body_preview(body: &[u8]) -> String {
    let end = body.len().min(BODY_PREVIEW_BYTES);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Sleep that gives up when `cancel` fires; returns true if it did.
pub(crate) async fn sleep_cancellable(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Fetches single pages with bounded retries and classified backoff.
///
/// All failure comes back as a typed result; nothing panics or propagates
/// past this boundary.
pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    template: PageRequest,
    settings: RetrySettings,
    cancel: CancellationToken,
}

impl PageFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        template: PageRequest,
        settings: RetrySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            template,
            settings,
            cancel,
        }
    }

    /// Up to `retry_count` attempts for the page at `cursor`.
    pub async fn fetch_page(&self, cursor: Option<String>) -> Result<PageResult, FetchFailure> {
        let request = self.template.with_cursor(cursor);
        let mut last_error = String::from("no attempts made");
        for attempt in 0..self.settings.retry_count {
            let outcome = self.transport.get_page(&request).await;
            match classify_attempt(outcome, attempt, self.settings.retry_delay) {
                AttemptOutcome::Success(page) => return Ok(page),
                AttemptOutcome::Fail(failure) => {
                    log::warn!("page fetch failed without retry: {failure}");
                    return Err(failure);
                }
                AttemptOutcome::RetryAfter { delay, reason } => {
                    log::warn!(
                        "attempt {}/{} failed: {reason}",
                        attempt + 1,
                        self.settings.retry_count
                    );
                    last_error = reason;
                    if attempt + 1 < self.settings.retry_count {
                        log::info!("waiting {delay:?} before retry");
                        if sleep_cancellable(&self.cancel, delay).await {
                            return Err(FetchFailure::new(
                                FailureKind::Cancelled,
                                "cancelled during backoff",
                            ));
                        }
                    }
                }
            }
        }
        log::error!(
            "all {} attempts failed, last error: {last_error}",
            self.settings.retry_count
        );
        Err(FetchFailure::new(FailureKind::Exhausted, last_error))
    }
}
