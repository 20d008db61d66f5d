//! The shared retry harness for init, part, and complete requests.

use std::future::Future;
use std::time::Duration;

use log::warn;
use reqwest::Response;
use tokio::time::sleep;

use crate::constants::{INITIAL_BACKOFF_MS, MAX_REQUEST_ATTEMPTS};
use crate::errors::{Error, Result};

/// Execute one request class under the retry policy.
///
/// Successful (2xx) responses are returned with their body untouched, to
/// be consumed exactly once by the caller. 4xx responses are terminal:
/// their body is buffered and the call returns `Error::Server`
/// immediately. Anything else — transport failures and 5xx responses —
/// is retried up to three attempts with doubling backoff starting at one
/// second; `reset` runs before each backoff sleep so part uploads can
/// rewind the shared progress counter.
pub async fn execute_with_retry<F, Fut>(
    operation: &str,
    mut reset: Option<&mut (dyn FnMut() + Send)>,
    mut request: F,
) -> Result<Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<Response>>,
{
    let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
    let mut last_error: Option<Error> = None;

    for attempt in 1..=MAX_REQUEST_ATTEMPTS {
        match request().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body = response.text().await.unwrap_or_default();
                if status.is_client_error() {
                    return Err(Error::Server {
                        status: status.as_u16(),
                        body,
                    });
                }
                warn!(
                    "{} failed with {} (attempt {}/{})",
                    operation, status, attempt, MAX_REQUEST_ATTEMPTS
                );
                last_error = Some(Error::Server {
                    status: status.as_u16(),
                    body,
                });
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation, attempt, MAX_REQUEST_ATTEMPTS, e
                );
                last_error = Some(Error::Network(e));
            }
        }

        if attempt < MAX_REQUEST_ATTEMPTS {
            if let Some(reset) = reset.as_deref_mut() {
                reset();
            }
            sleep(backoff).await;
            backoff *= 2;
        }
    }

    Err(last_error.unwrap_or(Error::Cancelled))
}
