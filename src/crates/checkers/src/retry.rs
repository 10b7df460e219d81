//! Shared tries-with-interval retry loop used by the probes.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace};

use crate::{CheckError, Result};

/// Runs `attempt` up to `tries` times, sleeping `interval` between failures.
///
/// Returns on the first success; once every try has failed, the last error is
/// folded into [`CheckError::RetriesExhausted`].
pub(crate) async fn with_retries<F, Fut>(
    kind: &'static str,
    tries: u8,
    interval: Duration,
    attempt: F,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let tries = tries.max(1);
    let mut last: Option<CheckError> = None;

    for n in 1..=tries {
        trace!(check = kind, attempt = n, "running check");

        match attempt().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(check = kind, attempt = n, error = %err, "attempt failed");
                last = Some(err);
            }
        }

        if n < tries {
            tokio::time::sleep(interval).await;
        }
    }

    Err(CheckError::RetriesExhausted {
        tries,
        interval,
        last: last.map(|err| err.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_on_first_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(CheckError::Unhealthy("flap".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_tries_and_reports_last_error() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CheckError::Unhealthy("still down".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(CheckError::RetriesExhausted { tries, last, .. }) => {
                assert_eq!(tries, 3);
                assert_eq!(last, "still down");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_tries_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = with_retries("test", 0, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CheckError::Unhealthy("down".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
