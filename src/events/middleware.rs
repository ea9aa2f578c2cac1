//! Handler middleware: correlation ids, retries, panic recovery.
//!
//! Each function returns a [`Middleware`] that wraps the next handler.
//! The router applies them in registration order, first registered
//! outermost.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, Span, error, info_span, warn};
use uuid::Uuid;

use crate::domain::{AppError, Envelope};

use super::{HandlerFunc, HandlerFuture, Middleware};

/// Metadata key carrying the correlation id.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Retry policy for failed handlers.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(100),
            multiplier: 1.0,
            max_interval: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_interval)
    }
}

/// Stamps a correlation id on the message, reusing one already present.
///
/// The id is recorded on the surrounding `correlation_id` span field when
/// there is one, and the handler runs inside a span carrying it.
pub fn correlation_id() -> Middleware {
    Arc::new(|next: HandlerFunc| {
        let handler: HandlerFunc = Arc::new(move |mut envelope: Envelope| {
            let next = Arc::clone(&next);
            let id = envelope
                .metadata
                .entry(CORRELATION_ID_KEY.to_string())
                .or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            Span::current().record("correlation_id", id.as_str());
            let span = info_span!("correlated", correlation_id = %id);
            Box::pin(async move { next(envelope).await }.instrument(span)) as HandlerFuture
        });
        handler
    })
}

/// Re-runs a failing handler until it succeeds or attempts run out.
///
/// Waits `initial_interval` before the second attempt and grows the wait by
/// `multiplier`, capped at `max_interval`. The last error is returned.
pub fn retry(config: RetryConfig) -> Middleware {
    Arc::new(move |next: HandlerFunc| {
        let config = config.clone();
        let handler: HandlerFunc = Arc::new(move |envelope: Envelope| {
            let next = Arc::clone(&next);
            let config = config.clone();
            Box::pin(async move {
                let mut interval = config.initial_interval;
                let mut attempt = 1;
                loop {
                    match next(envelope.clone()).await {
                        Ok(()) => return Ok(()),
                        Err(e) if attempt >= config.max_attempts => return Err(e),
                        Err(e) => {
                            warn!(
                                attempt,
                                max_attempts = config.max_attempts,
                                retry_in = ?interval,
                                error = %e,
                                "Handler failed, retrying"
                            );
                            metrics::counter!("event_retries_total").increment(1);
                            tokio::time::sleep(interval).await;
                            interval = config.next_interval(interval);
                            attempt += 1;
                        }
                    }
                }
            }) as HandlerFuture
        });
        handler
    })
}

/// Turns a handler panic into an ordinary [`AppError::Internal`].
pub fn recoverer() -> Middleware {
    Arc::new(|next: HandlerFunc| {
        let handler: HandlerFunc = Arc::new(move |envelope: Envelope| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                let task = tokio::spawn(async move { next(envelope).await }.in_current_span());
                match task.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        let reason = panic_message(e.into_panic());
                        error!(panic = %reason, "Handler panicked");
                        Err(AppError::Internal(format!("handler panicked: {reason}")))
                    }
                    Err(e) => Err(AppError::Internal(format!("handler task failed: {e}"))),
                }
            }) as HandlerFuture
        });
        handler
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler_fn;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_interval, Duration::from_millis(100));
        assert_eq!(config.next_interval(config.initial_interval), Duration::from_millis(100));
    }

    #[test]
    fn test_next_interval_is_capped() {
        let config = RetryConfig {
            multiplier: 4.0,
            max_interval: Duration::from_millis(300),
            ..Default::default()
        };
        assert_eq!(config.next_interval(Duration::from_millis(100)), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_correlation_id_is_minted_once_and_reused() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = correlation_id()(handler_fn(move |env: Envelope| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(env.metadata.get(CORRELATION_ID_KEY).cloned());
                Ok::<(), AppError>(())
            }
        }));

        handler(Envelope::new(vec![])).await.unwrap();
        handler(Envelope::new(vec![]).with_metadata(CORRELATION_ID_KEY, "given")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[0].as_deref().is_some_and(|id| Uuid::parse_str(id).is_ok()));
        assert_eq!(seen[1].as_deref(), Some("given"));
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler = retry(fast_retry(3))(handler_fn(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), AppError>(AppError::Internal("always".to_string()))
            }
        }));

        assert!(handler(Envelope::new(vec![])).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_waits_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler = retry(RetryConfig::default())(handler_fn(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::Internal("not yet".to_string()))
                } else {
                    Ok(())
                }
            }
        }));

        let started = Instant::now();
        assert!(handler(Envelope::new(vec![])).await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recoverer_converts_panic() {
        let handler = recoverer()(handler_fn(|_| async {
            let explode = true;
            if explode {
                panic!("boom");
            }
            Ok::<(), AppError>(())
        }));

        match handler(Envelope::new(vec![])).await {
            Err(AppError::Internal(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recoverer_passes_results_through() {
        let handler = recoverer()(handler_fn(|_| async { Ok::<(), AppError>(()) }));
        assert!(handler(Envelope::new(vec![])).await.is_ok());
    }
}
