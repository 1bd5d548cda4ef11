//! Event intake for the Market Data Service
//!
//! A [`Subscriber`] drains raw JSON deliveries for one stream, one message at
//! a time, and hands each decoded message to its [`MessageHandler`]:
//!
//! - undecodable payloads are dead-lettered immediately, never retried;
//! - transient handler failures (store outage, handler deadline) are retried
//!   `retry_num` times, `retry_timeout` apart, then dead-lettered;
//! - any other failure is dead-lettered at once.
//!
//! Processing is strictly sequential per subscriber, so messages of one
//! stream are applied in delivery order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::MarketDataError;
use crate::metrics::ServiceMetrics;

/// Processes one decoded message.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(&self, message: &M) -> Result<(), MarketDataError>;
}

/// Redelivery and deadline settings for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    pub retry_timeout: Duration,
    pub retry_num: u32,
    pub handler_timeout: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            retry_timeout: Duration::from_secs(10),
            retry_num: 10,
            handler_timeout: Duration::from_secs(30),
        }
    }
}

/// A message that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    /// Exchange the message was consumed from.
    pub source: String,
    /// Raw payload, lossily decoded as UTF-8.
    pub payload: String,
    pub error_kind: String,
    pub error: String,
    /// Handler invocations made; zero when the payload never decoded.
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32 },
    /// Shutdown interrupted processing; the message is neither acked nor
    /// dead-lettered.
    Cancelled,
}

pub struct Subscriber<M> {
    source: String,
    handler: Arc<dyn MessageHandler<M>>,
    policy: RedeliveryPolicy,
    dead_letters: mpsc::UnboundedSender<DeadLetter>,
    metrics: Arc<ServiceMetrics>,
}

impl<M> Subscriber<M>
where
    M: DeserializeOwned + Send + Sync,
{
    pub fn new(
        source: impl Into<String>,
        handler: Arc<dyn MessageHandler<M>>,
        policy: RedeliveryPolicy,
        dead_letters: mpsc::UnboundedSender<DeadLetter>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            source: source.into(),
            handler,
            policy,
            dead_letters,
            metrics,
        }
    }

    /// Consume `deliveries` until the channel closes or `cancel` fires.
    pub async fn run(self, mut deliveries: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) {
        info!(source = %self.source, "Subscriber started");

        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = deliveries.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };

            if self.deliver(&payload, &cancel).await == DeliveryOutcome::Cancelled {
                break;
            }
        }

        info!(source = %self.source, "Subscriber stopped");
    }

    /// Process one raw delivery to completion.
    pub async fn deliver(&self, payload: &[u8], cancel: &CancellationToken) -> DeliveryOutcome {
        let message: M = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                let err = MarketDataError::MalformedEvent(e.to_string());
                self.dead_letter(payload, &err, 0);
                return DeliveryOutcome::DeadLettered { attempts: 0 };
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return DeliveryOutcome::Cancelled,
                r = timeout(self.policy.handler_timeout, self.handler.handle(&message)) => {
                    r.unwrap_or(Err(MarketDataError::Timeout(self.policy.handler_timeout)))
                }
            };

            match result {
                Ok(()) => {
                    debug!(source = %self.source, attempts, "Message handled");
                    return DeliveryOutcome::Handled { attempts };
                }
                Err(e) if e.is_transient() && attempts <= self.policy.retry_num => {
                    warn!(
                        source = %self.source,
                        attempt = attempts,
                        retry_in_ms = self.policy.retry_timeout.as_millis() as u64,
                        error = %e,
                        "Handler failed, redelivering"
                    );
                    self.metrics.record_redelivery();

                    tokio::select! {
                        _ = cancel.cancelled() => return DeliveryOutcome::Cancelled,
                        _ = sleep(self.policy.retry_timeout) => {}
                    }
                }
                Err(e) => {
                    self.dead_letter(payload, &e, attempts);
                    return DeliveryOutcome::DeadLettered { attempts };
                }
            }
        }
    }

    fn dead_letter(&self, payload: &[u8], err: &MarketDataError, attempts: u32) {
        let letter = DeadLetter {
            id: Uuid::now_v7(),
            source: self.source.clone(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            error_kind: err.kind().to_string(),
            error: err.to_string(),
            attempts,
            dead_lettered_at: Utc::now(),
        };

        error!(
            source = %self.source,
            dead_letter_id = %letter.id,
            kind = err.kind(),
            attempts,
            error = %err,
            "Message dead-lettered"
        );
        self.metrics.record_dead_letter();

        if self.dead_letters.send(letter).is_err() {
            error!(source = %self.source, "Dead-letter channel closed; letter dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Deserialize)]
    struct Ping {
        n: u32,
    }

    /// Fails with `error` for the first `failures` calls.
    struct Flaky {
        failures: u32,
        error: MarketDataError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler<Ping> for Flaky {
        async fn handle(&self, message: &Ping) -> Result<(), MarketDataError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(message.n, 7);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    struct Stuck;

    #[async_trait]
    impl MessageHandler<Ping> for Stuck {
        async fn handle(&self, _: &Ping) -> Result<(), MarketDataError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn policy() -> RedeliveryPolicy {
        RedeliveryPolicy {
            retry_timeout: Duration::from_millis(10),
            retry_num: 2,
            handler_timeout: Duration::from_secs(1),
        }
    }

    fn subscriber(
        handler: Arc<dyn MessageHandler<Ping>>,
    ) -> (Subscriber<Ping>, mpsc::UnboundedReceiver<DeadLetter>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscriber::new(
            "test.exchange",
            handler,
            policy(),
            tx,
            Arc::new(ServiceMetrics::new()),
        );
        (sub, rx)
    }

    fn outage() -> MarketDataError {
        StoreError::Unavailable("down".into()).into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_then_handled() {
        let handler = Arc::new(Flaky {
            failures: 2,
            error: outage(),
            calls: AtomicU32::new(0),
        });
        let (sub, mut dead) = subscriber(handler.clone());

        let outcome = sub.deliver(br#"{"n": 7}"#, &CancellationToken::new()).await;
        assert_eq!(outcome, DeliveryOutcome::Handled { attempts: 3 });
        assert!(dead.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_dead_letters() {
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            error: outage(),
            calls: AtomicU32::new(0),
        });
        let (sub, mut dead) = subscriber(handler.clone());

        let outcome = sub.deliver(br#"{"n": 7}"#, &CancellationToken::new()).await;
        assert_eq!(outcome, DeliveryOutcome::DeadLettered { attempts: 3 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        let letter = dead.try_recv().unwrap();
        assert_eq!(letter.source, "test.exchange");
        assert_eq!(letter.error_kind, "StoreUnavailable");
        assert_eq!(letter.attempts, 3);
    }

    #[tokio::test]
    async fn test_malformed_payload_dead_lettered_without_handling() {
        let handler = Arc::new(Flaky {
            failures: 0,
            error: outage(),
            calls: AtomicU32::new(0),
        });
        let (sub, mut dead) = subscriber(handler.clone());

        let outcome = sub.deliver(b"{not json", &CancellationToken::new()).await;
        assert_eq!(outcome, DeliveryOutcome::DeadLettered { attempts: 0 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let letter = dead.try_recv().unwrap();
        assert_eq!(letter.error_kind, "MalformedEvent");
        assert_eq!(letter.payload, "{not json");
    }

    #[tokio::test]
    async fn test_non_transient_failure_not_retried() {
        let handler = Arc::new(Flaky {
            failures: 1,
            error: MarketDataError::MalformedEvent("bad".into()),
            calls: AtomicU32::new(0),
        });
        let (sub, _dead) = subscriber(handler.clone());

        let outcome = sub.deliver(br#"{"n": 7}"#, &CancellationToken::new()).await;
        assert_eq!(outcome, DeliveryOutcome::DeadLettered { attempts: 1 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_deadline_is_transient() {
        let (sub, mut dead) = subscriber(Arc::new(Stuck));

        let outcome = sub.deliver(br#"{"n": 7}"#, &CancellationToken::new()).await;
        assert_eq!(outcome, DeliveryOutcome::DeadLettered { attempts: 3 });
        assert_eq!(dead.try_recv().unwrap().error_kind, "Timeout");
    }

    #[tokio::test]
    async fn test_run_drains_until_channel_closes() {
        let handler = Arc::new(Flaky {
            failures: 0,
            error: outage(),
            calls: AtomicU32::new(0),
        });
        let (sub, _dead) = subscriber(handler.clone());
        let (tx, rx) = mpsc::channel(8);

        tx.send(br#"{"n": 7}"#.to_vec()).await.unwrap();
        tx.send(br#"{"n": 7}"#.to_vec()).await.unwrap();
        drop(tx);

        sub.run(rx, CancellationToken::new()).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (sub, _dead) = subscriber(Arc::new(Stuck));
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        sub.run(rx, cancel).await;
    }
}
